//! # World Connection Protocol
//!
//! Everything between raw socket bytes and the game session.
//!
//! ## Components
//! - **Reassembler**: chunk-independent frame extraction
//! - **Coalescer**: buffered, ordered outbound writes with a bounded queue
//! - **Handshake**: auth challenge, auth session and proof verification
//! - **Connection**: lifecycle state machine and the single close path
//! - **Flood guard**: over-speed ping detection
//! - **Session**: key store, binder and session seams
//!
//! ## Lifecycle
//! ```text
//! accept -> SMSG_AUTH_CHALLENGE -> CMSG_AUTH_SESSION -> SMSG_AUTH_RESPONSE (encrypted) -> game traffic
//! ```

pub mod coalescer;
pub mod connection;
pub mod flood_guard;
pub mod handshake;
pub mod opcodes;
pub mod reassembler;
pub mod session;

pub use connection::{CloseReason, Connection, ConnectionContext, ConnectionState};
pub use session::{
    AuthenticatedPeer, ConnectionHandle, InMemoryKeyStore, SessionBinder, SessionKey,
    SessionKeyStore, WorldSession,
};
