//! # world-protocol
//!
//! Per-connection protocol engine for persistent-world game servers.
//!
//! A [`Connection`](protocol::Connection) turns the byte stream of one client
//! into ordered frames for its game session, enforces the auth handshake
//! before any game traffic is trusted, encrypts frame headers once the
//! session is authenticated, and coalesces outbound frames into few writes.
//!
//! ## Layout
//! - [`core`]: frames, direction-specific wire headers, peer codec
//! - [`protocol`]: reassembly, coalescing, handshake, connection state machine
//! - [`transport`]: the non-blocking [`Transport`](transport::Transport) seam and the tokio TCP driver
//! - [`utils`]: header cipher, logging setup, metrics
//! - [`config`], [`error`]: ambient configuration and error types
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use world_protocol::config::WorldConfig;
//! use world_protocol::protocol::{
//!     AuthenticatedPeer, ConnectionContext, InMemoryKeyStore, SessionBinder, WorldSession,
//! };
//! use world_protocol::core::packet::Frame;
//!
//! struct Echo(AuthenticatedPeer);
//!
//! impl WorldSession for Echo {
//!     fn handle_frame(&self, frame: Frame) {
//!         let _ = self.0.handle.send(frame);
//!     }
//! }
//!
//! struct Binder(std::sync::Mutex<Vec<Arc<Echo>>>);
//!
//! impl SessionBinder for Binder {
//!     fn bind(&self, peer: AuthenticatedPeer) -> Arc<dyn WorldSession> {
//!         let session = Arc::new(Echo(peer));
//!         if let Ok(mut sessions) = self.0.lock() {
//!             sessions.push(Arc::clone(&session));
//!         }
//!         session
//!     }
//! }
//!
//! # async fn run() -> world_protocol::error::Result<()> {
//! let config = WorldConfig::from_env()?;
//! world_protocol::utils::logging::init_logging(&config.logging)?;
//!
//! let ctx = ConnectionContext::new(
//!     Arc::new(config),
//!     Arc::new(InMemoryKeyStore::new()),
//!     Arc::new(Binder(Default::default())),
//! );
//! world_protocol::transport::tcp::start_server(ctx).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::core::packet::Frame;
pub use crate::error::{ProtocolError, Result};
