//! # Core Protocol Components
//!
//! Frame layout, wire headers and peer-side framing.
//!
//! ## Components
//! - **Packet**: [`Frame`](packet::Frame) and a bounds-checked payload reader
//! - **Header**: direction-specific wire headers and frame encoding
//! - **Codec**: Tokio codec for the client end of a world connection
//!
//! ## Wire Format
//! ```text
//! client -> server   [Length(2)] [Opcode(4)] [Payload(N)]
//! server -> client   [Length(2)] [Opcode(2)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum inbound payload: 10 KiB (prevents memory exhaustion)
//! - Length validation before allocation
//! - Headers encrypted once the session is authenticated

pub mod codec;
pub mod header;
pub mod packet;
