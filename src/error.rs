//! # Error Types
//!
//! Error handling for the world connection protocol.
//!
//! Every failure a connection can hit is a variant of [`ProtocolError`]. The
//! connection state machine treats most of them as fatal: a peer that sends
//! an oversized header, an out-of-state opcode or a bad proof is assumed to be
//! hostile, so there is no retry and no resynchronization.
//!
//! ## Error Categories
//! - **Transport**: socket read/write failures, peer reset
//! - **Framing**: oversized length claims, truncated streams
//! - **Authentication**: unknown account, proof mismatch, rejected build
//! - **Protocol state**: opcode not legal in the current state
//! - **Flood**: ping flood detected
//! - **Resource**: outbound queue cap exceeded
//!
//! ## Example Usage
//! ```rust
//! use world_protocol::error::{ProtocolError, Result};
//! use tracing::error;
//!
//! fn check_length(claimed: usize, max: usize) -> Result<()> {
//!     if claimed > max {
//!         return Err(ProtocolError::OversizedPacket(claimed));
//!     }
//!     Ok(())
//! }
//!
//! if let Err(e) = check_length(70_000, 10_240) {
//!     error!(error = %e, fatal = e.is_fatal(), "Rejected frame");
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_TRUNCATED_STREAM: &str = "Stream ended inside a frame";
    pub const ERR_REASSEMBLER_POISONED: &str = "Inbound stream desynchronized by an earlier error";

    /// Handshake errors
    pub const ERR_EMPTY_SECRET: &str = "Shared secret must not be empty";
    pub const ERR_MISSING_ACCOUNT_TERMINATOR: &str = "Account name is not NUL-terminated";
    pub const ERR_ACCOUNT_NOT_UTF8: &str = "Account name is not valid UTF-8";
    pub const ERR_SHORT_PAYLOAD: &str = "Payload shorter than its fixed fields";

    /// Synchronization errors
    pub const ERR_KEY_STORE_READ_LOCK: &str = "Failed to acquire read lock on key store";
    pub const ERR_KEY_STORE_WRITE_LOCK: &str = "Failed to acquire write lock on key store";
}

/// ProtocolError is the primary error type for all connection operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame header")]
    InvalidHeader,

    #[error("Frame too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Opcode {0:#x} does not fit the outbound header")]
    InvalidOpcode(u32),

    #[error("Stream truncated: {0}")]
    TruncatedStream(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Authentication failed for account {0}")]
    AuthenticationFailed(String),

    #[error("Unsupported client build: {0}")]
    UnsupportedBuild(u32),

    #[error("Invalid shared secret: {0}")]
    InvalidSecret(String),

    #[error("Unexpected message {opcode:#x} in state {state}")]
    UnexpectedMessage { opcode: u32, state: String },

    #[error("Ping flood detected: {0} over-speed pings")]
    PingFlood(u32),

    #[error("Outbound backpressure exceeded: {frames} frames / {bytes} bytes pending")]
    BackpressureExceeded { frames: usize, bytes: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error must terminate the connection it occurred on.
    ///
    /// Outbound sizing errors are the caller's mistake, not the peer's, so they
    /// are reported without tearing the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::InvalidOpcode(_)
                | ProtocolError::ConfigError(_)
                | ProtocolError::Custom(_)
        )
    }

    /// Coarse classification used for logging and metrics.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed => ErrorCategory::Transport,
            ProtocolError::InvalidHeader
            | ProtocolError::OversizedPacket(_)
            | ProtocolError::TruncatedStream(_)
            | ProtocolError::MalformedPayload(_)
            | ProtocolError::InvalidOpcode(_) => ErrorCategory::Framing,
            ProtocolError::UnknownAccount(_)
            | ProtocolError::AuthenticationFailed(_)
            | ProtocolError::UnsupportedBuild(_)
            | ProtocolError::InvalidSecret(_) => ErrorCategory::Authentication,
            ProtocolError::UnexpectedMessage { .. } => ErrorCategory::ProtocolState,
            ProtocolError::PingFlood(_) => ErrorCategory::Flood,
            ProtocolError::BackpressureExceeded { .. } => ErrorCategory::Resource,
            ProtocolError::ConfigError(_) | ProtocolError::Custom(_) => ErrorCategory::Other,
        }
    }
}

/// Error taxonomy for connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Framing,
    Authentication,
    ProtocolState,
    Flood,
    Resource,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Framing => "framing",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::ProtocolState => "protocol_state",
            ErrorCategory::Flood => "flood",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
