//! # Utility Modules
//!
//! Supporting utilities for header cryptography, logging and metrics.
//!
//! ## Components
//! - **Crypto**: per-connection header stream cipher
//! - **Logging**: `tracing-subscriber` setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Key material zeroed on drop (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;

pub use crypto::HeaderCipher;
pub use metrics::{global_metrics, Metrics};
