//! # Transport Layer
//!
//! The connection engine never waits on a socket. It writes through the
//! [`Transport`] trait, whose single method must return immediately: accept
//! some prefix of the buffer, or report `WouldBlock`.
//!
//! ## Implementations
//! - `tokio::net::tcp::OwnedWriteHalf` (see [`tcp`])
//! - `Vec<u8>`: accepts everything; handy for recording output

use std::io;

pub mod tcp;

/// Non-blocking byte sink.
pub trait Transport {
    /// Write a prefix of `buf` without blocking and return its length.
    ///
    /// `Err(WouldBlock)` means nothing could be written right now; any other
    /// error is fatal for the connection.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Transport for Vec<u8> {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).try_write(buf)
    }
}
