//! Outbound write coalescing.
//!
//! The world server produces a steady stream of small frames. Writing each
//! one as it is produced costs a syscall per frame, so frames are appended to
//! a fixed-capacity buffer instead and written together when:
//!
//! - the buffer cannot take the next frame (early flush), or
//! - the periodic tick fires (bounded latency for quiet connections).
//!
//! When the transport cannot take the buffer and the next frame does not fit,
//! frames wait in a FIFO queue behind the buffer. Bytes leave in exactly the
//! order frames were submitted: once anything is queued, every later frame is
//! queued too, and the queue only drains into an empty buffer.
//!
//! The queue is capped in both frames and bytes; exceeding a cap is reported
//! as `BackpressureExceeded` and the owner drops the connection.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::config::ConnectionConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::Transport;

/// Where a submitted frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended to the coalescing buffer.
    Buffered,
    /// Waiting behind a full buffer.
    Queued,
}

#[derive(Debug)]
pub struct OutboundCoalescer {
    buffer: BytesMut,
    capacity: usize,
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    max_pending_frames: usize,
    max_pending_bytes: usize,
}

impl OutboundCoalescer {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self::with_limits(
            config.outbound_buffer_size,
            config.max_pending_frames,
            config.max_pending_bytes,
        )
    }

    pub fn with_limits(capacity: usize, max_pending_frames: usize, max_pending_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            queue: VecDeque::new(),
            queued_bytes: 0,
            max_pending_frames,
            max_pending_bytes,
        }
    }

    /// Append one encoded frame, flushing early if the buffer is full.
    pub fn submit<T: Transport + ?Sized>(
        &mut self,
        encoded: Bytes,
        transport: &mut T,
    ) -> Result<SubmitOutcome> {
        if !self.queue.is_empty() {
            return self.enqueue(encoded);
        }

        if self.fits(encoded.len()) {
            self.buffer.extend_from_slice(&encoded);
            return Ok(SubmitOutcome::Buffered);
        }

        self.flush(transport)?;

        if self.queue.is_empty() && self.fits(encoded.len()) {
            self.buffer.extend_from_slice(&encoded);
            Ok(SubmitOutcome::Buffered)
        } else {
            self.enqueue(encoded)
        }
    }

    /// One write attempt of the buffered bytes, then refill from the queue if
    /// the buffer drained. Returns the number of bytes the transport accepted.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<usize> {
        let mut written = 0;

        if !self.buffer.is_empty() {
            match transport.try_write(&self.buffer) {
                Ok(0) => {
                    return Err(ProtocolError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    )));
                }
                Ok(n) => {
                    self.buffer.advance(n);
                    written = n;
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    trace!(buffered = self.buffer.len(), "Transport not writable");
                }
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }

        if self.buffer.is_empty() {
            self.refill();
        }

        Ok(written)
    }

    /// Timer-driven flush for buffers that never fill up on their own.
    pub fn on_timer_tick<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<usize> {
        self.flush(transport)
    }

    fn fits(&self, len: usize) -> bool {
        // An empty buffer takes any frame so a frame larger than the buffer
        // still goes out, alone.
        self.buffer.is_empty() || self.buffer.len() + len <= self.capacity
    }

    fn enqueue(&mut self, encoded: Bytes) -> Result<SubmitOutcome> {
        let frames = self.queue.len() + 1;
        let bytes = self.queued_bytes + encoded.len();
        if frames > self.max_pending_frames || bytes > self.max_pending_bytes {
            return Err(ProtocolError::BackpressureExceeded { frames, bytes });
        }

        self.queued_bytes = bytes;
        self.queue.push_back(encoded);
        Ok(SubmitOutcome::Queued)
    }

    fn refill(&mut self) {
        while let Some(front) = self.queue.front() {
            if !self.fits(front.len()) {
                break;
            }
            if let Some(frame) = self.queue.pop_front() {
                self.queued_bytes -= frame.len();
                self.buffer.extend_from_slice(&frame);
            }
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Nothing buffered and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.queue.is_empty()
    }

    /// Drop everything not yet written and release storage.
    pub fn clear(&mut self) {
        self.buffer = BytesMut::new();
        self.queue.clear();
        self.queued_bytes = 0;
    }
}
