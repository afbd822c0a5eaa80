use bytes::Bytes;

use crate::error::{constants, ProtocolError, Result};

/// One decoded application message: numeric opcode plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// A frame with no payload.
    pub fn empty(opcode: u32) -> Self {
        Self {
            opcode,
            payload: Bytes::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Cursor over the payload for parsing fixed little-endian fields.
    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader::new(&self.payload)
    }
}

/// Bounds-checked little-endian reader over a frame payload.
///
/// Every read fails with `MalformedPayload` instead of panicking, since the
/// payload comes straight from the peer.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::MalformedPayload(
                constants::ERR_SHORT_PAYLOAD.into(),
            ));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            ProtocolError::MalformedPayload(constants::ERR_MISSING_ACCOUNT_TERMINATOR.into())
        })?;
        let text = std::str::from_utf8(&rest[..end])
            .map_err(|_| ProtocolError::MalformedPayload(constants::ERR_ACCOUNT_NOT_UTF8.into()))?;
        self.pos += end + 1;
        Ok(text)
    }
}
