//! Wire headers for both directions.
//!
//! ```text
//! client -> server   [payload_length: u16 LE][opcode: u32 LE]   6 bytes
//! server -> client   [payload_length: u16 LE][opcode: u16 LE]   4 bytes
//! ```
//!
//! The two layouts are a paired contract with the client. Headers are not
//! self-describing: nothing in them can be checked except the length claim,
//! which callers validate against their configured maximum before reserving
//! any body storage. Once a session is authenticated every header is passed
//! through [`HeaderCipher`]; payloads never are.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{CLIENT_HEADER_SIZE, SERVER_HEADER_SIZE};
use crate::core::packet::Frame;
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::HeaderCipher;

/// Header of a frame sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    pub payload_length: u16,
    pub opcode: u32,
}

impl ClientHeader {
    pub const SIZE: usize = CLIENT_HEADER_SIZE;

    /// Build a header for `payload_len` bytes, rejecting lengths the field cannot carry.
    pub fn for_payload(opcode: u32, payload_len: usize) -> Result<Self> {
        let payload_length =
            u16::try_from(payload_len).map_err(|_| ProtocolError::OversizedPacket(payload_len))?;
        Ok(Self {
            payload_length,
            opcode,
        })
    }

    #[inline]
    pub fn encode(&self) -> [u8; CLIENT_HEADER_SIZE] {
        let mut out = [0u8; CLIENT_HEADER_SIZE];
        out[..2].copy_from_slice(&self.payload_length.to_le_bytes());
        out[2..].copy_from_slice(&self.opcode.to_le_bytes());
        out
    }

    #[inline]
    pub fn decode(raw: &[u8; CLIENT_HEADER_SIZE]) -> Self {
        Self {
            payload_length: u16::from_le_bytes([raw[0], raw[1]]),
            opcode: u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]),
        }
    }
}

/// Header of a frame sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHeader {
    pub payload_length: u16,
    pub opcode: u16,
}

impl ServerHeader {
    pub const SIZE: usize = SERVER_HEADER_SIZE;

    /// Build a header for `payload_len` bytes.
    ///
    /// # Errors
    /// `OversizedPacket` if the payload exceeds `max_payload` or the length field,
    /// `InvalidOpcode` if the opcode does not fit in 16 bits.
    pub fn for_payload(opcode: u32, payload_len: usize, max_payload: usize) -> Result<Self> {
        if payload_len > max_payload {
            return Err(ProtocolError::OversizedPacket(payload_len));
        }
        let payload_length =
            u16::try_from(payload_len).map_err(|_| ProtocolError::OversizedPacket(payload_len))?;
        let opcode = u16::try_from(opcode).map_err(|_| ProtocolError::InvalidOpcode(opcode))?;
        Ok(Self {
            payload_length,
            opcode,
        })
    }

    #[inline]
    pub fn encode(&self) -> [u8; SERVER_HEADER_SIZE] {
        let mut out = [0u8; SERVER_HEADER_SIZE];
        out[..2].copy_from_slice(&self.payload_length.to_le_bytes());
        out[2..].copy_from_slice(&self.opcode.to_le_bytes());
        out
    }

    #[inline]
    pub fn decode(raw: &[u8; SERVER_HEADER_SIZE]) -> Self {
        Self {
            payload_length: u16::from_le_bytes([raw[0], raw[1]]),
            opcode: u16::from_le_bytes([raw[2], raw[3]]),
        }
    }
}

/// Encode a frame for the wire in the server-to-client direction.
///
/// The header is encrypted in place when a cipher is supplied; the cipher's
/// send state advances by exactly one header.
pub fn encode_server_frame(
    frame: &Frame,
    max_payload: usize,
    cipher: Option<&mut HeaderCipher>,
) -> Result<Bytes> {
    let header = ServerHeader::for_payload(frame.opcode, frame.payload.len(), max_payload)?;
    let mut raw = header.encode();
    if let Some(cipher) = cipher {
        cipher.encrypt(&mut raw);
    }

    let mut out = BytesMut::with_capacity(SERVER_HEADER_SIZE + frame.payload.len());
    out.put_slice(&raw);
    out.put_slice(&frame.payload);
    Ok(out.freeze())
}

/// Encode a frame for the wire in the client-to-server direction.
pub fn encode_client_frame(frame: &Frame, cipher: Option<&mut HeaderCipher>) -> Result<Bytes> {
    let header = ClientHeader::for_payload(frame.opcode, frame.payload.len())?;
    let mut raw = header.encode();
    if let Some(cipher) = cipher {
        cipher.encrypt(&mut raw);
    }

    let mut out = BytesMut::with_capacity(CLIENT_HEADER_SIZE + frame.payload.len());
    out.put_slice(&raw);
    out.put_slice(&frame.payload);
    Ok(out.freeze())
}
