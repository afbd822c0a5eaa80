//! Inbound frame reassembly.
//!
//! Bytes arrive in whatever chunks the socket hands over: one byte at a time,
//! half a header, three frames and a bit. The reassembler keeps exactly one
//! frame in flight and tracks it with a small cursor:
//!
//! - `NoHeader`: next byte starts a header
//! - `PartialHeader`: `filled` header bytes are held in a fixed buffer
//! - `AwaitingBody`: header decoded and validated, `remaining` body bytes to go
//!
//! A header is decrypted once, when its last byte arrives, and its length
//! claim is checked before any body storage is reserved. An oversized claim
//! poisons the reassembler: frame boundaries cannot be recovered once the
//! stream is out of step, so no resynchronization is attempted.
//!
//! [`InboundReassembler::step`] yields one frame at a time so the caller can
//! change cipher state between frames of the same chunk; the handshake frame
//! and the first encrypted frame routinely share a TCP segment.

use bytes::BytesMut;
use tracing::warn;

use crate::config::CLIENT_HEADER_SIZE;
use crate::core::header::ClientHeader;
use crate::core::packet::Frame;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::HeaderCipher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    NoHeader,
    PartialHeader { filled: usize },
    AwaitingBody { opcode: u32, remaining: usize },
}

#[derive(Debug)]
pub struct InboundReassembler {
    header: [u8; CLIENT_HEADER_SIZE],
    cursor: Cursor,
    body: BytesMut,
    max_payload: usize,
    poisoned: bool,
}

impl InboundReassembler {
    pub fn new(max_payload: usize) -> Self {
        Self {
            header: [0u8; CLIENT_HEADER_SIZE],
            cursor: Cursor::NoHeader,
            body: BytesMut::new(),
            max_payload,
            poisoned: false,
        }
    }

    /// Consume all of `data` and return every frame it completes, in order.
    pub fn feed(
        &mut self,
        data: &[u8],
        mut cipher: Option<&mut HeaderCipher>,
    ) -> Result<Vec<Frame>> {
        let mut input = data;
        let mut frames = Vec::new();
        while let Some(frame) = self.step(&mut input, cipher.as_deref_mut())? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Advance through `input` until one frame completes or the input runs out.
    ///
    /// On `Ok(Some(frame))` the slice is advanced past that frame's last byte and
    /// may still hold data for the next call. On `Ok(None)` the input was fully
    /// consumed into held state.
    pub fn step(
        &mut self,
        input: &mut &[u8],
        cipher: Option<&mut HeaderCipher>,
    ) -> Result<Option<Frame>> {
        if self.poisoned {
            warn!(
                reason = constants::ERR_REASSEMBLER_POISONED,
                "Refusing input"
            );
            return Err(ProtocolError::InvalidHeader);
        }

        let mut cipher = cipher;
        while !input.is_empty() {
            match self.cursor {
                Cursor::NoHeader | Cursor::PartialHeader { .. } => {
                    let filled = match self.cursor {
                        Cursor::PartialHeader { filled } => filled,
                        _ => 0,
                    };
                    let take = (CLIENT_HEADER_SIZE - filled).min(input.len());
                    self.header[filled..filled + take].copy_from_slice(&input[..take]);
                    *input = &input[take..];

                    if filled + take < CLIENT_HEADER_SIZE {
                        self.cursor = Cursor::PartialHeader {
                            filled: filled + take,
                        };
                        return Ok(None);
                    }

                    let mut raw = self.header;
                    if let Some(cipher) = cipher.as_deref_mut() {
                        cipher.decrypt(&mut raw);
                    }
                    let header = ClientHeader::decode(&raw);
                    let length = usize::from(header.payload_length);

                    if length > self.max_payload {
                        self.poisoned = true;
                        self.cursor = Cursor::NoHeader;
                        return Err(ProtocolError::OversizedPacket(length));
                    }

                    if length == 0 {
                        self.cursor = Cursor::NoHeader;
                        return Ok(Some(Frame::empty(header.opcode)));
                    }

                    self.body.reserve(length);
                    self.cursor = Cursor::AwaitingBody {
                        opcode: header.opcode,
                        remaining: length,
                    };
                }
                Cursor::AwaitingBody { opcode, remaining } => {
                    let take = remaining.min(input.len());
                    self.body.extend_from_slice(&input[..take]);
                    *input = &input[take..];

                    if take < remaining {
                        self.cursor = Cursor::AwaitingBody {
                            opcode,
                            remaining: remaining - take,
                        };
                        return Ok(None);
                    }

                    self.cursor = Cursor::NoHeader;
                    let payload = self.body.split().freeze();
                    return Ok(Some(Frame::new(opcode, payload)));
                }
            }
        }

        Ok(None)
    }

    /// Whether part of a frame is held waiting for more bytes.
    pub fn in_flight(&self) -> bool {
        self.cursor != Cursor::NoHeader
    }

    /// Bytes of the unfinished frame held so far, header included.
    pub fn held_len(&self) -> usize {
        match self.cursor {
            Cursor::NoHeader => 0,
            Cursor::PartialHeader { filled } => filled,
            Cursor::AwaitingBody { .. } => CLIENT_HEADER_SIZE + self.body.len(),
        }
    }

    /// Storage currently reserved for bodies.
    pub fn reserved_capacity(&self) -> usize {
        self.body.capacity()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Drop held state and storage.
    pub fn reset(&mut self) {
        self.cursor = Cursor::NoHeader;
        self.body = BytesMut::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::encode_client_frame;

    fn wire(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| encode_client_frame(f, None).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_single_byte_chunks() {
        let frames = vec![
            Frame::new(0x1ED, vec![1, 2, 3]),
            Frame::empty(0x1DC),
            Frame::new(0xB5, vec![7; 40]),
        ];
        let bytes = wire(&frames);

        let mut reassembler = InboundReassembler::new(1024);
        let mut out = Vec::new();
        for byte in &bytes {
            out.extend(reassembler.feed(&[*byte], None).unwrap());
        }
        assert_eq!(out, frames);
        assert!(!reassembler.in_flight());
    }

    #[test]
    fn test_coalesced_frames_in_one_chunk() {
        let frames: Vec<Frame> = (0..5).map(|n| Frame::new(n, vec![n as u8; 3])).collect();
        let mut reassembler = InboundReassembler::new(1024);
        assert_eq!(reassembler.feed(&wire(&frames), None).unwrap(), frames);
    }

    #[test]
    fn test_step_stops_after_each_frame() {
        let frames = vec![Frame::new(1, vec![1]), Frame::new(2, vec![2])];
        let bytes = wire(&frames);
        let mut input = &bytes[..];

        let mut reassembler = InboundReassembler::new(1024);
        let first = reassembler.step(&mut input, None).unwrap();
        assert_eq!(first, Some(frames[0].clone()));
        assert_eq!(input.len(), CLIENT_HEADER_SIZE + 1);

        let second = reassembler.step(&mut input, None).unwrap();
        assert_eq!(second, Some(frames[1].clone()));
        assert!(input.is_empty());
        assert_eq!(reassembler.step(&mut input, None).unwrap(), None);
    }

    #[test]
    fn test_oversized_claim_rejected_before_reserving() {
        let mut reassembler = InboundReassembler::new(10 * 1024);
        // Claims 60000 bytes; only the header is sent.
        let header = ClientHeader {
            payload_length: 60_000,
            opcode: 0xB5,
        }
        .encode();

        let result = reassembler.feed(&header, None);
        assert!(matches!(result, Err(ProtocolError::OversizedPacket(60_000))));
        assert_eq!(reassembler.reserved_capacity(), 0);
        assert!(reassembler.is_poisoned());

        // No resync: further input is refused rather than parsed.
        let valid = wire(&[Frame::empty(0x1DC)]);
        assert!(reassembler.feed(&valid, None).is_err());
    }

    #[test]
    fn test_encrypted_headers_split_mid_header() {
        let key = b"reassembly-key";
        let mut client = HeaderCipher::new(key).unwrap();
        let mut server = HeaderCipher::new(key).unwrap();

        let frames = vec![Frame::new(0xB5, vec![1, 2]), Frame::new(0xB6, vec![3])];
        let mut bytes = Vec::new();
        for frame in &frames {
            bytes.extend_from_slice(&encode_client_frame(frame, Some(&mut client)).unwrap());
        }

        let mut reassembler = InboundReassembler::new(1024);
        let mut out = reassembler.feed(&bytes[..3], Some(&mut server)).unwrap();
        out.extend(reassembler.feed(&bytes[3..10], Some(&mut server)).unwrap());
        out.extend(reassembler.feed(&bytes[10..], Some(&mut server)).unwrap());
        assert_eq!(out, frames);
    }

    #[test]
    fn test_held_len_counts_header_and_body() {
        let bytes = wire(&[Frame::new(0xB5, vec![9; 8])]);
        let mut reassembler = InboundReassembler::new(1024);

        reassembler.feed(&bytes[..4], None).unwrap();
        assert!(reassembler.in_flight());
        assert_eq!(reassembler.held_len(), 4);

        reassembler.feed(&bytes[4..9], None).unwrap();
        assert_eq!(reassembler.held_len(), 9);

        reassembler.feed(&bytes[9..], None).unwrap();
        assert_eq!(reassembler.held_len(), 0);
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let mut reassembler = InboundReassembler::new(1024);
        assert!(reassembler.feed(&[], None).unwrap().is_empty());
        assert!(!reassembler.in_flight());
    }
}
