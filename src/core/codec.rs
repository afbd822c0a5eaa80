//! Client-side framing for `tokio_util::codec::Framed`.
//!
//! [`PeerCodec`] speaks the opposite end of the wire from
//! [`Connection`](crate::protocol::connection::Connection): it decodes
//! server-to-client frames and encodes client-to-server frames. Bots, load
//! generators and the integration tests drive a world connection through it.
//!
//! Like the server reassembler, the decoder decrypts a header exactly once and
//! keeps it while the body is still arriving, so a header split across reads
//! never advances the cipher twice.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::SERVER_HEADER_SIZE;
use crate::core::header::{encode_client_frame, ServerHeader};
use crate::core::packet::Frame;
use crate::error::{constants, ProtocolError};
use crate::utils::crypto::HeaderCipher;

#[derive(Default)]
pub struct PeerCodec {
    cipher: Option<HeaderCipher>,
    held_header: Option<ServerHeader>,
}

impl PeerCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start encrypting/decrypting headers. Call once the auth session frame
    /// has been written, before reading the auth response.
    pub fn install_cipher(&mut self, cipher: HeaderCipher) {
        self.cipher = Some(cipher);
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }
}

impl Decoder for PeerCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.held_header {
            Some(header) => header,
            None => {
                if src.len() < SERVER_HEADER_SIZE {
                    return Ok(None);
                }
                let mut raw = [0u8; SERVER_HEADER_SIZE];
                raw.copy_from_slice(&src[..SERVER_HEADER_SIZE]);
                if let Some(cipher) = self.cipher.as_mut() {
                    cipher.decrypt(&mut raw);
                }
                src.advance(SERVER_HEADER_SIZE);
                let header = ServerHeader::decode(&raw);
                self.held_header = Some(header);
                header
            }
        };

        let body_len = header.payload_length as usize;
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.held_header = None;
        let payload = src.split_to(body_len).freeze();
        Ok(Some(Frame::new(u32::from(header.opcode), payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.held_header.is_none() => Ok(None),
            None => Err(ProtocolError::TruncatedStream(
                constants::ERR_TRUNCATED_STREAM.into(),
            )),
        }
    }
}

impl Encoder<Frame> for PeerCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = encode_client_frame(&item, self.cipher.as_mut())?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
