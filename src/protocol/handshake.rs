//! World session handshake.
//!
//! The shared secret is established by the login service before the client
//! ever connects here. This handshake only proves the client holds it:
//!
//! 1. On accept the server sends `SMSG_AUTH_CHALLENGE { server_seed }`.
//! 2. The client answers `CMSG_AUTH_SESSION { build, server_id, account,
//!    client_seed, proof }` where
//!    `proof = SHA-256(account || 0u32 || client_seed || server_seed || secret)`.
//! 3. The server looks the secret up, recomputes the proof and replies with
//!    `SMSG_AUTH_RESPONSE`. On success the header cipher is keyed with the
//!    secret before the response is written, so the response is the first
//!    encrypted header.
//!
//! Seeds are per connection, so a captured auth session frame cannot be
//! replayed on another connection.

use bytes::{BufMut, BytesMut};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::packet::Frame;
use crate::error::Result;
use crate::protocol::opcodes::{CMSG_AUTH_SESSION, SMSG_AUTH_CHALLENGE, SMSG_AUTH_RESPONSE};

/// Length of the handshake proof digest.
pub const PROOF_LEN: usize = 32;

/// Longest account name accepted in an auth session frame.
pub const MAX_ACCOUNT_LEN: usize = 32;

/// Result codes carried by `SMSG_AUTH_RESPONSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthResult {
    Ok = 0x0C,
    Failed = 0x0D,
    VersionMismatch = 0x14,
    UnknownAccount = 0x15,
}

impl AuthResult {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0C => Some(AuthResult::Ok),
            0x0D => Some(AuthResult::Failed),
            0x14 => Some(AuthResult::VersionMismatch),
            0x15 => Some(AuthResult::UnknownAccount),
            _ => None,
        }
    }

    /// Build the response frame. A successful response carries empty billing fields.
    pub fn to_frame(self) -> Frame {
        let mut payload = BytesMut::with_capacity(10);
        payload.put_u8(self as u8);
        if self == AuthResult::Ok {
            payload.put_u32_le(0); // billing time remaining
            payload.put_u8(0); // billing flags
            payload.put_u32_le(0); // billing time rested
        }
        Frame::new(SMSG_AUTH_RESPONSE, payload.freeze())
    }
}

/// `SMSG_AUTH_CHALLENGE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChallenge {
    pub server_seed: u32,
}

impl AuthChallenge {
    pub fn to_frame(&self) -> Frame {
        Frame::new(SMSG_AUTH_CHALLENGE, self.server_seed.to_le_bytes().to_vec())
    }

    pub fn parse(frame: &Frame) -> Result<Self> {
        let mut reader = frame.reader();
        Ok(Self {
            server_seed: reader.read_u32()?,
        })
    }
}

/// `CMSG_AUTH_SESSION` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub build: u32,
    pub server_id: u32,
    pub account: String,
    pub client_seed: u32,
    pub proof: [u8; PROOF_LEN],
}

impl AuthSession {
    /// Parse an auth session payload. Trailing bytes (client addon data) are ignored.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let mut reader = frame.reader();
        let build = reader.read_u32()?;
        let server_id = reader.read_u32()?;
        let account = reader.read_cstring()?;
        if account.is_empty() || account.len() > MAX_ACCOUNT_LEN {
            return Err(crate::error::ProtocolError::MalformedPayload(format!(
                "account name length {} outside 1..={MAX_ACCOUNT_LEN}",
                account.len()
            )));
        }
        let account = account.to_string();
        let client_seed = reader.read_u32()?;
        let proof = reader.read_array::<PROOF_LEN>()?;

        Ok(Self {
            build,
            server_id,
            account,
            client_seed,
            proof,
        })
    }

    /// Encode the payload the way a client sends it.
    pub fn to_frame(&self) -> Frame {
        let mut payload = BytesMut::with_capacity(16 + self.account.len() + PROOF_LEN);
        payload.put_u32_le(self.build);
        payload.put_u32_le(self.server_id);
        payload.put_slice(self.account.as_bytes());
        payload.put_u8(0);
        payload.put_u32_le(self.client_seed);
        payload.put_slice(&self.proof);
        Frame::new(CMSG_AUTH_SESSION, payload.freeze())
    }
}

/// Generate a random per-connection seed.
pub fn generate_seed() -> u32 {
    rand::rng().random()
}

/// Compute the handshake proof for an account.
pub fn compute_proof(
    account: &str,
    client_seed: u32,
    server_seed: u32,
    secret: &[u8],
) -> [u8; PROOF_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update(0u32.to_le_bytes());
    hasher.update(client_seed.to_le_bytes());
    hasher.update(server_seed.to_le_bytes());
    hasher.update(secret);
    hasher.finalize().into()
}

/// Check a client's proof against the known secret.
pub fn verify_proof(session: &AuthSession, server_seed: u32, secret: &[u8]) -> bool {
    let expected = compute_proof(&session.account, session.client_seed, server_seed, secret);
    let diff = expected
        .iter()
        .zip(session.proof.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    let valid = diff == 0;
    debug!(account = %session.account, valid, "Verified handshake proof");
    valid
}
