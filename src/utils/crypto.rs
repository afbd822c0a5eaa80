//! Header stream cipher.
//!
//! Only frame headers are transformed; payloads travel in the clear. Each
//! connection owns one [`HeaderCipher`] with two running states: the send
//! state advances once per encrypted header byte, the receive state once per
//! decrypted header byte. The states never touch each other, so outbound
//! traffic can be interleaved with inbound traffic in any order.
//!
//! For a key `K` of length `n`, with per-direction counters `i` and `j`:
//!
//! ```text
//! encrypt(b):  x = (b ^ K[i]) + j ; i = (i + 1) % n ; j = x ; emit x
//! decrypt(c):  x = (c - j) ^ K[i] ; i = (i + 1) % n ; j = c ; emit x
//! ```
//!
//! There is no "uninitialized" cipher: a connection holds `Option<HeaderCipher>`
//! and headers stay in the clear until the handshake has produced one.

use std::fmt;

use zeroize::Zeroize;

use crate::error::{constants, ProtocolError, Result};

/// Running state for one direction.
#[derive(Debug, Default, Clone, Copy)]
struct StreamState {
    index: usize,
    last: u8,
}

pub struct HeaderCipher {
    key: Vec<u8>,
    send: StreamState,
    recv: StreamState,
}

impl HeaderCipher {
    /// Derive both directional states from the shared secret.
    ///
    /// # Errors
    /// `InvalidSecret` if the secret is empty.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(ProtocolError::InvalidSecret(
                constants::ERR_EMPTY_SECRET.into(),
            ));
        }
        Ok(Self {
            key: secret.to_vec(),
            send: StreamState::default(),
            recv: StreamState::default(),
        })
    }

    /// Encrypt an outbound header in place.
    pub fn encrypt(&mut self, header: &mut [u8]) {
        let len = self.key.len();
        for byte in header.iter_mut() {
            let x = (*byte ^ self.key[self.send.index]).wrapping_add(self.send.last);
            self.send.index = (self.send.index + 1) % len;
            self.send.last = x;
            *byte = x;
        }
    }

    /// Decrypt an inbound header in place.
    pub fn decrypt(&mut self, header: &mut [u8]) {
        let len = self.key.len();
        for byte in header.iter_mut() {
            let cipher_byte = *byte;
            let x = cipher_byte.wrapping_sub(self.recv.last) ^ self.key[self.recv.index];
            self.recv.index = (self.recv.index + 1) % len;
            self.recv.last = cipher_byte;
            *byte = x;
        }
    }
}

impl Drop for HeaderCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for HeaderCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderCipher")
            .field("key_len", &self.key.len())
            .field("send_index", &self.send.index)
            .field("recv_index", &self.recv.index)
            .finish()
    }
}
