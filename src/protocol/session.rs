//! Seams between a connection and the world outside it.
//!
//! - [`SessionKeyStore`]: read-only lookup of shared secrets established by
//!   the login service.
//! - [`SessionBinder`]: creates the game session once a handshake succeeds.
//! - [`WorldSession`]: receives decoded frames in order.
//! - [`ConnectionHandle`]: lets the session write back into the connection
//!   from any thread, and sever its link when it is torn down first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, Notify};
use tracing::warn;
use zeroize::Zeroize;

use crate::core::packet::Frame;
use crate::error::{constants, ProtocolError, Result};

/// Shared secret for one account, as recorded by the login service.
#[derive(Clone)]
pub struct SessionKey {
    pub account_id: u32,
    pub secret: Vec<u8>,
}

impl SessionKey {
    pub fn new(account_id: u32, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            account_id,
            secret: secret.into(),
        }
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("account_id", &self.account_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Lookup of previously established shared secrets.
///
/// Called concurrently from every connection's handshake.
pub trait SessionKeyStore: Send + Sync {
    fn lookup_secret(&self, account: &str) -> Option<SessionKey>;
}

/// Key store backed by a map, keyed by upper-cased account name.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, SessionKey>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: &str, key: SessionKey) -> Result<()> {
        let mut keys = self.keys.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_KEY_STORE_WRITE_LOCK.to_string())
        })?;
        keys.insert(account.to_uppercase(), key);
        Ok(())
    }

    pub fn remove(&self, account: &str) -> Result<Option<SessionKey>> {
        let mut keys = self.keys.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_KEY_STORE_WRITE_LOCK.to_string())
        })?;
        Ok(keys.remove(&account.to_uppercase()))
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionKeyStore for InMemoryKeyStore {
    fn lookup_secret(&self, account: &str) -> Option<SessionKey> {
        match self.keys.read() {
            Ok(keys) => keys.get(&account.to_uppercase()).cloned(),
            Err(_) => {
                warn!(account, "{}", constants::ERR_KEY_STORE_READ_LOCK);
                None
            }
        }
    }
}

/// Game-side receiver for one authenticated connection.
pub trait WorldSession: Send + Sync {
    /// A decoded frame, in receive order.
    fn handle_frame(&self, frame: Frame);

    /// Latency the client reported in its last ping.
    fn update_latency(&self, _latency_ms: u32) {}

    /// Privileged sessions are not disconnected for ping flooding.
    fn flood_exempt(&self) -> bool {
        false
    }

    /// The connection is gone and will not deliver or accept frames any more.
    fn on_disconnect(&self) {}
}

/// Identity established by a successful handshake.
#[derive(Debug, Clone)]
pub struct AuthenticatedPeer {
    pub account_id: u32,
    pub account: String,
    pub build: u32,
    pub handle: ConnectionHandle,
}

/// Creates the session for a freshly authenticated connection.
///
/// The connection keeps only a weak reference; the binder (or the world it
/// hands the session to) owns it.
pub trait SessionBinder: Send + Sync {
    fn bind(&self, peer: AuthenticatedPeer) -> Arc<dyn WorldSession>;
}

#[derive(Debug, Default)]
struct HandleState {
    closed: AtomicBool,
    detached: AtomicBool,
    flush_requested: AtomicBool,
    wake: Notify,
}

/// Cloneable, thread-safe way to reach a connection from its session.
///
/// Frames sent here are queued until the connection owner pumps them into
/// its coalescer, so a handle never touches connection state directly.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Frame>,
    state: Arc<HandleState>,
}

impl ConnectionHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            state: Arc::new(HandleState::default()),
        };
        (handle, rx)
    }

    /// Queue a frame for the connection.
    pub fn send(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.tx
            .send(frame)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Queue a frame and ask the owner to write it out without waiting for
    /// the next flush tick.
    pub fn send_immediate(&self, frame: Frame) -> Result<()> {
        self.send(frame)?;
        self.state.flush_requested.store(true, Ordering::Release);
        self.state.wake.notify_one();
        Ok(())
    }

    /// Resolves once [`send_immediate`](Self::send_immediate) was called.
    ///
    /// A request made while nobody waits is remembered, so a driver that
    /// selects on this never misses one.
    pub async fn flush_wanted(&self) {
        self.state.wake.notified().await;
    }

    /// Stop the connection from dispatching to the session.
    pub fn unbind(&self) {
        self.state.detached.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.state.detached.load(Ordering::Acquire)
    }

    pub(crate) fn take_flush_request(&self) -> bool {
        self.state.flush_requested.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_closed(&self) {
        self.state.closed.store(true, Ordering::Release);
    }
}
