//! Shared fixtures for the integration tests: a controllable transport, a
//! recording session/binder pair and a scripted client end.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use world_protocol::config::WorldConfig;
use world_protocol::core::codec::PeerCodec;
use world_protocol::core::packet::Frame;
use world_protocol::protocol::handshake::{compute_proof, AuthSession};
use world_protocol::protocol::{
    AuthenticatedPeer, Connection, ConnectionContext, InMemoryKeyStore, SessionBinder, SessionKey,
    WorldSession,
};
use world_protocol::transport::Transport;
use world_protocol::utils::crypto::HeaderCipher;
use world_protocol::utils::metrics::Metrics;

pub const ACCOUNT: &str = "ALICE";
pub const ACCOUNT_ID: u32 = 42;
pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef0123456789";
pub const BUILD: u32 = 5875;

/// In-memory transport that can refuse writes.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub written: Vec<u8>,
    pub writes: usize,
    pub blocked: bool,
    pub max_per_write: Option<usize>,
}

impl Transport for MockTransport {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.max_per_write.map_or(buf.len(), |m| m.min(buf.len()));
        self.written.extend_from_slice(&buf[..n]);
        self.writes += 1;
        Ok(n)
    }
}

#[derive(Default)]
pub struct RecordingSession {
    pub frames: Mutex<Vec<Frame>>,
    pub latencies: Mutex<Vec<u32>>,
    pub disconnects: AtomicUsize,
    pub exempt: bool,
}

impl RecordingSession {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl WorldSession for RecordingSession {
    fn handle_frame(&self, frame: Frame) {
        self.frames.lock().unwrap().push(frame);
    }

    fn update_latency(&self, latency_ms: u32) {
        self.latencies.lock().unwrap().push(latency_ms);
    }

    fn flood_exempt(&self) -> bool {
        self.exempt
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Binder that keeps every session alive and remembers who it bound.
#[derive(Default)]
pub struct RecordingBinder {
    pub sessions: Mutex<Vec<Arc<RecordingSession>>>,
    pub peers: Mutex<Vec<AuthenticatedPeer>>,
    pub exempt: bool,
}

impl RecordingBinder {
    pub fn session(&self, index: usize) -> Arc<RecordingSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }

    pub fn peer(&self, index: usize) -> AuthenticatedPeer {
        self.peers.lock().unwrap()[index].clone()
    }

    pub fn bound(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Drop the binder's strong references, as if the world discarded the sessions.
    pub fn forget_sessions(&self) {
        self.sessions.lock().unwrap().clear();
    }
}

impl SessionBinder for RecordingBinder {
    fn bind(&self, peer: AuthenticatedPeer) -> Arc<dyn WorldSession> {
        let session = Arc::new(RecordingSession {
            exempt: self.exempt,
            ..RecordingSession::default()
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        self.peers.lock().unwrap().push(peer);
        session
    }
}

/// Opcode of every reply an [`EchoSession`] sends.
pub const ECHO_REPLY: u32 = 0x0EE;

/// Session that answers each game frame with its payload under [`ECHO_REPLY`].
pub struct EchoSession {
    peer: AuthenticatedPeer,
    immediate: bool,
}

impl WorldSession for EchoSession {
    fn handle_frame(&self, frame: Frame) {
        let reply = Frame::new(ECHO_REPLY, frame.payload);
        if self.immediate {
            self.peer.handle.send_immediate(reply).unwrap();
        } else {
            self.peer.handle.send(reply).unwrap();
        }
    }
}

#[derive(Default)]
pub struct EchoBinder {
    pub sessions: Mutex<Vec<Arc<EchoSession>>>,
    pub immediate: bool,
}

impl SessionBinder for EchoBinder {
    fn bind(&self, peer: AuthenticatedPeer) -> Arc<dyn WorldSession> {
        let session = Arc::new(EchoSession {
            peer,
            immediate: self.immediate,
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        session
    }
}

pub fn key_store() -> Arc<InMemoryKeyStore> {
    let store = InMemoryKeyStore::new();
    store
        .insert(ACCOUNT, SessionKey::new(ACCOUNT_ID, SECRET.to_vec()))
        .unwrap();
    Arc::new(store)
}

pub fn context_with(
    config: WorldConfig,
    binder: Arc<RecordingBinder>,
) -> (ConnectionContext, Arc<Metrics>) {
    context_for(config, binder)
}

pub fn context_for(
    config: WorldConfig,
    binder: Arc<dyn SessionBinder>,
) -> (ConnectionContext, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let ctx = ConnectionContext::new(Arc::new(config), key_store(), binder)
        .with_metrics(Arc::clone(&metrics));
    (ctx, metrics)
}

/// An opened connection over a mock transport, plus its binder.
pub fn open_connection(config: WorldConfig) -> (Connection<MockTransport>, Arc<RecordingBinder>) {
    let binder = Arc::new(RecordingBinder::default());
    let (ctx, _) = context_with(config, Arc::clone(&binder));
    let mut conn = Connection::new(1, "127.0.0.1:50000", MockTransport::default(), ctx);
    conn.open().unwrap();
    (conn, binder)
}

pub fn auth_session(account: &str, server_seed: u32, secret: &[u8]) -> AuthSession {
    let client_seed = 0x1357_9BDF;
    AuthSession {
        build: BUILD,
        server_id: 1,
        account: account.to_string(),
        client_seed,
        proof: compute_proof(account, client_seed, server_seed, secret),
    }
}

pub fn ping_frame(sequence: u32, latency_ms: u32) -> Frame {
    let mut payload = sequence.to_le_bytes().to_vec();
    payload.extend_from_slice(&latency_ms.to_le_bytes());
    Frame::new(world_protocol::protocol::opcodes::CMSG_PING, payload)
}

/// The client end of a world connection, driven by hand.
pub struct ScriptedClient {
    codec: PeerCodec,
    inbox: BytesMut,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            codec: PeerCodec::new(),
            inbox: BytesMut::new(),
        }
    }

    pub fn install_cipher(&mut self, secret: &[u8]) {
        self.codec.install_cipher(HeaderCipher::new(secret).unwrap());
    }

    /// Encode a client-to-server frame.
    pub fn encode(&mut self, frame: Frame) -> Vec<u8> {
        let mut out = BytesMut::new();
        self.codec.encode(frame, &mut out).unwrap();
        out.to_vec()
    }

    /// Decode every complete server frame from `bytes` plus anything held back.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.inbox.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode(&mut self.inbox).unwrap() {
            frames.push(frame);
        }
        frames
    }
}

/// Take everything the connection has written so far.
pub fn drain_written(conn: &mut Connection<MockTransport>) -> Vec<u8> {
    std::mem::take(&mut conn.transport_mut().written)
}
