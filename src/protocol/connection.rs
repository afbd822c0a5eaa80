//! Per-connection state machine.
//!
//! ```text
//! Anonymous --CMSG_AUTH_SESSION--> Authenticating --proof ok--> Authenticated
//!     |                                  |                           |
//!     +--------- any violation ----------+------------ fatal --------+--> Closing --> Closed
//! ```
//!
//! A [`Connection`] owns its reassembler, coalescer, cipher and flood guard
//! and is driven by exactly one owner at a time: the owner delivers bytes with
//! [`Connection::feed`], ticks it with [`Connection::on_timer_tick`] and tells
//! it when the peer went away. Nothing here waits on I/O.
//!
//! Every fatal condition, whichever check raised it, ends in
//! [`Connection::close`], which runs teardown exactly once.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::WorldConfig;
use crate::core::header::encode_server_frame;
use crate::core::packet::Frame;
use crate::error::{ErrorCategory, ProtocolError, Result};
use crate::protocol::coalescer::{OutboundCoalescer, SubmitOutcome};
use crate::protocol::flood_guard::{FloodGuard, PingVerdict};
use crate::protocol::handshake::{generate_seed, verify_proof, AuthChallenge, AuthResult, AuthSession};
use crate::protocol::opcodes::{opcode_name, CMSG_AUTH_SESSION, CMSG_PING, SMSG_PONG};
use crate::protocol::reassembler::InboundReassembler;
use crate::protocol::session::{
    AuthenticatedPeer, ConnectionHandle, SessionBinder, SessionKeyStore, WorldSession,
};
use crate::transport::Transport;
use crate::utils::crypto::HeaderCipher;
use crate::utils::metrics::{global_metrics, Metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Anonymous,
    Authenticating,
    Authenticated,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Anonymous => "anonymous",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side cleanly between frames.
    PeerDisconnected,
    /// The owner closed the connection (server shutdown, kick).
    Shutdown,
    /// A fatal error from any check.
    Fatal {
        category: ErrorCategory,
        detail: String,
    },
}

/// Collaborators shared by every connection of a server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<WorldConfig>,
    pub key_store: Arc<dyn SessionKeyStore>,
    pub binder: Arc<dyn SessionBinder>,
    pub metrics: Arc<Metrics>,
}

impl ConnectionContext {
    /// Context reporting into the process-wide metrics.
    pub fn new(
        config: Arc<WorldConfig>,
        key_store: Arc<dyn SessionKeyStore>,
        binder: Arc<dyn SessionBinder>,
    ) -> Self {
        Self {
            config,
            key_store,
            binder,
            metrics: global_metrics(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Reply to a ping, echoing its sequence number.
pub fn pong_frame(sequence: u32) -> Frame {
    Frame::new(SMSG_PONG, sequence.to_le_bytes().to_vec())
}

pub struct Connection<T: Transport> {
    id: u64,
    peer: String,
    state: ConnectionState,
    transport: T,
    ctx: ConnectionContext,
    server_seed: u32,
    cipher: Option<HeaderCipher>,
    reassembler: InboundReassembler,
    outbound: OutboundCoalescer,
    flood: FloodGuard,
    session: Option<Weak<dyn WorldSession>>,
    handle: ConnectionHandle,
    from_session: mpsc::UnboundedReceiver<Frame>,
    account: Option<String>,
    latency_ms: u32,
    close_reason: Option<CloseReason>,
}

impl<T: Transport> Connection<T> {
    pub fn new(id: u64, peer: impl Into<String>, transport: T, ctx: ConnectionContext) -> Self {
        let (handle, from_session) = ConnectionHandle::channel();
        let reassembler = InboundReassembler::new(ctx.config.connection.max_inbound_payload);
        let outbound = OutboundCoalescer::new(&ctx.config.connection);
        let flood = FloodGuard::new(&ctx.config.flood);
        ctx.metrics.connection_opened();

        Self {
            id,
            peer: peer.into(),
            state: ConnectionState::Anonymous,
            transport,
            ctx,
            server_seed: generate_seed(),
            cipher: None,
            reassembler,
            outbound,
            flood,
            session: None,
            handle,
            from_session,
            account: None,
            latency_ms: 0,
            close_reason: None,
        }
    }

    /// Send the auth challenge. Called once, right after accept.
    #[instrument(skip(self), level = "debug", fields(conn = self.id))]
    pub fn open(&mut self) -> Result<()> {
        if self.is_closing() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let challenge = AuthChallenge {
            server_seed: self.server_seed,
        };
        self.send_frame(&challenge.to_frame())
            .map_err(|e| self.fail(e))?;
        self.flush()?;
        debug!(peer = %self.peer, "Sent auth challenge");
        Ok(())
    }

    /// Deliver bytes read from the peer.
    ///
    /// Completed frames are handled in receive order. A fatal error closes the
    /// connection before it is returned; bytes that follow it are not parsed.
    #[instrument(skip(self, data), level = "trace", fields(conn = self.id, len = data.len()))]
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Result<()> {
        if self.is_closing() {
            trace!("Ignoring bytes for closed connection");
            return Err(ProtocolError::ConnectionClosed);
        }
        self.ctx.metrics.bytes_received(data.len() as u64);

        let mut input = data;
        loop {
            let frame = match self.reassembler.step(&mut input, self.cipher.as_mut()) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return Err(self.fail(e)),
            };
            self.ctx.metrics.frame_received();

            if let Err(e) = self.handle_frame(frame, now) {
                return Err(self.fail(e));
            }
        }
        self.on_flush_request()?;
        Ok(())
    }

    /// Queue a frame for the peer.
    ///
    /// A frame the outbound header cannot describe is refused without closing
    /// the connection; transport and backpressure failures are fatal.
    pub fn submit(&mut self, frame: Frame) -> Result<SubmitOutcome> {
        if self.is_closing() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.pump_outbound()?;
        let encoded = self.encode(&frame)?;
        self.push_encoded(encoded).map_err(|e| self.fail(e))
    }

    /// One write attempt of whatever is buffered.
    pub fn flush(&mut self) -> Result<usize> {
        if self.is_closing() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let written = self
            .outbound
            .flush(&mut self.transport)
            .map_err(|e| self.fail(e))?;
        self.record_flush(written);
        Ok(written)
    }

    /// Move frames the session sent through its [`ConnectionHandle`] into the
    /// coalescer. Returns how many were taken.
    pub fn pump_outbound(&mut self) -> Result<usize> {
        if self.is_closing() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let mut pumped = 0;
        while let Ok(frame) = self.from_session.try_recv() {
            let encoded = match self.encode(&frame) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(conn = self.id, opcode = frame.opcode, error = %e, "Dropping frame the session cannot send");
                    continue;
                }
            };
            self.push_encoded(encoded).map_err(|e| self.fail(e))?;
            pumped += 1;
        }
        Ok(pumped)
    }

    /// Periodic flush. A no-op once the connection is closing.
    pub fn on_timer_tick(&mut self) -> Result<usize> {
        if !self.timer_active() {
            return Ok(0);
        }
        self.pump_outbound()?;
        let written = self
            .outbound
            .on_timer_tick(&mut self.transport)
            .map_err(|e| self.fail(e))?;
        self.record_flush(written);
        Ok(written)
    }

    /// Pump and flush at once if the session used
    /// [`ConnectionHandle::send_immediate`] since the last call.
    pub fn on_flush_request(&mut self) -> Result<usize> {
        if self.is_closing() || !self.handle.take_flush_request() {
            return Ok(0);
        }
        self.pump_outbound()?;
        self.flush()
    }

    /// Whether the owner should keep ticking this connection.
    pub fn timer_active(&self) -> bool {
        !self.is_closing()
    }

    /// Sever the link to the session; later frames are dropped silently.
    pub fn unbind(&mut self) {
        self.handle.unbind();
        self.session = None;
    }

    /// The read side reached end of stream.
    pub fn on_peer_closed(&mut self) -> Result<()> {
        if self.is_closing() {
            return Ok(());
        }
        if self.reassembler.in_flight() {
            let err = ProtocolError::TruncatedStream(format!(
                "{} bytes of an unfinished frame held at end of stream",
                self.reassembler.held_len()
            ));
            return Err(self.fail(err));
        }
        self.close(CloseReason::PeerDisconnected);
        Ok(())
    }

    /// Tear the connection down. Safe to call any number of times; only the
    /// first call has an effect.
    pub fn close(&mut self, reason: CloseReason) {
        if self.is_closing() {
            return;
        }
        self.state = ConnectionState::Closing;

        // Rejection responses are already buffered; one attempt, no waiting.
        match self.outbound.flush(&mut self.transport) {
            Ok(written) => self.record_flush(written),
            Err(e) => debug!(conn = self.id, error = %e, "Final flush failed"),
        }

        self.handle.mark_closed();
        self.from_session.close();

        let session = self.session.take().and_then(|weak| weak.upgrade());
        if let Some(session) = session {
            if !self.handle.is_detached() {
                session.on_disconnect();
            }
        }

        self.cipher = None;
        self.reassembler.reset();
        self.outbound.clear();
        self.ctx.metrics.connection_closed();

        info!(
            conn = self.id,
            peer = %self.peer,
            account = self.account.as_deref().unwrap_or("-"),
            reason = ?reason,
            "Connection closed"
        );
        self.close_reason = Some(reason);
        self.state = ConnectionState::Closed;
    }

    /// Close on a fatal error and hand the error back to the caller.
    pub fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        if self.is_closing() {
            return err;
        }

        let category = err.category();
        match category {
            ErrorCategory::Transport => self.ctx.metrics.connection_error(),
            _ => self.ctx.metrics.protocol_error(),
        }
        warn!(conn = self.id, peer = %self.peer, state = %self.state, %category, error = %err, "Fatal connection error");

        self.close(CloseReason::Fatal {
            category,
            detail: err.to_string(),
        });
        err
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) -> Result<()> {
        trace!(opcode = opcode_name(frame.opcode), len = frame.len(), "Frame received");

        match (self.state, frame.opcode) {
            (ConnectionState::Anonymous, CMSG_AUTH_SESSION) => self.handle_auth_session(&frame),
            (ConnectionState::Authenticated, CMSG_PING) => self.handle_ping(&frame, now),
            (ConnectionState::Authenticated, CMSG_AUTH_SESSION) => Err(self.unexpected(&frame)),
            (ConnectionState::Authenticated, _) => {
                self.dispatch(frame);
                Ok(())
            }
            (ConnectionState::Closing | ConnectionState::Closed, _) => {
                Err(ProtocolError::ConnectionClosed)
            }
            _ => Err(self.unexpected(&frame)),
        }
    }

    fn handle_auth_session(&mut self, frame: &Frame) -> Result<()> {
        self.state = ConnectionState::Authenticating;
        self.ctx.metrics.handshake_attempt();

        let auth = AuthSession::parse(frame)?;
        debug!(conn = self.id, account = %auth.account, build = auth.build, "Auth session received");

        if !self.ctx.config.auth.accepts_build(auth.build) {
            return self.reject(
                AuthResult::VersionMismatch,
                ProtocolError::UnsupportedBuild(auth.build),
            );
        }

        let Some(key) = self.ctx.key_store.lookup_secret(&auth.account) else {
            return self.reject(
                AuthResult::UnknownAccount,
                ProtocolError::UnknownAccount(auth.account),
            );
        };

        if !verify_proof(&auth, self.server_seed, &key.secret) {
            return self.reject(
                AuthResult::Failed,
                ProtocolError::AuthenticationFailed(auth.account),
            );
        }

        // Everything written from here on carries an encrypted header,
        // starting with the response itself, which must precede anything the
        // session sends.
        self.cipher = Some(HeaderCipher::new(&key.secret)?);
        self.send_frame(&AuthResult::Ok.to_frame())?;

        let peer = AuthenticatedPeer {
            account_id: key.account_id,
            account: auth.account.clone(),
            build: auth.build,
            handle: self.handle.clone(),
        };
        let session = self.ctx.binder.bind(peer);
        self.session = Some(Arc::downgrade(&session));
        self.account = Some(auth.account);
        self.state = ConnectionState::Authenticated;
        self.ctx.metrics.handshake_success();
        info!(
            conn = self.id,
            peer = %self.peer,
            account = self.account.as_deref().unwrap_or("-"),
            "Connection authenticated"
        );
        Ok(())
    }

    fn reject(&mut self, result: AuthResult, err: ProtocolError) -> Result<()> {
        self.ctx.metrics.handshake_failed();
        self.send_frame(&result.to_frame())?;
        Err(err)
    }

    fn handle_ping(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        let mut reader = frame.reader();
        let sequence = reader.read_u32()?;
        let latency = reader.read_u32()?;
        self.latency_ms = latency;

        let session = self.live_session();
        if self.flood.record_ping(now) == PingVerdict::Reject {
            let overspeed = self.flood.overspeed_pings();
            if session.as_ref().is_some_and(|s| s.flood_exempt()) {
                info!(conn = self.id, overspeed, "Ping flood from exempt session");
            } else {
                self.ctx.metrics.flood_kick();
                return Err(ProtocolError::PingFlood(overspeed));
            }
        }

        if let Some(session) = session {
            session.update_latency(latency);
        }
        self.send_frame(&pong_frame(sequence))?;
        Ok(())
    }

    fn dispatch(&mut self, frame: Frame) {
        match self.live_session() {
            Some(session) => session.handle_frame(frame),
            None => trace!(
                conn = self.id,
                opcode = frame.opcode,
                "No session bound; frame dropped"
            ),
        }
    }

    fn live_session(&mut self) -> Option<Arc<dyn WorldSession>> {
        if self.handle.is_detached() {
            self.session = None;
        }
        self.session.as_ref().and_then(Weak::upgrade)
    }

    fn unexpected(&self, frame: &Frame) -> ProtocolError {
        ProtocolError::UnexpectedMessage {
            opcode: frame.opcode,
            state: self.state.to_string(),
        }
    }

    fn encode(&mut self, frame: &Frame) -> Result<Bytes> {
        encode_server_frame(
            frame,
            self.ctx.config.connection.max_outbound_payload,
            self.cipher.as_mut(),
        )
    }

    fn push_encoded(&mut self, encoded: Bytes) -> Result<SubmitOutcome> {
        let outcome = self.outbound.submit(encoded, &mut self.transport)?;
        self.ctx.metrics.frame_sent();
        Ok(outcome)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<SubmitOutcome> {
        // Frames the session already queued on its handle go out first.
        self.pump_outbound()?;
        let encoded = self.encode(frame)?;
        self.push_encoded(encoded)
    }

    fn record_flush(&self, written: usize) {
        if written > 0 {
            self.ctx.metrics.flushed(written as u64);
        }
    }

    fn is_closing(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn server_seed(&self) -> u32 {
        self.server_seed
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some() && !self.handle.is_detached()
    }

    /// A handle for writing into this connection from another thread.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn outbound(&self) -> &OutboundCoalescer {
        &self.outbound
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
