//! End-to-end tests over real sockets: the tokio driver on one side, a
//! `Framed<TcpStream, PeerCodec>` client on the other.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{auth_session, key_store, ping_frame, ACCOUNT, SECRET};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use world_protocol::config::WorldConfig;
use world_protocol::core::codec::PeerCodec;
use world_protocol::core::packet::Frame;
use world_protocol::protocol::handshake::{AuthChallenge, AuthResult};
use world_protocol::protocol::opcodes::{SMSG_AUTH_CHALLENGE, SMSG_PONG};
use world_protocol::protocol::{AuthenticatedPeer, ConnectionContext, SessionBinder, WorldSession};
use world_protocol::transport::tcp::start_server_with_shutdown;
use world_protocol::utils::crypto::HeaderCipher;
use world_protocol::utils::metrics::Metrics;

const WAIT: Duration = Duration::from_secs(5);

/// Session that answers every frame with the same payload under `opcode + 1`.
struct EchoSession {
    peer: AuthenticatedPeer,
}

impl WorldSession for EchoSession {
    fn handle_frame(&self, frame: Frame) {
        let reply = Frame::new(frame.opcode + 1, frame.payload);
        let _ = self.peer.handle.send(reply);
    }
}

#[derive(Default)]
struct EchoBinder {
    sessions: Mutex<Vec<Arc<EchoSession>>>,
}

impl SessionBinder for EchoBinder {
    fn bind(&self, peer: AuthenticatedPeer) -> Arc<dyn WorldSession> {
        let session = Arc::new(EchoSession { peer });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        session
    }
}

async fn start() -> (std::net::SocketAddr, mpsc::Sender<()>, tokio::task::JoinHandle<()>, Arc<Metrics>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let metrics = Arc::new(Metrics::new());
    let ctx = ConnectionContext::new(
        Arc::new(WorldConfig::default()),
        key_store(),
        Arc::new(EchoBinder::default()),
    )
    .with_metrics(Arc::clone(&metrics));

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let server = tokio::spawn(async move {
        start_server_with_shutdown(listener, ctx, shutdown_rx)
            .await
            .unwrap();
    });
    (addr, shutdown_tx, server, metrics)
}

async fn next_frame(framed: &mut Framed<TcpStream, PeerCodec>) -> Frame {
    timeout(WAIT, framed.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("decode failed")
}

async fn read_challenge(framed: &mut Framed<TcpStream, PeerCodec>) -> u32 {
    let challenge = next_frame(framed).await;
    assert_eq!(challenge.opcode, SMSG_AUTH_CHALLENGE);
    AuthChallenge::parse(&challenge).unwrap().server_seed
}

#[tokio::test]
async fn test_full_session_over_tcp() {
    let (addr, shutdown_tx, server, metrics) = start().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, PeerCodec::new());

    let seed = read_challenge(&mut framed).await;
    framed
        .send(auth_session(ACCOUNT, seed, SECRET).to_frame())
        .await
        .unwrap();
    framed
        .codec_mut()
        .install_cipher(HeaderCipher::new(SECRET).unwrap());

    assert_eq!(next_frame(&mut framed).await, AuthResult::Ok.to_frame());

    // Game frame out, echo back through the session's handle.
    framed.send(Frame::new(0x100, b"state".to_vec())).await.unwrap();
    assert_eq!(
        next_frame(&mut framed).await,
        Frame::new(0x101, b"state".to_vec())
    );

    framed.send(ping_frame(11, 30)).await.unwrap();
    assert_eq!(
        next_frame(&mut framed).await,
        Frame::new(SMSG_PONG, 11u32.to_le_bytes().to_vec())
    );

    // Many small frames come back in order.
    for n in 0..50u32 {
        framed
            .send(Frame::new(0x200, n.to_le_bytes().to_vec()))
            .await
            .unwrap();
    }
    for n in 0..50u32 {
        assert_eq!(
            next_frame(&mut framed).await,
            Frame::new(0x201, n.to_le_bytes().to_vec())
        );
    }

    drop(framed);
    shutdown_tx.send(()).await.unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.handshakes_success, 1);
    assert_eq!(snapshot.connections_active, 0);
}

#[tokio::test]
async fn test_unknown_account_gets_response_then_eof() {
    let (addr, shutdown_tx, server, metrics) = start().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, PeerCodec::new());

    let seed = read_challenge(&mut framed).await;
    framed
        .send(auth_session("MALLORY", seed, SECRET).to_frame())
        .await
        .unwrap();

    assert_eq!(
        next_frame(&mut framed).await,
        AuthResult::UnknownAccount.to_frame()
    );
    let end = timeout(WAIT, framed.next()).await.unwrap();
    assert!(end.is_none());

    shutdown_tx.send(()).await.unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(metrics.snapshot().handshakes_failed, 1);
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let (addr, shutdown_tx, server, metrics) = start().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, PeerCodec::new());
    read_challenge(&mut framed).await;

    shutdown_tx.send(()).await.unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();

    let end = timeout(WAIT, framed.next()).await.unwrap();
    assert!(end.is_none());
    assert_eq!(metrics.snapshot().connections_active, 0);
}
