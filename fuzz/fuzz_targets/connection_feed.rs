#![no_main]

use std::sync::Arc;
use std::time::Instant;

use libfuzzer_sys::fuzz_target;
use world_protocol::config::WorldConfig;
use world_protocol::core::packet::Frame;
use world_protocol::protocol::{
    AuthenticatedPeer, Connection, ConnectionContext, InMemoryKeyStore, SessionBinder,
    WorldSession,
};

struct Discard;

impl WorldSession for Discard {
    fn handle_frame(&self, _frame: Frame) {}
}

impl SessionBinder for Discard {
    fn bind(&self, _peer: AuthenticatedPeer) -> Arc<dyn WorldSession> {
        Arc::new(Discard)
    }
}

fuzz_target!(|data: &[u8]| {
    // Anonymous connections must survive any input: either keep waiting or
    // close, never panic.
    let ctx = ConnectionContext::new(
        Arc::new(WorldConfig::default()),
        Arc::new(InMemoryKeyStore::new()),
        Arc::new(Discard),
    );
    let mut conn = Connection::new(0, "fuzz", Vec::new(), ctx);
    if conn.open().is_err() {
        return;
    }
    for piece in data.chunks(7) {
        if conn.feed(piece, Instant::now()).is_err() {
            assert!(!conn.timer_active());
            break;
        }
    }
});
