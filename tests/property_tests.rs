//! Property-based tests using proptest
//!
//! These tests check framing, cipher and coalescing invariants over randomly
//! generated frames, chunkings and write schedules.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::time::Instant;

use bytes::Bytes;
use common::*;
use proptest::prelude::*;
use world_protocol::config::{WorldConfig, MAX_INBOUND_PAYLOAD};
use world_protocol::core::header::{encode_client_frame, ClientHeader, ServerHeader};
use world_protocol::core::packet::Frame;
use world_protocol::protocol::coalescer::OutboundCoalescer;
use world_protocol::protocol::handshake::AuthChallenge;
use world_protocol::protocol::reassembler::InboundReassembler;
use world_protocol::utils::crypto::HeaderCipher;

fn frame_strategy() -> impl Strategy<Value = Frame> {
    (any::<u32>(), prop::collection::vec(any::<u8>(), 0..300))
        .prop_map(|(opcode, payload)| Frame::new(opcode, payload))
}

/// Split `bytes` at the given (unsorted, possibly repeated) cut points.
fn chunk<'a>(bytes: &'a [u8], cuts: &[usize]) -> Vec<&'a [u8]> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    points.push(0);
    points.push(bytes.len());
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| &bytes[w[0]..w[1]]).collect()
}

// Property: reassembly does not depend on how the stream was chunked
proptest! {
    #[test]
    fn prop_reassembly_is_chunk_independent(
        frames in prop::collection::vec(frame_strategy(), 1..20),
        cuts in prop::collection::vec(any::<usize>(), 0..40),
    ) {
        let wire: Vec<u8> = frames
            .iter()
            .flat_map(|f| encode_client_frame(f, None).unwrap().to_vec())
            .collect();

        let mut whole = InboundReassembler::new(MAX_INBOUND_PAYLOAD);
        let all_at_once = whole.feed(&wire, None).unwrap();

        let mut chunked = InboundReassembler::new(MAX_INBOUND_PAYLOAD);
        let mut piecewise = Vec::new();
        for piece in chunk(&wire, &cuts) {
            piecewise.extend(chunked.feed(piece, None).unwrap());
        }

        prop_assert_eq!(&all_at_once, &frames);
        prop_assert_eq!(&piecewise, &frames);
        prop_assert!(!chunked.in_flight());
    }
}

// Property: chunk independence holds with encrypted headers too
proptest! {
    #[test]
    fn prop_encrypted_reassembly_is_chunk_independent(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        frames in prop::collection::vec(frame_strategy(), 1..20),
        cuts in prop::collection::vec(any::<usize>(), 0..40),
    ) {
        let mut client = HeaderCipher::new(&secret).unwrap();
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&encode_client_frame(frame, Some(&mut client)).unwrap());
        }

        let mut server = HeaderCipher::new(&secret).unwrap();
        let mut reassembler = InboundReassembler::new(MAX_INBOUND_PAYLOAD);
        let mut out = Vec::new();
        for piece in chunk(&wire, &cuts) {
            out.extend(reassembler.feed(piece, Some(&mut server)).unwrap());
        }
        prop_assert_eq!(out, frames);
    }
}

// Property: headers decode to what was encoded, in both directions
proptest! {
    #[test]
    fn prop_header_roundtrip(opcode in any::<u32>(), short_opcode in any::<u16>(), len in 0usize..=65535) {
        let client = ClientHeader::for_payload(opcode, len).unwrap();
        prop_assert_eq!(ClientHeader::decode(&client.encode()), client);
        prop_assert_eq!(usize::from(client.payload_length), len);

        let server = ServerHeader::for_payload(u32::from(short_opcode), len, 65535).unwrap();
        let decoded = ServerHeader::decode(&server.encode());
        prop_assert_eq!(decoded, server);
        prop_assert_eq!(decoded.opcode, short_opcode);
    }
}

// Property: decrypt(encrypt(h)) == h on matching directional states
proptest! {
    #[test]
    fn prop_cipher_roundtrip(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        headers in prop::collection::vec(any::<[u8; 6]>(), 1..50),
    ) {
        let mut sender = HeaderCipher::new(&secret).unwrap();
        let mut receiver = HeaderCipher::new(&secret).unwrap();

        for header in &headers {
            let mut wire = *header;
            sender.encrypt(&mut wire);
            // The receiver also encrypts its own traffic in between; that must
            // not disturb its decrypt state.
            let mut unrelated = [0u8; 4];
            receiver.encrypt(&mut unrelated);
            receiver.decrypt(&mut wire);
            prop_assert_eq!(&wire, header);
        }
    }
}

// Property: the wire sees frames in submission order whatever the write schedule
proptest! {
    #[test]
    fn prop_coalescer_preserves_order(
        sizes in prop::collection::vec(1usize..200, 1..100),
        schedule in prop::collection::vec((any::<bool>(), 1usize..150), 1..50),
        capacity in 64usize..512,
    ) {
        let mut transport = MockTransport::default();
        let mut out = OutboundCoalescer::with_limits(capacity, 1_000, 1 << 20);
        let mut expected = Vec::new();

        for (n, size) in sizes.iter().enumerate() {
            let (blocked, per_write) = schedule[n % schedule.len()];
            transport.blocked = blocked;
            transport.max_per_write = Some(per_write);

            let frame = Bytes::from(vec![(n % 256) as u8; *size]);
            expected.extend_from_slice(&frame);
            out.submit(frame, &mut transport).unwrap();
        }

        transport.blocked = false;
        while !out.is_idle() {
            out.flush(&mut transport).unwrap();
        }
        prop_assert_eq!(transport.written, expected);
    }
}

// Property: an authenticated session receives the same frames however the
// client's bytes were split up by the network
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn prop_session_sees_frames_in_receive_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..100), 1..10),
        cuts in prop::collection::vec(any::<usize>(), 0..30),
    ) {
        let (mut conn, binder) = open_connection(WorldConfig::default());
        let mut client = ScriptedClient::new();
        let challenge = client.receive(&drain_written(&mut conn));
        let seed = AuthChallenge::parse(&challenge[0]).unwrap().server_seed;

        let mut wire = client.encode(auth_session(ACCOUNT, seed, SECRET).to_frame());
        client.install_cipher(SECRET);
        let frames: Vec<Frame> = payloads
            .into_iter()
            .map(|p| Frame::new(0x0B5, p))
            .collect();
        for frame in &frames {
            wire.extend(client.encode(frame.clone()));
        }

        for piece in chunk(&wire, &cuts) {
            conn.feed(piece, Instant::now()).unwrap();
        }
        prop_assert_eq!(binder.session(0).frames(), frames);
    }
}
