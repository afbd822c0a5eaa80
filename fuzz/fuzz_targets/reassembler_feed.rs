#![no_main]

use libfuzzer_sys::fuzz_target;
use world_protocol::config::MAX_INBOUND_PAYLOAD;
use world_protocol::protocol::reassembler::InboundReassembler;
use world_protocol::utils::crypto::HeaderCipher;

fuzz_target!(|data: &[u8]| {
    // First byte picks the read size, the rest is the stream.
    let Some((&chunk, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);

    let mut plain = InboundReassembler::new(MAX_INBOUND_PAYLOAD);
    let mut encrypted = InboundReassembler::new(MAX_INBOUND_PAYLOAD);
    let Ok(mut cipher) = HeaderCipher::new(b"fuzz") else {
        return;
    };

    for piece in stream.chunks(chunk) {
        if let Ok(frames) = plain.feed(piece, None) {
            for frame in frames {
                assert!(frame.len() <= MAX_INBOUND_PAYLOAD);
            }
        }
        let _ = encrypted.feed(piece, Some(&mut cipher));
    }
});
