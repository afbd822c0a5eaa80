//! Message types the connection layer handles itself.
//!
//! Every other opcode is opaque here and is forwarded to the bound session.

/// Client keepalive carrying a sequence number and the client's latency estimate.
pub const CMSG_PING: u32 = 0x1DC;
/// Server reply to [`CMSG_PING`], echoing the sequence number.
pub const SMSG_PONG: u32 = 0x1DD;
/// First frame on every connection; carries the server seed.
pub const SMSG_AUTH_CHALLENGE: u32 = 0x1EC;
/// Client proof of the shared secret.
pub const CMSG_AUTH_SESSION: u32 = 0x1ED;
/// Outcome of the handshake.
pub const SMSG_AUTH_RESPONSE: u32 = 0x1EE;

/// Human-readable name for log lines.
pub fn opcode_name(opcode: u32) -> &'static str {
    match opcode {
        CMSG_PING => "CMSG_PING",
        SMSG_PONG => "SMSG_PONG",
        SMSG_AUTH_CHALLENGE => "SMSG_AUTH_CHALLENGE",
        CMSG_AUTH_SESSION => "CMSG_AUTH_SESSION",
        SMSG_AUTH_RESPONSE => "SMSG_AUTH_RESPONSE",
        _ => "UNKNOWN",
    }
}
