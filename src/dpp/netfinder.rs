//! NetFinder discovery packets.
//!
//! Ethernet-attached devices answer a 6-byte UDP broadcast on port 3040.
//! The request carries a random nonce; a positive reply echoes the nonce
//! and carries the device's identity block.

use rand::Rng;

/// Size of the discovery request.
pub const REQUEST_SIZE: usize = 6;
/// Minimum size of a positive reply.
pub const MIN_REPLY_SIZE: usize = 32;

/// Draw a fresh discovery nonce (1..=32767; zero is never sent).
pub fn fresh_nonce() -> u16 {
    rand::rng().random_range(1..=0x7FFF)
}

/// Build the 6-byte discovery broadcast payload.
pub fn build_request(nonce: u16) -> [u8; REQUEST_SIZE] {
    let mut request = [0u8, 0, 0, 0, 0xF4, 0xFA];
    request[2..4].copy_from_slice(&nonce.to_be_bytes());
    request
}

/// Identity block from a positive discovery reply.
#[derive(Debug, Clone)]
pub struct NetfinderReply {
    pub nonce: u16,
    /// Device alert/status byte as reported in the reply header.
    pub alert_level: u8,
    /// NUL-separated identity strings (description, serial, contact).
    pub identity: Vec<String>,
}

/// True when `reply` is a positive answer to the given nonce.
///
/// A positive reply starts with type byte 0x01, is at least 32 bytes,
/// and echoes the request nonce at offset 2. Type byte 0x00 is an
/// explicit negative; everything else is noise from other hosts.
pub fn matches_nonce(reply: &[u8], nonce: u16) -> bool {
    reply.len() >= MIN_REPLY_SIZE
        && reply[0] == 0x01
        && u16::from_be_bytes([reply[2], reply[3]]) == nonce
}

/// Parse a positive reply's identity block for display.
pub fn parse_reply(reply: &[u8], nonce: u16) -> Option<NetfinderReply> {
    if !matches_nonce(reply, nonce) {
        return None;
    }

    let identity = reply[MIN_REPLY_SIZE..]
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();

    Some(NetfinderReply {
        nonce,
        alert_level: reply[1],
        identity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let request = build_request(0x1234);
        assert_eq!(request, [0x00, 0x00, 0x12, 0x34, 0xF4, 0xFA]);
    }

    #[test]
    fn nonce_stays_in_range() {
        for _ in 0..100 {
            let nonce = fresh_nonce();
            assert!((1..=0x7FFF).contains(&nonce));
        }
    }

    fn positive_reply(nonce: u16) -> Vec<u8> {
        let mut reply = vec![0u8; MIN_REPLY_SIZE];
        reply[0] = 0x01;
        reply[1] = 2;
        reply[2..4].copy_from_slice(&nonce.to_be_bytes());
        reply.extend_from_slice(b"DP5\0S/N 1234\0");
        reply
    }

    #[test]
    fn reply_matching() {
        let reply = positive_reply(0x0101);
        assert!(matches_nonce(&reply, 0x0101));
        // Wrong nonce
        assert!(!matches_nonce(&reply, 0x0102));
        // Negative reply type
        let mut negative = reply.clone();
        negative[0] = 0x00;
        assert!(!matches_nonce(&negative, 0x0101));
        // Truncated packet
        assert!(!matches_nonce(&reply[..16], 0x0101));
    }

    #[test]
    fn reply_identity_strings() {
        let parsed = parse_reply(&positive_reply(7), 7).unwrap();
        assert_eq!(parsed.nonce, 7);
        assert_eq!(parsed.alert_level, 2);
        assert_eq!(parsed.identity, vec!["DP5".to_string(), "S/N 1234".to_string()]);
    }
}
