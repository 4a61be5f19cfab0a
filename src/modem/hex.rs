//! Hex coding for binary payloads on the text-only command channel.
//!
//! Every byte that crosses the serial link inside a command or a notification
//! (HTTP bodies, MQTT payloads, socket data) travels as two upper-case ASCII
//! hex digits. Decoding is lenient: an invalid digit decodes as zero and a
//! trailing odd nibble is dropped, because the modem is not allowed to crash us.

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'F' => c - b'A' + 10,
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

/// Append the hex encoding of `data` to `dest`.
pub fn encode_hex_append(dest: &mut String, data: &[u8]) {
    dest.reserve(data.len() * 2);
    for &byte in data {
        dest.push(HEX_CHARS[(byte >> 4) as usize] as char);
        dest.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
}

/// Append the bytes encoded by the hex text `data` to `dest`.
pub fn decode_hex_append(dest: &mut Vec<u8>, data: &[u8]) {
    dest.reserve(data.len() / 2);
    for pair in data.chunks_exact(2) {
        dest.push((nibble(pair[0]) << 4) | nibble(pair[1]));
    }
}

/// Encode `data` as upper-case hex. The result is always `2 * data.len()` long.
pub fn encode_hex(data: &[u8]) -> String {
    let mut encoded = String::new();
    encode_hex_append(&mut encoded, data);
    encoded
}

/// Decode hex text into bytes.
pub fn decode_hex(data: &str) -> Vec<u8> {
    let mut decoded = Vec::new();
    decode_hex_append(&mut decoded, data.as_bytes());
    decoded
}
