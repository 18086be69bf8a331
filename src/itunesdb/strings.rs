//! mhod string payload encoding
//!
//! The payload encoding is detected by byte pattern: UTF-16 code units for
//! ASCII text have a zero high byte, so a zero anywhere in the first four
//! payload bytes means UTF-16 LE. Writers emit UTF-16 LE unless the string
//! is pure ASCII.

/// Encode a string payload for a string mhod.
pub fn encode_payload(s: &str) -> Vec<u8> {
    if s.is_ascii() {
        s.as_bytes().to_vec()
    } else {
        let mut out = Vec::with_capacity(s.len() * 2);
        for unit in s.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }
}

/// Decode a string payload, detecting the encoding from the byte pattern.
pub fn decode_payload(bytes: &[u8]) -> String {
    if is_utf16(bytes) {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn is_utf16(bytes: &[u8]) -> bool {
    bytes.iter().take(4).any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_stays_utf8() {
        let enc = encode_payload("Song");
        assert_eq!(enc, b"Song");
        assert_eq!(decode_payload(&enc), "Song");
    }

    #[test]
    fn test_non_ascii_goes_utf16() {
        let enc = encode_payload("Björk");
        // 5 UTF-16 code units, LE
        assert_eq!(enc.len(), 10);
        assert_eq!(&enc[0..2], &[b'B', 0]);
        assert_eq!(decode_payload(&enc), "Björk");
    }

    #[test]
    fn test_detection_by_first_four_bytes() {
        // "AB" as UTF-16 LE: zero high bytes in the first four
        let utf16 = vec![b'A', 0, b'B', 0];
        assert_eq!(decode_payload(&utf16), "AB");
        // UTF-8 text has no zero bytes
        assert_eq!(decode_payload(b"ABCD"), "ABCD");
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(encode_payload(""), Vec::<u8>::new());
        assert_eq!(decode_payload(&[]), "");
    }
}
