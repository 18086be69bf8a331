//! HASH58: HMAC-SHA1 keyed from the FireWire GUID
//!
//! Key schedule: the GUID's four byte pairs are folded through lcm, split
//! into high and low bytes, and substituted through the two fixed tables to
//! build a 16-byte vector. SHA-1 over an 18-byte constant plus that vector,
//! zero-padded to 64 bytes, is the HMAC key. The MAC runs over the
//! normalized database and lands in the 20-byte slot at mhbd offset 0x58.

use super::tables::{INV_SBOX, SBOX};
use crate::itunesdb as db;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Prefix hashed ahead of the substituted GUID vector.
const KEY_CONSTANT: [u8; 18] = [
    0x67, 0x23, 0xFE, 0x30, 0x45, 0x33, 0xF8, 0x90, 0x99, 0x21, 0x07, 0xC1, 0xD0, 0x12, 0xB2,
    0xA1, 0x07, 0x81,
];

/// Stamp the HASH58 signature.
pub fn sign(buf: &mut [u8], guid: &[u8; 8]) {
    let saved = super::zero_excluded(buf);
    buf[db::MHBD_HASH58_OFFSET..db::MHBD_HASH58_OFFSET + db::MHBD_HASH58_LEN].fill(0);

    let key = derive_key(guid);
    let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(buf);
    let signature = mac.finalize().into_bytes();

    super::restore_excluded(buf, saved);
    buf[db::MHBD_HASH58_OFFSET..db::MHBD_HASH58_OFFSET + db::MHBD_HASH58_LEN]
        .copy_from_slice(&signature);
}

/// Derive the 64-byte HMAC key from the GUID.
fn derive_key(guid: &[u8; 8]) -> [u8; 64] {
    let mut y = [0u8; 16];
    for i in 0..4 {
        let l = lcm(guid[2 * i], guid[2 * i + 1]);
        let hi = (l >> 8) as u8;
        let lo = l as u8;
        y[4 * i] = SBOX[hi as usize];
        y[4 * i + 1] = INV_SBOX[hi as usize];
        y[4 * i + 2] = SBOX[lo as usize];
        y[4 * i + 3] = INV_SBOX[lo as usize];
    }

    let mut hasher = Sha1::new();
    hasher.update(KEY_CONSTANT);
    hasher.update(y);
    let digest = hasher.finalize();

    let mut key = [0u8; 64];
    key[..20].copy_from_slice(&digest);
    key
}

/// lcm over GUID bytes; a zero operand yields 1.
fn lcm(a: u8, b: u8) -> u16 {
    if a == 0 || b == 0 {
        return 1;
    }
    let g = gcd(a, b) as u16;
    (a as u16 / g) * b as u16
}

fn gcd(mut a: u8, mut b: u8) -> u8 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcm_zero_rule() {
        assert_eq!(lcm(0, 9), 1);
        assert_eq!(lcm(9, 0), 1);
        assert_eq!(lcm(0, 0), 1);
    }

    #[test]
    fn test_lcm_values() {
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(7, 7), 7);
        assert_eq!(lcm(254, 255), 64770); // largest co-prime pair fits u16
    }

    #[test]
    fn test_key_is_guid_sensitive() {
        let a = derive_key(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let b = derive_key(&[1, 2, 3, 4, 5, 6, 7, 9]);
        assert_ne!(a, b);
        // Zero padding after the digest
        assert!(a[20..].iter().all(|&x| x == 0));
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let guid = [0x00, 0x0A, 0x27, 0x00, 0x14, 0x32, 0x51, 0x69];
        assert_eq!(derive_key(&guid), derive_key(&guid));
    }
}
