//! HASH72: AES-CBC signature over a SHA-1 digest
//!
//! Requires the HashInfo artifact captured from a genuine device sync. The
//! SHA-1 of the normalized database is concatenated with the device's 12
//! random bytes and encrypted with AES-128-CBC under a fixed key and the
//! device IV. The 46-byte signature (`01 00`, rndpart, ciphertext) lands in
//! the slot at mhbd offset 0x72.

use super::HashInfo;
use crate::error::SyncError;
use crate::itunesdb as db;
use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// Fixed AES-128 key shared by all HASH72 devices.
const AES_KEY: [u8; 16] = [
    0x61, 0x8C, 0xA1, 0x0D, 0xC7, 0xF5, 0x7F, 0xD3, 0xB4, 0x72, 0x3E, 0x08, 0x15, 0x74, 0x63,
    0xD7,
];

/// Stamp the HASH72 signature.
///
/// Both signature slots are zeroed for the digest: on a Classic this hash
/// runs first, and a previously stamped HASH58 must not leak into the input.
pub fn sign(buf: &mut [u8], info: &HashInfo) -> Result<(), SyncError> {
    let saved = super::zero_excluded(buf);
    buf[db::MHBD_HASH58_OFFSET..db::MHBD_HASH58_OFFSET + db::MHBD_HASH58_LEN].fill(0);
    buf[db::MHBD_HASH72_OFFSET..db::MHBD_HASH72_OFFSET + db::MHBD_HASH72_LEN].fill(0);

    let digest = Sha1::digest(&*buf);

    let mut block = [0u8; 32];
    block[..20].copy_from_slice(&digest);
    block[20..].copy_from_slice(&info.rndpart);

    let cipher = Aes128CbcEnc::new(&AES_KEY.into(), &info.iv.into());
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut block, 32)
        .map_err(|_| {
            SyncError::CodecInvariantViolation("HASH72 plaintext not block-aligned".into())
        })?;

    super::restore_excluded(buf, saved);

    let mut signature = [0u8; db::MHBD_HASH72_LEN];
    signature[0] = 0x01;
    signature[1] = 0x00;
    signature[2..14].copy_from_slice(&info.rndpart);
    signature[14..].copy_from_slice(&block);
    buf[db::MHBD_HASH72_OFFSET..db::MHBD_HASH72_OFFSET + db::MHBD_HASH72_LEN]
        .copy_from_slice(&signature);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itunesdb::{emit_database, Database, TrackRecord};

    fn fixture() -> (Vec<u8>, HashInfo) {
        let mut database = Database::new();
        database.tracks.push(TrackRecord::new(3));
        let (bytes, _) = emit_database(&mut database).unwrap();
        let info = HashInfo {
            uuid: [9; 20],
            rndpart: [0xAB; 12],
            iv: [0x01; 16],
        };
        (bytes, info)
    }

    #[test]
    fn test_signature_shape() {
        let (mut bytes, info) = fixture();
        sign(&mut bytes, &info).unwrap();

        let slot = &bytes[db::MHBD_HASH72_OFFSET..db::MHBD_HASH72_OFFSET + db::MHBD_HASH72_LEN];
        assert_eq!(slot[0], 0x01);
        assert_eq!(slot[1], 0x00);
        assert_eq!(&slot[2..14], &info.rndpart);
        // Ciphertext must not be the raw digest
        assert_ne!(&slot[14..34], &Sha1::digest(&bytes)[..]);
    }

    #[test]
    fn test_iv_changes_signature() {
        let (bytes, info) = fixture();
        let mut a = bytes.clone();
        let mut b = bytes;
        sign(&mut a, &info).unwrap();
        let other = HashInfo {
            iv: [0x02; 16],
            ..info
        };
        sign(&mut b, &other).unwrap();
        assert_ne!(
            a[db::MHBD_HASH72_OFFSET + 14..db::MHBD_HASH72_OFFSET + 46],
            b[db::MHBD_HASH72_OFFSET + 14..db::MHBD_HASH72_OFFSET + 46]
        );
    }
}
