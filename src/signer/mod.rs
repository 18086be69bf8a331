//! Device database signer
//!
//! The firmware rejects an iTunesDB whose signature does not match, so the
//! signer is part of the codec's correctness contract. Two keyed hashes are
//! implemented: HASH58 (HMAC-SHA1 keyed from the FireWire GUID, 20-byte slot
//! at mhbd offset 0x58) and HASH72 (AES-CBC over a SHA-1 digest, 46-byte
//! slot at 0x72). A Classic carries both; HASH72 is stamped first because
//! its bytes are part of HASH58's input.
//!
//! Certain mhbd ranges are excluded from every hash: they are backed up,
//! zeroed, and restored after hashing but before the signature is spliced
//! in. Restoring later would overwrite the signature.

mod hash58;
mod hash72;
mod tables;

use crate::error::SyncError;
use crate::itunesdb as db;
use crate::itunesdb::MHBD_HEADER_LEN;

/// Key material parsed from the device.
#[derive(Debug, Clone, Default)]
pub struct DeviceKeys {
    /// 8-byte FireWire GUID from SysInfo (`FirewireGuid:`).
    pub firewire_guid: Option<[u8; 8]>,
    /// HashInfo artifact captured from a genuine sync.
    pub hash_info: Option<HashInfo>,
}

/// The 54-byte HashInfo artifact: `HASHv0` tag, 20-byte UUID, 12 random
/// bytes, 16-byte AES IV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashInfo {
    pub uuid: [u8; 20],
    pub rndpart: [u8; 12],
    pub iv: [u8; 16],
}

/// Which signature(s) the device checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    /// HMAC-SHA1 only (Nano 3G era).
    Hash58,
    /// AES-CBC signature only (Nano 5G era).
    Hash72,
    /// Classic: both, HASH72 first.
    Classic,
    /// Nano 6G/7G scheme. Not supported; signing fails.
    HashAb,
}

/// Pick a scheme from the key material at hand.
pub fn infer_scheme(keys: &DeviceKeys) -> Result<SigningScheme, SyncError> {
    match (&keys.firewire_guid, &keys.hash_info) {
        (Some(_), Some(_)) => Ok(SigningScheme::Classic),
        (None, Some(_)) => Ok(SigningScheme::Hash72),
        (Some(_), None) => Ok(SigningScheme::Hash58),
        (None, None) => Err(SyncError::SignerInputMissing(
            "neither FireWire GUID nor HashInfo is available".into(),
        )),
    }
}

/// Stamp the signature(s) into an emitted database buffer.
pub fn sign_database(
    buf: &mut [u8],
    scheme: SigningScheme,
    keys: &DeviceKeys,
) -> Result<(), SyncError> {
    if buf.len() < MHBD_HEADER_LEN as usize {
        return Err(SyncError::CodecInvariantViolation(
            "buffer shorter than the mhbd header".into(),
        ));
    }

    // The selector is part of the hash input, so it goes in first; signing
    // an already-signed buffer then reproduces the same bytes.
    let selector: u16 = match scheme {
        SigningScheme::Hash58 | SigningScheme::Classic => 1,
        SigningScheme::Hash72 => 2,
        SigningScheme::HashAb => {
            return Err(SyncError::SignerInputMissing(
                "HASHAB devices (Nano 6G/7G) are not supported".into(),
            ));
        }
    };
    buf[db::MHBD_SCHEME_OFFSET..db::MHBD_SCHEME_OFFSET + 2]
        .copy_from_slice(&selector.to_le_bytes());

    match scheme {
        SigningScheme::Hash58 => {
            let guid = require_guid(keys)?;
            hash58::sign(buf, &guid);
        }
        SigningScheme::Hash72 => {
            let info = require_hash_info(keys)?;
            hash72::sign(buf, info)?;
        }
        SigningScheme::Classic => {
            let guid = require_guid(keys)?;
            let info = require_hash_info(keys)?;
            hash72::sign(buf, info)?;
            hash58::sign(buf, &guid);
        }
        SigningScheme::HashAb => unreachable!(),
    }

    log::debug!("database signed with {:?}", scheme);
    Ok(())
}

fn require_guid(keys: &DeviceKeys) -> Result<[u8; 8], SyncError> {
    keys.firewire_guid.ok_or_else(|| {
        SyncError::SignerInputMissing("FireWire GUID required but not found in SysInfo".into())
    })
}

fn require_hash_info(keys: &DeviceKeys) -> Result<&HashInfo, SyncError> {
    keys.hash_info.as_ref().ok_or_else(|| {
        SyncError::SignerInputMissing("HashInfo required but not present on the device".into())
    })
}

/// Backup of the mhbd ranges excluded from hash input.
pub(crate) struct ExcludedRanges {
    db_id: [u8; 8],
    unk_0x32: [u8; 20],
}

/// Zero the common excluded ranges, returning the originals.
pub(crate) fn zero_excluded(buf: &mut [u8]) -> ExcludedRanges {
    let mut db_id = [0u8; 8];
    db_id.copy_from_slice(&buf[db::MHBD_DBID_OFFSET..db::MHBD_DBID_OFFSET + 8]);
    buf[db::MHBD_DBID_OFFSET..db::MHBD_DBID_OFFSET + 8].fill(0);

    let mut unk_0x32 = [0u8; 20];
    unk_0x32.copy_from_slice(&buf[db::MHBD_UNK_0X32_OFFSET..db::MHBD_UNK_0X32_OFFSET + 20]);
    buf[db::MHBD_UNK_0X32_OFFSET..db::MHBD_UNK_0X32_OFFSET + 20].fill(0);

    ExcludedRanges { db_id, unk_0x32 }
}

/// Restore the excluded ranges. Must run before the signature is written.
pub(crate) fn restore_excluded(buf: &mut [u8], saved: ExcludedRanges) {
    buf[db::MHBD_DBID_OFFSET..db::MHBD_DBID_OFFSET + 8].copy_from_slice(&saved.db_id);
    buf[db::MHBD_UNK_0X32_OFFSET..db::MHBD_UNK_0X32_OFFSET + 20].copy_from_slice(&saved.unk_0x32);
}
