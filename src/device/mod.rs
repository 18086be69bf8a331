//! Device filesystem layout and identity
//!
//! Owns every path under the mount point and the parsers for the two
//! identity artifacts: SysInfo (`key: value` text, FireWire GUID) and
//! HashInfo (54-byte binary blob with the HASH72 IV and random bytes).

use crate::signer::{DeviceKeys, HashInfo};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Number of `Music/FNN` shard directories.
pub const MUSIC_SHARD_COUNT: usize = 50;

/// Audio file extensions the device firmware indexes.
pub const AUDIO_EXTENSIONS: [&str; 10] = [
    "mp3", "m4a", "m4b", "m4p", "mp4", "aac", "wav", "aif", "aiff", "alac",
];

pub fn is_audio_extension(ext: &str) -> bool {
    let lower = ext.to_lowercase();
    AUDIO_EXTENSIONS.contains(&lower.as_str())
}

/// Typed accessor for the on-device directory structure.
#[derive(Debug, Clone)]
pub struct DeviceLayout {
    mount: PathBuf,
}

impl DeviceLayout {
    pub fn new(mount: PathBuf) -> Self {
        Self { mount }
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    pub fn itunes_db_path(&self) -> PathBuf {
        self.mount.join("iPod_Control/iTunes/iTunesDB")
    }

    pub fn itunes_db_backup_path(&self) -> PathBuf {
        self.mount.join("iPod_Control/iTunes/iTunesDB.backup")
    }

    pub fn play_counts_path(&self) -> PathBuf {
        self.mount.join("iPod_Control/iTunes/Play Counts")
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.mount.join("iPod_Control/iTunes/iOpenPod.json")
    }

    pub fn artwork_db_path(&self) -> PathBuf {
        self.mount.join("iPod_Control/Artwork/ArtworkDB")
    }

    pub fn ithmb_path(&self, correlation_id: u32) -> PathBuf {
        self.mount
            .join("iPod_Control/Artwork")
            .join(format!("F{}_1.ithmb", correlation_id))
    }

    pub fn music_shard(&self, index: usize) -> PathBuf {
        self.mount
            .join("iPod_Control/Music")
            .join(format!("F{:02}", index % MUSIC_SHARD_COUNT))
    }

    pub fn sysinfo_path(&self) -> PathBuf {
        self.mount.join("iPod_Control/Device/SysInfo")
    }

    pub fn hashinfo_path(&self) -> PathBuf {
        self.mount.join("iPod_Control/Device/HashInfo")
    }

    /// Create the directory skeleton a fresh device is missing.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.mount.join("iPod_Control/iTunes"))
            .context("Failed to create iPod_Control/iTunes")?;
        fs::create_dir_all(self.mount.join("iPod_Control/Artwork"))
            .context("Failed to create iPod_Control/Artwork")?;
        fs::create_dir_all(self.mount.join("iPod_Control/Device"))
            .context("Failed to create iPod_Control/Device")?;
        for i in 0..MUSIC_SHARD_COUNT {
            fs::create_dir_all(self.music_shard(i))?;
        }
        Ok(())
    }

    /// Convert a device-side location string (colon separators, rooted at
    /// the mount) to a filesystem path.
    pub fn location_to_path(&self, location: &str) -> PathBuf {
        let relative: PathBuf = location
            .split(':')
            .filter(|c| !c.is_empty())
            .collect();
        self.mount.join(relative)
    }

    /// Inverse of [`location_to_path`]: a colon-separated location for a
    /// path under the mount.
    pub fn path_to_location(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.mount).ok()?;
        let mut location = String::new();
        for comp in rel.components() {
            location.push(':');
            location.push_str(&comp.as_os_str().to_string_lossy());
        }
        Some(location)
    }

    /// Load the device key material. Either artifact may be absent; the
    /// signer decides whether that is fatal.
    pub fn load_keys(&self) -> Result<DeviceKeys> {
        let firewire_guid = match fs::read_to_string(self.sysinfo_path()) {
            Ok(text) => parse_firewire_guid(&text),
            Err(_) => None,
        };
        let hash_info = match fs::read(self.hashinfo_path()) {
            Ok(bytes) => parse_hash_info(&bytes),
            Err(_) => None,
        };
        Ok(DeviceKeys {
            firewire_guid,
            hash_info,
        })
    }

    /// Free bytes on the filesystem holding the mount.
    #[cfg(unix)]
    pub fn free_space(&self) -> Result<u64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(self.mount.as_os_str().as_bytes())
            .context("mount path contains a NUL byte")?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("statvfs failed for {:?}", self.mount));
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }

    #[cfg(not(unix))]
    pub fn free_space(&self) -> Result<u64> {
        anyhow::bail!("free-space query not supported on this platform")
    }
}

/// Extract the FireWire GUID from SysInfo text.
///
/// The value is 16 hex characters, with or without a `0x` prefix.
pub fn parse_firewire_guid(text: &str) -> Option<[u8; 8]> {
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != "FirewireGuid" {
            continue;
        }
        let value = value.trim().trim_start_matches("0x");
        match hex::decode(value) {
            Ok(bytes) if bytes.len() == 8 => {
                let mut guid = [0u8; 8];
                guid.copy_from_slice(&bytes);
                return Some(guid);
            }
            _ => {
                log::warn!("malformed FirewireGuid value: {:?}", value);
                return None;
            }
        }
    }
    None
}

/// Parse the 54-byte HashInfo artifact.
///
/// Layout: `HASHv0` tag, 20-byte UUID, rndpart at offset 26 (12 bytes),
/// iv at offset 38 (16 bytes).
pub fn parse_hash_info(bytes: &[u8]) -> Option<HashInfo> {
    if bytes.len() < 54 || &bytes[..6] != b"HASHv0" {
        log::warn!("HashInfo present but malformed ({} bytes)", bytes.len());
        return None;
    }
    let mut uuid = [0u8; 20];
    uuid.copy_from_slice(&bytes[6..26]);
    let mut rndpart = [0u8; 12];
    rndpart.copy_from_slice(&bytes[26..38]);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&bytes[38..54]);
    Some(HashInfo { uuid, rndpart, iv })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_firewire_guid() {
        let text = "BoardHwName: iPod\nFirewireGuid: 0x000A270014325169\nModelNumStr: MB029\n";
        let guid = parse_firewire_guid(text).unwrap();
        assert_eq!(guid, [0x00, 0x0A, 0x27, 0x00, 0x14, 0x32, 0x51, 0x69]);
    }

    #[test]
    fn test_guid_without_prefix() {
        assert!(parse_firewire_guid("FirewireGuid: 000A270014325169\n").is_some());
        assert!(parse_firewire_guid("FirewireGuid: nope\n").is_none());
        assert!(parse_firewire_guid("OtherKey: 1\n").is_none());
    }

    #[test]
    fn test_parse_hash_info() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"HASHv0");
        bytes.extend_from_slice(&[1u8; 20]);
        bytes.extend_from_slice(&[2u8; 12]);
        bytes.extend_from_slice(&[3u8; 16]);

        let info = parse_hash_info(&bytes).unwrap();
        assert_eq!(info.uuid, [1u8; 20]);
        assert_eq!(info.rndpart, [2u8; 12]);
        assert_eq!(info.iv, [3u8; 16]);

        assert!(parse_hash_info(&bytes[..50]).is_none());
        assert!(parse_hash_info(b"HASHv1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_none());
    }

    #[test]
    fn test_location_roundtrip() {
        let layout = DeviceLayout::new(PathBuf::from("/mnt/ipod"));
        let path = layout.location_to_path(":iPod_Control:Music:F07:XQ3R.mp3");
        assert_eq!(
            path,
            PathBuf::from("/mnt/ipod/iPod_Control/Music/F07/XQ3R.mp3")
        );
        assert_eq!(
            layout.path_to_location(&path).unwrap(),
            ":iPod_Control:Music:F07:XQ3R.mp3"
        );
    }
}
