use crate::metadata::TagData;
use std::path::PathBuf;

/// A track on the PC side, as seen by the diff engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PcTrack {
    /// Absolute path to the audio file.
    pub path: PathBuf,

    /// Path relative to the library root; stored in the mapping as the
    /// collision-disambiguation hint.
    pub rel_path: String,

    /// Acoustic fingerprint, the primary identity key.
    pub fingerprint: String,

    pub size: u64,

    /// Modification time in Unix seconds.
    pub mtime: i64,

    pub tags: TagData,

    /// MD5 of the embedded artwork bytes, if any.
    pub art_hash: Option<String>,
}

impl PcTrack {
    pub fn album_key(&self) -> String {
        super::album_key(&self.tags.album)
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default()
    }
}
