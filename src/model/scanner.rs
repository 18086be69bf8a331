//! PC library scanner
//!
//! Walks a library root, reads tags and artwork through the metadata
//! provider, and fingerprints each file. A failed fingerprint skips the file
//! and is reported on the plan; the scan itself keeps going.

use super::PcTrack;
use crate::device::is_audio_extension;
use crate::fingerprint::FingerprintSource;
use crate::metadata::MetadataProvider;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Outcome of a library scan.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub tracks: Vec<PcTrack>,

    /// One human-readable line per file that failed to fingerprint.
    pub fingerprint_errors: Vec<String>,
}

/// Scan a library directory into PC-side track records.
pub fn scan_library(
    root: &Path,
    metadata: &dyn MetadataProvider,
    fingerprints: &dyn FingerprintSource,
) -> Result<ScanResult> {
    log::info!("scanning library: {:?}", root);
    let mut result = ScanResult::default();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !is_audio_extension(ext) && !matches!(ext.to_lowercase().as_str(), "flac" | "ogg" | "opus" | "wma") {
            continue;
        }

        let fingerprint = match fingerprints.fingerprint(path) {
            Ok(fp) => fp,
            Err(e) => {
                log::warn!("fingerprint failed for {:?}: {}", path, e);
                result
                    .fingerprint_errors
                    .push(format!("{}: {}", path.display(), e));
                continue;
            }
        };

        let tags = metadata
            .read_tags(path)
            .with_context(|| format!("Failed to read tags: {:?}", path))?;
        let art_hash = metadata
            .artwork(path)?
            .map(|bytes| format!("{:x}", md5::compute(&bytes)));

        let meta = entry
            .metadata()
            .with_context(|| format!("Failed to stat {:?}", path))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        result.tracks.push(PcTrack {
            path: path.to_path_buf(),
            rel_path,
            fingerprint,
            size: meta.len(),
            mtime,
            tags,
            art_hash,
        });
    }

    log::info!(
        "library scan: {} track(s), {} fingerprint error(s)",
        result.tracks.len(),
        result.fingerprint_errors.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::ContentHashSource;
    use crate::metadata::{StubProvider, TagData};

    #[test]
    fn test_scan_skips_non_audio_and_failed_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.mp3");
        std::fs::write(&song, b"audio bytes").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"not audio").unwrap();

        let mut provider = StubProvider::new();
        provider.set_tags(
            &song,
            TagData {
                title: "T".into(),
                album: "B".into(),
                ..Default::default()
            },
        );

        let result = scan_library(dir.path(), &provider, &ContentHashSource).unwrap();
        assert_eq!(result.tracks.len(), 1);
        assert_eq!(result.tracks[0].rel_path, "song.mp3");
        assert_eq!(result.tracks[0].album_key(), "b");
        assert!(result.fingerprint_errors.is_empty());
    }
}
