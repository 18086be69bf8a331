//! Integrity checker
//!
//! Three sources of truth can drift: the audio files on the device, the
//! database, and the mapping. A cancelled or crashed sync leaves partial
//! file mutations behind; this pass reconciles them before every diff so
//! the diff engine never has to repair anything itself.
//!
//! Checks run in a fixed order: database → filesystem, then mapping →
//! database, then filesystem → database (orphans). Running the checker
//! twice in a row yields zero fixes the second time.

use crate::device::{is_audio_extension, DeviceLayout, MUSIC_SHARD_COUNT};
use crate::itunesdb::Database;
use crate::mapping::MappingStore;
use anyhow::Result;
use std::collections::HashSet;
use walkdir::WalkDir;

/// What the checker fixed, attached to the plan as information.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IntegrityReport {
    /// Check A: tracks whose file is gone, removed from the working set.
    pub missing_files: Vec<String>,
    /// Check B: mapping entries whose dbid no longer exists.
    pub stale_mappings: Vec<String>,
    /// Check C: unreferenced audio files deleted from the music shards.
    pub orphans_removed: Vec<String>,
}

impl IntegrityReport {
    pub fn fix_count(&self) -> usize {
        self.missing_files.len() + self.stale_mappings.len() + self.orphans_removed.len()
    }
}

/// Reconcile files, database, and mapping. Mutates the working set and the
/// mapping in memory; file deletions (check C) happen immediately.
pub fn check_integrity(
    layout: &DeviceLayout,
    db: &mut Database,
    mapping: &mut MappingStore,
) -> Result<IntegrityReport> {
    let mut report = IntegrityReport::default();

    // Check A: every track's location must exist on the device. Missing
    // ones leave the working set silently; to the diff engine the track was
    // never there.
    let mut gone = Vec::new();
    for track in &db.tracks {
        if track.location.is_empty() {
            continue;
        }
        let path = layout.location_to_path(&track.location);
        if !path.exists() {
            gone.push(track.dbid);
            report.missing_files.push(format!(
                "{} — {} ({})",
                track.location, track.title, track.dbid
            ));
        }
    }
    for dbid in gone {
        db.remove_track(dbid);
    }

    // Check B: mapping entries must point at live tracks.
    let live: HashSet<u64> = db.tracks.iter().map(|t| t.dbid).collect();
    let stale: Vec<(String, u64)> = mapping
        .iter()
        .filter(|(_, e)| !live.contains(&e.dbid))
        .map(|(fp, e)| (fp.to_string(), e.dbid))
        .collect();
    for (fp, dbid) in &stale {
        report
            .stale_mappings
            .push(format!("{} → dbid {:#x}", fp, dbid));
    }
    mapping.retain_dbids(|dbid| live.contains(&dbid));

    // Check C: audio files in the shards that no track references are
    // leftovers from an interrupted run. Delete them.
    let referenced: HashSet<std::path::PathBuf> = db
        .tracks
        .iter()
        .filter(|t| !t.location.is_empty())
        .map(|t| layout.location_to_path(&t.location))
        .collect();

    for shard in 0..MUSIC_SHARD_COUNT {
        let dir = layout.music_shard(shard);
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let is_audio = path
                .extension()
                .and_then(|e| e.to_str())
                .map(is_audio_extension)
                .unwrap_or(false);
            if is_audio && !referenced.contains(path) {
                log::info!("removing orphaned file {:?}", path);
                std::fs::remove_file(path)?;
                report
                    .orphans_removed
                    .push(path.display().to_string());
            }
        }
    }

    if report.fix_count() > 0 {
        log::info!(
            "integrity: {} missing file(s), {} stale mapping(s), {} orphan(s)",
            report.missing_files.len(),
            report.stale_mappings.len(),
            report.orphans_removed.len()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itunesdb::TrackRecord;
    use crate::mapping::MappingEntry;
    use std::path::PathBuf;

    fn entry(dbid: u64) -> MappingEntry {
        MappingEntry {
            dbid,
            album_key: "a".into(),
            source_path_hint: "x.mp3".into(),
            source_size: 1,
            source_mtime: 1,
            art_hash: None,
            format_info: "mp3".into(),
        }
    }

    fn setup() -> (tempfile::TempDir, DeviceLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DeviceLayout::new(PathBuf::from(dir.path()));
        layout.init().unwrap();
        (dir, layout)
    }

    #[test]
    fn test_all_three_checks_fire() {
        let (_dir, layout) = setup();

        // A real file for track 1, nothing for track 2, an orphan in F03.
        let kept = layout.music_shard(0).join("AAAA.mp3");
        std::fs::write(&kept, b"audio").unwrap();
        let orphan = layout.music_shard(3).join("ZZZZ.mp3");
        std::fs::write(&orphan, b"stray").unwrap();

        let mut db = Database::new();
        let mut t1 = TrackRecord::new(1);
        t1.track_id = 1;
        t1.location = layout.path_to_location(&kept).unwrap();
        db.tracks.push(t1);
        let mut t2 = TrackRecord::new(2);
        t2.track_id = 2;
        t2.location = ":iPod_Control:Music:F01:GONE.mp3".into();
        db.tracks.push(t2);

        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry(1));
        mapping.add("FP2", entry(2)); // becomes stale once track 2 drops

        let report = check_integrity(&layout, &mut db, &mut mapping).unwrap();
        assert_eq!(report.missing_files.len(), 1);
        assert_eq!(report.stale_mappings.len(), 1);
        assert_eq!(report.orphans_removed.len(), 1);

        assert_eq!(db.tracks.len(), 1);
        assert_eq!(mapping.len(), 1);
        assert!(!orphan.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_checker_is_idempotent() {
        let (_dir, layout) = setup();
        std::fs::write(layout.music_shard(7).join("stray.mp3"), b"x").unwrap();

        let mut db = Database::new();
        let mut mapping = MappingStore::new();
        mapping.add("FP", entry(5));

        let first = check_integrity(&layout, &mut db, &mut mapping).unwrap();
        assert!(first.fix_count() > 0);

        let second = check_integrity(&layout, &mut db, &mut mapping).unwrap();
        assert_eq!(second.fix_count(), 0);
    }
}
