//! Diff engine
//!
//! Groups the PC library by identity, matches groups against the mapping,
//! and produces the categorized plan the executor runs. Identity is the
//! pair `(fingerprint, album_key)`: the fingerprint survives re-tagging,
//! renaming, and re-encoding, and the album key keeps the same recording on
//! two albums apart.

use crate::integrity::IntegrityReport;
use crate::itunesdb::Database;
use crate::mapping::{MappingEntry, MappingStore};
use crate::model::PcTrack;
use std::collections::{BTreeMap, HashSet};

/// The eight metadata fields the diff engine compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Year,
    TrackNumber,
    DiscNumber,
}

#[derive(Debug, Clone)]
pub struct AddAction {
    pub source: PcTrack,
    pub album_key: String,
}

#[derive(Debug, Clone)]
pub struct RemoveAction {
    pub fingerprint: String,
    pub entry: MappingEntry,
    /// Device-side byte size, for the storage summary.
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct UpdateFileAction {
    pub dbid: u64,
    pub source: PcTrack,
    pub old_size: u64,
}

#[derive(Debug, Clone)]
pub struct UpdateMetadataAction {
    pub dbid: u64,
    pub source: PcTrack,
    pub changed_fields: Vec<MetadataField>,
}

#[derive(Debug, Clone)]
pub struct UpdateArtworkAction {
    pub dbid: u64,
    pub source: PcTrack,
    pub new_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncPlayCountAction {
    pub dbid: u64,
    pub delta: u32,
    pub source: PcTrack,
}

#[derive(Debug, Clone)]
pub struct SyncRatingAction {
    pub dbid: u64,
    /// The iPod-side value; the device wins on conflict.
    pub resolved: u8,
    pub source: PcTrack,
}

/// A matched track with no artwork on the device.
#[derive(Debug, Clone)]
pub struct MissingArtwork {
    pub dbid: u64,
    /// PC file to pull the embedded image from.
    pub source: std::path::PathBuf,
}

/// Same recording, same album, more than one file: the first is canonical,
/// the rest are reported and skipped.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    pub album_key: String,
    pub canonical: String,
    pub duplicates: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageSummary {
    pub bytes_to_add: u64,
    pub bytes_to_remove: u64,
    pub bytes_to_update: u64,
    pub net_change: i64,
}

/// One sync run's worth of work, read-only once handed to the executor.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub adds: Vec<AddAction>,
    pub removes: Vec<RemoveAction>,
    pub file_updates: Vec<UpdateFileAction>,
    pub metadata_updates: Vec<UpdateMetadataAction>,
    pub artwork_updates: Vec<UpdateArtworkAction>,
    pub play_count_syncs: Vec<SyncPlayCountAction>,
    pub rating_syncs: Vec<SyncRatingAction>,

    // Informational sections; nothing here is executed.
    pub integrity: IntegrityReport,
    pub fingerprint_errors: Vec<String>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub unresolved_collisions: Vec<String>,
    pub missing_artwork: Vec<MissingArtwork>,

    /// When any matched track lacks artwork on the device, the executor
    /// rewrites the whole ArtworkDB.
    pub rewrite_artwork: bool,

    /// PC path for every matched track, so a full ArtworkDB rewrite can
    /// re-extract images for tracks whose artwork did not change.
    pub artwork_sources: Vec<(u64, std::path::PathBuf)>,

    pub storage: StorageSummary,
}

impl SyncPlan {
    /// True when no action of any variant is present.
    pub fn is_empty(&self) -> bool {
        self.action_count() == 0
    }

    pub fn action_count(&self) -> usize {
        self.adds.len()
            + self.removes.len()
            + self.file_updates.len()
            + self.metadata_updates.len()
            + self.artwork_updates.len()
            + self.play_count_syncs.len()
            + self.rating_syncs.len()
    }
}

/// File-change rule: the size must move by more than max(1%, 10 KB) AND the
/// mtime must differ. Tiny-delta edits can slip through; that blind spot is
/// part of the contract.
fn file_changed(entry: &MappingEntry, pc: &PcTrack) -> bool {
    let threshold = ((entry.source_size / 100).max(10 * 1024)) as i64;
    let size_delta = (pc.size as i64 - entry.source_size as i64).abs();
    size_delta > threshold && pc.mtime != entry.source_mtime
}

fn changed_metadata_fields(
    pc: &PcTrack,
    track: &crate::itunesdb::TrackRecord,
) -> Vec<MetadataField> {
    let mut changed = Vec::new();
    if pc.tags.title != track.title {
        changed.push(MetadataField::Title);
    }
    if pc.tags.artist != track.artist {
        changed.push(MetadataField::Artist);
    }
    if pc.tags.album != track.album {
        changed.push(MetadataField::Album);
    }
    if pc.tags.album_artist != track.album_artist {
        changed.push(MetadataField::AlbumArtist);
    }
    if pc.tags.genre != track.genre {
        changed.push(MetadataField::Genre);
    }
    if pc.tags.year != track.year {
        changed.push(MetadataField::Year);
    }
    if pc.tags.track_number != track.track_number {
        changed.push(MetadataField::TrackNumber);
    }
    if pc.tags.disc_number != track.disc_number {
        changed.push(MetadataField::DiscNumber);
    }
    changed
}

/// Build the plan. The working set must already have passed the integrity
/// checker; the diff engine performs no repair of its own.
pub fn build_plan(
    pc_tracks: &[PcTrack],
    mapping: &MappingStore,
    db: &Database,
    integrity: IntegrityReport,
    fingerprint_errors: Vec<String>,
) -> SyncPlan {
    let mut plan = SyncPlan {
        integrity,
        fingerprint_errors,
        ..Default::default()
    };

    // Group by identity. BTreeMap keeps the plan deterministic.
    let mut groups: BTreeMap<(String, String), Vec<&PcTrack>> = BTreeMap::new();
    for track in pc_tracks {
        groups
            .entry((track.fingerprint.clone(), track.album_key()))
            .or_default()
            .push(track);
    }

    let mut claimed: HashSet<u64> = HashSet::new();
    let mut collided_fingerprints: HashSet<String> = HashSet::new();
    let mut matched: Vec<(&PcTrack, MappingEntry)> = Vec::new();

    for ((fingerprint, album_key), members) in &groups {
        let canonical = members[0];
        if members.len() > 1 {
            plan.duplicate_groups.push(DuplicateGroup {
                fingerprint: fingerprint.clone(),
                album_key: album_key.clone(),
                canonical: canonical.rel_path.clone(),
                duplicates: members[1..].iter().map(|t| t.rel_path.clone()).collect(),
            });
        }

        let entries = mapping.lookup(fingerprint);
        if entries.is_empty() {
            plan.adds.push(AddAction {
                source: canonical.clone(),
                album_key: album_key.clone(),
            });
            continue;
        }

        let candidates: Vec<&MappingEntry> = entries
            .iter()
            .filter(|e| !claimed.contains(&e.dbid) && e.album_key == *album_key)
            .collect();

        match candidates.len() {
            0 => {
                // Known recording, new album variant.
                plan.adds.push(AddAction {
                    source: canonical.clone(),
                    album_key: album_key.clone(),
                });
            }
            1 => {
                claimed.insert(candidates[0].dbid);
                matched.push((canonical, candidates[0].clone()));
            }
            _ => {
                if let Some(entry) = candidates
                    .iter()
                    .find(|e| e.source_path_hint == canonical.rel_path)
                {
                    claimed.insert(entry.dbid);
                    matched.push((canonical, (*entry).clone()));
                } else {
                    log::warn!(
                        "unresolved collision for fingerprint {} (album {:?})",
                        fingerprint,
                        album_key
                    );
                    collided_fingerprints.insert(fingerprint.clone());
                    plan.unresolved_collisions.push(format!(
                        "{} on {:?}: {} candidate entries, none matches path {:?}",
                        fingerprint,
                        album_key,
                        candidates.len(),
                        canonical.rel_path
                    ));
                }
            }
        }
    }

    // Change detection, each dimension independent.
    for (pc, entry) in &matched {
        let Some(track) = db.track_by_dbid(entry.dbid) else {
            log::warn!("matched dbid {:#x} missing from the working set", entry.dbid);
            continue;
        };

        if file_changed(entry, *pc) {
            plan.file_updates.push(UpdateFileAction {
                dbid: entry.dbid,
                source: (*pc).clone(),
                old_size: track.size as u64,
            });
        }

        let changed_fields = changed_metadata_fields(*pc, track);
        if !changed_fields.is_empty() {
            plan.metadata_updates.push(UpdateMetadataAction {
                dbid: entry.dbid,
                source: (*pc).clone(),
                changed_fields,
            });
        }

        if pc.art_hash != entry.art_hash {
            plan.artwork_updates.push(UpdateArtworkAction {
                dbid: entry.dbid,
                source: (*pc).clone(),
                new_hash: pc.art_hash.clone(),
            });
        }

        if track.play_count_2 > 0 {
            plan.play_count_syncs.push(SyncPlayCountAction {
                dbid: entry.dbid,
                delta: track.play_count_2,
                source: (*pc).clone(),
            });
        }

        if track.rating != pc.tags.rating && (track.rating != 0 || pc.tags.rating != 0) {
            plan.rating_syncs.push(SyncRatingAction {
                dbid: entry.dbid,
                resolved: track.rating,
                source: (*pc).clone(),
            });
        }

        if track.artwork_count == 0 || track.mhii_link == 0 {
            plan.missing_artwork.push(MissingArtwork {
                dbid: entry.dbid,
                source: pc.path.clone(),
            });
        }

        plan.artwork_sources.push((entry.dbid, pc.path.clone()));
    }

    // Removal detection: mapping entries for fingerprints no longer on the
    // PC, plus entries left unclaimed after partial claims. Entries caught
    // in an unresolved collision are left alone for this run.
    let pc_fingerprints: HashSet<&str> = groups.keys().map(|(fp, _)| fp.as_str()).collect();
    for (fingerprint, entry) in mapping.iter() {
        if collided_fingerprints.contains(fingerprint) {
            continue;
        }
        if !pc_fingerprints.contains(fingerprint) || !claimed.contains(&entry.dbid) {
            let size = db
                .track_by_dbid(entry.dbid)
                .map(|t| t.size as u64)
                .unwrap_or(entry.source_size);
            plan.removes.push(RemoveAction {
                fingerprint: fingerprint.to_string(),
                entry: entry.clone(),
                size,
            });
        }
    }

    if !plan.missing_artwork.is_empty() || !plan.artwork_updates.is_empty() {
        plan.rewrite_artwork = true;
    }

    plan.storage = summarize_storage(&plan);
    log::info!(
        "plan: {} add, {} remove, {} file update, {} metadata, {} artwork, {} plays, {} ratings",
        plan.adds.len(),
        plan.removes.len(),
        plan.file_updates.len(),
        plan.metadata_updates.len(),
        plan.artwork_updates.len(),
        plan.play_count_syncs.len(),
        plan.rating_syncs.len()
    );
    plan
}

fn summarize_storage(plan: &SyncPlan) -> StorageSummary {
    let bytes_to_add: u64 = plan.adds.iter().map(|a| a.source.size).sum();
    let bytes_to_remove: u64 = plan.removes.iter().map(|r| r.size).sum();
    let bytes_to_update: u64 = plan.file_updates.iter().map(|u| u.source.size).sum();
    let update_delta: i64 = plan
        .file_updates
        .iter()
        .map(|u| u.source.size as i64 - u.old_size as i64)
        .sum();

    StorageSummary {
        bytes_to_add,
        bytes_to_remove,
        bytes_to_update,
        net_change: bytes_to_add as i64 - bytes_to_remove as i64 + update_delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itunesdb::TrackRecord;
    use crate::metadata::TagData;
    use std::path::PathBuf;

    fn pc_track(fingerprint: &str, album: &str, rel_path: &str) -> PcTrack {
        PcTrack {
            path: PathBuf::from("/lib").join(rel_path),
            rel_path: rel_path.to_string(),
            fingerprint: fingerprint.to_string(),
            size: 1_000_000,
            mtime: 1_700_000_000,
            tags: TagData {
                title: "T".into(),
                artist: "A".into(),
                album: album.into(),
                ..Default::default()
            },
            art_hash: None,
        }
    }

    fn entry_for(track: &PcTrack, dbid: u64) -> MappingEntry {
        MappingEntry {
            dbid,
            album_key: track.album_key(),
            source_path_hint: track.rel_path.clone(),
            source_size: track.size,
            source_mtime: track.mtime,
            art_hash: track.art_hash.clone(),
            format_info: "mp3".into(),
        }
    }

    fn device_track(dbid: u64, pc: &PcTrack) -> TrackRecord {
        let mut t = TrackRecord::new(dbid);
        t.track_id = dbid as u32;
        t.title = pc.tags.title.clone();
        t.artist = pc.tags.artist.clone();
        t.album = pc.tags.album.clone();
        t.size = pc.size as u32;
        t.mhii_link = 1;
        t.artwork_count = 1;
        t
    }

    #[test]
    fn test_unknown_fingerprint_is_add() {
        let pc = vec![pc_track("FP1", "Album", "a.mp3")];
        let plan = build_plan(
            &pc,
            &MappingStore::new(),
            &Database::new(),
            IntegrityReport::default(),
            vec![],
        );
        assert_eq!(plan.adds.len(), 1);
        assert_eq!(plan.adds[0].album_key, "album");
        assert!(plan.removes.is_empty());
    }

    #[test]
    fn test_matched_track_with_no_changes_yields_empty_plan() {
        let pc = vec![pc_track("FP1", "Album", "a.mp3")];
        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry_for(&pc[0], 9));
        let mut db = Database::new();
        db.tracks.push(device_track(9, &pc[0]));

        let plan = build_plan(&pc, &mapping, &db, IntegrityReport::default(), vec![]);
        assert!(plan.is_empty(), "plan should be empty: {:?}", plan.storage);
    }

    #[test]
    fn test_album_variant_is_second_add() {
        let studio = pc_track("FP1", "Studio", "s.flac");
        let hits = pc_track("FP1", "Greatest Hits", "g.m4a");
        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry_for(&studio, 1));
        let mut db = Database::new();
        db.tracks.push(device_track(1, &studio));

        let plan = build_plan(
            &[studio, hits],
            &mapping,
            &db,
            IntegrityReport::default(),
            vec![],
        );
        assert_eq!(plan.adds.len(), 1);
        assert_eq!(plan.adds[0].album_key, "greatest hits");
        assert!(plan.removes.is_empty());
    }

    #[test]
    fn test_true_duplicates_reported_not_synced() {
        let a = pc_track("FP1", "Album", "a.mp3");
        let b = pc_track("FP1", "Album", "copy-of-a.mp3");
        let plan = build_plan(
            &[a, b],
            &MappingStore::new(),
            &Database::new(),
            IntegrityReport::default(),
            vec![],
        );
        assert_eq!(plan.adds.len(), 1);
        assert_eq!(plan.duplicate_groups.len(), 1);
        assert_eq!(plan.duplicate_groups[0].duplicates, vec!["copy-of-a.mp3"]);
    }

    #[test]
    fn test_collision_resolved_by_path_hint() {
        let pc = vec![pc_track("FP1", "Album", "a.mp3")];
        let mut mapping = MappingStore::new();
        let mut other = entry_for(&pc[0], 1);
        other.source_path_hint = "elsewhere.mp3".into();
        mapping.add("FP1", other);
        mapping.add("FP1", entry_for(&pc[0], 2));

        let mut db = Database::new();
        db.tracks.push(device_track(1, &pc[0]));
        db.tracks.push(device_track(2, &pc[0]));

        let plan = build_plan(&pc, &mapping, &db, IntegrityReport::default(), vec![]);
        assert!(plan.unresolved_collisions.is_empty());
        // dbid 2 matched via the hint, dbid 1 is unclaimed and removed
        assert_eq!(plan.removes.len(), 1);
        assert_eq!(plan.removes[0].entry.dbid, 1);
    }

    #[test]
    fn test_collision_without_hint_emits_nothing() {
        let pc = vec![pc_track("FP1", "Album", "new-path.mp3")];
        let mut mapping = MappingStore::new();
        let mut e1 = entry_for(&pc[0], 1);
        e1.source_path_hint = "old-a.mp3".into();
        let mut e2 = entry_for(&pc[0], 2);
        e2.source_path_hint = "old-b.mp3".into();
        mapping.add("FP1", e1);
        mapping.add("FP1", e2);

        let mut db = Database::new();
        db.tracks.push(device_track(1, &pc[0]));
        db.tracks.push(device_track(2, &pc[0]));

        let plan = build_plan(&pc, &mapping, &db, IntegrityReport::default(), vec![]);
        assert_eq!(plan.unresolved_collisions.len(), 1);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_file_change_requires_size_and_mtime() {
        let base = pc_track("FP1", "Album", "a.mp3");
        let entry = entry_for(&base, 1);

        // Size moved past the threshold but mtime identical: no change.
        let mut size_only = base.clone();
        size_only.size += 200_000;
        assert!(!file_changed(&entry, &size_only));

        // mtime moved but size within threshold: no change.
        let mut mtime_only = base.clone();
        mtime_only.mtime += 60;
        mtime_only.size += 5_000;
        assert!(!file_changed(&entry, &mtime_only));

        // Both moved: change.
        let mut both = base.clone();
        both.size += 200_000;
        both.mtime += 60;
        assert!(file_changed(&entry, &both));
    }

    #[test]
    fn test_threshold_floor_is_ten_kib() {
        let mut small = pc_track("FP1", "Album", "a.mp3");
        small.size = 100_000; // 1% would be 1 KB; the 10 KiB floor wins
        let entry = entry_for(&small, 1);

        let mut changed = small.clone();
        changed.size = 109_000;
        changed.mtime += 1;
        assert!(!file_changed(&entry, &changed));

        changed.size = 112_000;
        assert!(file_changed(&entry, &changed));
    }

    #[test]
    fn test_metadata_change_lists_fields() {
        let pc = vec![pc_track("FP1", "Album", "a.mp3")];
        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry_for(&pc[0], 1));
        let mut db = Database::new();
        let mut track = device_track(1, &pc[0]);
        track.title = "Old Title".into();
        track.year = 1999;
        db.tracks.push(track);

        let plan = build_plan(&pc, &mapping, &db, IntegrityReport::default(), vec![]);
        assert_eq!(plan.metadata_updates.len(), 1);
        let fields = &plan.metadata_updates[0].changed_fields;
        assert!(fields.contains(&MetadataField::Title));
        assert!(fields.contains(&MetadataField::Year));
        assert_eq!(fields.len(), 2);
        assert!(plan.file_updates.is_empty());
    }

    #[test]
    fn test_rating_ipod_wins() {
        let mut pc = vec![pc_track("FP1", "Album", "a.mp3")];
        pc[0].tags.rating = 40;
        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry_for(&pc[0], 1));
        let mut db = Database::new();
        let mut track = device_track(1, &pc[0]);
        track.rating = 80;
        db.tracks.push(track);

        let plan = build_plan(&pc, &mapping, &db, IntegrityReport::default(), vec![]);
        assert_eq!(plan.rating_syncs.len(), 1);
        assert_eq!(plan.rating_syncs[0].resolved, 80);
    }

    #[test]
    fn test_play_count_delta() {
        let pc = vec![pc_track("FP1", "Album", "a.mp3")];
        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry_for(&pc[0], 1));
        let mut db = Database::new();
        let mut track = device_track(1, &pc[0]);
        track.play_count_2 = 3;
        db.tracks.push(track);

        let plan = build_plan(&pc, &mapping, &db, IntegrityReport::default(), vec![]);
        assert_eq!(plan.play_count_syncs.len(), 1);
        assert_eq!(plan.play_count_syncs[0].delta, 3);
    }

    #[test]
    fn test_vanished_fingerprint_removes_every_entry() {
        let gone = pc_track("FP1", "Album", "a.mp3");
        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry_for(&gone, 1));
        let mut hits = entry_for(&gone, 2);
        hits.album_key = "greatest hits".into();
        mapping.add("FP1", hits);
        let mut db = Database::new();
        db.tracks.push(device_track(1, &gone));
        db.tracks.push(device_track(2, &gone));

        let plan = build_plan(&[], &mapping, &db, IntegrityReport::default(), vec![]);
        assert_eq!(plan.removes.len(), 2);
        assert_eq!(plan.storage.bytes_to_remove, 2_000_000);
    }

    #[test]
    fn test_missing_artwork_flags_rewrite() {
        let pc = vec![pc_track("FP1", "Album", "a.mp3")];
        let mut mapping = MappingStore::new();
        mapping.add("FP1", entry_for(&pc[0], 1));
        let mut db = Database::new();
        let mut track = device_track(1, &pc[0]);
        track.mhii_link = 0;
        track.artwork_count = 0;
        db.tracks.push(track);

        let plan = build_plan(&pc, &mapping, &db, IntegrityReport::default(), vec![]);
        assert_eq!(plan.missing_artwork.len(), 1);
        assert_eq!(plan.missing_artwork[0].dbid, 1);
        assert!(plan.rewrite_artwork);
    }
}
