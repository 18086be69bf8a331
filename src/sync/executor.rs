//! Sync executor — seven ordered stages
//!
//! Stages mutate the in-memory working set only; the codec and signer run
//! exactly once, after stage 7's data preparation, and nothing is persisted
//! before the atomic replace succeeds. Partial file mutations from earlier
//! stages are tolerated: the next run's integrity pass heals them.
//!
//! The cancellation flag is polled between items. On cancellation no
//! further items are processed, and neither the database nor the mapping is
//! saved.

use super::config::SyncConfig;
use super::transfer::{TransferEngine, Transcoder};
use super::CancelFlag;
use crate::artwork::{ArtworkWriter, ImageEncoder};
use crate::device::DeviceLayout;
use crate::diff::{MetadataField, SyncPlan};
use crate::error::SyncError;
use crate::itunesdb::{emit_database, unix_to_mac, Database, TrackRecord};
use crate::mapping::{MappingEntry, MappingStore};
use crate::metadata::MetadataProvider;
use crate::signer::{infer_scheme, sign_database};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Headroom required beyond the net added bytes.
const STORAGE_HEADROOM: u64 = 10 * 1024 * 1024;

/// What a run actually did.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub files_updated: usize,
    pub metadata_updated: usize,
    pub artwork_updated: usize,
    pub play_counts_synced: usize,
    pub ratings_synced: usize,
    pub orphans_removed: usize,

    /// Per-file transcode/copy failures; the run continued past them.
    pub soft_errors: Vec<String>,
}

/// A stage-4 add waiting for its mapping entry.
struct PendingAdd {
    dbid: u64,
    fingerprint: String,
    album_key: String,
    rel_path: String,
    source_size: u64,
    source_mtime: i64,
    art_hash: Option<String>,
    format_info: String,
    art_source: PathBuf,
}

pub struct SyncExecutor<'a> {
    config: &'a SyncConfig,
    layout: &'a DeviceLayout,
    metadata: &'a dyn MetadataProvider,
    transcoder: &'a dyn Transcoder,
    encoder: &'a dyn ImageEncoder,
    cancel: CancelFlag,
}

impl<'a> SyncExecutor<'a> {
    pub fn new(
        config: &'a SyncConfig,
        layout: &'a DeviceLayout,
        metadata: &'a dyn MetadataProvider,
        transcoder: &'a dyn Transcoder,
        encoder: &'a dyn ImageEncoder,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            config,
            layout,
            metadata,
            transcoder,
            encoder,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            log::warn!("sync cancelled, nothing will be persisted");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Run the plan to completion and commit.
    pub fn execute(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        mapping: &mut MappingStore,
    ) -> Result<SyncReport> {
        let mut report = SyncReport {
            orphans_removed: plan.integrity.orphans_removed.len(),
            ..Default::default()
        };

        self.preflight_storage(plan)?;

        let engine = TransferEngine::new(
            self.layout,
            self.transcoder,
            self.config.cache_dir.clone(),
            self.config.transcode_bitrate,
        );

        self.stage_remove(plan, db, mapping, &mut report)?;
        self.stage_update_files(plan, db, mapping, &engine, &mut report)?;
        self.stage_update_metadata(plan, db, mapping, &mut report)?;
        self.stage_update_artwork_mapping(plan, mapping, &mut report)?;
        let pending = self.stage_add(plan, db, &engine, &mut report)?;
        self.stage_play_counts(plan, db, &mut report)?;
        self.stage_ratings(plan, db, &mut report)?;
        self.stage_write(plan, db, mapping, pending)?;

        log::info!(
            "sync complete: +{} -{} files, {} updated",
            report.added,
            report.removed,
            report.files_updated
        );
        Ok(report)
    }

    /// Adds must fit with headroom to spare.
    fn preflight_storage(&self, plan: &SyncPlan) -> Result<(), SyncError> {
        if plan.adds.is_empty() {
            return Ok(());
        }
        let needed = plan
            .storage
            .bytes_to_add
            .saturating_sub(plan.storage.bytes_to_remove)
            + STORAGE_HEADROOM;
        let available = match self.config.free_space_override {
            Some(v) => v,
            None => self.layout.free_space().unwrap_or_else(|e| {
                log::warn!("free-space probe failed ({}), assuming enough", e);
                u64::MAX
            }),
        };
        if available < needed {
            return Err(SyncError::StorageInsufficient { needed, available });
        }
        Ok(())
    }

    /// Stage 1: deletions, then mapping entries orphaned by them.
    fn stage_remove(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        mapping: &mut MappingStore,
        report: &mut SyncReport,
    ) -> Result<()> {
        for action in &plan.removes {
            self.check_cancelled()?;
            if let Some(track) = db.track_by_dbid(action.entry.dbid) {
                if !track.location.is_empty() {
                    let path = self.layout.location_to_path(&track.location);
                    if path.exists() {
                        fs::remove_file(&path)
                            .with_context(|| format!("Failed to delete {:?}", path))?;
                    }
                }
                db.remove_track(action.entry.dbid);
            }
            mapping.remove_dbid(action.entry.dbid);
            report.removed += 1;
            log::info!("removed {} ({})", action.entry.source_path_hint, action.fingerprint);
        }

        // Anything in the mapping that no longer has a track goes too.
        let live: HashSet<u64> = db.tracks.iter().map(|t| t.dbid).collect();
        mapping.retain_dbids(|dbid| live.contains(&dbid));
        Ok(())
    }

    /// Stage 2: changed files are replaced wholesale.
    fn stage_update_files(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        mapping: &mut MappingStore,
        engine: &TransferEngine,
        report: &mut SyncReport,
    ) -> Result<()> {
        for action in &plan.file_updates {
            self.check_cancelled()?;
            let Some(track) = db.track_by_dbid(action.dbid) else {
                continue;
            };

            if !track.location.is_empty() {
                let old = self.layout.location_to_path(&track.location);
                if old.exists() {
                    fs::remove_file(&old)
                        .with_context(|| format!("Failed to delete {:?}", old))?;
                }
            }
            engine.invalidate_cache(&action.source.fingerprint);

            let transferred = match engine.transfer(&action.source.path, &action.source.fingerprint)
            {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("re-sync failed for {:?}: {}", action.source.path, e);
                    report
                        .soft_errors
                        .push(format!("{}: {}", action.source.rel_path, e));
                    continue;
                }
            };

            let format_info = transferred.format_info.clone();
            let size = transferred.size;
            if let Some(track) = db.track_by_dbid_mut(action.dbid) {
                track.location = transferred.location;
                track.size = transferred.size as u32;
                track.filetype = transferred.filetype;
                track.bitrate = action.source.tags.bitrate;
                track.sample_rate = action.source.tags.sample_rate;
                track.duration_ms = action.source.tags.duration_ms;
                track.date_modified = unix_to_mac(now_unix());
            }
            mapping.update(action.dbid, |entry| {
                entry.source_size = action.source.size;
                entry.source_mtime = action.source.mtime;
                entry.format_info = format_info;
            });
            report.files_updated += 1;
            log::info!("re-synced {} ({} bytes)", action.source.rel_path, size);
        }
        Ok(())
    }

    /// Stage 3: metadata, field by field. The mapping's size/mtime are
    /// refreshed so the re-tagged file does not read as a file change on
    /// the next run.
    fn stage_update_metadata(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        mapping: &mut MappingStore,
        report: &mut SyncReport,
    ) -> Result<()> {
        for action in &plan.metadata_updates {
            self.check_cancelled()?;
            let Some(track) = db.track_by_dbid_mut(action.dbid) else {
                continue;
            };
            let tags = &action.source.tags;
            for field in &action.changed_fields {
                match field {
                    MetadataField::Title => track.title = tags.title.clone(),
                    MetadataField::Artist => track.artist = tags.artist.clone(),
                    MetadataField::Album => track.album = tags.album.clone(),
                    MetadataField::AlbumArtist => {
                        track.album_artist = tags.album_artist.clone()
                    }
                    MetadataField::Genre => track.genre = tags.genre.clone(),
                    MetadataField::Year => track.year = tags.year,
                    MetadataField::TrackNumber => track.track_number = tags.track_number,
                    MetadataField::DiscNumber => track.disc_number = tags.disc_number,
                }
            }
            track.date_modified = unix_to_mac(now_unix());

            mapping.update(action.dbid, |entry| {
                entry.source_size = action.source.size;
                entry.source_mtime = action.source.mtime;
            });
            report.metadata_updated += 1;
        }
        Ok(())
    }

    /// Stage 3b: the mapping follows the artwork hash; pixels are handled
    /// by the stage-7 rewrite.
    fn stage_update_artwork_mapping(
        &self,
        plan: &SyncPlan,
        mapping: &mut MappingStore,
        report: &mut SyncReport,
    ) -> Result<()> {
        for action in &plan.artwork_updates {
            self.check_cancelled()?;
            let new_hash = action.new_hash.clone();
            mapping.update(action.dbid, |entry| {
                entry.art_hash = new_hash;
            });
            report.artwork_updated += 1;
        }
        Ok(())
    }

    /// Stage 4: new tracks. dbids are generated here; trackIDs are the
    /// codec's to assign at emit time.
    fn stage_add(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        engine: &TransferEngine,
        report: &mut SyncReport,
    ) -> Result<Vec<PendingAdd>> {
        let mut pending = Vec::new();

        for action in &plan.adds {
            self.check_cancelled()?;
            let source = &action.source;

            let transferred = match engine.transfer(&source.path, &source.fingerprint) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("add failed for {:?}: {}", source.path, e);
                    report
                        .soft_errors
                        .push(format!("{}: {}", source.rel_path, e));
                    continue;
                }
            };

            let mut dbid: u64 = rand::random();
            while dbid == 0 || db.contains_dbid(dbid) {
                dbid = rand::random();
            }

            let mut track = TrackRecord::new(dbid);
            track.title = source.tags.title.clone();
            track.artist = source.tags.artist.clone();
            track.album = source.tags.album.clone();
            track.album_artist = source.tags.album_artist.clone();
            track.genre = source.tags.genre.clone();
            track.year = source.tags.year;
            track.track_number = source.tags.track_number;
            track.disc_number = source.tags.disc_number;
            track.duration_ms = source.tags.duration_ms;
            track.bitrate = source.tags.bitrate;
            track.sample_rate = source.tags.sample_rate;
            track.rating = source.tags.rating;
            track.location = transferred.location;
            track.size = transferred.size as u32;
            track.filetype = transferred.filetype;
            track.date_added = unix_to_mac(now_unix());
            db.tracks.push(track);

            pending.push(PendingAdd {
                dbid,
                fingerprint: source.fingerprint.clone(),
                album_key: action.album_key.clone(),
                rel_path: source.rel_path.clone(),
                source_size: source.size,
                source_mtime: source.mtime,
                art_hash: source.art_hash.clone(),
                format_info: transferred.format_info,
                art_source: source.path.clone(),
            });
            report.added += 1;
            log::info!("added {}", source.rel_path);
        }
        Ok(pending)
    }

    /// Stage 5: fold device plays into the cumulative counter.
    fn stage_play_counts(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        report: &mut SyncReport,
    ) -> Result<()> {
        for action in &plan.play_count_syncs {
            self.check_cancelled()?;
            if self.config.write_back {
                if let Err(e) = self
                    .metadata
                    .write_play_count_delta(&action.source.path, action.delta)
                {
                    log::warn!("play-count write-back failed: {}", e);
                    report
                        .soft_errors
                        .push(format!("{}: {}", action.source.rel_path, e));
                }
            }
            report.play_counts_synced += 1;
        }

        // Every track folds, matched or not; the emitted database starts
        // the next sync window at zero.
        for track in db.tracks.iter_mut() {
            if track.play_count_2 > 0 {
                track.play_count += track.play_count_2;
                track.play_count_2 = 0;
            }
        }
        Ok(())
    }

    /// Stage 6: the device's rating wins.
    fn stage_ratings(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        report: &mut SyncReport,
    ) -> Result<()> {
        for action in &plan.rating_syncs {
            self.check_cancelled()?;
            if let Some(track) = db.track_by_dbid_mut(action.dbid) {
                track.rating = action.resolved;
            }
            if self.config.write_back {
                if let Err(e) = self
                    .metadata
                    .write_rating(&action.source.path, action.resolved)
                {
                    log::warn!("rating write-back failed: {}", e);
                    report
                        .soft_errors
                        .push(format!("{}: {}", action.source.rel_path, e));
                }
            }
            report.ratings_synced += 1;
        }
        Ok(())
    }

    /// Stage 7: artwork rewrite, emit, sign, atomic replace, mapping save.
    fn stage_write(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        mapping: &mut MappingStore,
        pending: Vec<PendingAdd>,
    ) -> Result<()> {
        self.check_cancelled()?;

        if plan.rewrite_artwork || pending.iter().any(|p| p.art_hash.is_some()) {
            self.rewrite_artwork(plan, db, &pending)?;
        }

        let (mut bytes, assignments) = emit_database(db)?;

        let keys = self.layout.load_keys()?;
        let scheme = match self.config.signing_scheme {
            Some(s) => s,
            None => infer_scheme(&keys)?,
        };
        sign_database(&mut bytes, scheme, &keys)?;

        self.atomic_replace(&bytes)?;

        // The codec's dbid assignments connect stage-4 adds to their
        // mapping entries.
        let by_dbid: HashMap<u64, PendingAdd> =
            pending.into_iter().map(|p| (p.dbid, p)).collect();
        for assignment in &assignments {
            let Some(add) = by_dbid.get(&assignment.dbid) else {
                continue;
            };
            mapping.add(
                &add.fingerprint,
                MappingEntry {
                    dbid: add.dbid,
                    album_key: add.album_key.clone(),
                    source_path_hint: add.rel_path.clone(),
                    source_size: add.source_size,
                    source_mtime: add.source_mtime,
                    art_hash: add.art_hash.clone(),
                    format_info: add.format_info.clone(),
                },
            );
        }

        mapping
            .save(&self.layout.mapping_path())
            .context("Failed to save the mapping after the database replace")?;

        // The device regenerates Play Counts against the fresh database.
        let play_counts = self.layout.play_counts_path();
        if play_counts.exists() {
            let _ = fs::remove_file(&play_counts);
        }
        Ok(())
    }

    /// Pull embedded images for every track that needs one and rebuild the
    /// ArtworkDB plus ithmb files from scratch.
    fn rewrite_artwork(
        &self,
        plan: &SyncPlan,
        db: &mut Database,
        pending: &[PendingAdd],
    ) -> Result<()> {
        let mut sources: HashMap<u64, PathBuf> = HashMap::new();
        for (dbid, path) in &plan.artwork_sources {
            sources.insert(*dbid, path.clone());
        }
        for action in &plan.artwork_updates {
            if action.new_hash.is_some() {
                sources.insert(action.dbid, action.source.path.clone());
            } else {
                sources.remove(&action.dbid);
            }
        }
        for add in pending {
            if add.art_hash.is_some() {
                sources.insert(add.dbid, add.art_source.clone());
            }
        }

        let mut images: Vec<(u64, Vec<u8>)> = Vec::new();
        for (dbid, path) in &sources {
            match self.metadata.artwork(path) {
                Ok(Some(bytes)) => images.push((*dbid, bytes)),
                Ok(None) => {}
                Err(e) => log::warn!("artwork extraction failed for {:?}: {}", path, e),
            }
        }
        images.sort_by_key(|(dbid, _)| *dbid);

        let writer = ArtworkWriter::new(self.encoder);
        let links = writer.write(self.layout, &images)?;

        // The ArtworkDB was rebuilt from scratch: a track either has a
        // fresh record or no artwork at all. Stale links must not survive.
        for track in db.tracks.iter_mut() {
            match links.get(&track.dbid) {
                Some(link) => {
                    track.mhii_link = link.image_id;
                    track.artwork_count = 1;
                    track.artwork_size = link.source_size;
                }
                None => {
                    track.mhii_link = 0;
                    track.artwork_count = 0;
                    track.artwork_size = 0;
                }
            }
        }
        Ok(())
    }

    /// Temp file, fsync, backup of the previous database, rename.
    fn atomic_replace(&self, bytes: &[u8]) -> Result<(), SyncError> {
        let target = self.layout.itunes_db_path();
        let tmp = target.with_extension("tmp");

        let write_steps = || -> std::io::Result<()> {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&tmp, bytes)?;
            let file = fs::File::open(&tmp)?;
            file.sync_all()?;
            drop(file);

            if target.exists() {
                fs::copy(&target, self.layout.itunes_db_backup_path())?;
            }
            fs::rename(&tmp, &target)?;
            Ok(())
        };

        write_steps().map_err(|source| SyncError::AtomicWriteFailed {
            path: target.clone(),
            source,
        })?;
        log::info!("database replaced atomically ({} bytes)", bytes.len());
        Ok(())
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
