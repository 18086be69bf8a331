//! Pipeline assembly
//!
//! Wires the providers together and sequences one run: preflight, load,
//! reconcile, scan, diff, execute. Only one pipeline may run against a
//! device at a time; callers serialize.

use super::config::SyncConfig;
use super::executor::{SyncExecutor, SyncReport};
use super::transfer::{FfmpegTranscoder, Transcoder};
use super::CancelFlag;
use crate::artwork::{ImageEncoder, Rgb565Encoder};
use crate::device::DeviceLayout;
use crate::diff::{build_plan, SyncPlan};
use crate::error::SyncError;
use crate::fingerprint::{FingerprintSource, FpcalcSource};
use crate::integrity::check_integrity;
use crate::itunesdb::{parse_database, Database};
use crate::mapping::MappingStore;
use crate::metadata::{MetadataProvider, TaggerProvider};
use crate::model::scan_library;
use crate::playcounts::merge_play_counts;
use anyhow::{Context, Result};
use std::fs;

/// A plan plus the working set it was computed against.
pub struct PreparedSync {
    pub plan: SyncPlan,
    pub db: Database,
    pub mapping: MappingStore,
    pub layout: DeviceLayout,
}

pub struct SyncPipeline {
    config: SyncConfig,
    metadata: Box<dyn MetadataProvider>,
    fingerprints: Box<dyn FingerprintSource>,
    transcoder: Box<dyn Transcoder>,
    encoder: Box<dyn ImageEncoder>,
    cancel: CancelFlag,
}

impl SyncPipeline {
    /// Pipeline with the production providers.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_providers(
            config,
            Box::new(TaggerProvider::new()),
            Box::new(FpcalcSource::new()),
            Box::new(FfmpegTranscoder::new()),
            Box::new(Rgb565Encoder),
        )
    }

    /// Pipeline with caller-supplied capabilities (tests, embedding GUIs).
    pub fn with_providers(
        config: SyncConfig,
        metadata: Box<dyn MetadataProvider>,
        fingerprints: Box<dyn FingerprintSource>,
        transcoder: Box<dyn Transcoder>,
        encoder: Box<dyn ImageEncoder>,
    ) -> Self {
        Self {
            config,
            metadata,
            fingerprints,
            transcoder,
            encoder,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for cancelling from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Everything up to (and excluding) execution.
    pub fn prepare(&self) -> Result<PreparedSync> {
        self.fingerprints
            .preflight()
            .map_err(|e| SyncError::PreflightMissingTool(e.to_string()))?;

        let layout = DeviceLayout::new(self.config.mount.clone());
        layout.init()?;

        let db_path = layout.itunes_db_path();
        let mut db = if db_path.exists() {
            let bytes = fs::read(&db_path)
                .with_context(|| format!("Failed to read {:?}", db_path))?;
            parse_database(&bytes)
                .with_context(|| format!("Failed to parse {:?}", db_path))?
        } else {
            log::info!("no database on the device, starting fresh");
            Database::new()
        };

        merge_play_counts(&layout.play_counts_path(), &mut db)?;

        let mut mapping = MappingStore::load(&layout.mapping_path())?;

        let integrity = check_integrity(&layout, &mut db, &mut mapping)?;

        let scan = scan_library(
            &self.config.library,
            self.metadata.as_ref(),
            self.fingerprints.as_ref(),
        )?;

        let plan = build_plan(
            &scan.tracks,
            &mapping,
            &db,
            integrity,
            scan.fingerprint_errors,
        );

        Ok(PreparedSync {
            plan,
            db,
            mapping,
            layout,
        })
    }

    /// Prepare and execute in one go.
    pub fn run(&self) -> Result<SyncReport> {
        let PreparedSync {
            plan,
            mut db,
            mut mapping,
            layout,
        } = self.prepare()?;

        let executor = SyncExecutor::new(
            &self.config,
            &layout,
            self.metadata.as_ref(),
            self.transcoder.as_ref(),
            self.encoder.as_ref(),
            self.cancel.clone(),
        );
        executor.execute(&plan, &mut db, &mut mapping)
    }
}
