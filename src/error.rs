//! Sync error kinds and their dispositions
//!
//! Fatal kinds abort the run before anything is persisted. Per-file failures
//! (fingerprint, transcode, copy) are collected into the plan or the run
//! report instead and never surface through this enum.

use std::path::PathBuf;

/// Errors that abort a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The fingerprint tool could not be found or executed.
    #[error("fingerprint tool unavailable: {0}")]
    PreflightMissingTool(String),

    /// Free space on the device is below the requirement for the planned adds.
    #[error("insufficient storage: need {needed} bytes, {available} available")]
    StorageInsufficient { needed: u64, available: u64 },

    /// The database writer's self-check failed. Nothing is persisted.
    #[error("database invariant violated: {0}")]
    CodecInvariantViolation(String),

    /// The device requires key material (FireWire GUID or HashInfo) that is
    /// not present, or uses an unsupported signature scheme.
    #[error("signer input missing: {0}")]
    SignerInputMissing(String),

    /// The temp-write/fsync/rename sequence failed. The previous database is
    /// intact and the mapping is not saved.
    #[error("atomic replace of {path:?} failed")]
    AtomicWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cancellation predicate fired between items.
    #[error("sync cancelled")]
    Cancelled,
}
