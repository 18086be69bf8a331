//! Sync pipeline orchestration
//!
//! The pipeline loads the three sources of truth, reconciles them, diffs
//! the PC library against the mapping, and executes the plan. Everything is
//! single-threaded; a GUI runs the whole pipeline on a background task and
//! cancels through [`CancelFlag`], which is polled between items.

pub mod config;
pub mod executor;
pub mod pipeline;
pub mod transfer;

pub use config::SyncConfig;
pub use executor::{SyncExecutor, SyncReport};
pub use pipeline::{PreparedSync, SyncPipeline};
pub use transfer::{TargetFormat, Transcoder};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared with the caller.
///
/// Operations already in flight complete normally; once the flag is set no
/// further items are processed and neither the database nor the mapping is
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
