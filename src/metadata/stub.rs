//! Programmable metadata provider for tests

use super::{MetadataProvider, TagData};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Serves canned tag data per path; write-backs are recorded instead of
/// touching the file.
#[derive(Debug, Default)]
pub struct StubProvider {
    tags: HashMap<PathBuf, TagData>,
    artwork: HashMap<PathBuf, Vec<u8>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tags(&mut self, path: impl Into<PathBuf>, tags: TagData) {
        self.tags.insert(path.into(), tags);
    }

    pub fn set_artwork(&mut self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.artwork.insert(path.into(), bytes);
    }
}

impl MetadataProvider for StubProvider {
    fn read_tags(&self, path: &Path) -> Result<TagData> {
        self.tags
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no stub tags for {:?}", path))
    }

    fn artwork(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.artwork.get(path).cloned())
    }

    fn write_rating(&self, _path: &Path, _rating: u8) -> Result<()> {
        Ok(())
    }

    fn write_play_count_delta(&self, _path: &Path, _delta: u32) -> Result<()> {
        Ok(())
    }
}
