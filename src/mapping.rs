//! Persistent fingerprint → device-track mapping
//!
//! The mapping is the third source of truth beside the filesystem and the
//! database: it remembers which PC recording became which device track. It
//! is loaded once per sync, mutated in memory, and saved exactly once after
//! a successful codec + signer run. On any earlier failure the in-memory
//! copy is simply discarded.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One synced copy of a recording.
///
/// A fingerprint may own several entries when the same recording appears on
/// multiple albums; `album_key` disambiguates them at match time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub dbid: u64,
    pub album_key: String,
    pub source_path_hint: String,
    pub source_size: u64,
    pub source_mtime: i64,
    pub art_hash: Option<String>,
    pub format_info: String,
}

/// The mapping document, keyed by acoustic fingerprint.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MappingStore {
    entries: BTreeMap<String, Vec<MappingEntry>>,

    #[serde(skip)]
    dirty: bool,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the mapping file, or start empty if it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("no mapping file at {:?}, starting empty", path);
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read mapping file: {:?}", path))?;
        let entries: BTreeMap<String, Vec<MappingEntry>> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse mapping file: {:?}", path))?;
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    /// Save with the temp-plus-rename discipline used for the database.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize mapping")?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes())
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        let file = fs::File::open(&tmp)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace mapping file: {:?}", path))?;

        self.dirty = false;
        log::debug!("mapping saved: {} fingerprints", self.entries.len());
        Ok(())
    }

    pub fn lookup(&self, fingerprint: &str) -> &[MappingEntry] {
        self.entries
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add(&mut self, fingerprint: &str, entry: MappingEntry) {
        self.entries
            .entry(fingerprint.to_string())
            .or_default()
            .push(entry);
        self.dirty = true;
    }

    /// Update the entry for a dbid in place.
    pub fn update<F: FnOnce(&mut MappingEntry)>(&mut self, dbid: u64, f: F) -> bool {
        for entries in self.entries.values_mut() {
            if let Some(entry) = entries.iter_mut().find(|e| e.dbid == dbid) {
                f(entry);
                self.dirty = true;
                return true;
            }
        }
        false
    }

    /// Remove the entry for a dbid; empty fingerprint buckets are dropped.
    pub fn remove_dbid(&mut self, dbid: u64) -> bool {
        let mut removed = false;
        self.entries.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.dbid != dbid);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Drop every entry whose dbid fails the predicate.
    pub fn retain_dbids<F: Fn(u64) -> bool>(&mut self, keep: F) -> usize {
        let mut dropped = 0;
        self.entries.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| keep(e.dbid));
            dropped += before - entries.len();
            !entries.is_empty()
        });
        if dropped > 0 {
            self.dirty = true;
        }
        dropped
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappingEntry)> {
        self.entries
            .iter()
            .flat_map(|(fp, entries)| entries.iter().map(move |e| (fp.as_str(), e)))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dbid: u64, album_key: &str) -> MappingEntry {
        MappingEntry {
            dbid,
            album_key: album_key.to_string(),
            source_path_hint: "a/b.mp3".to_string(),
            source_size: 1000,
            source_mtime: 1_700_000_000,
            art_hash: None,
            format_info: "mp3".to_string(),
        }
    }

    #[test]
    fn test_multiple_entries_per_fingerprint() {
        let mut store = MappingStore::new();
        store.add("FP1", entry(1, "studio"));
        store.add("FP1", entry(2, "greatest hits"));

        assert_eq!(store.lookup("FP1").len(), 2);
        assert_eq!(store.lookup("FP2").len(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_dbid_drops_empty_bucket() {
        let mut store = MappingStore::new();
        store.add("FP1", entry(1, "a"));
        assert!(store.remove_dbid(1));
        assert!(!store.remove_dbid(1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iOpenPod.json");

        let mut store = MappingStore::new();
        store.add("FP1", entry(1, "a"));
        store.add("FP2", entry(2, "b"));
        store.save(&path).unwrap();
        assert!(!store.is_dirty());

        let loaded = MappingStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup("FP1")[0].dbid, 1);
    }

    #[test]
    fn test_update_marks_dirty() {
        let mut store = MappingStore::new();
        store.add("FP1", entry(1, "a"));
        store.save(&tempfile::tempdir().unwrap().path().join("m.json")).unwrap();

        assert!(store.update(1, |e| e.source_size = 2000));
        assert!(store.is_dirty());
        assert_eq!(store.lookup("FP1")[0].source_size, 2000);
    }
}
