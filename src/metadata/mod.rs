//! Tag access behind a capability trait
//!
//! Tag formats are not this crate's problem: the sync core consumes typed
//! values. `TaggerProvider` is the production implementation; `StubProvider`
//! serves the tests.

mod stub;
mod tagger;

pub use stub::StubProvider;
pub use tagger::TaggerProvider;

use anyhow::Result;
use std::path::Path;

/// Tag values the sync core cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagData {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub genre: String,
    pub year: u32,
    pub track_number: u32,
    pub disc_number: u32,

    pub duration_ms: u32,
    pub bitrate: u32,
    pub sample_rate: u32,

    /// Rating in [0, 100].
    pub rating: u8,
}

/// Reads and writes audio file tags.
pub trait MetadataProvider {
    fn read_tags(&self, path: &Path) -> Result<TagData>;

    /// Embedded front-cover bytes, if any.
    fn artwork(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Write a rating back to the PC file, scaled per container: POPM
    /// (0–255) for MP3, a freeform atom (0–100) for M4A, a Vorbis comment
    /// (0–100) for FLAC/Ogg.
    fn write_rating(&self, path: &Path, rating: u8) -> Result<()>;

    /// Add device plays to the file's play-count tag.
    fn write_play_count_delta(&self, path: &Path, delta: u32) -> Result<()>;
}
