//! In-memory database records
//!
//! The parsed (or freshly built) form of an iTunesDB. The executor mutates
//! this working set; the writer turns it back into bytes in one pass.

/// A track record (`mhit` plus its string children).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackRecord {
    /// Database-scoped id used by playlist items. Zero until the writer
    /// assigns one.
    pub track_id: u32,

    /// Globally unique 64-bit id, random at creation, never reused.
    pub dbid: u64,

    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub genre: String,
    pub composer: String,
    pub comment: String,

    /// Device-side location, colon-separated
    /// (`:iPod_Control:Music:F07:XQ3R.mp3`). Empty for records that have
    /// never been materialized.
    pub location: String,

    /// Four-character ASCII file type word.
    pub filetype: [u8; 4],

    /// Rating in [0, 100], stars × 20.
    pub rating: u8,

    /// Cumulative play count.
    pub play_count: u32,

    /// Plays since the last sync. Reset to zero on write.
    pub play_count_2: u32,

    /// Mac-epoch seconds.
    pub last_played: u32,

    pub size: u32,
    pub duration_ms: u32,
    pub bitrate: u32,

    /// Sample rate in Hz (stored on disk as `hz << 16`).
    pub sample_rate: u32,

    pub track_number: u32,
    pub total_tracks: u32,
    pub disc_number: u32,
    pub total_discs: u32,
    pub year: u32,

    pub media_type: u32,

    /// Artwork record link; zero when the track has no artwork.
    pub mhii_link: u32,
    pub artwork_count: u16,
    pub artwork_size: u32,

    /// Index into the album list. Reassigned at emit time.
    pub album_id: u32,

    pub date_added: u32,
    pub date_modified: u32,
    pub skip_count: u32,
    pub last_skipped: u32,
}

impl TrackRecord {
    pub fn new(dbid: u64) -> Self {
        Self {
            dbid,
            filetype: *b"MP3 ",
            media_type: crate::itunesdb::MediaType::Audio as u32,
            ..Default::default()
        }
    }
}

/// An album record (`mhia` plus its string children).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumRecord {
    pub album_id: u32,
    pub name: String,
    pub artist: String,
}

/// One playlist item (`mhip`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaylistItem {
    /// References a track by its database-scoped `track_id`.
    pub track_id: u32,
}

/// A playlist (`mhyp` plus items).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistRecord {
    pub name: String,

    /// The master playlist lists every track and is emitted first.
    pub is_master: bool,

    /// Persistent playlist id.
    pub id: u64,

    pub items: Vec<PlaylistItem>,

    /// Opaque smart-playlist payloads, present only on smart playlists.
    pub smart_data: Option<Vec<u8>>,
    pub smart_rules: Option<Vec<u8>>,
}

impl PlaylistRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_smart(&self) -> bool {
        self.smart_data.is_some() || self.smart_rules.is_some()
    }
}

/// The complete in-memory database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Database {
    pub version: u32,
    pub db_id: u64,

    /// Strictly greater than every assigned trackID. The writer bumps this.
    pub next_id: u32,

    /// Hashing-scheme selector as parsed from offset 0x46 (the signer
    /// rewrites it after stamping).
    pub hashing_scheme: u16,

    /// Track list in emit order.
    pub tracks: Vec<TrackRecord>,

    /// Album list as parsed. The writer regenerates this from the tracks.
    pub albums: Vec<AlbumRecord>,

    /// Regular playlists. The master playlist is rebuilt at emit time.
    pub playlists: Vec<PlaylistRecord>,

    pub podcasts: Vec<PlaylistRecord>,
    pub smart_playlists: Vec<PlaylistRecord>,

    /// Tags of chunks the reader skipped without understanding.
    pub unknown_chunks: Vec<[u8; 4]>,
}

impl Database {
    /// A fresh, empty database ready for a first sync.
    pub fn new() -> Self {
        Self {
            version: super::types::DB_VERSION,
            db_id: rand::random(),
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn track_by_dbid(&self, dbid: u64) -> Option<&TrackRecord> {
        self.tracks.iter().find(|t| t.dbid == dbid)
    }

    pub fn track_by_dbid_mut(&mut self, dbid: u64) -> Option<&mut TrackRecord> {
        self.tracks.iter_mut().find(|t| t.dbid == dbid)
    }

    /// Remove a track; playlist items pointing at it are dropped too.
    pub fn remove_track(&mut self, dbid: u64) -> Option<TrackRecord> {
        let idx = self.tracks.iter().position(|t| t.dbid == dbid)?;
        let removed = self.tracks.remove(idx);
        for list in self
            .playlists
            .iter_mut()
            .chain(self.podcasts.iter_mut())
            .chain(self.smart_playlists.iter_mut())
        {
            list.items.retain(|i| i.track_id != removed.track_id);
        }
        Some(removed)
    }

    pub fn contains_dbid(&self, dbid: u64) -> bool {
        self.tracks.iter().any(|t| t.dbid == dbid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_track_drops_playlist_items() {
        let mut db = Database::new();
        let mut t = TrackRecord::new(7);
        t.track_id = 101;
        db.tracks.push(t);

        let mut pl = PlaylistRecord::new("mix");
        pl.items.push(PlaylistItem { track_id: 101 });
        pl.items.push(PlaylistItem { track_id: 999 });
        db.playlists.push(pl);

        assert!(db.remove_track(7).is_some());
        assert!(db.tracks.is_empty());
        assert_eq!(db.playlists[0].items.len(), 1);
        assert_eq!(db.playlists[0].items[0].track_id, 999);
    }

    #[test]
    fn test_new_database_has_random_id() {
        let a = Database::new();
        let b = Database::new();
        // Two fresh databases should essentially never collide.
        assert_ne!(a.db_id, b.db_id);
        assert_eq!(a.next_id, 1);
    }
}
