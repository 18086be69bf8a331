//! Chunk tags, type codes, and byte-exact format constants

/// Four-character chunk tags.
pub mod tag {
    pub const MHBD: &[u8; 4] = b"mhbd";
    pub const MHSD: &[u8; 4] = b"mhsd";
    pub const MHLT: &[u8; 4] = b"mhlt";
    pub const MHLA: &[u8; 4] = b"mhla";
    pub const MHLP: &[u8; 4] = b"mhlp";
    pub const MHIT: &[u8; 4] = b"mhit";
    pub const MHIA: &[u8; 4] = b"mhia";
    pub const MHYP: &[u8; 4] = b"mhyp";
    pub const MHIP: &[u8; 4] = b"mhip";
    pub const MHOD: &[u8; 4] = b"mhod";
}

/// `mhbd` header length. Fixed across supported firmware.
pub const MHBD_HEADER_LEN: u32 = 244;

/// `mhod` header length (string payload preamble follows it).
pub const MHOD_HEADER_LEN: u32 = 24;

/// Database version word this writer emits. Older versions parse with a
/// warning; see [`crate::itunesdb::ReadError`].
pub const DB_VERSION: u32 = 0x19;

// mhbd field offsets used by the codec and the signer.
pub const MHBD_DBID_OFFSET: usize = 0x18; // 24: file-wide 64-bit id
pub const MHBD_NEXT_ID_OFFSET: usize = 0x20; // next trackID to assign
pub const MHBD_UNK_0X32_OFFSET: usize = 0x32; // 50: 20 opaque bytes
pub const MHBD_UNK_0X32_LEN: usize = 20;
pub const MHBD_SCHEME_OFFSET: usize = 0x46; // 70: hashing-scheme selector
pub const MHBD_HASH58_OFFSET: usize = 0x58; // 20-byte HMAC-SHA1 slot
pub const MHBD_HASH58_LEN: usize = 20;
pub const MHBD_HASH72_OFFSET: usize = 0x72; // 46-byte AES-CBC slot
pub const MHBD_HASH72_LEN: usize = 46;

/// Seconds between 1904-01-01 (Mac epoch) and 1970-01-01 (Unix epoch).
pub const MAC_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Convert a Unix timestamp to Mac-epoch seconds, clamping negatives to zero.
pub fn unix_to_mac(unix: i64) -> u32 {
    (unix + MAC_EPOCH_OFFSET as i64).max(0) as u32
}

/// Convert Mac-epoch seconds to a Unix timestamp.
pub fn mac_to_unix(mac: u32) -> i64 {
    mac as i64 - MAC_EPOCH_OFFSET as i64
}

/// Dataset envelope discriminator (`mhsd` type field).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Tracks = 1,
    Playlists = 2,
    Podcasts = 3,
    Albums = 4,
    SmartPlaylists = 5,
}

impl DatasetKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(DatasetKind::Tracks),
            2 => Some(DatasetKind::Playlists),
            3 => Some(DatasetKind::Podcasts),
            4 => Some(DatasetKind::Albums),
            5 => Some(DatasetKind::SmartPlaylists),
            _ => None,
        }
    }
}

/// `mhod` type word. String types carry an encoded text payload; the binary
/// types carry opaque bytes (smart-playlist data and rules).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MhodType {
    Title = 1,
    Location = 2,
    Album = 3,
    Artist = 4,
    Genre = 5,
    Filetype = 6,
    Comment = 8,
    Composer = 12,
    AlbumArtist = 22,
    SmartPlaylistData = 50,
    SmartPlaylistRules = 51,
    AlbumName = 200,
    AlbumArtistName = 201,
}

impl MhodType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(MhodType::Title),
            2 => Some(MhodType::Location),
            3 => Some(MhodType::Album),
            4 => Some(MhodType::Artist),
            5 => Some(MhodType::Genre),
            6 => Some(MhodType::Filetype),
            8 => Some(MhodType::Comment),
            12 => Some(MhodType::Composer),
            22 => Some(MhodType::AlbumArtist),
            50 => Some(MhodType::SmartPlaylistData),
            51 => Some(MhodType::SmartPlaylistRules),
            200 => Some(MhodType::AlbumName),
            201 => Some(MhodType::AlbumArtistName),
            _ => None,
        }
    }

    /// Binary mhods carry raw bytes instead of an encoded string.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            MhodType::SmartPlaylistData | MhodType::SmartPlaylistRules
        )
    }
}

/// Media-type code stored in the track record.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio = 1,
    Video = 2,
    Podcast = 4,
    Audiobook = 8,
    MusicVideo = 0x20,
    TvShow = 0x40,
}

/// Four-character ASCII file type word for a track, from its extension.
pub fn filetype_word(extension: &str) -> [u8; 4] {
    match extension.to_lowercase().as_str() {
        "mp3" => *b"MP3 ",
        "m4a" | "m4b" | "m4p" | "mp4" | "aac" => *b"M4A ",
        "wav" => *b"WAV ",
        "aif" | "aiff" => *b"AIFF",
        "alac" => *b"M4A ",
        _ => *b"MP3 ",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_conversion() {
        assert_eq!(unix_to_mac(0), 2_082_844_800);
        assert_eq!(mac_to_unix(2_082_844_800), 0);
        let now = 1_700_000_000i64;
        assert_eq!(mac_to_unix(unix_to_mac(now)), now);
    }

    #[test]
    fn test_epoch_clamps_pre_1904() {
        assert_eq!(unix_to_mac(-3_000_000_000), 0);
    }

    #[test]
    fn test_filetype_words() {
        assert_eq!(&filetype_word("mp3"), b"MP3 ");
        assert_eq!(&filetype_word("M4A"), b"M4A ");
        assert_eq!(&filetype_word("aiff"), b"AIFF");
    }

    #[test]
    fn test_dataset_kind_roundtrip() {
        for v in 1..=5 {
            assert_eq!(DatasetKind::from_u32(v).unwrap() as u32, v);
        }
        assert!(DatasetKind::from_u32(9).is_none());
    }
}
