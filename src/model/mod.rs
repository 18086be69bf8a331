//! PC-side library model
//!
//! Data structures independent of both the desktop filesystem and the
//! device database format.

mod scanner;
mod track;

pub use scanner::{scan_library, ScanResult};
pub use track::PcTrack;

/// The secondary identity key: fingerprint alone collapses the
/// greatest-hits case, so albums are folded in, case- and
/// whitespace-insensitively.
pub fn album_key(album: &str) -> String {
    album.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_album_key_normalization() {
        assert_eq!(album_key("  Greatest Hits "), "greatest hits");
        assert_eq!(album_key("STUDIO"), "studio");
        assert_eq!(album_key(""), "");
    }
}
