//! Play Counts file reader
//!
//! The firmware appends per-track statistics to
//! `/iPod_Control/iTunes/Play Counts` while the device is in use. Entries
//! are positional: the i-th entry belongs to the i-th track of the
//! database's track list. The file disappears after the device processes a
//! fresh database, so absence is normal.

use crate::itunesdb::Database;
use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

/// Entry length used by modern firmware (seven 32-bit words).
pub const MODERN_ENTRY_LEN: usize = 0x1C;

/// One per-track statistics entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayCountEntry {
    pub play_count: u32,
    pub last_played: u32,
    pub bookmark: u32,
    pub rating: u32,
    pub skip_count: u32,
    pub last_skipped: u32,
}

/// Parse a Play Counts buffer.
pub fn parse_play_counts(buf: &[u8]) -> Result<Vec<PlayCountEntry>> {
    if buf.len() < 16 || &buf[..4] != b"mhdp" {
        bail!("not a Play Counts file");
    }
    let header_len = LittleEndian::read_u32(&buf[4..]) as usize;
    let entry_len = LittleEndian::read_u32(&buf[8..]) as usize;
    let entry_count = LittleEndian::read_u32(&buf[12..]) as usize;

    // Older firmware wrote shorter entries; anything below four words does
    // not carry the fields we merge.
    if entry_len < 0x10 {
        bail!("unsupported Play Counts entry length {:#x}", entry_len);
    }

    let mut entries = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let off = header_len + i * entry_len;
        if off + entry_len > buf.len() {
            bail!("Play Counts truncated at entry {}", i);
        }
        let word = |n: usize| -> u32 {
            if (n + 1) * 4 <= entry_len {
                LittleEndian::read_u32(&buf[off + n * 4..])
            } else {
                0
            }
        };
        entries.push(PlayCountEntry {
            play_count: word(0),
            last_played: word(1),
            bookmark: word(2),
            rating: word(3),
            // word 4 is unknown
            skip_count: word(5),
            last_skipped: word(6),
        });
    }
    Ok(entries)
}

/// Merge device-side statistics into the working set before the diff runs.
///
/// Ratings overwrite (the device is the later writer); plays and skips
/// accumulate into the since-last-sync counters.
pub fn merge_play_counts(path: &Path, db: &mut Database) -> Result<usize> {
    if !path.exists() {
        log::debug!("no Play Counts file, nothing to merge");
        return Ok(0);
    }
    let buf = std::fs::read(path)
        .with_context(|| format!("Failed to read Play Counts: {:?}", path))?;
    let entries = parse_play_counts(&buf)?;

    if entries.len() != db.tracks.len() {
        log::warn!(
            "Play Counts has {} entries for {} tracks, merging the overlap",
            entries.len(),
            db.tracks.len()
        );
    }

    let mut merged = 0;
    for (track, entry) in db.tracks.iter_mut().zip(entries.iter()) {
        if entry.play_count == 0 && entry.skip_count == 0 && entry.rating == 0 {
            continue;
        }
        track.play_count_2 += entry.play_count;
        track.skip_count += entry.skip_count;
        if entry.last_played > track.last_played {
            track.last_played = entry.last_played;
        }
        if entry.last_skipped > track.last_skipped {
            track.last_skipped = entry.last_skipped;
        }
        if entry.rating != 0 {
            track.rating = entry.rating.min(100) as u8;
        }
        merged += 1;
    }

    log::info!("merged device statistics for {} track(s)", merged);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itunesdb::TrackRecord;

    fn play_counts_bytes(entries: &[PlayCountEntry]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"mhdp");
        buf.extend_from_slice(&96u32.to_le_bytes());
        buf.extend_from_slice(&(MODERN_ENTRY_LEN as u32).to_le_bytes());
        buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        buf.resize(96, 0);
        for e in entries {
            buf.extend_from_slice(&e.play_count.to_le_bytes());
            buf.extend_from_slice(&e.last_played.to_le_bytes());
            buf.extend_from_slice(&e.bookmark.to_le_bytes());
            buf.extend_from_slice(&e.rating.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&e.skip_count.to_le_bytes());
            buf.extend_from_slice(&e.last_skipped.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_parse_entries() {
        let bytes = play_counts_bytes(&[
            PlayCountEntry {
                play_count: 3,
                last_played: 100,
                rating: 80,
                ..Default::default()
            },
            PlayCountEntry::default(),
        ]);
        let parsed = parse_play_counts(&bytes).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].play_count, 3);
        assert_eq!(parsed[0].rating, 80);
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(parse_play_counts(b"mhxx\0\0\0\0\0\0\0\0\0\0\0\0").is_err());
    }

    #[test]
    fn test_merge_is_positional_and_additive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Play Counts");
        std::fs::write(
            &path,
            play_counts_bytes(&[PlayCountEntry {
                play_count: 2,
                last_played: 500,
                ..Default::default()
            }]),
        )
        .unwrap();

        let mut db = crate::itunesdb::Database::new();
        let mut t = TrackRecord::new(1);
        t.play_count_2 = 1;
        db.tracks.push(t);
        db.tracks.push(TrackRecord::new(2));

        let merged = merge_play_counts(&path, &mut db).unwrap();
        assert_eq!(merged, 1);
        assert_eq!(db.tracks[0].play_count_2, 3);
        assert_eq!(db.tracks[0].last_played, 500);
        assert_eq!(db.tracks[1].play_count_2, 0);
    }
}
