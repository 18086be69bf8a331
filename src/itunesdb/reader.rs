//! iTunesDB parser
//!
//! Recursive descent over the chunk tree. Every chunk parser returns the
//! offset of the next sibling (start plus total length for containers,
//! start plus header length for leaves), so callers iterate siblings without
//! trusting child counts. Unknown chunk types are skipped by their declared
//! total length and their tags recorded.

use super::records::{AlbumRecord, Database, PlaylistItem, PlaylistRecord, TrackRecord};
use super::strings::decode_payload;
use super::types::{self, tag, DatasetKind, MhodType};
use byteorder::{ByteOrder, LittleEndian};

/// Parse failures. `BadVersion` is deliberately absent: an unrecognized
/// version is logged and parsing continues.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// A chunk's declared length extends past the end of the buffer.
    #[error("truncated chunk at offset {offset:#x}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A tag position does not hold printable ASCII.
    #[error("bad magic at offset {offset:#x}: {found:02x?}")]
    BadMagic { offset: usize, found: [u8; 4] },
}

/// Parse a complete database from a byte slice.
pub fn parse_database(buf: &[u8]) -> Result<Database, ReadError> {
    let header_len = expect_chunk(buf, 0, tag::MHBD)?;
    let total_len = u32_at(buf, 8)? as usize;
    if total_len > buf.len() {
        return Err(ReadError::Truncated {
            offset: 0,
            needed: total_len,
            available: buf.len(),
        });
    }

    let mut db = Database {
        version: u32_at(buf, 0x10)?,
        db_id: u64_at(buf, types::MHBD_DBID_OFFSET)?,
        next_id: u32_at(buf, types::MHBD_NEXT_ID_OFFSET)?,
        hashing_scheme: u16_at(buf, types::MHBD_SCHEME_OFFSET)?,
        ..Default::default()
    };

    if db.version != types::DB_VERSION {
        log::warn!(
            "unrecognized database version {:#x}, parsing anyway",
            db.version
        );
    }

    let mut offset = header_len;
    while offset + 12 <= total_len {
        let chunk_tag = tag_at(buf, offset)?;
        if &chunk_tag != tag::MHSD {
            // Skip by total length, remembering what we stepped over.
            log::debug!(
                "skipping unknown top-level chunk {:?} at {:#x}",
                String::from_utf8_lossy(&chunk_tag),
                offset
            );
            db.unknown_chunks.push(chunk_tag);
            offset += checked_extent(buf, offset, u32_at(buf, offset + 8)? as usize)?;
            continue;
        }
        offset = parse_mhsd(buf, offset, &mut db)?;
    }

    Ok(db)
}

/// Parse one dataset envelope; returns the next sibling offset.
fn parse_mhsd(buf: &[u8], offset: usize, db: &mut Database) -> Result<usize, ReadError> {
    let header_len = expect_chunk(buf, offset, tag::MHSD)?;
    let total_len = checked_extent(buf, offset, u32_at(buf, offset + 8)? as usize)?;
    let kind = u32_at(buf, offset + 12)?;

    let list_offset = offset + header_len;
    match DatasetKind::from_u32(kind) {
        Some(DatasetKind::Tracks) => parse_track_list(buf, list_offset, db)?,
        Some(DatasetKind::Albums) => parse_album_list(buf, list_offset, db)?,
        Some(DatasetKind::Playlists) => {
            db.playlists = parse_playlist_list(buf, list_offset)?;
        }
        Some(DatasetKind::Podcasts) => {
            db.podcasts = parse_playlist_list(buf, list_offset)?;
        }
        Some(DatasetKind::SmartPlaylists) => {
            db.smart_playlists = parse_playlist_list(buf, list_offset)?;
        }
        None => {
            log::warn!("unknown dataset type {} at {:#x}, skipped", kind, offset);
        }
    }

    Ok(offset + total_len)
}

fn parse_track_list(buf: &[u8], offset: usize, db: &mut Database) -> Result<(), ReadError> {
    let header_len = expect_chunk(buf, offset, tag::MHLT)?;
    let count = u32_at(buf, offset + 8)?;

    let mut child = offset + header_len;
    for _ in 0..count {
        let (track, next) = parse_mhit(buf, child)?;
        db.tracks.push(track);
        child = next;
    }
    Ok(())
}

fn parse_album_list(buf: &[u8], offset: usize, db: &mut Database) -> Result<(), ReadError> {
    let header_len = expect_chunk(buf, offset, tag::MHLA)?;
    let count = u32_at(buf, offset + 8)?;

    let mut child = offset + header_len;
    for _ in 0..count {
        let (album, next) = parse_mhia(buf, child)?;
        db.albums.push(album);
        child = next;
    }
    Ok(())
}

fn parse_playlist_list(buf: &[u8], offset: usize) -> Result<Vec<PlaylistRecord>, ReadError> {
    let header_len = expect_chunk(buf, offset, tag::MHLP)?;
    let count = u32_at(buf, offset + 8)?;

    let mut lists = Vec::with_capacity(count as usize);
    let mut child = offset + header_len;
    for _ in 0..count {
        let (list, next) = parse_mhyp(buf, child)?;
        lists.push(list);
        child = next;
    }
    Ok(lists)
}

/// Parse one track record; returns `(record, next sibling offset)`.
fn parse_mhit(buf: &[u8], offset: usize) -> Result<(TrackRecord, usize), ReadError> {
    let header_len = expect_chunk(buf, offset, tag::MHIT)?;
    require_header(offset, header_len, 0xAC)?;
    let total_len = checked_extent(buf, offset, u32_at(buf, offset + 8)? as usize)?;
    let mhod_count = u32_at(buf, offset + 0x0C)?;

    let mut t = TrackRecord {
        track_id: u32_at(buf, offset + 0x10)?,
        rating: buf[offset + 0x1F],
        date_modified: u32_at(buf, offset + 0x20)?,
        size: u32_at(buf, offset + 0x24)?,
        duration_ms: u32_at(buf, offset + 0x28)?,
        track_number: u32_at(buf, offset + 0x2C)?,
        total_tracks: u32_at(buf, offset + 0x30)?,
        year: u32_at(buf, offset + 0x34)?,
        bitrate: u32_at(buf, offset + 0x38)?,
        sample_rate: u32_at(buf, offset + 0x3C)? >> 16,
        play_count: u32_at(buf, offset + 0x50)?,
        play_count_2: u32_at(buf, offset + 0x54)?,
        last_played: u32_at(buf, offset + 0x58)?,
        disc_number: u32_at(buf, offset + 0x5C)?,
        total_discs: u32_at(buf, offset + 0x60)?,
        date_added: u32_at(buf, offset + 0x68)?,
        dbid: u64_at(buf, offset + 0x70)?,
        artwork_count: u16_at(buf, offset + 0x7C)?,
        artwork_size: u32_at(buf, offset + 0x80)?,
        skip_count: u32_at(buf, offset + 0x8C)?,
        last_skipped: u32_at(buf, offset + 0x90)?,
        media_type: u32_at(buf, offset + 0xA0)?,
        mhii_link: u32_at(buf, offset + 0xA4)?,
        album_id: u32_at(buf, offset + 0xA8)?,
        ..Default::default()
    };
    t.filetype = tag_at(buf, offset + 0x18)?;

    let mut child = offset + header_len;
    for _ in 0..mhod_count {
        let (kind, payload, next) = parse_mhod(buf, child)?;
        match kind {
            Some(MhodType::Title) => t.title = decode_payload(payload),
            Some(MhodType::Location) => t.location = decode_payload(payload),
            Some(MhodType::Album) => t.album = decode_payload(payload),
            Some(MhodType::Artist) => t.artist = decode_payload(payload),
            Some(MhodType::Genre) => t.genre = decode_payload(payload),
            Some(MhodType::Comment) => t.comment = decode_payload(payload),
            Some(MhodType::Composer) => t.composer = decode_payload(payload),
            Some(MhodType::AlbumArtist) => t.album_artist = decode_payload(payload),
            _ => {}
        }
        child = next;
    }

    Ok((t, offset + total_len))
}

fn parse_mhia(buf: &[u8], offset: usize) -> Result<(AlbumRecord, usize), ReadError> {
    let header_len = expect_chunk(buf, offset, tag::MHIA)?;
    require_header(offset, header_len, 0x14)?;
    let total_len = checked_extent(buf, offset, u32_at(buf, offset + 8)? as usize)?;
    let mhod_count = u32_at(buf, offset + 0x0C)?;

    let mut album = AlbumRecord {
        album_id: u32_at(buf, offset + 0x10)?,
        ..Default::default()
    };

    let mut child = offset + header_len;
    for _ in 0..mhod_count {
        let (kind, payload, next) = parse_mhod(buf, child)?;
        match kind {
            Some(MhodType::AlbumName) => album.name = decode_payload(payload),
            Some(MhodType::AlbumArtistName) => album.artist = decode_payload(payload),
            _ => {}
        }
        child = next;
    }

    Ok((album, offset + total_len))
}

fn parse_mhyp(buf: &[u8], offset: usize) -> Result<(PlaylistRecord, usize), ReadError> {
    let header_len = expect_chunk(buf, offset, tag::MHYP)?;
    require_header(offset, header_len, 0x28)?;
    let total_len = checked_extent(buf, offset, u32_at(buf, offset + 8)? as usize)?;
    let mhod_count = u32_at(buf, offset + 0x0C)?;
    let item_count = u32_at(buf, offset + 0x10)?;

    let mut list = PlaylistRecord {
        is_master: buf[offset + 0x14] != 0,
        id: u64_at(buf, offset + 0x20)?,
        ..Default::default()
    };

    let mut child = offset + header_len;
    for _ in 0..mhod_count {
        let (kind, payload, next) = parse_mhod(buf, child)?;
        match kind {
            Some(MhodType::Title) => list.name = decode_payload(payload),
            Some(MhodType::SmartPlaylistData) => list.smart_data = Some(payload.to_vec()),
            Some(MhodType::SmartPlaylistRules) => list.smart_rules = Some(payload.to_vec()),
            _ => {}
        }
        child = next;
    }

    for _ in 0..item_count {
        let (item, next) = parse_mhip(buf, child)?;
        list.items.push(item);
        child = next;
    }

    Ok((list, offset + total_len))
}

fn parse_mhip(buf: &[u8], offset: usize) -> Result<(PlaylistItem, usize), ReadError> {
    expect_chunk(buf, offset, tag::MHIP)?;
    let total_len = checked_extent(buf, offset, u32_at(buf, offset + 8)? as usize)?;
    let track_id = u32_at(buf, offset + 0x14)?;
    Ok((PlaylistItem { track_id }, offset + total_len))
}

/// Parse one mhod; returns `(type, payload bytes, next sibling offset)`.
///
/// String payloads sit behind an 8-byte preamble (payload length, zero
/// word); binary payloads follow the 24-byte header directly.
fn parse_mhod(buf: &[u8], offset: usize) -> Result<(Option<MhodType>, &[u8], usize), ReadError> {
    expect_chunk(buf, offset, tag::MHOD)?;
    let total_len = checked_extent(buf, offset, u32_at(buf, offset + 8)? as usize)?;
    let type_word = u32_at(buf, offset + 0x0C)?;
    let kind = MhodType::from_u32(type_word);

    let header = types::MHOD_HEADER_LEN as usize;
    let payload = match kind {
        Some(k) if k.is_binary() => &buf[offset + header..offset + total_len],
        Some(_) => {
            let plen = u32_at(buf, offset + 0x18)? as usize;
            let start = offset + header + 8;
            if start + plen > offset + total_len {
                return Err(ReadError::Truncated {
                    offset,
                    needed: start + plen - offset,
                    available: total_len,
                });
            }
            &buf[start..start + plen]
        }
        None => {
            log::debug!("skipping mhod type {} at {:#x}", type_word, offset);
            &buf[offset + total_len..offset + total_len]
        }
    };

    Ok((kind, payload, offset + total_len))
}

/// Verify the tag at `offset` and return the chunk's declared header length.
fn expect_chunk(buf: &[u8], offset: usize, expected: &[u8; 4]) -> Result<usize, ReadError> {
    let found = tag_at(buf, offset)?;
    if &found != expected {
        return Err(ReadError::BadMagic { offset, found });
    }
    let header_len = u32_at(buf, offset + 4)? as usize;
    checked_extent(buf, offset, header_len)?;
    Ok(header_len)
}

/// Direct field reads need the chunk header to reach at least `min` bytes.
fn require_header(offset: usize, header_len: usize, min: usize) -> Result<(), ReadError> {
    if header_len < min {
        return Err(ReadError::Truncated {
            offset,
            needed: min,
            available: header_len,
        });
    }
    Ok(())
}

/// A declared extent must stay inside the buffer and be non-degenerate.
fn checked_extent(buf: &[u8], offset: usize, extent: usize) -> Result<usize, ReadError> {
    if extent < 12 || offset + extent > buf.len() {
        return Err(ReadError::Truncated {
            offset,
            needed: extent,
            available: buf.len().saturating_sub(offset),
        });
    }
    Ok(extent)
}

fn tag_at(buf: &[u8], offset: usize) -> Result<[u8; 4], ReadError> {
    if offset + 4 > buf.len() {
        return Err(ReadError::Truncated {
            offset,
            needed: 4,
            available: buf.len().saturating_sub(offset),
        });
    }
    let raw: [u8; 4] = buf[offset..offset + 4].try_into().unwrap();
    if raw.iter().any(|b| !b.is_ascii_graphic()) {
        return Err(ReadError::BadMagic { offset, found: raw });
    }
    Ok(raw)
}

fn u16_at(buf: &[u8], offset: usize) -> Result<u16, ReadError> {
    bounds(buf, offset, 2)?;
    Ok(LittleEndian::read_u16(&buf[offset..]))
}

fn u32_at(buf: &[u8], offset: usize) -> Result<u32, ReadError> {
    bounds(buf, offset, 4)?;
    Ok(LittleEndian::read_u32(&buf[offset..]))
}

fn u64_at(buf: &[u8], offset: usize) -> Result<u64, ReadError> {
    bounds(buf, offset, 8)?;
    Ok(LittleEndian::read_u64(&buf[offset..]))
}

fn bounds(buf: &[u8], offset: usize, len: usize) -> Result<(), ReadError> {
    if offset + len > buf.len() {
        return Err(ReadError::Truncated {
            offset,
            needed: len,
            available: buf.len().saturating_sub(offset),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itunesdb::writer::emit_database;

    fn sample_db() -> Database {
        let mut db = Database::new();
        for (dbid, title) in [(1u64, "First"), (2, "Zwölf")] {
            let mut t = TrackRecord::new(dbid);
            t.title = title.to_string();
            t.artist = "Artist".to_string();
            t.album = "Album".to_string();
            t.location = format!(":iPod_Control:Music:F00:{:04X}.mp3", dbid);
            t.size = 1000;
            t.duration_ms = 60_000;
            t.sample_rate = 44_100;
            t.play_count = 5;
            t.play_count_2 = 3;
            db.tracks.push(t);
        }
        db
    }

    #[test]
    fn test_parse_emitted_database() {
        let mut db = sample_db();
        let (bytes, _) = emit_database(&mut db).unwrap();

        let parsed = parse_database(&bytes).unwrap();
        assert_eq!(parsed.tracks.len(), 2);
        assert_eq!(parsed.tracks[0].title, "First");
        assert_eq!(parsed.tracks[1].title, "Zwölf");
        assert_eq!(parsed.tracks[0].play_count, 5);
        assert_eq!(parsed.tracks[0].play_count_2, 3);
        assert_eq!(parsed.tracks[0].sample_rate, 44_100);
        assert_eq!(parsed.next_id, db.next_id);
        assert_eq!(parsed.db_id, db.db_id);
        // Master playlist referencing both tracks
        assert_eq!(parsed.playlists.len(), 1);
        assert!(parsed.playlists[0].is_master);
        assert_eq!(parsed.playlists[0].items.len(), 2);
    }

    #[test]
    fn test_truncated_buffer_is_rejected() {
        let mut db = sample_db();
        let (bytes, _) = emit_database(&mut db).unwrap();
        let err = parse_database(&bytes[..bytes.len() - 40]).unwrap_err();
        assert!(matches!(err, ReadError::Truncated { .. }));
    }

    #[test]
    fn test_garbage_is_bad_magic() {
        let err = parse_database(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, ReadError::BadMagic { .. }));
    }

    #[test]
    fn test_unknown_top_level_chunk_is_skipped() {
        let mut db = sample_db();
        let (bytes, _) = emit_database(&mut db).unwrap();

        // Splice an unknown chunk between the mhbd header and the first mhsd.
        let hdr = crate::itunesdb::MHBD_HEADER_LEN as usize;
        let mut spliced = Vec::new();
        spliced.extend_from_slice(&bytes[..hdr]);
        spliced.extend_from_slice(b"mhxx");
        spliced.extend_from_slice(&12u32.to_le_bytes());
        spliced.extend_from_slice(&12u32.to_le_bytes());
        spliced.extend_from_slice(&bytes[hdr..]);
        let new_total = spliced.len() as u32;
        spliced[8..12].copy_from_slice(&new_total.to_le_bytes());

        let parsed = parse_database(&spliced).unwrap();
        assert_eq!(parsed.tracks.len(), 2);
        assert_eq!(parsed.unknown_chunks, vec![*b"mhxx"]);
    }
}
