//! iTunesDB emitter
//!
//! Emits the complete chunk tree in one pass over a backpatching buffer.
//! Containers are opened with zero placeholders for total length and child
//! count, children are emitted and counted, then the placeholders are
//! patched. No chunk is emitted speculatively and no emitted child is ever
//! rewritten.
//!
//! Dataset order: albums (4), tracks (1), podcasts (3), playlists (2),
//! smart playlists (5). The master playlist is emitted first within the
//! playlist dataset and references every track.

use super::buffer::{ByteWriter, HeaderFix};
use super::records::{AlbumRecord, Database, PlaylistRecord, TrackRecord};
use super::strings::encode_payload;
use super::types::{self, tag, DatasetKind, MhodType};
use crate::error::SyncError;
use std::collections::{HashMap, HashSet};

/// mhit fixed-field region length (string children follow it).
const MHIT_HEADER_LEN: u32 = 0x148;
const MHSD_HEADER_LEN: u32 = 96;
const MHLX_HEADER_LEN: u32 = 92;
const MHIA_HEADER_LEN: u32 = 88;
const MHYP_HEADER_LEN: u32 = 108;
const MHIP_HEADER_LEN: u32 = 76;

/// trackID assignment for a previously-unassigned input track.
///
/// `input_index` is the track's position in `Database::tracks` at emit time,
/// so the executor can connect new mapping entries to their dbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackAssignment {
    pub input_index: usize,
    pub dbid: u64,
    pub track_id: u32,
}

/// Emit the database into a fresh buffer.
///
/// Assigns trackIDs to tracks that have none, regenerates the album list
/// from the tracks, rebuilds the master playlist, and self-checks the
/// structural invariants before emitting. Violations are fatal: nothing is
/// persisted downstream of a failed emit.
pub fn emit_database(db: &mut Database) -> Result<(Vec<u8>, Vec<TrackAssignment>), SyncError> {
    let assignments = assign_track_ids(db);
    let albums = rebuild_albums(db);
    rebuild_master_playlist(db);
    self_check(db)?;

    log::debug!(
        "emitting database: {} tracks, {} albums, {} playlists",
        db.tracks.len(),
        albums.len(),
        db.playlists.len()
    );

    let mut w = ByteWriter::with_capacity(db.tracks.len() * 1024 + 4096);

    let mhbd = HeaderFix::capture(&w);
    write_mhbd_header(&mut w, db);

    let mut dataset_count = 0u32;
    write_album_dataset(&mut w, &albums);
    dataset_count += 1;
    write_track_dataset(&mut w, &db.tracks);
    dataset_count += 1;
    write_playlist_dataset(&mut w, DatasetKind::Podcasts, &db.podcasts);
    dataset_count += 1;
    write_playlist_dataset(&mut w, DatasetKind::Playlists, &db.playlists);
    dataset_count += 1;
    write_playlist_dataset(&mut w, DatasetKind::SmartPlaylists, &db.smart_playlists);
    dataset_count += 1;

    w.patch_u32_le(0x14, dataset_count);
    mhbd.close(&mut w);

    let bytes = w.into_inner();
    let declared = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    if declared as usize != bytes.len() {
        return Err(SyncError::CodecInvariantViolation(format!(
            "mhbd total length {} != emitted size {}",
            declared,
            bytes.len()
        )));
    }

    Ok((bytes, assignments))
}

/// Give every unassigned track a trackID and keep `next_id` strictly above
/// every id in use.
fn assign_track_ids(db: &mut Database) -> Vec<TrackAssignment> {
    let max_assigned = db
        .tracks
        .iter()
        .map(|t| t.track_id)
        .max()
        .unwrap_or(0);
    if db.next_id <= max_assigned {
        db.next_id = max_assigned + 1;
    }

    let mut assignments = Vec::new();
    for (idx, track) in db.tracks.iter_mut().enumerate() {
        if track.track_id == 0 {
            track.track_id = db.next_id;
            db.next_id += 1;
            assignments.push(TrackAssignment {
                input_index: idx,
                dbid: track.dbid,
                track_id: track.track_id,
            });
        }
    }
    assignments
}

/// Deduplicate `(album, album_artist)` pairs across the tracks, assign
/// 1-based album ids, and point each track at its album.
fn rebuild_albums(db: &mut Database) -> Vec<AlbumRecord> {
    let mut albums: Vec<AlbumRecord> = Vec::new();
    let mut index: HashMap<(String, String), u32> = HashMap::new();

    for track in db.tracks.iter_mut() {
        if track.album.is_empty() {
            track.album_id = 0;
            continue;
        }
        let key = (track.album.clone(), track.album_artist.clone());
        let id = *index.entry(key).or_insert_with(|| {
            let id = (albums.len() + 1) as u32;
            albums.push(AlbumRecord {
                album_id: id,
                name: track.album.clone(),
                artist: track.album_artist.clone(),
            });
            id
        });
        track.album_id = id;
    }

    db.albums = albums.clone();
    albums
}

/// The master playlist always lists every track, in track-list order.
fn rebuild_master_playlist(db: &mut Database) {
    let items: Vec<super::records::PlaylistItem> = db
        .tracks
        .iter()
        .map(|t| super::records::PlaylistItem {
            track_id: t.track_id,
        })
        .collect();

    if let Some(master) = db.playlists.iter_mut().find(|p| p.is_master) {
        master.items = items;
    } else {
        let mut master = PlaylistRecord::new("iPod");
        master.is_master = true;
        master.id = rand::random();
        master.items = items;
        db.playlists.insert(0, master);
    }
}

fn self_check(db: &Database) -> Result<(), SyncError> {
    let mut dbids = HashSet::new();
    let mut track_ids = HashSet::new();
    for track in &db.tracks {
        if !dbids.insert(track.dbid) {
            return Err(SyncError::CodecInvariantViolation(format!(
                "duplicate dbid {:#018x}",
                track.dbid
            )));
        }
        if track.track_id == 0 || !track_ids.insert(track.track_id) {
            return Err(SyncError::CodecInvariantViolation(format!(
                "bad or duplicate trackID {}",
                track.track_id
            )));
        }
        if track.track_id >= db.next_id {
            return Err(SyncError::CodecInvariantViolation(format!(
                "next_id {} not above trackID {}",
                db.next_id, track.track_id
            )));
        }
    }

    for list in db
        .playlists
        .iter()
        .chain(db.podcasts.iter())
        .chain(db.smart_playlists.iter())
    {
        for item in &list.items {
            if !track_ids.contains(&item.track_id) {
                return Err(SyncError::CodecInvariantViolation(format!(
                    "playlist {:?} references unknown trackID {}",
                    list.name, item.track_id
                )));
            }
        }
    }
    Ok(())
}

fn write_mhbd_header(w: &mut ByteWriter, db: &Database) {
    let start = w.current_position();

    w.append(tag::MHBD); // 0x00: tag
    w.write_u32_le(types::MHBD_HEADER_LEN); // 0x04: header length (244)
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(1); // 0x0C: unknown, always 1
    w.write_u32_le(db.version); // 0x10: version
    w.write_u32_le(0); // 0x14: dataset count (patched)
    w.write_u64_le(db.db_id); // 0x18: file-wide database id
    w.write_u32_le(db.next_id); // 0x20: next trackID
    w.write_u16_le(2); // 0x24: platform
    w.pad(0x32 - 0x26); // 0x26-0x31: reserved
    w.pad(types::MHBD_UNK_0X32_LEN); // 0x32-0x45: opaque, excluded from hashes
    w.write_u16_le(db.hashing_scheme); // 0x46: hashing-scheme selector
    w.pad(0x58 - 0x48); // 0x48-0x57: reserved
    w.pad(types::MHBD_HASH58_LEN); // 0x58-0x6B: HASH58 slot (signer fills)
    w.append(b"en"); // 0x6C: language
    w.pad(0x72 - 0x6E); // 0x6E-0x71: reserved
    w.pad(types::MHBD_HASH72_LEN); // 0x72-0x9F: HASH72 slot (signer fills)
    w.pad_to(start + types::MHBD_HEADER_LEN as usize); // zero to 244
}

fn write_mhsd_header(w: &mut ByteWriter, kind: DatasetKind) -> HeaderFix {
    let fix = HeaderFix::capture(w);
    w.append(tag::MHSD); // tag
    w.write_u32_le(MHSD_HEADER_LEN); // header length
    w.write_u32_le(0); // total length (patched)
    w.write_u32_le(kind as u32); // dataset type
    w.pad(MHSD_HEADER_LEN as usize - 16);
    fix
}

/// List headers carry a child count instead of a total length; their extent
/// is the sum of their children.
fn write_list_header(w: &mut ByteWriter, list_tag: &[u8; 4], child_count: u32) {
    w.append(list_tag); // tag
    w.write_u32_le(MHLX_HEADER_LEN); // header length
    w.write_u32_le(child_count); // child count (no total length)
    w.pad(MHLX_HEADER_LEN as usize - 12);
}

fn write_album_dataset(w: &mut ByteWriter, albums: &[AlbumRecord]) {
    let mhsd = write_mhsd_header(w, DatasetKind::Albums);
    write_list_header(w, tag::MHLA, albums.len() as u32);
    for album in albums {
        write_mhia(w, album);
    }
    mhsd.close(w);
}

fn write_mhia(w: &mut ByteWriter, album: &AlbumRecord) {
    let fix = HeaderFix::capture(w);
    let start = fix.start();

    w.append(tag::MHIA); // 0x00: tag
    w.write_u32_le(MHIA_HEADER_LEN); // 0x04: header length
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(0); // 0x0C: mhod count (patched)
    w.write_u32_le(album.album_id); // 0x10: album id
    w.pad_to(start + MHIA_HEADER_LEN as usize);

    let mut mhods = 0u32;
    if !album.name.is_empty() {
        write_string_mhod(w, MhodType::AlbumName, &album.name);
        mhods += 1;
    }
    if !album.artist.is_empty() {
        write_string_mhod(w, MhodType::AlbumArtistName, &album.artist);
        mhods += 1;
    }
    w.patch_u32_le(start + 0x0C, mhods);
    fix.close(w);
}

fn write_track_dataset(w: &mut ByteWriter, tracks: &[TrackRecord]) {
    let mhsd = write_mhsd_header(w, DatasetKind::Tracks);
    write_list_header(w, tag::MHLT, tracks.len() as u32);
    for track in tracks {
        write_mhit(w, track);
    }
    mhsd.close(w);
}

fn write_mhit(w: &mut ByteWriter, t: &TrackRecord) {
    let fix = HeaderFix::capture(w);
    let start = fix.start();

    w.append(tag::MHIT); // 0x00: tag
    w.write_u32_le(MHIT_HEADER_LEN); // 0x04: header length
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(0); // 0x0C: mhod count (patched)
    w.write_u32_le(t.track_id); // 0x10: trackID
    w.write_u32_le(1); // 0x14: visible
    w.append(&t.filetype); // 0x18: file type word
    w.write_u8(0); // 0x1C: type1
    w.write_u8(0); // 0x1D: type2
    w.write_u8(0); // 0x1E: compilation
    w.write_u8(t.rating); // 0x1F: rating, stars * 20
    w.write_u32_le(t.date_modified); // 0x20: date modified (Mac epoch)
    w.write_u32_le(t.size); // 0x24: size in bytes
    w.write_u32_le(t.duration_ms); // 0x28: duration in ms
    w.write_u32_le(t.track_number); // 0x2C: track number
    w.write_u32_le(t.total_tracks); // 0x30: total tracks
    w.write_u32_le(t.year); // 0x34: year
    w.write_u32_le(t.bitrate); // 0x38: bitrate in kbps
    w.write_u32_le(t.sample_rate.min(0xFFFF) << 16); // 0x3C: sample rate, hz * 65536
    w.write_u32_le(0); // 0x40: volume
    w.write_u32_le(0); // 0x44: start time
    w.write_u32_le(0); // 0x48: stop time
    w.write_u32_le(0); // 0x4C: soundcheck
    w.write_u32_le(t.play_count); // 0x50: cumulative play count
    w.write_u32_le(t.play_count_2); // 0x54: plays since last sync
    w.write_u32_le(t.last_played); // 0x58: last played (Mac epoch)
    w.write_u32_le(t.disc_number); // 0x5C: disc number
    w.write_u32_le(t.total_discs); // 0x60: total discs
    w.write_u32_le(0); // 0x64: user id
    w.write_u32_le(t.date_added); // 0x68: date added (Mac epoch)
    w.write_u32_le(0); // 0x6C: bookmark time
    w.write_u64_le(t.dbid); // 0x70: dbid
    w.write_u8(0); // 0x78: checked
    w.write_u8(0); // 0x79: application rating
    w.write_u16_le(0); // 0x7A: bpm
    w.write_u16_le(t.artwork_count); // 0x7C: artwork count
    w.write_u16_le(0); // 0x7E: reserved
    w.write_u32_le(t.artwork_size); // 0x80: artwork source byte size
    w.write_u32_le(0); // 0x84: reserved
    w.write_u32_le(0); // 0x88: date released
    w.write_u32_le(t.skip_count); // 0x8C: skip count
    w.write_u32_le(t.last_skipped); // 0x90: last skipped (Mac epoch)
    w.write_u8(u8::from(t.mhii_link != 0)); // 0x94: has artwork
    w.write_u8(0); // 0x95: skip when shuffling
    w.write_u8(0); // 0x96: remember position
    w.write_u8(0); // 0x97: podcast flag
    w.write_u64_le(t.dbid); // 0x98: dbid copy
    w.write_u32_le(t.media_type); // 0xA0: media type
    w.write_u32_le(t.mhii_link); // 0xA4: artwork record link
    w.write_u32_le(t.album_id); // 0xA8: album list reference
    w.pad_to(start + MHIT_HEADER_LEN as usize); // 0xAC-0x147: reserved

    let mut mhods = 0u32;
    let strings: [(MhodType, &str); 8] = [
        (MhodType::Title, &t.title),
        (MhodType::Location, &t.location),
        (MhodType::Album, &t.album),
        (MhodType::Artist, &t.artist),
        (MhodType::Genre, &t.genre),
        (MhodType::Comment, &t.comment),
        (MhodType::Composer, &t.composer),
        (MhodType::AlbumArtist, &t.album_artist),
    ];
    for (kind, text) in strings {
        if !text.is_empty() {
            write_string_mhod(w, kind, text);
            mhods += 1;
        }
    }

    w.patch_u32_le(start + 0x0C, mhods);
    fix.close(w);
}

fn write_playlist_dataset(w: &mut ByteWriter, kind: DatasetKind, lists: &[PlaylistRecord]) {
    let mhsd = write_mhsd_header(w, kind);
    write_list_header(w, tag::MHLP, lists.len() as u32);

    // Master first, then the rest in input order.
    for list in lists.iter().filter(|p| p.is_master) {
        write_mhyp(w, list);
    }
    for list in lists.iter().filter(|p| !p.is_master) {
        write_mhyp(w, list);
    }
    mhsd.close(w);
}

fn write_mhyp(w: &mut ByteWriter, p: &PlaylistRecord) {
    let fix = HeaderFix::capture(w);
    let start = fix.start();

    w.append(tag::MHYP); // 0x00: tag
    w.write_u32_le(MHYP_HEADER_LEN); // 0x04: header length
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(0); // 0x0C: mhod count (patched)
    w.write_u32_le(p.items.len() as u32); // 0x10: item count
    w.write_u8(u8::from(p.is_master)); // 0x14: master flag
    w.pad(3); // 0x15-0x17: reserved
    w.write_u32_le(0); // 0x18: timestamp
    w.write_u32_le(0); // 0x1C: reserved
    w.write_u64_le(p.id); // 0x20: persistent playlist id
    w.pad_to(start + MHYP_HEADER_LEN as usize);

    let mut mhods = 0u32;
    if !p.name.is_empty() {
        write_string_mhod(w, MhodType::Title, &p.name);
        mhods += 1;
    }
    if let Some(data) = &p.smart_data {
        write_binary_mhod(w, MhodType::SmartPlaylistData, data);
        mhods += 1;
    }
    if let Some(rules) = &p.smart_rules {
        write_binary_mhod(w, MhodType::SmartPlaylistRules, rules);
        mhods += 1;
    }
    w.patch_u32_le(start + 0x0C, mhods);

    for (idx, item) in p.items.iter().enumerate() {
        write_mhip(w, idx as u32, item.track_id);
    }

    fix.close(w);
}

fn write_mhip(w: &mut ByteWriter, item_id: u32, track_id: u32) {
    let fix = HeaderFix::capture(w);
    let start = fix.start();

    w.append(tag::MHIP); // 0x00: tag
    w.write_u32_le(MHIP_HEADER_LEN); // 0x04: header length
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(0); // 0x0C: mhod count
    w.write_u32_le(item_id); // 0x10: item id within the playlist
    w.write_u32_le(track_id); // 0x14: referenced trackID
    w.write_u32_le(0); // 0x18: timestamp
    w.pad_to(start + MHIP_HEADER_LEN as usize);

    fix.close(w);
}

/// String mhod: 24-byte header (tag, header length, total length, type, two
/// zero words), then payload length, a zero word, and the payload bytes.
fn write_string_mhod(w: &mut ByteWriter, kind: MhodType, text: &str) {
    let payload = encode_payload(text);

    let fix = HeaderFix::capture(w);
    w.append(tag::MHOD);
    w.write_u32_le(types::MHOD_HEADER_LEN);
    w.write_u32_le(0); // total length (patched)
    w.write_u32_le(kind as u32);
    w.write_u32_le(0);
    w.write_u32_le(0);
    w.write_u32_le(payload.len() as u32);
    w.write_u32_le(0);
    w.append(&payload);
    fix.close(w);
}

/// Binary mhod: 24-byte header followed by the raw payload.
fn write_binary_mhod(w: &mut ByteWriter, kind: MhodType, data: &[u8]) {
    let fix = HeaderFix::capture(w);
    w.append(tag::MHOD);
    w.write_u32_le(types::MHOD_HEADER_LEN);
    w.write_u32_le(0); // total length (patched)
    w.write_u32_le(kind as u32);
    w.write_u32_le(0);
    w.write_u32_le(0);
    w.append(data);
    fix.close(w);
}
