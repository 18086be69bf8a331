//! Codec and signer invariants over complete databases

use ipod_sync::itunesdb::{
    emit_database, parse_database, Database, PlaylistItem, PlaylistRecord, TrackRecord,
};
use ipod_sync::signer::{sign_database, DeviceKeys, HashInfo, SigningScheme};
use std::collections::HashSet;

fn track(dbid: u64, title: &str, album: &str) -> TrackRecord {
    let mut t = TrackRecord::new(dbid);
    t.title = title.to_string();
    t.artist = "Artist".to_string();
    t.album = album.to_string();
    t.album_artist = "Album Artist".to_string();
    t.genre = "Electronic".to_string();
    t.location = format!(":iPod_Control:Music:F{:02}:{:04X}.mp3", dbid % 50, dbid);
    t.size = 4_000_000 + dbid as u32;
    t.duration_ms = 180_000;
    t.bitrate = 192;
    t.sample_rate = 44_100;
    t.rating = ((dbid % 6) * 20) as u8;
    t.play_count = dbid as u32;
    t.track_number = dbid as u32;
    t.year = 2020;
    t
}

/// Twelve tracks, two albums, a regular playlist, and a smart playlist.
fn twelve_track_db() -> Database {
    let mut db = Database::new();
    for i in 1..=12u64 {
        let album = if i <= 8 { "Studio" } else { "Grüße aus Wien" };
        db.tracks.push(track(i, &format!("Track {:02}", i), album));
    }
    db
}

fn device_keys() -> DeviceKeys {
    DeviceKeys {
        firewire_guid: Some([0x00, 0x0A, 0x27, 0x00, 0x14, 0x32, 0x51, 0x69]),
        hash_info: Some(HashInfo {
            uuid: [0x5A; 20],
            rndpart: [0xC3; 12],
            iv: [0x77; 16],
        }),
    }
}

#[test]
fn round_trip_preserves_the_parsed_tree() {
    let mut db = twelve_track_db();
    let (first_bytes, _) = emit_database(&mut db).unwrap();
    let parsed_once = parse_database(&first_bytes).unwrap();

    let mut reparse_input = parsed_once.clone();
    let (second_bytes, assignments) = emit_database(&mut reparse_input).unwrap();
    assert!(assignments.is_empty(), "no track should need a fresh id");

    let parsed_twice = parse_database(&second_bytes).unwrap();
    assert_eq!(parsed_once, parsed_twice);
}

#[test]
fn round_trip_survives_playlists_and_smart_playlists() {
    let mut db = twelve_track_db();

    // Assign ids up front so the playlists can reference them.
    let (_, _) = emit_database(&mut db).unwrap();

    let mut favorites = PlaylistRecord::new("Favoriten ♥");
    favorites.id = 0x1122334455667788;
    favorites.items = vec![
        PlaylistItem {
            track_id: db.tracks[0].track_id,
        },
        PlaylistItem {
            track_id: db.tracks[5].track_id,
        },
    ];
    db.playlists.push(favorites);

    let mut recent = PlaylistRecord::new("Recently Added");
    recent.id = 0x99AABBCCDDEEFF00;
    recent.smart_data = Some(vec![0xDE, 0xAD, 0xBE, 0xEF]);
    recent.smart_rules = Some(vec![0x01, 0x02, 0x03]);
    db.smart_playlists.push(recent);

    let (bytes, _) = emit_database(&mut db).unwrap();
    let parsed = parse_database(&bytes).unwrap();

    assert_eq!(parsed.playlists.len(), 2); // master + favorites
    let favorites = parsed.playlists.iter().find(|p| !p.is_master).unwrap();
    assert_eq!(favorites.name, "Favoriten ♥");
    assert_eq!(favorites.items.len(), 2);

    assert_eq!(parsed.smart_playlists.len(), 1);
    let smart = &parsed.smart_playlists[0];
    assert_eq!(smart.smart_data.as_deref(), Some(&[0xDE, 0xAD, 0xBE, 0xEF][..]));
    assert_eq!(smart.smart_rules.as_deref(), Some(&[0x01, 0x02, 0x03][..]));
}

/// Walks the emitted buffer chunk by chunk and checks that every declared
/// total length equals the computed extent of the chunk's descendants.
#[test]
fn length_closure_holds_for_every_container() {
    let mut db = twelve_track_db();
    let (bytes, _) = emit_database(&mut db).unwrap();

    assert_eq!(
        u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize,
        bytes.len(),
        "mhbd total length must equal the file size"
    );

    let mhbd_header = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let mut offset = mhbd_header;
    while offset < bytes.len() {
        offset = check_chunk(&bytes, offset);
    }
    assert_eq!(offset, bytes.len());
}

/// Returns the chunk's end offset, asserting internal closure on the way.
fn check_chunk(bytes: &[u8], offset: usize) -> usize {
    let tag = &bytes[offset..offset + 4];
    let header = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;

    match tag {
        b"mhlt" | b"mhla" | b"mhlp" => {
            // List headers: extent is the header plus the children counted
            // in the field at +8.
            let count = u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap());
            let mut child = offset + header;
            for _ in 0..count {
                child = check_chunk(bytes, child);
            }
            child
        }
        b"mhsd" => {
            let total =
                u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap()) as usize;
            let child_end = check_chunk(bytes, offset + header);
            assert_eq!(offset + total, child_end, "mhsd total length mismatch");
            offset + total
        }
        b"mhit" | b"mhia" | b"mhyp" => {
            let total =
                u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap()) as usize;
            let mut child = offset + header;
            while child < offset + total {
                child = check_chunk(bytes, child);
            }
            assert_eq!(
                offset + total,
                child,
                "{} total length mismatch",
                String::from_utf8_lossy(tag)
            );
            offset + total
        }
        b"mhip" | b"mhod" => {
            let total =
                u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap()) as usize;
            offset + total
        }
        other => panic!("unexpected tag {:?}", String::from_utf8_lossy(other)),
    }
}

#[test]
fn dbids_are_unique_and_next_id_is_monotone() {
    let mut db = twelve_track_db();
    let (bytes, _) = emit_database(&mut db).unwrap();
    let parsed = parse_database(&bytes).unwrap();

    let dbids: HashSet<u64> = parsed.tracks.iter().map(|t| t.dbid).collect();
    assert_eq!(dbids.len(), parsed.tracks.len());

    let max_track_id = parsed.tracks.iter().map(|t| t.track_id).max().unwrap();
    assert!(parsed.next_id > max_track_id);
}

#[test]
fn playlist_items_resolve_to_tracks() {
    let mut db = twelve_track_db();
    let (bytes, _) = emit_database(&mut db).unwrap();
    let parsed = parse_database(&bytes).unwrap();

    let track_ids: HashSet<u32> = parsed.tracks.iter().map(|t| t.track_id).collect();
    for playlist in parsed
        .playlists
        .iter()
        .chain(parsed.podcasts.iter())
        .chain(parsed.smart_playlists.iter())
    {
        for item in &playlist.items {
            assert!(track_ids.contains(&item.track_id));
        }
    }

    // The master playlist references every track.
    let master = parsed.playlists.iter().find(|p| p.is_master).unwrap();
    assert_eq!(master.items.len(), parsed.tracks.len());
}

/// S1: sign a Classic database, parse it, emit and sign again; the chunk
/// tree and the signature bytes must both be preserved.
#[test]
fn signed_classic_database_round_trips() {
    let keys = device_keys();

    let mut db = twelve_track_db();
    let (mut bytes, _) = emit_database(&mut db).unwrap();
    sign_database(&mut bytes, SigningScheme::Classic, &keys).unwrap();

    let parsed = parse_database(&bytes).unwrap();
    assert_eq!(parsed.tracks.len(), 12);
    for (i, track) in parsed.tracks.iter().enumerate() {
        assert_eq!(track.title, format!("Track {:02}", i + 1));
    }
    assert_eq!(parsed.hashing_scheme, 1);

    let mut again = parsed.clone();
    let (mut second_bytes, _) = emit_database(&mut again).unwrap();
    sign_database(&mut second_bytes, SigningScheme::Classic, &keys).unwrap();

    assert_eq!(bytes, second_bytes, "re-emit plus re-sign must be byte-stable");
}

#[test]
fn signature_depends_on_content() {
    let keys = device_keys();

    let mut db = twelve_track_db();
    let (mut a, _) = emit_database(&mut db).unwrap();

    db.tracks[0].title = "Renamed".to_string();
    let (mut b, _) = emit_database(&mut db).unwrap();

    sign_database(&mut a, SigningScheme::Classic, &keys).unwrap();
    sign_database(&mut b, SigningScheme::Classic, &keys).unwrap();

    let slot = 0x58..0x58 + 20;
    assert_ne!(a[slot.clone()], b[slot]);
}
