//! ArtworkDB chunk writer
//!
//! Same chunk discipline as the iTunesDB: tagged containers with
//! backpatched total lengths. The tree is `mhfd` → image-list `mhsd`/`mhli`
//! with one `mhii` per track, and a file-list `mhsd`/`mhlf` naming each
//! ithmb file. Image name chunks (`mhni`) ride inside container mhods.

use super::THUMB_FORMATS;
use crate::itunesdb::{ByteWriter, HeaderFix};

const MHFD_HEADER_LEN: u32 = 132;
const MHSD_HEADER_LEN: u32 = 96;
const MHLX_HEADER_LEN: u32 = 92;
const MHII_HEADER_LEN: u32 = 152;
const MHNI_HEADER_LEN: u32 = 76;
const MHIF_HEADER_LEN: u32 = 124;
const MHOD_HEADER_LEN: u32 = 24;

// Artwork mhod types (a namespace separate from the iTunesDB's).
const MHOD_TYPE_CONTAINER: u32 = 2;
const MHOD_TYPE_FILENAME: u32 = 3;

/// One image record: a track's artwork and the pixel slot it shares.
#[derive(Debug, Clone, Copy)]
pub struct ImageRecord {
    pub image_id: u32,
    pub dbid: u64,
    /// Index into each ithmb file (shared between tracks with identical
    /// artwork bytes).
    pub slot: u32,
    pub source_size: u32,
}

/// Emit a complete ArtworkDB buffer.
pub fn write_artwork_db(records: &[ImageRecord], unique_images: u32) -> Vec<u8> {
    let mut w = ByteWriter::new();

    let mhfd = HeaderFix::capture(&w);
    let start = mhfd.start();
    w.append(b"mhfd"); // 0x00: tag
    w.write_u32_le(MHFD_HEADER_LEN); // 0x04: header length
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(0); // 0x0C: unknown
    w.write_u32_le(2); // 0x10: format version
    w.write_u32_le(2); // 0x14: dataset count
    w.write_u32_le(64 + records.len() as u32); // 0x18: next image id
    w.pad_to(start + MHFD_HEADER_LEN as usize);

    write_image_dataset(&mut w, records);
    write_file_dataset(&mut w, unique_images);

    mhfd.close(&mut w);
    w.into_inner()
}

fn write_image_dataset(w: &mut ByteWriter, records: &[ImageRecord]) {
    let mhsd = HeaderFix::capture(w);
    let start = mhsd.start();
    w.append(b"mhsd");
    w.write_u32_le(MHSD_HEADER_LEN);
    w.write_u32_le(0); // total length (patched)
    w.write_u32_le(1); // dataset type: image list
    w.pad_to(start + MHSD_HEADER_LEN as usize);

    let mhli_start = w.current_position();
    w.append(b"mhli");
    w.write_u32_le(MHLX_HEADER_LEN);
    w.write_u32_le(records.len() as u32); // child count (no total length)
    w.pad_to(mhli_start + MHLX_HEADER_LEN as usize);

    for record in records {
        write_mhii(w, record);
    }

    mhsd.close(w);
}

fn write_mhii(w: &mut ByteWriter, r: &ImageRecord) {
    let fix = HeaderFix::capture(w);
    let start = fix.start();

    w.append(b"mhii"); // 0x00: tag
    w.write_u32_le(MHII_HEADER_LEN); // 0x04: header length
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(THUMB_FORMATS.len() as u32); // 0x0C: child mhod count
    w.write_u32_le(r.image_id); // 0x10: image id
    w.write_u64_le(r.dbid); // 0x14: owning track dbid
    w.write_u32_le(0); // 0x1C: unknown
    w.write_u32_le(0); // 0x20: rating
    w.write_u32_le(0); // 0x24: unknown
    w.write_u32_le(r.source_size); // 0x28: source image byte size
    w.pad_to(start + MHII_HEADER_LEN as usize);

    for format in THUMB_FORMATS {
        write_thumb_mhod(w, r.slot, format);
    }

    fix.close(w);
}

/// A container mhod wrapping the mhni for one thumbnail format.
fn write_thumb_mhod(w: &mut ByteWriter, slot: u32, format: super::ThumbFormat) {
    let mhod = HeaderFix::capture(w);
    w.append(b"mhod");
    w.write_u32_le(MHOD_HEADER_LEN);
    w.write_u32_le(0); // total length (patched)
    w.write_u32_le(MHOD_TYPE_CONTAINER);
    w.write_u32_le(0);
    w.write_u32_le(0);

    let mhni = HeaderFix::capture(w);
    let start = mhni.start();
    w.append(b"mhni"); // 0x00: tag
    w.write_u32_le(MHNI_HEADER_LEN); // 0x04: header length
    w.write_u32_le(0); // 0x08: total length (patched)
    w.write_u32_le(1); // 0x0C: child mhod count
    w.write_u32_le(format.correlation_id); // 0x10: correlation id
    w.write_u32_le(slot * format.byte_size()); // 0x14: offset into the ithmb
    w.write_u32_le(format.byte_size()); // 0x18: image byte size
    w.write_u16_le(0); // 0x1C: vertical padding
    w.write_u16_le(0); // 0x1E: horizontal padding
    w.write_u16_le(format.height as u16); // 0x20: height
    w.write_u16_le(format.width as u16); // 0x22: width
    w.pad_to(start + MHNI_HEADER_LEN as usize);

    write_filename_mhod(w, format.correlation_id);

    mhni.close(w);
    mhod.close(w);
}

fn write_filename_mhod(w: &mut ByteWriter, correlation_id: u32) {
    let name = format!(":F{}_1.ithmb", correlation_id);
    let payload = name.as_bytes();

    let fix = HeaderFix::capture(w);
    w.append(b"mhod");
    w.write_u32_le(MHOD_HEADER_LEN);
    w.write_u32_le(0); // total length (patched)
    w.write_u32_le(MHOD_TYPE_FILENAME);
    w.write_u32_le(0);
    w.write_u32_le(0);
    w.write_u32_le(payload.len() as u32);
    w.write_u32_le(0);
    w.append(payload);
    fix.close(w);
}

fn write_file_dataset(w: &mut ByteWriter, unique_images: u32) {
    let mhsd = HeaderFix::capture(w);
    let start = mhsd.start();
    w.append(b"mhsd");
    w.write_u32_le(MHSD_HEADER_LEN);
    w.write_u32_le(0); // total length (patched)
    w.write_u32_le(3); // dataset type: file list
    w.pad_to(start + MHSD_HEADER_LEN as usize);

    let mhlf_start = w.current_position();
    w.append(b"mhlf");
    w.write_u32_le(MHLX_HEADER_LEN);
    w.write_u32_le(THUMB_FORMATS.len() as u32); // child count
    w.pad_to(mhlf_start + MHLX_HEADER_LEN as usize);

    for format in THUMB_FORMATS {
        let start = w.current_position();
        w.append(b"mhif"); // 0x00: tag
        w.write_u32_le(MHIF_HEADER_LEN); // 0x04: header length
        w.write_u32_le(MHIF_HEADER_LEN); // 0x08: total length (no children)
        w.write_u32_le(0); // 0x0C: unknown
        w.write_u32_le(format.correlation_id); // 0x10: correlation id
        w.write_u32_le(format.byte_size()); // 0x14: image byte size
        w.write_u32_le(unique_images); // 0x18: images stored in the file
        w.pad_to(start + MHIF_HEADER_LEN as usize);
    }

    mhsd.close(w);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artwork_db_total_length_closes() {
        let records = [
            ImageRecord {
                image_id: 64,
                dbid: 10,
                slot: 0,
                source_size: 1234,
            },
            ImageRecord {
                image_id: 65,
                dbid: 11,
                slot: 0,
                source_size: 1234,
            },
        ];
        let bytes = write_artwork_db(&records, 1);
        let total = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(total as usize, bytes.len());
        assert_eq!(&bytes[..4], b"mhfd");
    }

    #[test]
    fn test_shared_slot_shares_ithmb_offsets() {
        let records = [
            ImageRecord {
                image_id: 64,
                dbid: 1,
                slot: 1,
                source_size: 9,
            },
        ];
        let bytes = write_artwork_db(&records, 2);
        // The first mhni offset field must be slot * byte_size of the
        // 140x140 format.
        let needle = (39200u32).to_le_bytes();
        let pos = bytes
            .windows(4)
            .position(|win| win == needle)
            .expect("offset present");
        assert!(pos > 0);
    }
}
