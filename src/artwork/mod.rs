//! Artwork extraction, deduplication, and device export
//!
//! The device wants raw RGB565 pixels in `.ithmb` files plus an ArtworkDB
//! describing them. Pixel conversion is behind the `ImageEncoder`
//! capability; this module owns deduplication, id assignment, and the file
//! writes.

mod db;

pub use db::write_artwork_db;

use crate::device::DeviceLayout;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;

/// The thumbnail formats an iPod Classic/Nano indexes.
///
/// `correlation_id` names the ithmb file (`F1016_1.ithmb`); the byte size is
/// width × height × 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbFormat {
    pub correlation_id: u32,
    pub width: u32,
    pub height: u32,
}

impl ThumbFormat {
    pub const fn byte_size(&self) -> u32 {
        self.width * self.height * 2
    }
}

pub const THUMB_FORMATS: [ThumbFormat; 3] = [
    ThumbFormat {
        correlation_id: 1016,
        width: 140,
        height: 140,
    }, // 39200 bytes
    ThumbFormat {
        correlation_id: 1017,
        width: 56,
        height: 56,
    }, // 6272 bytes
    ThumbFormat {
        correlation_id: 1018,
        width: 100,
        height: 100,
    }, // 20000 bytes
];

/// Artwork pixel conversion capability.
pub trait ImageEncoder {
    /// Decode `image_bytes`, resample to `width` × `height`, and return raw
    /// RGB565 little-endian pixels.
    fn encode_rgb565(&self, image_bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>>;
}

/// Production encoder backed by the image crate.
pub struct Rgb565Encoder;

impl ImageEncoder for Rgb565Encoder {
    fn encode_rgb565(&self, image_bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        use image::imageops::FilterType;

        let img = image::load_from_memory(image_bytes).context("Failed to decode artwork")?;
        let resized = img.resize_exact(width, height, FilterType::Lanczos3);
        let rgb = resized.to_rgb8();

        let mut out = Vec::with_capacity((width * height * 2) as usize);
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            let packed: u16 =
                ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
            out.extend_from_slice(&packed.to_le_bytes());
        }
        Ok(out)
    }
}

/// Test encoder: correct dimensions, zeroed pixels.
pub struct StubEncoder;

impl ImageEncoder for StubEncoder {
    fn encode_rgb565(&self, _image_bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        Ok(vec![0; (width * height * 2) as usize])
    }
}

/// What a track's artwork became on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtworkLink {
    /// mhii image id to store in the track's `mhii_link`.
    pub image_id: u32,
    /// Byte size of the source image.
    pub source_size: u32,
}

/// Rewrites the device's entire artwork state from the given tracks.
pub struct ArtworkWriter<'a> {
    encoder: &'a dyn ImageEncoder,
}

impl<'a> ArtworkWriter<'a> {
    pub fn new(encoder: &'a dyn ImageEncoder) -> Self {
        Self { encoder }
    }

    /// Encode, deduplicate, and write the ithmb files and ArtworkDB.
    ///
    /// `images` pairs each track dbid with its embedded image bytes. Tracks
    /// sharing identical bytes share pixel storage; each track still gets
    /// its own image record. Returns the per-dbid links for the database
    /// writer.
    pub fn write(
        &self,
        layout: &DeviceLayout,
        images: &[(u64, Vec<u8>)],
    ) -> Result<HashMap<u64, ArtworkLink>> {
        // Deduplicate pixel payloads by content hash. The slot index is the
        // image's position within every ithmb file.
        let mut slot_by_hash: HashMap<String, u32> = HashMap::new();
        let mut unique: Vec<&[u8]> = Vec::new();
        let mut track_slots: Vec<(u64, u32, u32)> = Vec::new(); // (dbid, slot, source size)

        for (dbid, bytes) in images {
            let hash = format!("{:x}", md5::compute(bytes));
            let slot = *slot_by_hash.entry(hash).or_insert_with(|| {
                unique.push(bytes.as_slice());
                (unique.len() - 1) as u32
            });
            track_slots.push((*dbid, slot, bytes.len() as u32));
        }

        log::info!(
            "artwork rewrite: {} track(s), {} unique image(s)",
            track_slots.len(),
            unique.len()
        );

        // One ithmb file per format, slots in order.
        for format in THUMB_FORMATS {
            let mut pixels = Vec::with_capacity(unique.len() * format.byte_size() as usize);
            for bytes in &unique {
                let encoded = self
                    .encoder
                    .encode_rgb565(bytes, format.width, format.height)?;
                anyhow::ensure!(
                    encoded.len() == format.byte_size() as usize,
                    "encoder returned {} bytes for a {} byte format",
                    encoded.len(),
                    format.byte_size()
                );
                pixels.extend_from_slice(&encoded);
            }
            let path = layout.ithmb_path(format.correlation_id);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &pixels)
                .with_context(|| format!("Failed to write {:?}", path))?;
        }

        // Image records: ids start at 64 by device convention.
        let mut links = HashMap::new();
        let mut records = Vec::new();
        for (idx, (dbid, slot, source_size)) in track_slots.iter().enumerate() {
            let image_id = 64 + idx as u32;
            records.push(db::ImageRecord {
                image_id,
                dbid: *dbid,
                slot: *slot,
                source_size: *source_size,
            });
            links.insert(
                *dbid,
                ArtworkLink {
                    image_id,
                    source_size: *source_size,
                },
            );
        }

        let db_bytes = db::write_artwork_db(&records, unique.len() as u32);
        let db_path = layout.artwork_db_path();
        fs::write(&db_path, &db_bytes)
            .with_context(|| format!("Failed to write {:?}", db_path))?;

        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_thumb_format_sizes_match_device() {
        assert_eq!(THUMB_FORMATS[0].byte_size(), 39200);
        assert_eq!(THUMB_FORMATS[1].byte_size(), 6272);
        assert_eq!(THUMB_FORMATS[2].byte_size(), 20000);
    }

    #[test]
    fn test_dedup_shares_pixels_but_not_ids() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DeviceLayout::new(PathBuf::from(dir.path()));
        layout.init().unwrap();

        let writer = ArtworkWriter::new(&StubEncoder);
        let images = vec![
            (1u64, vec![9u8; 100]),
            (2u64, vec![9u8; 100]), // identical bytes
            (3u64, vec![7u8; 50]),
        ];
        let links = writer.write(&layout, &images).unwrap();

        assert_eq!(links.len(), 3);
        assert_ne!(links[&1].image_id, links[&2].image_id);

        // Two unique images worth of pixels per file
        let ithmb = std::fs::read(layout.ithmb_path(1017)).unwrap();
        assert_eq!(ithmb.len(), 2 * 6272);
    }
}
