//! Production metadata provider backed by lofty (all containers) and id3
//! (POPM write-back on MP3)

use super::{MetadataProvider, TagData};
use anyhow::{Context, Result};
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::PictureType;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, ItemValue, TagItem};
use id3::TagLike;
use std::path::Path;

pub struct TaggerProvider;

impl TaggerProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TaggerProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

impl MetadataProvider for TaggerProvider {
    fn read_tags(&self, path: &Path) -> Result<TagData> {
        let tagged_file = Probe::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?
            .read()
            .with_context(|| format!("Failed to read tags from: {}", path.display()))?;

        let props = tagged_file.properties();
        let mut data = TagData {
            duration_ms: props.duration().as_millis() as u32,
            bitrate: props.audio_bitrate().unwrap_or(0),
            sample_rate: props.sample_rate().unwrap_or(44_100),
            ..Default::default()
        };

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            data.title = tag.title().map(|c| c.to_string()).unwrap_or_default();
            data.artist = tag.artist().map(|c| c.to_string()).unwrap_or_default();
            data.album = tag.album().map(|c| c.to_string()).unwrap_or_default();
            data.genre = tag.genre().map(|c| c.to_string()).unwrap_or_default();
            data.year = tag.year().unwrap_or(0);
            data.track_number = tag.track().unwrap_or(0);
            data.disc_number = tag.disk().unwrap_or(0);
            data.album_artist = tag
                .get_string(&ItemKey::AlbumArtist)
                .map(str::to_string)
                .unwrap_or_default();
        }

        if is_mp3(path) {
            if let Ok(id3_tag) = id3::Tag::read_from_path(path) {
                if let Some(popm) = id3_tag
                    .frames()
                    .find_map(|f| f.content().popularimeter())
                {
                    // POPM is 0-255, the database wants 0-100 (stars * 20)
                    data.rating = (popm.rating as u32 * 100 / 255) as u8;
                }
            }
        }

        Ok(data)
    }

    fn artwork(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let tagged_file = Probe::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?
            .read()
            .with_context(|| format!("Failed to read tags from: {}", path.display()))?;

        for tag in tagged_file.tags() {
            if let Some(picture) = tag
                .pictures()
                .iter()
                .find(|p| p.pic_type() == PictureType::CoverFront)
                .or_else(|| tag.pictures().first())
            {
                return Ok(Some(picture.data().to_vec()));
            }
        }
        Ok(None)
    }

    fn write_rating(&self, path: &Path, rating: u8) -> Result<()> {
        if is_mp3(path) {
            let mut tag = id3::Tag::read_from_path(path).unwrap_or_else(|_| id3::Tag::new());
            let counter = tag
                .frames()
                .find_map(|f| f.content().popularimeter())
                .map(|p| p.counter)
                .unwrap_or(0);
            tag.add_frame(id3::frame::Popularimeter {
                user: "ipod-sync".to_string(),
                rating: (rating as u32 * 255 / 100) as u8,
                counter,
            });
            tag.write_to_path(path, id3::Version::Id3v24)
                .with_context(|| format!("Failed to write POPM to {}", path.display()))?;
            return Ok(());
        }

        // Freeform atom on M4A, Vorbis comment on FLAC/Ogg; lofty routes the
        // unknown key to whichever the container uses.
        write_text_item(path, "RATING", rating.to_string())
    }

    fn write_play_count_delta(&self, path: &Path, delta: u32) -> Result<()> {
        if is_mp3(path) {
            let mut tag = id3::Tag::read_from_path(path).unwrap_or_else(|_| id3::Tag::new());
            let (rating, counter) = tag
                .frames()
                .find_map(|f| f.content().popularimeter())
                .map(|p| (p.rating, p.counter))
                .unwrap_or((0, 0));
            tag.add_frame(id3::frame::Popularimeter {
                user: "ipod-sync".to_string(),
                rating,
                counter: counter + delta as u64,
            });
            tag.write_to_path(path, id3::Version::Id3v24)
                .with_context(|| format!("Failed to write POPM to {}", path.display()))?;
            return Ok(());
        }

        let current = read_text_item(path, "PLAY_COUNT")?
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        write_text_item(path, "PLAY_COUNT", (current + delta).to_string())
    }
}

fn read_text_item(path: &Path, key: &str) -> Result<Option<String>> {
    let tagged_file = Probe::open(path)?.read()?;
    let item_key = ItemKey::Unknown(key.to_string());
    Ok(tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .and_then(|t| t.get_string(&item_key))
        .map(str::to_string))
}

fn write_text_item(path: &Path, key: &str, value: String) -> Result<()> {
    let mut tagged_file = Probe::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?
        .read()
        .with_context(|| format!("Failed to read tags from: {}", path.display()))?;

    let tag = match tagged_file.primary_tag_mut() {
        Some(tag) => tag,
        None => {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(lofty::tag::Tag::new(tag_type));
            tagged_file
                .primary_tag_mut()
                .context("Failed to create a tag")?
        }
    };

    tag.insert(TagItem::new(
        ItemKey::Unknown(key.to_string()),
        ItemValue::Text(value),
    ));
    tagged_file
        .save_to_path(path, WriteOptions::default())
        .with_context(|| format!("Failed to save tags to {}", path.display()))?;
    Ok(())
}
