//! File transfer onto the device
//!
//! Extension-routed: native containers are copied as-is, lossless sources
//! are transcoded to ALAC, foreign lossy sources to AAC at the configured
//! bitrate. Transcoder output is cached per fingerprint so the same
//! recording under a different filename reuses one cached result.
//!
//! Destinations round-robin over `Music/F00..F49` with a random
//! four-character stem, the way the firmware expects files to be scattered.

use crate::device::DeviceLayout;
use crate::fingerprint::wait_child_with_timeout;
use crate::itunesdb::filetype_word;
use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Hard timeout per transcoded file.
pub const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(600);

/// What happens to a source file on its way to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    /// Container the firmware plays natively; byte-for-byte copy.
    Copy,
    /// Lossless source, transcode to an ALAC container.
    Alac,
    /// Foreign lossy source, transcode to AAC.
    Aac,
}

impl TargetFormat {
    /// Route a source file by extension.
    pub fn route(extension: &str) -> Self {
        match extension.to_lowercase().as_str() {
            "flac" | "wav" | "aif" | "aiff" => TargetFormat::Alac,
            "ogg" | "opus" | "wma" => TargetFormat::Aac,
            _ => TargetFormat::Copy,
        }
    }

    /// Extension of the device-side file.
    pub fn target_extension<'a>(&self, source_extension: &'a str) -> &'a str {
        match self {
            TargetFormat::Copy => source_extension,
            TargetFormat::Alac | TargetFormat::Aac => "m4a",
        }
    }

    /// Cache key component; AAC results depend on the bitrate.
    fn cache_name(&self, bitrate: u32) -> String {
        match self {
            TargetFormat::Copy => "copy".to_string(),
            TargetFormat::Alac => "alac.m4a".to_string(),
            TargetFormat::Aac => format!("aac-{}.m4a", bitrate),
        }
    }

    /// Human-readable format tag stored in the mapping.
    pub fn format_info(&self, source_extension: &str, bitrate: u32) -> String {
        match self {
            TargetFormat::Copy => source_extension.to_lowercase(),
            TargetFormat::Alac => "alac".to_string(),
            TargetFormat::Aac => format!("aac-{}", bitrate),
        }
    }
}

/// Audio transcoder capability; the production implementation shells out.
pub trait Transcoder {
    fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        format: TargetFormat,
        bitrate_kbps: u32,
    ) -> Result<()>;
}

/// Invokes ffmpeg with container-appropriate flags.
pub struct FfmpegTranscoder {
    program: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            timeout: TRANSCODE_TIMEOUT,
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        format: TargetFormat,
        bitrate_kbps: u32,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i").arg(source).arg("-vn");
        match format {
            TargetFormat::Alac => {
                cmd.args(["-c:a", "alac"]);
            }
            TargetFormat::Aac => {
                cmd.args(["-c:a", "aac", "-b:a"])
                    .arg(format!("{}k", bitrate_kbps));
            }
            TargetFormat::Copy => return Err(anyhow!("copy routed into the transcoder")),
        }
        cmd.arg("-y")
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        log::debug!("transcoding {:?} -> {:?} ({:?})", source, dest, format);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;
        let status = wait_child_with_timeout(&mut child, self.timeout)?;
        if !status.success() {
            return Err(anyhow!("{} exited with {}", self.program, status));
        }
        Ok(())
    }
}

/// Test transcoder: copies bytes and pretends.
pub struct CopyTranscoder;

impl Transcoder for CopyTranscoder {
    fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        _format: TargetFormat,
        _bitrate_kbps: u32,
    ) -> Result<()> {
        fs::copy(source, dest)?;
        Ok(())
    }
}

/// A file landed on the device.
#[derive(Debug, Clone)]
pub struct TransferredFile {
    /// Colon-separated device location for the track record.
    pub location: String,
    pub dest_path: PathBuf,
    pub size: u64,
    pub filetype: [u8; 4],
    pub format_info: String,
}

/// Copies or transcodes PC files into the music shards.
pub struct TransferEngine<'a> {
    layout: &'a DeviceLayout,
    transcoder: &'a dyn Transcoder,
    cache_dir: Option<PathBuf>,
    bitrate: u32,
    next_shard: Cell<usize>,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        layout: &'a DeviceLayout,
        transcoder: &'a dyn Transcoder,
        cache_dir: Option<PathBuf>,
        bitrate: u32,
    ) -> Self {
        Self {
            layout,
            transcoder,
            cache_dir,
            bitrate,
            next_shard: Cell::new(0),
        }
    }

    /// Move one source file onto the device.
    pub fn transfer(&self, source: &Path, fingerprint: &str) -> Result<TransferredFile> {
        let source_ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let format = TargetFormat::route(&source_ext);
        let dest_ext = format.target_extension(&source_ext);
        let dest = self.pick_destination(dest_ext)?;

        match format {
            TargetFormat::Copy => {
                fs::copy(source, &dest)
                    .with_context(|| format!("Failed to copy {:?} to {:?}", source, dest))?;
            }
            TargetFormat::Alac | TargetFormat::Aac => {
                self.transcode_cached(source, &dest, format, fingerprint)?;
            }
        }

        let size = fs::metadata(&dest)?.len();
        let location = self
            .layout
            .path_to_location(&dest)
            .context("destination escaped the mount")?;

        Ok(TransferredFile {
            location,
            dest_path: dest,
            size,
            filetype: filetype_word(dest_ext),
            format_info: format.format_info(&source_ext, self.bitrate),
        })
    }

    /// Drop cached transcodes for a fingerprint (stage 2 re-sync).
    pub fn invalidate_cache(&self, fingerprint: &str) {
        if let Some(dir) = self.cache_slot(fingerprint) {
            if dir.exists() {
                log::debug!("invalidating transcode cache {:?}", dir);
                let _ = fs::remove_dir_all(&dir);
            }
        }
    }

    fn cache_slot(&self, fingerprint: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{:x}", md5::compute(fingerprint.as_bytes()))))
    }

    fn transcode_cached(
        &self,
        source: &Path,
        dest: &Path,
        format: TargetFormat,
        fingerprint: &str,
    ) -> Result<()> {
        let Some(slot) = self.cache_slot(fingerprint) else {
            return self
                .transcoder
                .transcode(source, dest, format, self.bitrate);
        };

        let cached = slot.join(format.cache_name(self.bitrate));
        if cached.exists() {
            log::debug!("transcode cache hit for {}", fingerprint);
            fs::copy(&cached, dest)
                .with_context(|| format!("Failed to copy cached transcode {:?}", cached))?;
            return Ok(());
        }

        fs::create_dir_all(&slot)?;
        self.transcoder
            .transcode(source, &cached, format, self.bitrate)?;
        fs::copy(&cached, dest)
            .with_context(|| format!("Failed to copy fresh transcode {:?}", cached))?;
        Ok(())
    }

    /// Next shard directory plus a random stem that is free there.
    fn pick_destination(&self, extension: &str) -> Result<PathBuf> {
        let shard = self.next_shard.get();
        self.next_shard.set(shard + 1);
        let dir = self.layout.music_shard(shard);
        fs::create_dir_all(&dir)?;

        let mut rng = rand::thread_rng();
        loop {
            let stem: String = (0..4)
                .map(|_| {
                    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                    CHARS[rng.gen_range(0..CHARS.len())] as char
                })
                .collect();
            let candidate = dir.join(format!("{}.{}", stem, extension));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
    }
}
