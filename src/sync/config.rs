//! Sync configuration

use crate::signer::SigningScheme;
use std::path::PathBuf;

/// Configuration for one sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device mount point.
    pub mount: PathBuf,

    /// PC library root.
    pub library: PathBuf,

    /// Write ratings and play counts back to the PC files.
    pub write_back: bool,

    /// AAC bitrate (kbps) for transcoded lossy sources.
    pub transcode_bitrate: u32,

    /// Content-addressed transcode cache; None disables caching.
    pub cache_dir: Option<PathBuf>,

    /// Signing scheme override for callers that know the device class.
    /// None infers the scheme from the available key material.
    pub signing_scheme: Option<SigningScheme>,

    /// Test hook: bypass the statvfs free-space probe.
    pub free_space_override: Option<u64>,
}

impl SyncConfig {
    pub fn new(mount: PathBuf, library: PathBuf) -> Self {
        Self {
            mount,
            library,
            write_back: false,
            transcode_bitrate: 256,
            cache_dir: None,
            signing_scheme: None,
            free_space_override: None,
        }
    }

    pub fn with_write_back(mut self, enabled: bool) -> Self {
        self.write_back = enabled;
        self
    }

    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.transcode_bitrate = kbps;
        self
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn with_signing_scheme(mut self, scheme: SigningScheme) -> Self {
        self.signing_scheme = Some(scheme);
        self
    }
}
