//! Acoustic fingerprinting
//!
//! Track identity survives re-tagging, renaming, and re-encoding because it
//! hangs off the audio content, not the file. The fingerprint program is an
//! opaque child process; this module only consumes its stdout.

use anyhow::{anyhow, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Hard timeout per file.
pub const FINGERPRINT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fingerprint capability, swappable for tests.
pub trait FingerprintSource {
    /// Verify the tool exists before any work starts.
    fn preflight(&self) -> Result<()>;

    /// Compute the fingerprint of one audio file.
    fn fingerprint(&self, path: &Path) -> Result<String>;
}

/// Production source: invokes `fpcalc -raw <path>` synchronously, draining
/// stdout and stderr before the next file.
pub struct FpcalcSource {
    program: String,
    timeout: Duration,
}

impl FpcalcSource {
    pub fn new() -> Self {
        Self {
            program: "fpcalc".to_string(),
            timeout: FINGERPRINT_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for FpcalcSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintSource for FpcalcSource {
    fn preflight(&self) -> Result<()> {
        match Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow!("{}: {}", self.program, e)),
        }
    }

    fn fingerprint(&self, path: &Path) -> Result<String> {
        log::debug!("fingerprinting {:?}", path);
        let mut child = Command::new(&self.program)
            .arg("-raw")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to spawn {}: {}", self.program, e))?;

        let status = wait_with_timeout(&mut child, self.timeout)?;

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)?;
        }
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr)?;
        }

        if !status.success() {
            return Err(anyhow!(
                "fpcalc failed for {:?}: {}",
                path,
                stderr.trim()
            ));
        }

        stdout
            .lines()
            .find_map(|line| line.strip_prefix("FINGERPRINT="))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no FINGERPRINT line in fpcalc output for {:?}", path))
    }
}

/// Poll the child until it exits or the deadline passes; a timed-out child
/// is killed so its output pipes close.
pub(crate) fn wait_with_timeout(
    child: &mut std::process::Child,
    timeout: Duration,
) -> Result<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("child process timed out after {:?}", timeout));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Test source: fingerprint is the MD5 of the file contents, so identity
/// follows the bytes the way a real fingerprint follows the audio.
pub struct ContentHashSource;

impl FingerprintSource for ContentHashSource {
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    fn fingerprint(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(format!("{:x}", md5::compute(&bytes)))
    }
}

pub(crate) use wait_with_timeout as wait_child_with_timeout;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_source_tracks_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let src = ContentHashSource;
        assert_eq!(
            src.fingerprint(&a).unwrap(),
            src.fingerprint(&b).unwrap()
        );

        std::fs::write(&b, b"different").unwrap();
        assert_ne!(
            src.fingerprint(&a).unwrap(),
            src.fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_missing_tool_fails_preflight() {
        let src = FpcalcSource::new().with_program("definitely-not-a-real-binary");
        assert!(src.preflight().is_err());
    }
}
