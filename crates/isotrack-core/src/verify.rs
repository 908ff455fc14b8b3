//! Integrity verification
//!
//! A single streaming pass over the file with a fixed-size buffer, so memory
//! use does not grow with the size of the image being checked.

use crate::error::IsotrackError;
use isotrack_types::{DigestAlgorithm, Settings};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default read size for digest computation (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Tunables for the verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierConfig {
    pub chunk_size: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&Settings> for VerifierConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.hash_chunk_size,
        }
    }
}

/// Computes and checks file digests
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Hex digest of the file at `path`
    ///
    /// Fails when the file cannot be opened or read.
    pub fn digest(&self, path: &Path, algorithm: DigestAlgorithm) -> Result<String, IsotrackError> {
        let file = File::open(path)?;
        let digest = match algorithm {
            DigestAlgorithm::Md5 => self.stream::<Md5>(file)?,
            DigestAlgorithm::Sha1 => self.stream::<Sha1>(file)?,
            DigestAlgorithm::Sha256 => self.stream::<Sha256>(file)?,
        };
        debug!(path = %path.display(), %algorithm, %digest, "computed digest");
        Ok(digest)
    }

    /// Whether the file at `path` matches `expected` (hex, any case)
    ///
    /// `Ok(false)` only for a clean mismatch; I/O failures are errors.
    pub fn verify(
        &self,
        path: &Path,
        algorithm: DigestAlgorithm,
        expected: &str,
    ) -> Result<bool, IsotrackError> {
        let actual = self.digest(path, algorithm)?;
        Ok(actual.eq_ignore_ascii_case(expected.trim()))
    }

    /// [`Verifier::verify`] on the blocking thread pool
    pub async fn verify_blocking(
        &self,
        path: PathBuf,
        algorithm: DigestAlgorithm,
        expected: String,
    ) -> Result<bool, IsotrackError> {
        let verifier = *self;
        tokio::task::spawn_blocking(move || verifier.verify(&path, algorithm, &expected)).await?
    }

    fn stream<D: Digest>(&self, mut reader: impl Read) -> io::Result<String> {
        let mut hasher = D::new();
        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
