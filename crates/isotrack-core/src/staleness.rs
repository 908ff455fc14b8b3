//! Decide whether the current release has to be (re)acquired

use crate::error::IsotrackError;
use isotrack_types::ReleaseDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which rule decided the staleness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    /// Nothing has ever been verified
    NoRecord,
    /// A newer release replaced the recorded one
    Superseded,
    /// Recorded release is current but its file is gone
    FileMissing,
    /// File exists but does not match the current digest
    FileCorrupt,
    /// Recorded release is current and the file verifies
    Current,
}

impl Staleness {
    pub fn needs_download(self) -> bool {
        !matches!(self, Staleness::Current)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Staleness::NoRecord => "no release recorded yet",
            Staleness::Superseded => "a newer release superseded the recorded one",
            Staleness::FileMissing => "recorded release file is missing",
            Staleness::FileCorrupt => "release file fails verification",
            Staleness::Current => "recorded release is current and verified",
        };
        f.write_str(text)
    }
}

/// Apply the staleness rules in order; the first match wins
///
/// `file_verified` runs only if none of the cheaper rules fired, and its
/// error propagates instead of counting as corruption.
pub fn assess<F>(
    current: &ReleaseDescriptor,
    last: Option<&ReleaseDescriptor>,
    file_exists: bool,
    file_verified: F,
) -> Result<Staleness, IsotrackError>
where
    F: FnOnce() -> Result<bool, IsotrackError>,
{
    let Some(last) = last else {
        return Ok(Staleness::NoRecord);
    };
    if !current.same_digest(last) {
        return Ok(Staleness::Superseded);
    }
    if !file_exists {
        return Ok(Staleness::FileMissing);
    }
    if !file_verified()? {
        return Ok(Staleness::FileCorrupt);
    }
    Ok(Staleness::Current)
}

/// Boolean form of [`assess`]
pub fn needs_download<F>(
    current: &ReleaseDescriptor,
    last: Option<&ReleaseDescriptor>,
    file_exists: bool,
    file_verified: F,
) -> Result<bool, IsotrackError>
where
    F: FnOnce() -> Result<bool, IsotrackError>,
{
    assess(current, last, file_exists, file_verified).map(Staleness::needs_download)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::Verifier;
    use isotrack_types::DigestAlgorithm;
    use std::cell::Cell;
    use std::io::Write;
    use url::Url;

    fn release(digest: &str) -> ReleaseDescriptor {
        ReleaseDescriptor {
            digest_algorithm: DigestAlgorithm::Md5,
            expected_digest: digest.to_string(),
            file_name: "archlinux.iso".to_string(),
            swarm_id: "c0ffee".to_string(),
            source_uri: Url::parse("https://example.org/a.torrent").unwrap(),
        }
    }

    fn never_called() -> Result<bool, IsotrackError> {
        panic!("verification should not run")
    }

    #[test]
    fn test_no_record_needs_download() {
        let current = release("aa");
        assert_eq!(assess(&current, None, true, never_called).unwrap(), Staleness::NoRecord);
    }

    #[test]
    fn test_new_digest_supersedes_even_if_old_file_verifies() {
        let current = release("bb");
        let last = release("aa");
        assert_eq!(
            assess(&current, Some(&last), true, || Ok(true)).unwrap(),
            Staleness::Superseded
        );
    }

    #[test]
    fn test_missing_file_needs_download() {
        let current = release("aa");
        assert_eq!(
            assess(&current, Some(&current.clone()), false, never_called).unwrap(),
            Staleness::FileMissing
        );
    }

    #[test]
    fn test_corrupt_file_needs_download() {
        let current = release("aa");
        assert_eq!(
            assess(&current, Some(&current.clone()), true, || Ok(false)).unwrap(),
            Staleness::FileCorrupt
        );
    }

    #[test]
    fn test_current_and_verified_is_satisfied() {
        let current = release("AA");
        let last = release("aa");
        let calls = Cell::new(0);
        let needed = needs_download(&current, Some(&last), true, || {
            calls.set(calls.get() + 1);
            Ok(true)
        })
        .unwrap();
        assert!(!needed);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_verification_error_propagates() {
        let current = release("aa");
        let result = assess(&current, Some(&current.clone()), true, || {
            Err(IsotrackError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )))
        });
        assert!(matches!(result, Err(IsotrackError::Io(_))));
    }

    #[test]
    fn test_with_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archlinux.iso");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"abc")
            .unwrap();

        let good = release("900150983cd24fb0d6963f7d28e17f72");
        let verifier = Verifier::default();
        let check = |d: &ReleaseDescriptor| {
            assess(d, Some(&good), path.exists(), || {
                verifier.verify(&path, d.digest_algorithm, &d.expected_digest)
            })
            .unwrap()
        };
        assert_eq!(check(&good), Staleness::Current);

        std::fs::write(&path, b"abd").unwrap();
        assert_eq!(check(&good), Staleness::FileCorrupt);
    }
}
