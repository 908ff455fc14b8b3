//! Shared types for isotrack
//!
//! This crate contains the data structures exchanged between the
//! discovery layer, the orchestration core and the CLI.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Release Types
// ============================================================================

/// Digest algorithm used to verify a release artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Length of the hex encoding of a digest produced by this algorithm
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha1 => 40,
            DigestAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        };
        f.write_str(name)
    }
}

/// Identity and integrity metadata for one published release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub digest_algorithm: DigestAlgorithm,
    /// Hex digest; the only field that decides whether two releases differ
    pub expected_digest: String,
    /// Artifact file name, relative to the download root
    pub file_name: String,
    /// Info-hash the transfer engine knows the swarm by
    pub swarm_id: String,
    /// Where the `.torrent` file can be fetched from
    pub source_uri: Url,
}

/// Reasons a release descriptor is rejected before any work starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("expected digest is empty")]
    EmptyDigest,

    #[error("expected digest is not hex: {0}")]
    NonHexDigest(String),

    #[error("swarm identifier is empty")]
    EmptySwarmId,

    #[error("file name is empty")]
    EmptyFileName,

    #[error("file name escapes the download root: {0}")]
    UnsafeFileName(String),
}

impl ReleaseDescriptor {
    /// Check the descriptor invariants
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.expected_digest.trim().is_empty() {
            return Err(DescriptorError::EmptyDigest);
        }
        if !self.expected_digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DescriptorError::NonHexDigest(self.expected_digest.clone()));
        }
        if self.swarm_id.trim().is_empty() {
            return Err(DescriptorError::EmptySwarmId);
        }
        if self.file_name.is_empty() {
            return Err(DescriptorError::EmptyFileName);
        }

        // Exactly one normal component: no separators, no `..`, no root.
        let mut components = Path::new(&self.file_name).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal || self.file_name.contains(|c: char| c == '/' || c == '\\') {
            return Err(DescriptorError::UnsafeFileName(self.file_name.clone()));
        }

        Ok(())
    }

    /// Whether `other` carries the same digest (case-insensitive)
    pub fn same_digest(&self, other: &ReleaseDescriptor) -> bool {
        self.expected_digest
            .eq_ignore_ascii_case(&other.expected_digest)
    }

    /// Full path of the artifact under `root`
    pub fn target_path(&self, root: &Path) -> PathBuf {
        root.join(&self.file_name)
    }
}

/// A release as presented by a discovery source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub release_date: NaiveDate,
    pub kernel_version: String,
    pub available: bool,
    pub descriptor: ReleaseDescriptor,
}

/// The last release that was verified on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub descriptor: ReleaseDescriptor,
    pub verified_at: DateTime<Utc>,
    /// Directory the release was verified in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl PersistedState {
    pub fn new(descriptor: ReleaseDescriptor) -> Self {
        Self {
            descriptor,
            verified_at: Utc::now(),
            download_dir: None,
        }
    }

    pub fn in_dir(mut self, download_dir: PathBuf) -> Self {
        self.download_dir = Some(download_dir);
        self
    }

    /// Recorded path of the artifact, if the directory is known
    pub fn target_path(&self) -> Option<PathBuf> {
        self.download_dir
            .as_deref()
            .map(|dir| self.descriptor.target_path(dir))
    }
}

// ============================================================================
// Transfer Types
// ============================================================================

/// ETA value the engine reports when it cannot estimate completion
pub const ETA_UNBOUNDED: u64 = 8_640_000;

/// Snapshot of one transfer at a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub complete: bool,
    pub pieces_have: u64,
    pub pieces_total: u64,
    pub eta_seconds: u64,
}

impl TransferStatus {
    /// Build a snapshot, clamping piece counts so that `have <= total`
    pub fn new(complete: bool, pieces_have: u64, pieces_total: u64, eta_seconds: u64) -> Self {
        Self {
            complete,
            pieces_have: pieces_have.min(pieces_total),
            pieces_total,
            eta_seconds,
        }
    }

    pub fn eta_unbounded(&self) -> bool {
        self.eta_seconds >= ETA_UNBOUNDED
    }

    /// Fraction of pieces present, 0.0..=1.0
    pub fn progress(&self) -> f64 {
        if self.pieces_total == 0 {
            0.0
        } else {
            self.pieces_have as f64 / self.pieces_total as f64
        }
    }
}

/// Whether the transfer engine answers its control API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum HealthStatus {
    Reachable { version: String },
    Unreachable { reason: String },
}

impl HealthStatus {
    pub fn is_reachable(&self) -> bool {
        matches!(self, HealthStatus::Reachable { .. })
    }
}

// ============================================================================
// Outcome Types
// ============================================================================

/// Why a run ended without touching the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Stored release matches and the file on disk verifies
    UpToDate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpToDate => f.write_str("already up to date"),
        }
    }
}

/// Classified terminal failures of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Engine offline or network broken; retry after backoff
    ClientUnreachable,
    /// Engine up but the swarm is missing after registration
    NotRegistered,
    /// Descriptor could not be fetched or submitted
    RegistrationError,
    /// Engine reports no forward progress
    Stalled,
    /// Downloaded bytes do not match the published digest
    IntegrityMismatch,
    /// Local filesystem failure on state or artifact
    Io,
}

impl FailureKind {
    /// Process exit code reported for this failure
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::ClientUnreachable => 10,
            FailureKind::NotRegistered => 11,
            FailureKind::RegistrationError => 12,
            FailureKind::Stalled => 13,
            FailureKind::IntegrityMismatch => 14,
            FailureKind::Io => 15,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::ClientUnreachable => "transfer engine unreachable",
            FailureKind::NotRegistered => "transfer not registered with engine",
            FailureKind::RegistrationError => "could not register transfer",
            FailureKind::Stalled => "transfer stalled",
            FailureKind::IntegrityMismatch => "digest mismatch",
            FailureKind::Io => "local i/o failure",
        };
        f.write_str(text)
    }
}

/// Terminal result of one orchestration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Skipped { reason: SkipReason },
    Completed { descriptor: ReleaseDescriptor },
    Failed { kind: FailureKind, detail: String },
}

impl Outcome {
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        Outcome::Failed {
            kind,
            detail: detail.into(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.failure_kind().map_or(0, FailureKind::exit_code)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// State machine phases, in the order a full run visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Registering,
    Settling,
    Polling,
    Verifying,
}

/// Events emitted by the orchestrator while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum OrchestratorEvent {
    PhaseChanged { phase: Phase },
    Registered { swarm_id: String },
    Progress { status: TransferStatus },
    Finished { outcome: Outcome },
}

// ============================================================================
// Settings Types
// ============================================================================

/// Where the last verified release is recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the transfer engine's control API
    pub engine_url: Url,
    pub engine_username: Option<String>,
    pub engine_password: Option<String>,
    /// Release feed consulted by discovery
    pub feed_url: Url,
    pub digest_algorithm: DigestAlgorithm,
    /// Download root; the engine's default save path when unset
    pub download_dir: Option<PathBuf>,
    pub state_backend: StateBackend,
    pub state_path: PathBuf,
    /// Release family the state is keyed by
    pub release_key: String,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    #[serde(with = "duration_secs")]
    pub settle_delay: Duration,
    /// Consecutive unbounded-ETA polls that count as a stall
    pub stall_threshold: u32,
    pub hash_chunk_size: usize,
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
}

impl Settings {
    /// Data directory used for state when no path is configured
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("isotrack"))
            .unwrap_or_else(|| PathBuf::from(".isotrack"))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine_url: Url::parse("http://127.0.0.1:8080/").expect("static URL"),
            engine_username: None,
            engine_password: None,
            feed_url: Url::parse("https://archlinux.org/releng/releases/json/")
                .expect("static URL"),
            digest_algorithm: DigestAlgorithm::Sha1,
            download_dir: None,
            state_backend: StateBackend::Json,
            state_path: Self::default_data_dir().join("state.json"),
            release_key: "archlinux".to_string(),
            poll_interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(5),
            stall_threshold: 1,
            hash_chunk_size: 64 * 1024,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Durations as whole seconds in serialized settings
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
