//! Transfer engine control
//!
//! The orchestrator never speaks the transfer protocol itself. It drives an
//! external engine through the narrow interface below:
//! - health check, trusted before any "not found" answer
//! - status lookup by swarm identifier
//! - registration of a new transfer from descriptor bytes

mod qbittorrent;

pub use qbittorrent::*;

use crate::error::IsotrackError;
use async_trait::async_trait;
use isotrack_types::{HealthStatus, TransferStatus};
use std::path::{Path, PathBuf};

/// Control interface of a transfer engine
#[async_trait]
pub trait TransferControl: Send + Sync {
    /// Whether the engine answers at all; never fails
    async fn health(&self) -> HealthStatus;

    /// Status of the swarm, `Ok(None)` if the engine does not know it
    async fn status(&self, swarm_id: &str) -> Result<Option<TransferStatus>, IsotrackError>;

    /// Register a transfer from `.torrent` bytes, saving into `target_dir`
    ///
    /// An engine that already knows the swarm may answer with
    /// [`IsotrackError::Rejected`]; callers re-check status before treating
    /// that as a failure.
    async fn add(&self, descriptor: Vec<u8>, target_dir: &Path) -> Result<(), IsotrackError>;

    /// Directory the engine saves into when none is given
    async fn default_save_path(&self) -> Result<PathBuf, IsotrackError>;
}
