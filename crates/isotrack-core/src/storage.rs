//! Storage layer for the last verified release

use crate::error::IsotrackError;
use crate::persistence::SqliteStateStore;
use async_trait::async_trait;
use isotrack_types::{PersistedState, ReleaseDescriptor, Settings, StateBackend};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Durable record of the last release that passed verification
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The recorded state, `None` on first run
    async fn load_state(&self) -> Result<Option<PersistedState>, IsotrackError>;

    /// Replace the record; a crash mid-save must leave the previous one intact
    async fn save_state(&self, state: &PersistedState) -> Result<(), IsotrackError>;

    /// Record `descriptor` as verified now
    async fn save(&self, descriptor: &ReleaseDescriptor) -> Result<(), IsotrackError> {
        self.save_state(&PersistedState::new(descriptor.clone())).await
    }

    /// The recorded descriptor, `None` on first run
    async fn load(&self) -> Result<Option<ReleaseDescriptor>, IsotrackError> {
        Ok(self.load_state().await?.map(|state| state.descriptor))
    }
}

/// Open the store selected in `settings`
pub async fn open_store(settings: &Settings) -> Result<Box<dyn StateStore>, IsotrackError> {
    let store: Box<dyn StateStore> = match settings.state_backend {
        StateBackend::Json => Box::new(JsonStateStore::new(settings.state_path.clone())),
        StateBackend::Sqlite => Box::new(
            SqliteStateStore::new(&settings.state_path, settings.release_key.clone()).await?,
        ),
    };
    Ok(store)
}

/// Single JSON document replaced via write-temp-then-rename
#[derive(Clone, Debug)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load_state(&self) -> Result<Option<PersistedState>, IsotrackError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // An unreadable record is treated like no record: the next
                // verified run rewrites it.
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable state file");
                Ok(None)
            }
        }
    }

    async fn save_state(&self, state: &PersistedState) -> Result<(), IsotrackError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_vec_pretty(state)?;

        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&content).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp, &self.path).await?;

        debug!(path = %self.path.display(), file = %state.descriptor.file_name, "state saved");
        Ok(())
    }
}
