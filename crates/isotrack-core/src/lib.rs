//! isotrack Core - release tracking engine
//!
//! This crate keeps a local copy of the newest published release current.
//! It discovers releases, drives a BitTorrent engine through its control
//! API, verifies the downloaded file and records the last verified release.

mod discovery;
mod engine;
mod error;
mod fetch;
mod http;
mod orchestrator;
mod persistence;
mod staleness;
mod storage;
mod verify;

pub use discovery::*;
pub use engine::*;
pub use error::*;
pub use fetch::*;
pub use http::{build_client, USER_AGENT};
pub use orchestrator::*;
pub use persistence::*;
pub use staleness::*;
pub use storage::*;
pub use verify::*;

use isotrack_types::{
    FailureKind, OrchestratorEvent, Outcome, PersistedState, ReleaseDescriptor, ReleaseInfo,
    Settings,
};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// The main isotrack instance, wired from [`Settings`]
pub struct Isotrack {
    settings: Settings,
    engine: QbittorrentClient,
    fetcher: HttpFetcher,
    feed: ArchReleaseFeed,
    store: Box<dyn StateStore>,
    verifier: Verifier,
    /// Event broadcaster
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Isotrack {
    /// Build clients and open the state store
    pub async fn new(settings: Settings) -> Result<Self, IsotrackError> {
        let client = build_client(settings.http_timeout)?;

        let credentials = match (&settings.engine_username, &settings.engine_password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("engine username and password must be set together; logging in anonymously");
                None
            }
            (None, None) => None,
        };

        let engine = QbittorrentClient::new(client.clone(), settings.engine_url.clone(), credentials);
        let fetcher = HttpFetcher::new(client.clone());
        let feed = ArchReleaseFeed::new(client, settings.feed_url.clone(), settings.digest_algorithm);
        let store = open_store(&settings).await?;
        let verifier = Verifier::new(VerifierConfig::from(&settings));

        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            settings,
            engine,
            fetcher,
            feed,
            store,
            verifier,
            event_tx,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Subscribe to orchestrator events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Newest release published by the configured feed
    pub async fn latest_release(&self) -> Result<ReleaseInfo, IsotrackError> {
        self.feed.latest().await
    }

    /// The persisted record, if any run has completed
    pub async fn last_verified(&self) -> Result<Option<PersistedState>, IsotrackError> {
        self.store.load_state().await
    }

    /// Directory `descriptor` lives in, or will be downloaded into
    ///
    /// A configured directory wins. Otherwise the directory recorded with the
    /// same release is reused, so checking an up-to-date copy needs no engine
    /// call. Only without either does the engine supply its save path.
    pub async fn download_dir(
        &self,
        descriptor: &ReleaseDescriptor,
    ) -> Result<PathBuf, IsotrackError> {
        if let Some(dir) = &self.settings.download_dir {
            return Ok(dir.clone());
        }

        match self.store.load_state().await {
            Ok(Some(state)) if state.descriptor.same_digest(descriptor) => {
                if let Some(dir) = state.download_dir {
                    debug!(dir = %dir.display(), "reusing recorded download directory");
                    return Ok(dir);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "state unreadable, asking engine for its save path"),
        }

        self.engine.default_save_path().await
    }

    /// Bring the local copy of `descriptor` up to date
    pub async fn sync(&self, descriptor: &ReleaseDescriptor) -> Result<Outcome, IsotrackError> {
        let download_dir = match self.download_dir(descriptor).await {
            Ok(dir) => dir,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let outcome = Outcome::failed(
                    FailureKind::ClientUnreachable,
                    format!("resolving download directory: {e}"),
                );
                let _ = self.event_tx.send(OrchestratorEvent::Finished {
                    outcome: outcome.clone(),
                });
                return Ok(outcome);
            }
        };
        info!(dir = %download_dir.display(), file = %descriptor.file_name, "syncing release");

        Orchestrator::new(
            &self.engine,
            self.store.as_ref(),
            &self.fetcher,
            self.verifier,
            OrchestratorSettings::from(&self.settings),
            download_dir,
        )
        .with_events(self.event_tx.clone())
        .evaluate(descriptor)
        .await
    }
}
