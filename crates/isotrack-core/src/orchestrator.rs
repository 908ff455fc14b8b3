//! Download orchestrator - drives one release from "unknown" to "verified"
//!
//! A run walks the phases in order and stops at the first terminal
//! condition:
//! - Idle: load state, decide staleness, check engine health
//! - Registering: fetch the descriptor and hand it to the engine
//! - Settling: bounded wait while the engine finds peers
//! - Polling: one status query per interval until complete or stalled
//! - Verifying: digest the file, record it as known-good on a match
//!
//! Expected terminal conditions come back as [`Outcome`]; only faults that
//! make the run meaningless (malformed engine data, invalid descriptor)
//! surface as [`IsotrackError`].

use crate::engine::TransferControl;
use crate::error::IsotrackError;
use crate::fetch::MetainfoFetcher;
use crate::staleness::{self, Staleness};
use crate::storage::StateStore;
use crate::verify::Verifier;
use isotrack_types::{
    FailureKind, HealthStatus, Outcome, OrchestratorEvent, Phase, PersistedState,
    ReleaseDescriptor, Settings, SkipReason, TransferStatus,
};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Timing and stall policy of the polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    /// Wait between registration and the first poll
    pub settle_delay: Duration,
    /// Consecutive unbounded-ETA polls that end the run as stalled
    pub stall_threshold: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(5),
            stall_threshold: 1,
        }
    }
}

impl From<&Settings> for OrchestratorSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            settle_delay: settings.settle_delay,
            stall_threshold: settings.stall_threshold,
        }
    }
}

/// One orchestration run's collaborators
pub struct Orchestrator<'a> {
    engine: &'a dyn TransferControl,
    store: &'a dyn StateStore,
    fetcher: &'a dyn MetainfoFetcher,
    verifier: Verifier,
    settings: OrchestratorSettings,
    /// Directory the engine writes the artifact into
    download_dir: PathBuf,
    event_tx: Option<broadcast::Sender<OrchestratorEvent>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        engine: &'a dyn TransferControl,
        store: &'a dyn StateStore,
        fetcher: &'a dyn MetainfoFetcher,
        verifier: Verifier,
        settings: OrchestratorSettings,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            store,
            fetcher,
            verifier,
            settings,
            download_dir,
            event_tx: None,
        }
    }

    /// Publish progress on `event_tx` while running
    pub fn with_events(mut self, event_tx: broadcast::Sender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Run the state machine for `descriptor` to a terminal outcome
    pub async fn evaluate(&self, descriptor: &ReleaseDescriptor) -> Result<Outcome, IsotrackError> {
        descriptor.validate()?;

        let outcome = self.run(descriptor).await?;
        match &outcome {
            Outcome::Skipped { reason } => info!(file = %descriptor.file_name, %reason, "nothing to do"),
            Outcome::Completed { .. } => info!(file = %descriptor.file_name, "release verified and recorded"),
            Outcome::Failed { kind, detail } => {
                error!(file = %descriptor.file_name, %kind, %detail, "run failed")
            }
        }

        self.emit(OrchestratorEvent::Finished {
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    async fn run(&self, descriptor: &ReleaseDescriptor) -> Result<Outcome, IsotrackError> {
        self.enter(Phase::Idle);
        let target = descriptor.target_path(&self.download_dir);

        let last = match self.store.load().await {
            Ok(last) => last,
            Err(e) => return Ok(Outcome::failed(FailureKind::Io, format!("reading state: {e}"))),
        };

        let staleness = match self.assess(descriptor, last, target.clone()).await {
            Ok(staleness) => staleness,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                return Ok(Outcome::failed(
                    FailureKind::Io,
                    format!("checking {}: {e}", target.display()),
                ))
            }
        };
        if !staleness.needs_download() {
            return Ok(Outcome::Skipped {
                reason: SkipReason::UpToDate,
            });
        }
        info!(file = %descriptor.file_name, reason = %staleness, "download needed");

        if let ControlFlow::Break(outcome) = self.ensure_reachable("before registration").await {
            return Ok(outcome);
        }

        let known = match self.engine.status(&descriptor.swarm_id).await {
            Ok(status) => status.is_some(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                if let ControlFlow::Break(outcome) = self.ensure_reachable("looking up swarm").await {
                    return Ok(outcome);
                }
                warn!(error = %e, "status lookup failed on a reachable engine; registering");
                false
            }
        };

        if known {
            info!(swarm = %descriptor.swarm_id, "transfer already known to engine, resuming");
        } else if let ControlFlow::Break(outcome) = self.register(descriptor).await? {
            return Ok(outcome);
        }

        self.enter(Phase::Settling);
        tokio::time::sleep(self.settings.settle_delay).await;

        if let ControlFlow::Break(outcome) = self.poll_until_complete(descriptor).await? {
            return Ok(outcome);
        }

        self.verify_and_record(descriptor, target).await
    }

    /// Staleness rules, run off the async executor because they may hash the file
    async fn assess(
        &self,
        descriptor: &ReleaseDescriptor,
        last: Option<ReleaseDescriptor>,
        target: PathBuf,
    ) -> Result<Staleness, IsotrackError> {
        let current = descriptor.clone();
        let verifier = self.verifier;
        tokio::task::spawn_blocking(move || {
            let exists = target.is_file();
            staleness::assess(&current, last.as_ref(), exists, || {
                verifier.verify(&target, current.digest_algorithm, &current.expected_digest)
            })
        })
        .await?
    }

    async fn register(
        &self,
        descriptor: &ReleaseDescriptor,
    ) -> Result<ControlFlow<Outcome>, IsotrackError> {
        self.enter(Phase::Registering);

        let bytes = match self.fetcher.fetch(&descriptor.source_uri).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                return Ok(ControlFlow::Break(Outcome::failed(
                    FailureKind::RegistrationError,
                    format!("fetching {}: {e}", descriptor.source_uri),
                )))
            }
        };

        match self.engine.add(bytes, &self.download_dir).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(IsotrackError::Rejected(message)) => {
                // Engines refuse duplicates; only a swarm that is still
                // unknown afterwards is a registration failure.
                match self.engine.status(&descriptor.swarm_id).await {
                    Ok(Some(_)) => {
                        warn!(swarm = %descriptor.swarm_id, "add rejected but swarm is known, continuing")
                    }
                    Ok(None) => {
                        return Ok(ControlFlow::Break(Outcome::failed(
                            FailureKind::RegistrationError,
                            format!("engine rejected transfer: {message}"),
                        )))
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => return Ok(self.registration_failed(&e).await),
                }
            }
            Err(e) => return Ok(self.registration_failed(&e).await),
        }

        info!(swarm = %descriptor.swarm_id, dir = %self.download_dir.display(), "transfer registered");
        self.emit(OrchestratorEvent::Registered {
            swarm_id: descriptor.swarm_id.clone(),
        });
        Ok(ControlFlow::Continue(()))
    }

    async fn registration_failed(&self, error: &IsotrackError) -> ControlFlow<Outcome> {
        self.ensure_reachable("registering transfer").await?;
        ControlFlow::Break(Outcome::failed(
            FailureKind::RegistrationError,
            format!("adding transfer: {error}"),
        ))
    }

    async fn poll_until_complete(
        &self,
        descriptor: &ReleaseDescriptor,
    ) -> Result<ControlFlow<Outcome>, IsotrackError> {
        self.enter(Phase::Polling);
        let threshold = self.settings.stall_threshold.max(1);
        let mut unbounded_polls = 0u32;

        loop {
            let status = match self.engine.status(&descriptor.swarm_id).await {
                Ok(Some(status)) => status,
                Ok(None) => {
                    let outcome = self.swarm_lost("engine no longer knows the swarm").await;
                    return Ok(ControlFlow::Break(outcome));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let outcome = self.swarm_lost(&format!("status query failed: {e}")).await;
                    return Ok(ControlFlow::Break(outcome));
                }
            };
            self.emit(OrchestratorEvent::Progress { status });

            if status.complete {
                info!(swarm = %descriptor.swarm_id, pieces = status.pieces_total, "transfer complete");
                return Ok(ControlFlow::Continue(()));
            }

            if status.eta_unbounded() {
                unbounded_polls += 1;
                warn!(unbounded_polls, threshold, "engine reports no ETA");
                if unbounded_polls >= threshold {
                    return Ok(ControlFlow::Break(Outcome::failed(
                        FailureKind::Stalled,
                        stalled_detail(&status, unbounded_polls),
                    )));
                }
            } else {
                unbounded_polls = 0;
                debug!(
                    have = status.pieces_have,
                    total = status.pieces_total,
                    eta = status.eta_seconds,
                    "transfer in progress"
                );
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// A missing swarm mid-run: engine down, or the registration didn't take
    async fn swarm_lost(&self, detail: &str) -> Outcome {
        match self.ensure_reachable(detail).await {
            ControlFlow::Break(outcome) => outcome,
            ControlFlow::Continue(()) => Outcome::failed(FailureKind::NotRegistered, detail),
        }
    }

    async fn verify_and_record(
        &self,
        descriptor: &ReleaseDescriptor,
        target: PathBuf,
    ) -> Result<Outcome, IsotrackError> {
        self.enter(Phase::Verifying);

        let verified = self
            .verifier
            .verify_blocking(
                target.clone(),
                descriptor.digest_algorithm,
                descriptor.expected_digest.clone(),
            )
            .await;
        match verified {
            Ok(true) => {}
            Ok(false) => {
                return Ok(Outcome::failed(
                    FailureKind::IntegrityMismatch,
                    format!(
                        "{} does not match {} {}",
                        target.display(),
                        descriptor.digest_algorithm,
                        descriptor.expected_digest
                    ),
                ))
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                return Ok(Outcome::failed(
                    FailureKind::Io,
                    format!("reading {}: {e}", target.display()),
                ))
            }
        }

        let state = PersistedState::new(descriptor.clone()).in_dir(self.download_dir.clone());
        if let Err(e) = self.store.save_state(&state).await {
            return Ok(Outcome::failed(FailureKind::Io, format!("recording state: {e}")));
        }

        Ok(Outcome::Completed {
            descriptor: descriptor.clone(),
        })
    }

    /// `Break` with `ClientUnreachable` unless the engine answers
    async fn ensure_reachable(&self, context: &str) -> ControlFlow<Outcome> {
        match self.engine.health().await {
            HealthStatus::Reachable { version } => {
                debug!(%version, "engine reachable");
                ControlFlow::Continue(())
            }
            HealthStatus::Unreachable { reason } => ControlFlow::Break(Outcome::failed(
                FailureKind::ClientUnreachable,
                format!("{context}: {reason}"),
            )),
        }
    }

    fn enter(&self, phase: Phase) {
        debug!(?phase, "entering phase");
        self.emit(OrchestratorEvent::PhaseChanged { phase });
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

fn stalled_detail(status: &TransferStatus, polls: u32) -> String {
    format!(
        "no ETA for {polls} consecutive poll(s) at {}/{} pieces",
        status.pieces_have, status.pieces_total
    )
}
