//! Progress bar driven by orchestrator events

use crate::output::format_eta;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use isotrack_types::{OrchestratorEvent, Outcome, Phase};
use std::time::Duration;

/// Single bar tracking one transfer by pieces
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pieces {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Update the bar from an event
    pub fn handle_event(&self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::PhaseChanged { phase } => {
                let label = match phase {
                    Phase::Idle => "checking local copy",
                    Phase::Registering => "registering with engine",
                    Phase::Settling => "waiting for peers",
                    Phase::Polling => "downloading",
                    Phase::Verifying => "verifying",
                };
                self.bar.set_message(label);
            }

            OrchestratorEvent::Registered { swarm_id } => {
                self.bar.println(format!(
                    "{} Registered {}",
                    style("✓").green().bold(),
                    style(swarm_id).dim()
                ));
            }

            OrchestratorEvent::Progress { status } => {
                self.bar.set_length(status.pieces_total);
                self.bar.set_position(status.pieces_have);
                self.bar.set_message(format!("(eta {})", format_eta(status.eta_seconds)));
            }

            OrchestratorEvent::Finished { outcome } => match outcome {
                Outcome::Completed { .. } => {
                    self.bar
                        .finish_with_message(format!("{} Verified", style("✓").green().bold()));
                }
                Outcome::Skipped { .. } => self.bar.finish_and_clear(),
                Outcome::Failed { kind, .. } => {
                    self.bar
                        .abandon_with_message(format!("{} {}", style("✗").red().bold(), kind));
                }
            },
        }
    }

    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}
