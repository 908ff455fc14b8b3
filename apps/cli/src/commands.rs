//! CLI command implementations

use crate::output::{describe_outcome, print_output, release_table, ReleaseView, StateView};
use crate::progress::TransferProgress;
use crate::OutputFormat;
use anyhow::{Context, Result};
use console::style;
use isotrack_core::{Isotrack, Verifier, VerifierConfig};
use isotrack_types::{FailureKind, Outcome, ReleaseInfo, Settings};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

// ============================================================================
// Release Commands
// ============================================================================

#[derive(Serialize)]
struct SyncReport<'a> {
    release: &'a ReleaseInfo,
    outcome: &'a Outcome,
}

/// Discover the latest release and bring the local copy up to date
pub async fn sync(core: &Isotrack, format: OutputFormat) -> Result<u8> {
    let info = core
        .latest_release()
        .await
        .context("discovering the latest release")?;

    let outcome = match format {
        OutputFormat::Json => core.sync(&info.descriptor).await?,
        OutputFormat::Human | OutputFormat::Table => {
            println!("{}", ReleaseView(&info));
            println!();

            let mut events = core.subscribe();
            let progress_task = tokio::spawn(async move {
                let progress = TransferProgress::new();
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            progress.handle_event(&event);
                            if matches!(event, isotrack_types::OrchestratorEvent::Finished { .. }) {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => {
                            progress.clear();
                            break;
                        }
                    }
                }
            });

            let result = core.sync(&info.descriptor).await;
            match &result {
                Ok(_) => {
                    let _ = progress_task.await;
                }
                Err(_) => progress_task.abort(),
            }
            result?
        }
    };

    match format {
        OutputFormat::Json => {
            let report = SyncReport {
                release: &info,
                outcome: &outcome,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Human | OutputFormat::Table => println!("{}", describe_outcome(&outcome)),
    }

    Ok(exit_code(&outcome))
}

/// Show the latest published release and how the local record compares
pub async fn show_info(core: &Isotrack, format: OutputFormat) -> Result<()> {
    let info = core
        .latest_release()
        .await
        .context("discovering the latest release")?;

    match format {
        OutputFormat::Table => println!("{}", release_table(&info)),
        OutputFormat::Json | OutputFormat::Human => print_output(&ReleaseView(&info), format)?,
    }

    if let OutputFormat::Human = format {
        let last = core.last_verified().await?;
        let local = match last {
            Some(state) if state.descriptor.same_digest(&info.descriptor) => {
                style("up to date").green().to_string()
            }
            Some(state) => format!("{} (have {})", style("outdated").yellow(), state.descriptor.file_name),
            None => style("none").dim().to_string(),
        };
        println!("  Local:     {}", local);
    }

    Ok(())
}

/// Show the persisted record
pub async fn show_state(core: &Isotrack, format: OutputFormat) -> Result<()> {
    let state = core.last_verified().await?;
    print_output(&StateView(state.as_ref()), format)
}

// ============================================================================
// Utility Commands
// ============================================================================

#[derive(Serialize)]
struct DigestReport<'a> {
    file: &'a PathBuf,
    algorithm: String,
    digest: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    matches: Option<bool>,
}

/// Hash a local file, optionally comparing against an expected digest
pub async fn digest_file(
    settings: &Settings,
    file: PathBuf,
    expect: Option<&str>,
    format: OutputFormat,
) -> Result<u8> {
    let verifier = Verifier::new(VerifierConfig::from(settings));
    let algorithm = settings.digest_algorithm;

    let path = file.clone();
    let digest = tokio::task::spawn_blocking(move || verifier.digest(&path, algorithm))
        .await?
        .with_context(|| format!("hashing {}", file.display()))?;

    let matches = expect.map(|expected| expected.trim().eq_ignore_ascii_case(&digest));

    match format {
        OutputFormat::Json => {
            let report = DigestReport {
                file: &file,
                algorithm: algorithm.to_string(),
                digest: &digest,
                matches,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!("{}  {}", digest, file.display());
            match matches {
                Some(true) => println!("{} {} digest matches", style("✓").green().bold(), algorithm),
                Some(false) => println!("{} {} digest differs", style("✗").red().bold(), algorithm),
                None => {}
            }
        }
    }

    Ok(match matches {
        Some(false) => exit_code_of(FailureKind::IntegrityMismatch),
        _ => 0,
    })
}

fn exit_code(outcome: &Outcome) -> u8 {
    outcome.failure_kind().map(exit_code_of).unwrap_or(0)
}

fn exit_code_of(kind: FailureKind) -> u8 {
    u8::try_from(kind.exit_code()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isotrack_types::SkipReason;

    #[test]
    fn test_exit_codes_follow_outcome() {
        let skipped = Outcome::Skipped {
            reason: SkipReason::UpToDate,
        };
        assert_eq!(exit_code(&skipped), 0);

        let stalled = Outcome::failed(FailureKind::Stalled, "no peers");
        assert_eq!(exit_code(&stalled), 13);
    }

    #[tokio::test]
    async fn test_digest_file_reports_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("release.iso");
        std::fs::write(&file, b"abc").unwrap();
        let settings = Settings::default();

        let ok = digest_file(
            &settings,
            file.clone(),
            Some("A9993E364706816ABA3E25717850C26C9CD0D89D"),
            OutputFormat::Json,
        )
        .await
        .unwrap();
        assert_eq!(ok, 0);

        let bad = digest_file(&settings, file, Some("deadbeef"), OutputFormat::Json)
            .await
            .unwrap();
        assert_eq!(bad, 14);
    }
}
