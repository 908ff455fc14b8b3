//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use isotrack_types::{Outcome, PersistedState, ReleaseInfo, ETA_UNBOUNDED};
use serde::Serialize;
use std::fmt;
use tabled::{Table, Tabled};

/// Print output in the specified format
pub fn print_output<T: Serialize + fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Format an ETA as human-readable
pub fn format_eta(seconds: u64) -> String {
    if seconds >= ETA_UNBOUNDED {
        return "∞".to_string();
    }
    if seconds == 0 {
        return "-".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// One line describing how a run ended
pub fn describe_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Skipped { reason } => format!("{} Skipped: {}", style("○").dim(), reason),
        Outcome::Completed { descriptor } => format!(
            "{} Downloaded and verified {}",
            style("✓").green().bold(),
            style(&descriptor.file_name).cyan()
        ),
        Outcome::Failed { kind, detail } => format!(
            "{} {}: {}",
            style("✗").red().bold(),
            style(kind).red(),
            detail
        ),
    }
}

/// Release details for `info` and `sync`
#[derive(Serialize)]
#[serde(transparent)]
pub struct ReleaseView<'a>(pub &'a ReleaseInfo);

impl fmt::Display for ReleaseView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0;
        let d = &info.descriptor;
        writeln!(f, "{} {}", style("Arch Linux").bold(), style(&info.version).cyan())?;
        writeln!(f, "  Released:  {}", info.release_date)?;
        writeln!(f, "  Kernel:    {}", info.kernel_version)?;
        writeln!(f, "  File:      {}", d.file_name)?;
        writeln!(f, "  {:<10} {}", format!("{}:", d.digest_algorithm), d.expected_digest)?;
        writeln!(f, "  Info hash: {}", d.swarm_id)?;
        write!(f, "  Torrent:   {}", d.source_uri)
    }
}

/// Persisted record for `state`
#[derive(Serialize)]
#[serde(transparent)]
pub struct StateView<'a>(pub Option<&'a PersistedState>);

impl fmt::Display for StateView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(state) = self.0 else {
            return write!(f, "{}", style("No release verified yet").dim());
        };
        let d = &state.descriptor;
        writeln!(f, "{} {}", style("✓").green().bold(), style(&d.file_name).cyan())?;
        writeln!(f, "  Verified:  {}", state.verified_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        if let Some(path) = state.target_path() {
            writeln!(f, "  Path:      {}", path.display())?;
        }
        writeln!(f, "  {:<10} {}", format!("{}:", d.digest_algorithm), d.expected_digest)?;
        write!(f, "  Info hash: {}", d.swarm_id)
    }
}

#[derive(Tabled)]
struct FieldRow {
    field: &'static str,
    value: String,
}

/// Two-column table of a release
pub fn release_table(info: &ReleaseInfo) -> String {
    let d = &info.descriptor;
    let rows = vec![
        FieldRow { field: "version", value: info.version.clone() },
        FieldRow { field: "released", value: info.release_date.to_string() },
        FieldRow { field: "kernel", value: info.kernel_version.clone() },
        FieldRow { field: "file", value: d.file_name.clone() },
        FieldRow { field: "digest", value: format!("{} {}", d.digest_algorithm, d.expected_digest) },
        FieldRow { field: "info hash", value: d.swarm_id.clone() },
        FieldRow { field: "torrent", value: d.source_uri.to_string() },
    ];
    Table::new(rows).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(0), "-");
        assert_eq!(format_eta(42), "42s");
        assert_eq!(format_eta(125), "2m 5s");
        assert_eq!(format_eta(3725), "1h 2m 5s");
        assert_eq!(format_eta(ETA_UNBOUNDED), "∞");
    }

    #[test]
    fn test_empty_state_serializes_as_null() {
        let json = serde_json::to_string(&StateView(None)).unwrap();
        assert_eq!(json, "null");
    }
}
