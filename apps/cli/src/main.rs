//! isotrack CLI - keep the latest Arch Linux ISO downloaded and verified
//!
//! Discovers the newest release, hands it to a qBittorrent instance and
//! verifies the result. Exit codes follow the run's outcome.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use isotrack_types::{DigestAlgorithm, Settings, StateBackend};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

/// isotrack - torrent-backed release mirror
#[derive(Parser)]
#[command(name = "isotrack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// qBittorrent WebUI base URL
    #[arg(long, env = "ISOTRACK_ENGINE_URL", global = true)]
    engine_url: Option<Url>,

    /// qBittorrent WebUI user
    #[arg(long, env = "ISOTRACK_ENGINE_USERNAME", global = true)]
    engine_username: Option<String>,

    /// qBittorrent WebUI password
    #[arg(long, env = "ISOTRACK_ENGINE_PASSWORD", hide_env_values = true, global = true)]
    engine_password: Option<String>,

    /// Release feed URL
    #[arg(long, env = "ISOTRACK_FEED_URL", global = true)]
    feed_url: Option<Url>,

    /// Digest algorithm used to verify releases
    #[arg(long, env = "ISOTRACK_DIGEST", value_enum, global = true)]
    digest: Option<DigestArg>,

    /// Download directory (defaults to the engine's save path)
    #[arg(long, env = "ISOTRACK_DOWNLOAD_DIR", global = true)]
    download_dir: Option<PathBuf>,

    /// Where the last verified release is recorded
    #[arg(long, env = "ISOTRACK_STATE_BACKEND", value_enum, global = true)]
    state_backend: Option<BackendArg>,

    /// State file or database path
    #[arg(long, env = "ISOTRACK_STATE_PATH", global = true)]
    state_path: Option<PathBuf>,

    /// Seconds between status polls
    #[arg(long, env = "ISOTRACK_POLL_INTERVAL", global = true)]
    poll_interval: Option<u64>,

    /// Seconds to wait after registering before the first poll
    #[arg(long, env = "ISOTRACK_SETTLE_DELAY", global = true)]
    settle_delay: Option<u64>,

    /// Consecutive polls without an ETA before giving up
    #[arg(long, env = "ISOTRACK_STALL_THRESHOLD", value_parser = clap::value_parser!(u32).range(1..), global = true)]
    stall_threshold: Option<u32>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    output: OutputFormat,

    /// Verbose output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DigestArg {
    Md5,
    Sha1,
    Sha256,
}

impl From<DigestArg> for DigestAlgorithm {
    fn from(arg: DigestArg) -> Self {
        match arg {
            DigestArg::Md5 => DigestAlgorithm::Md5,
            DigestArg::Sha1 => DigestAlgorithm::Sha1,
            DigestArg::Sha256 => DigestAlgorithm::Sha256,
        }
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum BackendArg {
    Json,
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the latest release if the local copy is missing or outdated
    Sync,

    /// Show the latest published release
    Info,

    /// Show the last verified release
    State,

    /// Print a file's digest
    Digest {
        /// File to hash
        file: PathBuf,

        /// Expected digest; exits non-zero on mismatch
        #[arg(long)]
        expect: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

impl Cli {
    /// Defaults overlaid with flags and environment
    fn settings(&self) -> Settings {
        let mut settings = Settings::default();

        if let Some(url) = &self.engine_url {
            settings.engine_url = url.clone();
        }
        settings.engine_username = self.engine_username.clone();
        settings.engine_password = self.engine_password.clone();
        if let Some(url) = &self.feed_url {
            settings.feed_url = url.clone();
        }
        if let Some(digest) = self.digest {
            settings.digest_algorithm = digest.into();
        }
        settings.download_dir = self.download_dir.clone();

        if let Some(BackendArg::Sqlite) = self.state_backend {
            settings.state_backend = StateBackend::Sqlite;
            settings.state_path = Settings::default_data_dir().join("state.db");
        }
        if let Some(path) = &self.state_path {
            settings.state_path = path.clone();
        }

        if let Some(secs) = self.poll_interval {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.settle_delay {
            settings.settle_delay = Duration::from_secs(secs);
        }
        if let Some(threshold) = self.stall_threshold {
            settings.stall_threshold = threshold;
        }

        settings
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            if e
                .downcast_ref::<isotrack_core::IsotrackError>()
                .is_some_and(|e| e.is_retryable())
            {
                eprintln!("{}", style("This looks transient; try again later.").dim());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let settings = cli.settings();
    tracing::debug!(
        engine = %settings.engine_url,
        feed = %settings.feed_url,
        state = %settings.state_path.display(),
        "settings resolved"
    );

    let code = match &cli.command {
        Commands::Sync => {
            let core = isotrack_core::Isotrack::new(settings).await?;
            commands::sync(&core, cli.output).await?
        }

        Commands::Info => {
            let core = isotrack_core::Isotrack::new(settings).await?;
            commands::show_info(&core, cli.output).await?;
            0
        }

        Commands::State => {
            let core = isotrack_core::Isotrack::new(settings).await?;
            commands::show_state(&core, cli.output).await?;
            0
        }

        Commands::Digest { file, expect } => {
            commands::digest_file(&settings, file.clone(), expect.as_deref(), cli.output).await?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(*shell, &mut Cli::command(), "isotrack", &mut std::io::stdout());
            0
        }
    };

    Ok(code)
}
