//! Maps repositories of the ROS ecosystem.
//!
//! Usage:
//!   rosmap --config config.json --output output.json
//!   rosmap --load-existing --skip-download --output output.json
//!   rosmap --generate-config config.json

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use rosmap::harvest::{PipelineOptions, PipelineOrchestrator, PluginCatalog};
use rosmap::{CancellationToken, PluginExecutor, Settings, DEFAULT_CONFIG};

#[derive(Parser, Debug)]
#[command(name = "rosmap")]
#[command(about = "Discover, clone and analyze ROS repositories")]
struct Cli {
    /// Settings file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    /// Resume from the link files of a previous run instead of parsing.
    #[arg(short, long)]
    load_existing: bool,
    /// Do not clone repositories.
    #[arg(short = 'd', long)]
    skip_download: bool,
    /// Analysis results file. Analysis is skipped without it.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Write the default settings document to PATH and exit.
    #[arg(long, value_name = "PATH")]
    generate_config: Option<PathBuf>,
    /// First repository (sorted) handed to each cloner.
    #[arg(long, default_value_t = 0)]
    clone_offset: usize,
    /// Number of repositories handed to each cloner.
    #[arg(long)]
    clone_count: Option<usize>,
    /// Upper bound on a single plugin invocation, overriding the settings file.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rosmap=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.generate_config {
        std::fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("writing default settings to {}", path.display()))?;
        info!(path = %path.display(), "Default settings written");
        return Ok(());
    }

    if cli.output.is_none() {
        warn!("No output path given, only parse and clone stages will run");
    }

    let settings = Arc::new(
        Settings::load(&cli.config)
            .with_context(|| format!("loading settings from {}", cli.config.display()))?,
    );
    let timeout = cli
        .timeout_secs
        .map(Duration::from_secs)
        .or_else(|| settings.plugin_timeout());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running plugin");
            on_signal.cancel();
        }
    });

    let catalog = PluginCatalog::builtin().context("registering built-in plugins")?;
    let pipeline = PipelineOrchestrator::new(settings, catalog)
        .with_executor(PluginExecutor::new(timeout, cancel));

    let options = PipelineOptions {
        load_existing: cli.load_existing,
        skip_download: cli.skip_download,
        output: cli.output,
        clone_offset: cli.clone_offset,
        clone_count: cli.clone_count,
    };
    let report = pipeline.run(&options).await.context("pipeline aborted")?;

    for notice in &report.skipped {
        info!(
            stage = %notice.stage,
            target = notice.target.as_deref().unwrap_or("-"),
            plugin = notice.plugin.as_deref().unwrap_or("-"),
            reason = ?notice.reason,
            "Skipped"
        );
    }
    if report.artifact_may_be_stale() {
        for error in &report.persistence_errors {
            warn!(error = %error, "Results write failed");
        }
        if options.output.is_some() && !report.artifact_written {
            bail!("analysis results could not be written");
        }
    }
    info!(records = report.records, skipped = report.skipped.len(), "Done");
    Ok(())
}
