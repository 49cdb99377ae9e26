//! CLI entry point for booru-sync.

use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use booru_sync::client::{SearchBackend, SearchClient};
use booru_sync::sync::sync_by_query;
use clap::Parser;
use tracing::{debug, info, warn};

mod cli;
mod config;

use cli::{Cli, Command, DownloadArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let loaded = config::load_default_file_config()?;
    if let Some(path) = loaded.path.as_deref()
        && loaded.config.is_some()
    {
        debug!(path = %path.display(), "loaded config file");
    }

    match &cli.command {
        Command::Download(args) => run_download(args, loaded.config.as_ref(), cli.quiet).await,
        Command::Featured => run_featured(loaded.config.as_ref()).await,
    }
}

async fn run_download(
    args: &DownloadArgs,
    file: Option<&config::FileConfig>,
    quiet: bool,
) -> Result<()> {
    let mut settings = config::resolve_download(args, file)?;
    settings.options.show_progress = !quiet && io::stderr().is_terminal();

    let client = SearchClient::new(settings.client.clone()).context("Failed to build HTTP client")?;
    info!(query = %settings.query, dir = %settings.base_dir.display(), "Sync starting");

    let report = sync_by_query(&client, &settings.query, &settings.base_dir, &settings.options)
        .await
        .with_context(|| format!("Sync of '{}' failed", settings.query))?;

    if let Some(tags) = &report.tags {
        info!(
            written = tags.written(),
            unchanged = tags.skipped(),
            failed = tags.failed(),
            "Tags saved"
        );
    }
    info!(
        records = report.records().len(),
        downloaded = report.downloads.written(),
        already_present = report.downloads.skipped(),
        failed = report.downloads.failed(),
        stop_reason = ?report.plan.stop_reason,
        dir = %report.directory.display(),
        "Sync finished"
    );
    if report.has_failures() {
        warn!("Some records failed; re-run the same command to retry them");
    }

    Ok(())
}

async fn run_featured(file: Option<&config::FileConfig>) -> Result<()> {
    let client =
        SearchClient::new(config::resolve_client(file)).context("Failed to build HTTP client")?;
    let record = client
        .featured()
        .await
        .context("Failed to fetch featured image")?;
    let json = serde_json::to_string_pretty(&record).context("Failed to encode record")?;
    println!("{json}");
    Ok(())
}
