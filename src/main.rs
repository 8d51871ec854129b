//! CLI entry point for the crawler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use crawler_core::{Crawler, FileConfig, RunConfig};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_layer = match &args.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("Cannot load config file '{}'", path.display()))?,
        None => FileConfig::default(),
    };
    let config = RunConfig::resolve(args.overrides().or(file_layer))
        .context("Invalid run configuration")?;

    info!(
        base_url = %config.base_url,
        preferred_domain = %config.preferred_domain,
        progress_file = %config.progress_file.display(),
        download_dir = %config.download_dir.display(),
        "Crawler starting"
    );

    let progress_file = config.progress_file.clone();
    let crawler = Crawler::from_config(config)
        .with_context(|| format!("Cannot start crawl with progress file '{}'", progress_file.display()))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current index");
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let mut crawler = crawler.with_interrupt_flag(Arc::clone(&interrupted));
    let summary = crawler.run().await.context("Crawl aborted")?;

    info!(
        recorded = summary.indices_recorded,
        not_found = summary.indices_not_found,
        listings_failed = summary.listings_failed,
        downloaded = summary.files_downloaded,
        already_present = summary.files_already_present,
        rejected = summary.files_rejected,
        failed = summary.files_failed,
        throttled = summary.throttle_events,
        next_index = summary.next_index,
        "Crawl finished"
    );

    if summary.interrupted || interrupted.load(Ordering::SeqCst) {
        info!(next_index = summary.next_index, "Interrupted. Run again to resume.");
    }

    Ok(())
}
