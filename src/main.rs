//! photos-backup: incrementally mirror an iCloud Photos library into a local
//! directory or a Backblaze B2 bucket.
//!
//! Each run re-lists the chosen collection, skips anything already present at
//! its dated destination path, and fetches, timestamps and commits the rest.
//! The destination itself is the only sync state.

#![warn(clippy::all)]

mod cli;
mod config;
mod icloud;
mod remote;
mod retry;
mod shutdown;
mod storage;
mod sync;
mod types;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use remote::RemoteSession;
use sync::{SyncConfig, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();

    let filter = cli.log_level.as_filter();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::debug!(?config, "Loaded configuration");

    let storage = storage::build_backend(&config.backend)
        .context("Failed to initialize the storage backend")?;
    tracing::info!("Destination: {}", storage.describe());

    let remote: Arc<dyn RemoteSession> = Arc::new(icloud::ICloudSession::new(
        config.cookie_directory.clone(),
        config.username.clone(),
        config.domain,
        config.client_id.clone(),
    ));

    let shutdown = shutdown::install_signal_handler()?;

    let mut engine = SyncEngine::new(
        remote,
        storage,
        SyncConfig {
            collection: config.album.clone(),
            size: config.size,
            concurrency: usize::from(config.threads_num),
            set_exif_datetime: config.set_exif_datetime,
            dry_run: config.dry_run,
            no_progress_bar: config.no_progress_bar,
        },
        shutdown,
    );
    let summary = engine.run().await?;

    if summary.failed > 0 {
        tracing::warn!(
            "{} items failed; they will be retried on the next run",
            summary.failed
        );
    }
    Ok(())
}
