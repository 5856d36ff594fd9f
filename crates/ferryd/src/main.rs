//! ferryd — Ferry receive daemon.
//!
//! Binds the configured listen address, saves inbound files under the
//! receive directory, and runs until interrupted.

use anyhow::{Context, Result};

use ferry_core::config::FerryConfig;
use ferry_net::{FileListener, FileStore};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug ferryd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path =
        FerryConfig::write_default_if_missing().context("failed to write default config")?;
    let config = FerryConfig::load().context("failed to load config")?;
    tracing::info!(config = %config_path.display(), "ferryd starting");

    let store = FileStore::new(&config.storage.receive_dir)
        .context("failed to open receive directory")?
        .with_dated_subdirs(config.storage.dated_subdirs);

    if config.storage.retention_days > 0 {
        store.cleanup_old(config.storage.retention_days);
    }

    let mut listener = FileListener::new(config.receiver.clone(), store)
        .on_progress(|record| {
            if record.chunks_received == 1 {
                tracing::info!(
                    filename = %record.filename,
                    bytes = record.file_size,
                    "incoming file"
                );
            }
            tracing::debug!(
                filename = %record.filename,
                received = record.chunks_received,
                total = record.chunk_count,
                "progress"
            );
        })
        .on_file_received(|path, mime| {
            tracing::info!(path = %path.display(), mime, "file received");
        });

    listener.start().await?;
    tracing::info!(
        host = %config.receiver.listen_host,
        port = config.receiver.listen_port,
        dir = %config.storage.receive_dir.display(),
        "receiver listening"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("signal received, shutting down");
    listener.stop().await;
    Ok(())
}
