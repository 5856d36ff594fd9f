//! ferry-send — send one file to a Ferry receiver.
//!
//! Usage: ferry-send <file> [host] [port]
//!
//! Host and port default to the configured receiver; encryption follows
//! the [sender] config section.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use ferry_core::config::FerryConfig;
use ferry_net::FileTransmitter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(file) = args.next() else {
        bail!("usage: ferry-send <file> [host] [port]");
    };

    let mut config = FerryConfig::load().context("failed to load config")?;
    if let Some(host) = args.next() {
        config.sender.receiver_host = host;
    }
    if let Some(port) = args.next() {
        config.sender.receiver_port = port.parse().context("invalid port")?;
    }

    let path = PathBuf::from(&file);
    if !path.is_file() {
        bail!("not a file: {}", path.display());
    }

    tracing::info!(
        file = %path.display(),
        host = %config.sender.receiver_host,
        port = config.sender.receiver_port,
        encryption = config.sender.encryption,
        "starting transfer"
    );

    let mut transmitter = FileTransmitter::new(config.sender);
    transmitter.start_transfer(&path)?;

    loop {
        let finished = !transmitter.is_transferring();
        if let Some(progress) = transmitter.latest_progress() {
            if let Some(error) = progress.error {
                bail!("transfer failed: {error}");
            }
            if progress.done {
                println!(
                    "sent {} ({} bytes, {} chunks)",
                    path.display(),
                    progress.total_bytes,
                    progress.total_chunks
                );
                return Ok(());
            }
            println!(
                "{}/{} chunks ({:.0}%)",
                progress.chunks_sent,
                progress.total_chunks,
                progress.fraction() * 100.0
            );
        } else if finished {
            bail!("transfer ended without a final status");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
