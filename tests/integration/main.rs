//! Ferry integration test harness.
//!
//! All tests run in-process over localhost: a real `FileListener` (or a
//! scripted peer built on the codec) on an OS-assigned port, a real
//! `FileTransmitter` driving the wire. No external state beyond temp
//! directories.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferry_core::config::{ReceiverConfig, SenderConfig};
use ferry_net::{FileListener, FileStore, FileTransmitter, TransferProgress};

mod transfers;

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Fresh temp directory, unique per test and per process.
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ferry-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Completed files reported by the listener's callback: (path, mime).
pub type ReceivedLog = Arc<Mutex<Vec<(PathBuf, String)>>>;

/// Start a listener on an OS-assigned localhost port.
pub async fn start_listener(
    recv_dir: &Path,
    encryption: bool,
    dated_subdirs: bool,
) -> (FileListener, u16, ReceivedLog) {
    let config = ReceiverConfig {
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        encryption,
    };

    let received: ReceivedLog = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let store = FileStore::new(recv_dir)
        .unwrap()
        .with_dated_subdirs(dated_subdirs);

    let mut listener = FileListener::new(config, store).on_file_received(move |path, mime| {
        sink.lock()
            .unwrap()
            .push((path.to_path_buf(), mime.to_string()));
    });
    listener.start().await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port, received)
}

pub fn sender_config(port: u16, chunk_size: u32, encryption: bool) -> SenderConfig {
    SenderConfig {
        sender_id: "integration".into(),
        receiver_host: "127.0.0.1".into(),
        receiver_port: port,
        chunk_size,
        encryption,
    }
}

// ── Polling ───────────────────────────────────────────────────────────────────

/// Drive a transmitter until it reports done or an error.
pub async fn run_to_completion(transmitter: &mut FileTransmitter) -> TransferProgress {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut last: Option<TransferProgress> = None;
    loop {
        if let Some(progress) = transmitter.latest_progress() {
            last = Some(progress);
        }
        if let Some(progress) = &last {
            if progress.done || progress.error.is_some() {
                return progress.clone();
            }
        }
        if !transmitter.is_transferring() {
            if let Some(progress) = transmitter.latest_progress() {
                return progress;
            }
            return last.expect("transfer task exited without any progress");
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "transfer did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a condition the listener reaches slightly after the sender's
/// final ACK (callbacks fire after the DONE acknowledgement is written).
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
