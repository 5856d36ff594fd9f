//! Outbound transfer pipeline.
//!
//! One background task per transfer drives connect → handshake →
//! metadata → chunks (each acknowledged, with retry) → done, and
//! publishes [`TransferProgress`] snapshots onto a latest-value channel
//! that the caller polls. Cancellation is cooperative and observed at
//! chunk boundaries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use ferry_core::codec::{
    build_chunk_payload, decode_payload, encode_payload, Ack, Done, ErrorPayload, FileMeta,
    Handshake, MessageType, ACK_TIMEOUT_SECS, HANDSHAKE_TIMEOUT_SECS, LARGE_FILE_CHUNK_SIZE,
    LARGE_FILE_THRESHOLD, MAX_RETRIES,
};
use ferry_core::config::SenderConfig;
use ferry_core::crypto::{self, CipherSession};

use crate::error::TransferError;
use crate::frame::{recv_frame, send_frame};

// ── Progress ──────────────────────────────────────────────────────────────────

/// Snapshot of a running transfer, value-copied onto the progress channel.
/// `done` and a populated `error` never appear together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub chunks_sent: u32,
    pub total_chunks: u32,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub done: bool,
    pub error: Option<String>,
}

impl TransferProgress {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_chunks == 0 {
            0.0
        } else {
            f64::from(self.chunks_sent) / f64::from(self.total_chunks)
        }
    }
}

// ── Transmitter ───────────────────────────────────────────────────────────────

/// Sends one file at a time to the configured receiver.
///
/// The interactive thread never blocks on the network: `start_transfer`
/// spawns a worker task and returns, and progress is polled through
/// [`latest_progress`](Self::latest_progress).
pub struct FileTransmitter {
    config: SenderConfig,
    cancel: Arc<AtomicBool>,
    progress_tx: Arc<watch::Sender<Option<TransferProgress>>>,
    progress_rx: watch::Receiver<Option<TransferProgress>>,
    task: Option<JoinHandle<()>>,
}

impl FileTransmitter {
    pub fn new(config: SenderConfig) -> Self {
        let (progress_tx, progress_rx) = watch::channel(None);
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            progress_tx: Arc::new(progress_tx),
            progress_rx,
            task: None,
        }
    }

    /// Spawn a transfer task for `path`, or report that one is already
    /// running. Non-blocking.
    pub fn start_transfer(&mut self, path: impl Into<PathBuf>) -> Result<(), TransferError> {
        if self.is_transferring() {
            tracing::warn!("transfer already in progress");
            return Err(TransferError::Busy);
        }

        let path = path.into();
        self.cancel.store(false, Ordering::SeqCst);

        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let progress = self.progress_tx.clone();
        self.task = Some(tokio::spawn(async move {
            run_transfer(config, path, cancel, progress).await;
        }));
        Ok(())
    }

    /// Request the running transfer to abort at its next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_transferring(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// The newest progress snapshot since the last call, if any.
    pub fn latest_progress(&mut self) -> Option<TransferProgress> {
        if self.progress_rx.has_changed().unwrap_or(false) {
            self.progress_rx.borrow_and_update().clone()
        } else {
            None
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

async fn run_transfer(
    config: SenderConfig,
    path: PathBuf,
    cancel: Arc<AtomicBool>,
    progress: Arc<watch::Sender<Option<TransferProgress>>>,
) {
    match transfer(&config, &path, &cancel, &progress).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "transfer complete");
        }
        Err(TransferError::Cancelled) => {
            tracing::info!(path = %path.display(), "transfer cancelled by user");
            progress.send_replace(Some(TransferProgress::failed("Cancelled by user")));
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "transfer failed");
            progress.send_replace(Some(TransferProgress::failed(e.to_string())));
        }
    }
}

async fn transfer(
    config: &SenderConfig,
    path: &Path,
    cancel: &AtomicBool,
    progress: &watch::Sender<Option<TransferProgress>>,
) -> Result<(), TransferError> {
    let file_size = tokio::fs::metadata(path).await?.len();
    let chunk_size = select_chunk_size(file_size, config.chunk_size);
    let total_chunks = if file_size == 0 {
        1
    } else {
        file_size.div_ceil(u64::from(chunk_size)) as u32
    };

    let mut session = CipherSession::new(config.encryption)?;

    let handshake_timeout = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);
    let addr = format!("{}:{}", config.receiver_host, config.receiver_port);
    let mut stream = timeout(handshake_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| TransferError::Timeout)??;
    tracing::debug!(%addr, "connected");

    // Handshake — carries our public key when encryption is negotiated;
    // the ACK must carry the receiver's key back.
    let handshake = Handshake {
        sender_id: config.sender_id.clone(),
        encryption: session.enabled(),
        public_key: session.public_key_hex(),
    };
    send_frame(&mut stream, MessageType::Handshake, &encode_payload(&handshake)?).await?;
    let ack = await_ack(&mut stream, handshake_timeout).await?;

    if session.enabled() {
        let peer_hex = ack.public_key.as_deref().ok_or_else(|| {
            TransferError::Protocol("receiver did not supply a public key".into())
        })?;
        session.complete_handshake(&crypto::parse_public_key(peer_hex)?)?;
        tracing::debug!("session key derived");
    }

    // File metadata
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let mime_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream");
    let meta = FileMeta {
        filename: filename.clone(),
        file_size,
        mime_type: mime_type.to_string(),
        chunk_count: total_chunks,
        chunk_size,
    };
    send_frame(&mut stream, MessageType::FileMeta, &encode_payload(&meta)?).await?;
    await_ack(&mut stream, handshake_timeout).await?;
    tracing::info!(filename = %filename, file_size, total_chunks, "metadata accepted");

    // Chunks
    let ack_timeout = Duration::from_secs(ACK_TIMEOUT_SECS);
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; chunk_size as usize];
    let mut bytes_sent: u64 = 0;

    for chunk_idx in 0..total_chunks {
        if cancel.load(Ordering::SeqCst) {
            return Err(TransferError::Cancelled);
        }

        let n = read_up_to(&mut file, &mut buf).await?;
        if n == 0 {
            break;
        }

        let ciphertext = session.encrypt(&buf[..n])?;
        let payload = build_chunk_payload(chunk_idx, &ciphertext);
        send_chunk_with_retry(&mut stream, &payload, chunk_idx, ack_timeout).await?;

        bytes_sent += n as u64;
        progress.send_replace(Some(TransferProgress {
            chunks_sent: chunk_idx + 1,
            total_chunks,
            bytes_sent,
            total_bytes: file_size,
            done: false,
            error: None,
        }));
    }

    // Done
    send_frame(&mut stream, MessageType::Done, &encode_payload(&Done::default())?).await?;
    await_ack(&mut stream, ack_timeout).await?;

    progress.send_replace(Some(TransferProgress {
        chunks_sent: total_chunks,
        total_chunks,
        bytes_sent: file_size,
        total_bytes: file_size,
        done: true,
        error: None,
    }));
    Ok(())
}

/// Large files get a larger chunk so the per-chunk round trip amortises.
fn select_chunk_size(file_size: u64, configured: u32) -> u32 {
    if file_size >= LARGE_FILE_THRESHOLD {
        LARGE_FILE_CHUNK_SIZE
    } else {
        configured.max(1)
    }
}

/// Fill `buf` from the file, tolerating short reads. Only the final chunk
/// of a transfer may come back shorter than the buffer.
async fn read_up_to(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Block until an ACK arrives, or classify whatever arrived instead.
async fn await_ack(stream: &mut TcpStream, wait: Duration) -> Result<Ack, TransferError> {
    let (header, payload) = timeout(wait, recv_frame(stream))
        .await
        .map_err(|_| TransferError::Timeout)??;

    match MessageType::try_from(header.message_type) {
        Ok(MessageType::Ack) => {
            let ack: Ack = decode_payload(&payload)?;
            if ack.success {
                Ok(ack)
            } else {
                Err(TransferError::Nack(ack.message))
            }
        }
        Ok(MessageType::Error) => {
            let err: ErrorPayload = decode_payload(&payload)?;
            Err(TransferError::Peer {
                code: err.error_code,
                reason: err.reason,
            })
        }
        _ => Err(TransferError::Protocol(format!(
            "expected ACK, got message type 0x{:02x}",
            header.message_type
        ))),
    }
}

/// Send one chunk frame and wait for its ACK, resending the identical
/// frame up to [`MAX_RETRIES`] times on retriable failures.
///
/// The ACK wait consumes exactly one inbound frame per attempt; a slow
/// ACK that lands after a timed-out attempt therefore answers the resend
/// rather than being skipped, and anything other than ACK/ERROR in that
/// slot fails the transfer.
async fn send_chunk_with_retry(
    stream: &mut TcpStream,
    payload: &[u8],
    chunk_idx: u32,
    ack_timeout: Duration,
) -> Result<(), TransferError> {
    let mut attempt = 1;
    loop {
        let result = match send_frame(stream, MessageType::Chunk, payload).await {
            Ok(()) => await_ack(stream, ack_timeout).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MAX_RETRIES && e.retriable() => {
                tracing::warn!(
                    chunk = chunk_idx,
                    attempt,
                    max = MAX_RETRIES,
                    error = %e,
                    "chunk send attempt failed, retrying"
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
