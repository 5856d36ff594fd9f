//! Inbound transfer listener.
//!
//! One accept task; one spawned handler per connection. A handler reads
//! frames, verifies payload integrity against the header digest, and
//! walks the handshake → metadata → chunks → done sequence, acknowledging
//! each step. Storage placement goes through [`FileStore`], so inbound
//! names never collide with existing files.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use ferry_core::codec::{
    decode_payload, encode_payload, parse_chunk_payload, Ack, ErrorPayload, FileMeta, Handshake,
    MessageType, STOP_TIMEOUT_SECS,
};
use ferry_core::config::ReceiverConfig;
use ferry_core::crypto::{self, CipherSession};

use crate::error::TransferError;
use crate::frame::{recv_frame, send_frame};
use crate::storage::FileStore;

/// Invoked once per completed transfer with the saved path and MIME type.
pub type FileReceivedHook = Arc<dyn Fn(&Path, &str) + Send + Sync>;

/// Invoked after every stored chunk.
pub type ProgressHook = Arc<dyn Fn(&ReceivedFileInfo) + Send + Sync>;

/// State of one inbound transfer.
#[derive(Debug, Clone)]
pub struct ReceivedFileInfo {
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub chunk_count: u32,
    pub chunk_size: u32,
    pub chunks_received: u32,
    pub save_path: PathBuf,
}

impl ReceivedFileInfo {
    /// Received fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.chunk_count == 0 {
            0.0
        } else {
            f64::from(self.chunks_received) / f64::from(self.chunk_count)
        }
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Accepts transfers on the configured address until stopped.
pub struct FileListener {
    config: ReceiverConfig,
    store: FileStore,
    on_file_received: Option<FileReceivedHook>,
    on_progress: Option<ProgressHook>,
    shutdown: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// Everything a connection handler needs, shared across handler tasks.
struct HandlerCtx {
    encryption: bool,
    store: FileStore,
    on_file_received: Option<FileReceivedHook>,
    on_progress: Option<ProgressHook>,
}

impl FileListener {
    pub fn new(config: ReceiverConfig, store: FileStore) -> Self {
        Self {
            config,
            store,
            on_file_received: None,
            on_progress: None,
            shutdown: None,
            task: None,
            local_addr: None,
        }
    }

    /// Install the completed-file callback.
    pub fn on_file_received<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Path, &str) + Send + Sync + 'static,
    {
        self.on_file_received = Some(Arc::new(hook));
        self
    }

    /// Install the per-chunk progress callback.
    pub fn on_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ReceivedFileInfo) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(hook));
        self
    }

    /// Bind the listening socket with address reuse and begin accepting.
    pub async fn start(&mut self) -> Result<(), TransferError> {
        if self.task.is_some() {
            return Ok(());
        }

        let addr = resolve(&self.config.listen_host, self.config.listen_port).await?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let ctx = Arc::new(HandlerCtx {
            encryption: self.config.encryption,
            store: self.store.clone(),
            on_file_received: self.on_file_received.clone(),
            on_progress: self.on_progress.clone(),
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.task = Some(tokio::spawn(accept_loop(listener, shutdown_rx, ctx)));
        self.shutdown = Some(shutdown_tx);

        tracing::info!(addr = %local_addr, "listener started");
        Ok(())
    }

    /// The bound address, once started. Useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting and join the accept task with a bounded wait.
    /// In-flight connection handlers run to completion on their own.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(STOP_TIMEOUT_SECS), task)
                .await
                .is_err()
            {
                tracing::warn!("accept task did not stop within timeout");
            }
        }
        self.local_addr = None;
        tracing::info!("listener stopped");
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransferError> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            TransferError::Protocol(format!("listen address {host}:{port} resolves to nothing"))
        })
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
    ctx: Arc<HandlerCtx>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("listener shutting down");
                return;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::info!(%addr, "connection accepted");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, ctx).await {
                                tracing::warn!(%addr, error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

// ── Connection handler ────────────────────────────────────────────────────────

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<HandlerCtx>,
) -> Result<(), TransferError> {
    let mut session: Option<CipherSession> = None;
    let mut info: Option<ReceivedFileInfo> = None;
    let mut file: Option<tokio::fs::File> = None;

    loop {
        let (header, payload) = recv_frame(&mut stream).await?;

        if !header.verify_payload(&payload) {
            tracing::warn!(%addr, "payload integrity check failed");
            send_error(&mut stream, 1, "Integrity check failed").await?;
            return Err(TransferError::Integrity);
        }

        match MessageType::try_from(header.message_type) {
            Ok(MessageType::Handshake) => {
                let handshake: Handshake = decode_payload(&payload)?;
                tracing::info!(
                    %addr,
                    sender = %handshake.sender_id,
                    encryption = handshake.encryption,
                    "handshake"
                );
                let (new_session, ack) = negotiate(&handshake, &ctx, &mut stream, &addr).await?;
                session = Some(new_session);
                send_frame(&mut stream, MessageType::Ack, &encode_payload(&ack)?).await?;
            }

            Ok(MessageType::FileMeta) => {
                let meta: FileMeta = decode_payload(&payload)?;
                let save_path = ctx.store.place(&meta.filename)?;
                tracing::info!(
                    %addr,
                    filename = %meta.filename,
                    bytes = meta.file_size,
                    chunks = meta.chunk_count,
                    path = %save_path.display(),
                    "receiving file"
                );
                file = Some(tokio::fs::File::create(&save_path).await?);
                info = Some(ReceivedFileInfo {
                    filename: meta.filename,
                    file_size: meta.file_size,
                    mime_type: meta.mime_type,
                    chunk_count: meta.chunk_count,
                    chunk_size: meta.chunk_size,
                    chunks_received: 0,
                    save_path,
                });
                send_ack(&mut stream, "Metadata accepted").await?;
            }

            Ok(MessageType::Chunk) => {
                let (index, data) = parse_chunk_payload(&payload)?;

                let Some(open_file) = file.as_mut() else {
                    send_error(&mut stream, 2, "No file metadata received").await?;
                    return Err(TransferError::Protocol("chunk before file metadata".into()));
                };

                let plaintext = match session.as_ref() {
                    Some(s) => s.decrypt(&data),
                    None => Ok(data.to_vec()),
                };
                let plaintext = match plaintext {
                    Ok(p) => p,
                    Err(e) => {
                        send_error(&mut stream, 4, "Decryption failed").await?;
                        return Err(e.into());
                    }
                };

                open_file.write_all(&plaintext).await?;

                if let Some(record) = info.as_mut() {
                    record.chunks_received += 1;
                    if let Some(hook) = &ctx.on_progress {
                        hook(record);
                    }
                }
                send_ack(&mut stream, format!("Chunk {index} OK")).await?;
            }

            Ok(MessageType::Done) => {
                drop(file.take());
                send_ack(&mut stream, "File saved").await?;
                if let Some(record) = &info {
                    tracing::info!(
                        %addr,
                        path = %record.save_path.display(),
                        "transfer complete"
                    );
                    if let Some(hook) = &ctx.on_file_received {
                        hook(&record.save_path, &record.mime_type);
                    }
                }
                return Ok(());
            }

            // ACK and ERROR never originate from a sender mid-transfer;
            // unknown types are from the future or from garbage.
            _ => {
                tracing::warn!(%addr, message_type = header.message_type, "unexpected message type");
                return Err(TransferError::Protocol(format!(
                    "unexpected message type 0x{:02x}",
                    header.message_type
                )));
            }
        }
    }
}

/// Build the per-connection cipher session and handshake ACK.
///
/// When the sender negotiated encryption, the ACK carries our public key
/// so the sender can derive the session key before FILE_META.
async fn negotiate(
    handshake: &Handshake,
    ctx: &HandlerCtx,
    stream: &mut TcpStream,
    addr: &SocketAddr,
) -> Result<(CipherSession, Ack), TransferError> {
    if !handshake.encryption {
        return Ok((CipherSession::new(false)?, Ack::ok("Ready")));
    }

    if !ctx.encryption {
        send_error(stream, 3, "Encryption not accepted").await?;
        return Err(TransferError::Protocol(
            "peer negotiated encryption but it is disabled here".into(),
        ));
    }

    let Some(peer_hex) = handshake.public_key.as_deref() else {
        send_error(stream, 3, "Missing public key").await?;
        return Err(TransferError::Protocol(
            "encrypted handshake without a public key".into(),
        ));
    };
    let peer_key = match crypto::parse_public_key(peer_hex) {
        Ok(key) => key,
        Err(e) => {
            send_error(stream, 3, "Malformed public key").await?;
            return Err(e.into());
        }
    };

    let mut session = CipherSession::new(true)?;
    session.complete_handshake(&peer_key)?;
    tracing::debug!(%addr, "session key derived");

    let mut ack = Ack::ok("Ready");
    ack.public_key = session.public_key_hex();
    Ok((session, ack))
}

async fn send_ack(stream: &mut TcpStream, message: impl Into<String>) -> Result<(), TransferError> {
    let payload = encode_payload(&Ack::ok(message))?;
    send_frame(stream, MessageType::Ack, &payload).await
}

async fn send_error(stream: &mut TcpStream, code: i32, reason: &str) -> Result<(), TransferError> {
    let payload = encode_payload(&ErrorPayload {
        error_code: code,
        reason: reason.to_string(),
    })?;
    send_frame(stream, MessageType::Error, &payload).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
