//! Ferry wire format — framing and payload codecs for all Ferry traffic.
//!
//! These functions ARE the protocol. Every offset, every constant, every
//! reserved byte is part of the wire format; changing anything here breaks
//! interop with deployed peers.
//!
//! A frame is a fixed 256-byte header followed by its payload:
//!
//! ```text
//! offset 0   : 4-byte magic          = 0x00 0x00 0xDE 0x0F
//! offset 4   : 1-byte version        = 0x02
//! offset 5   : 1-byte message type
//! offset 6   : 4-byte payload length (big-endian u32)
//! offset 10  : 32-byte SHA-256 of the payload
//! offset 42  : 214-byte zero padding
//! ```
//!
//! Structured payloads (HANDSHAKE, FILE_META, ACK, ERROR, DONE) are UTF-8
//! JSON objects; unknown fields are ignored on parse so either peer can be
//! upgraded first. CHUNK payloads are binary: a 4-byte big-endian index
//! followed by the chunk bytes. This module does no I/O and holds no state.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Frame magic, transmitted in this byte order.
pub const MAGIC: [u8; 4] = [0x00, 0x00, 0xDE, 0x0F];

/// Current protocol version. A parse of any other version fails.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 256;

/// Default receiver port.
pub const DEFAULT_PORT: u16 = 9876;

/// Default chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: u32 = 65536;

/// Chunk size for large files: 256 KiB.
pub const LARGE_FILE_CHUNK_SIZE: u32 = 262_144;

/// Files at or above this size (1 GiB) use [`LARGE_FILE_CHUNK_SIZE`].
pub const LARGE_FILE_THRESHOLD: u64 = 1_073_741_824;

/// Attempts per chunk before the transfer fails.
pub const MAX_RETRIES: u32 = 3;

/// Connect + handshake timeout in seconds.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// ACK wait timeout after the handshake, in seconds.
pub const ACK_TIMEOUT_SECS: u64 = 10;

/// Bound on joining the listener's accept task during stop, in seconds.
pub const STOP_TIMEOUT_SECS: u64 = 5;

const DIGEST_OFFSET: usize = 10;
const DIGEST_LEN: usize = 32;

// ── Message types ─────────────────────────────────────────────────────────────

/// Frame message type. The header stores the raw byte so unknown values
/// survive parsing; dispatchers convert with `TryFrom` and reject the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0x01,
    FileMeta = 0x02,
    Chunk = 0x03,
    Ack = 0x04,
    Error = 0x05,
    Done = 0x06,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x01 => Ok(MessageType::Handshake),
            0x02 => Ok(MessageType::FileMeta),
            0x03 => Ok(MessageType::Chunk),
            0x04 => Ok(MessageType::Ack),
            0x05 => Ok(MessageType::Error),
            0x06 => Ok(MessageType::Done),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

// ── Frame header ──────────────────────────────────────────────────────────────

/// A parsed frame header.
///
/// `message_type` is kept raw; callers dispatch via
/// `MessageType::try_from` and treat unknown values as protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: u8,
    pub payload_len: u32,
    pub payload_digest: [u8; 32],
}

impl FrameHeader {
    /// Recompute SHA-256 over `payload` and compare with the embedded digest.
    pub fn verify_payload(&self, payload: &[u8]) -> bool {
        let digest: [u8; 32] = Sha256::digest(payload).into();
        digest == self.payload_digest
    }
}

/// Build a 256-byte header for `payload`.
pub fn build_header(message_type: MessageType, payload: &[u8]) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    header[4] = PROTOCOL_VERSION;
    header[5] = message_type.into();
    header[6..10].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    let digest: [u8; 32] = Sha256::digest(payload).into();
    header[DIGEST_OFFSET..DIGEST_OFFSET + DIGEST_LEN].copy_from_slice(&digest);
    header
}

/// Parse a header from the first 256 bytes of `data`.
///
/// Fails on a short buffer, wrong magic, or wrong version. The message
/// type byte is passed through unchecked.
pub fn parse_header(data: &[u8]) -> Result<FrameHeader, CodecError> {
    if data.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            need: HEADER_SIZE,
            got: data.len(),
        });
    }
    if data[0..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    if data[4] != PROTOCOL_VERSION {
        return Err(CodecError::BadVersion(data[4]));
    }

    let payload_len = u32::from_be_bytes([data[6], data[7], data[8], data[9]]);
    let mut payload_digest = [0u8; 32];
    payload_digest.copy_from_slice(&data[DIGEST_OFFSET..DIGEST_OFFSET + DIGEST_LEN]);

    Ok(FrameHeader {
        message_type: data[5],
        payload_len,
        payload_digest,
    })
}

// ── Structured payloads ───────────────────────────────────────────────────────

/// HANDSHAKE — first frame on every connection.
///
/// `public_key` carries the sender's raw X25519 public key (lower-hex)
/// when `encryption` is true; the receiver answers with its own key in the
/// handshake ACK so both sides can derive the session key before FILE_META.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub sender_id: String,
    pub encryption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// FILE_META — one per transfer, after the handshake ACK.
///
/// Invariant: `chunk_count == ceil(file_size / chunk_size)` for non-empty
/// files, and `chunk_count == 1` for empty ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub chunk_count: u32,
    pub chunk_size: u32,
}

/// ACK — answers every non-ACK/ERROR frame. `success == false` is a NACK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            public_key: None,
        }
    }

    pub fn nack(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            public_key: None,
        }
    }
}

/// ERROR — terminates the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_code: i32,
    pub reason: String,
}

/// DONE — last frame of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Done {
    pub status: String,
}

impl Default for Done {
    fn default() -> Self {
        Self {
            status: "complete".to_string(),
        }
    }
}

/// Encode a structured payload as UTF-8 JSON.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a structured payload from UTF-8 JSON.
/// Unknown fields are ignored; missing required fields fail.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}

// ── Chunk payload ─────────────────────────────────────────────────────────────

/// Build a CHUNK payload: 4-byte big-endian index followed by the data.
pub fn build_chunk_payload(index: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + data.len());
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(data);
    payload
}

/// Split a CHUNK payload into its index and data.
pub fn parse_chunk_payload(payload: &[u8]) -> Result<(u32, Bytes), CodecError> {
    if payload.len() < 4 {
        return Err(CodecError::Truncated {
            need: 4,
            got: payload.len(),
        });
    }
    let index = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok((index, Bytes::copy_from_slice(&payload[4..])))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too short: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("bad frame magic")]
    BadMagic,

    #[error("unsupported protocol version: 0x{0:02x}")]
    BadVersion(u8),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
