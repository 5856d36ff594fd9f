//! Transfer error taxonomy shared by the transmitter and the listener.

use ferry_core::codec::CodecError;
use ferry_core::crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("payload integrity check failed")]
    Integrity,

    #[error("payload length {0} exceeds the frame limit")]
    PayloadTooLarge(u32),

    #[error("timed out waiting for peer")]
    Timeout,

    #[error("connection closed by peer")]
    Closed,

    #[error("receiver error {code}: {reason}")]
    Peer { code: i32, reason: String },

    #[error("receiver NACK: {0}")]
    Nack(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("a transfer is already in progress")]
    Busy,

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether the per-chunk retry loop may absorb this failure.
    ///
    /// Timeouts, transport hiccups, and NACKs are worth a resend of the
    /// identical frame; an ERROR frame, a malformed message, or a crypto
    /// failure ends the transfer on the first occurrence.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            TransferError::Timeout
                | TransferError::Closed
                | TransferError::Nack(_)
                | TransferError::Io(_)
        )
    }
}
