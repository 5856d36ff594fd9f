//! Cryptographic session for Ferry transfers.
//!
//! Optional per-chunk authenticated encryption: an ephemeral X25519
//! exchange per connection, HKDF-SHA256 key derivation, AES-256-GCM with a
//! fresh 12-byte random nonce prepended to every ciphertext.
//!
//! A disabled session is the identity in both directions, so callers need
//! no conditional branches. The encrypted path sits behind the default-on
//! `encryption` cargo feature; constructing an *enabled* session in a
//! build without it is a hard error — the session never silently falls
//! back to plaintext.

use thiserror::Error;

#[cfg(feature = "encryption")]
use aes_gcm::aead::Aead;
#[cfg(feature = "encryption")]
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
#[cfg(feature = "encryption")]
use hkdf::Hkdf;
#[cfg(feature = "encryption")]
use rand::RngCore;
#[cfg(feature = "encryption")]
use sha2::Sha256;
#[cfg(feature = "encryption")]
use x25519_dalek::{PublicKey, StaticSecret};

/// AES-GCM nonce size (96 bits, per NIST recommendation).
pub const NONCE_LEN: usize = 12;

/// Derived symmetric key size (AES-256).
pub const KEY_LEN: usize = 32;

/// GCM authentication tag size.
pub const TAG_LEN: usize = 16;

/// HKDF context string. Must match byte-for-byte on both peers.
pub const KDF_CONTEXT: &[u8] = b"devvisionflow-v2-file-transfer";

// ── Session ───────────────────────────────────────────────────────────────────

/// Per-connection cipher state.
///
/// Lifecycle: construct at transfer start (generates the ephemeral
/// key-pair when enabled), exchange public keys during the protocol
/// handshake, call [`complete_handshake`](Self::complete_handshake) with
/// the peer's key, then encrypt/decrypt chunks. Dropped with the
/// connection; there is no re-keying.
pub struct CipherSession {
    enabled: bool,
    #[cfg(feature = "encryption")]
    keys: Option<SessionKeys>,
}

#[cfg(feature = "encryption")]
struct SessionKeys {
    secret: StaticSecret,
    public: [u8; 32],
    derived: Option<[u8; 32]>,
}

impl CipherSession {
    /// Create a session. `enabled == false` yields an identity session.
    pub fn new(enabled: bool) -> Result<Self, CryptoError> {
        if !enabled {
            return Ok(Self {
                enabled: false,
                #[cfg(feature = "encryption")]
                keys: None,
            });
        }
        Self::new_enabled()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The local public key as lower-hex, the wire encoding used in
    /// HANDSHAKE and ACK payloads. `None` when the session is disabled.
    pub fn public_key_hex(&self) -> Option<String> {
        self.public_key().map(hex::encode)
    }

    /// Derive the symmetric key from the peer's public key.
    /// A no-op on disabled sessions.
    pub fn complete_handshake(&mut self, peer_public: &[u8; 32]) -> Result<(), CryptoError> {
        if !self.enabled {
            return Ok(());
        }
        self.derive_key(peer_public)
    }

    /// Encrypt a chunk: `nonce(12) || AES-256-GCM(plaintext)`.
    /// Identity when the session is disabled.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.enabled {
            return Ok(plaintext.to_vec());
        }
        self.seal(plaintext)
    }

    /// Decrypt `nonce(12) || ciphertext+tag` produced by [`encrypt`](Self::encrypt).
    /// Identity when the session is disabled.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.enabled {
            return Ok(data.to_vec());
        }
        self.open(data)
    }
}

#[cfg(feature = "encryption")]
impl CipherSession {
    fn new_enabled() -> Result<Self, CryptoError> {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = *PublicKey::from(&secret).as_bytes();
        Ok(Self {
            enabled: true,
            keys: Some(SessionKeys {
                secret,
                public,
                derived: None,
            }),
        })
    }

    /// The local ephemeral public key, raw. `None` when disabled.
    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.keys.as_ref().map(|k| k.public)
    }

    fn derive_key(&mut self, peer_public: &[u8; 32]) -> Result<(), CryptoError> {
        let keys = self.keys.as_mut().ok_or(CryptoError::Unavailable)?;
        let shared = keys.secret.diffie_hellman(&PublicKey::from(*peer_public));

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut derived = [0u8; KEY_LEN];
        hk.expand(KDF_CONTEXT, &mut derived)
            .map_err(|_| CryptoError::KeyDerivation)?;
        keys.derived = Some(derived);
        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.derived_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::AuthFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::TooShort(data.len()));
        }
        let key = self.derived_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&data[..NONCE_LEN]), &data[NONCE_LEN..])
            .map_err(|_| CryptoError::AuthFailed)
    }

    fn derived_key(&self) -> Result<[u8; 32], CryptoError> {
        self.keys
            .as_ref()
            .and_then(|k| k.derived)
            .ok_or(CryptoError::KeyNotDerived)
    }
}

#[cfg(not(feature = "encryption"))]
impl CipherSession {
    fn new_enabled() -> Result<Self, CryptoError> {
        Err(CryptoError::Unavailable)
    }

    /// The local ephemeral public key, raw. Always `None` in builds
    /// without encryption support.
    pub fn public_key(&self) -> Option<[u8; 32]> {
        None
    }

    fn derive_key(&mut self, _peer_public: &[u8; 32]) -> Result<(), CryptoError> {
        Err(CryptoError::Unavailable)
    }

    fn seal(&self, _plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::Unavailable)
    }

    fn open(&self, _data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::Unavailable)
    }
}

/// Decode a peer public key from its wire (hex) encoding.
pub fn parse_public_key(hex_str: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(hex_str).map_err(|_| CryptoError::BadPeerKey)?;
    bytes.try_into().map_err(|_| CryptoError::BadPeerKey)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption requested but support is not compiled in")]
    Unavailable,

    #[error("session key not derived — handshake incomplete")]
    KeyNotDerived,

    #[error("HKDF expansion failed")]
    KeyDerivation,

    #[error("peer public key is not 32 hex-encoded bytes")]
    BadPeerKey,

    #[error("ciphertext too short ({0} bytes; need at least nonce + tag)")]
    TooShort(usize),

    #[error("AEAD authentication failed")]
    AuthFailed,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
