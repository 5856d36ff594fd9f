//! Configuration system for Ferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Opaque identifier announced in the handshake.
    pub sender_id: String,
    /// Receiver address to connect to.
    pub receiver_host: String,
    pub receiver_port: u16,
    /// Chunk size in bytes. Files over 1 GiB override this upward.
    pub chunk_size: u32,
    /// Negotiate end-to-end encryption.
    pub encryption: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// Accept encrypted transfers.
    pub encryption: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where received files land. Created on startup.
    pub receive_dir: PathBuf,
    /// Place files under a YYYY-MM-DD subdirectory.
    pub dated_subdirs: bool,
    /// Auto-delete received files older than N days. 0 = never.
    pub retention_days: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            sender: SenderConfig::default(),
            receiver: ReceiverConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            sender_id: "sender".to_string(),
            receiver_host: "127.0.0.1".to_string(),
            receiver_port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            encryption: false,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PORT,
            encryption: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            receive_dir: dirs_or_home().join("ReceivedFiles"),
            dated_subdirs: false,
            retention_days: 0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            FerryConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&FerryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FERRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FERRY_SENDER__SENDER_ID") {
            self.sender.sender_id = v;
        }
        if let Ok(v) = std::env::var("FERRY_SENDER__RECEIVER_HOST") {
            self.sender.receiver_host = v;
        }
        if let Ok(v) = std::env::var("FERRY_SENDER__RECEIVER_PORT") {
            if let Ok(p) = v.parse() {
                self.sender.receiver_port = p;
            }
        }
        if let Ok(v) = std::env::var("FERRY_SENDER__ENCRYPTION") {
            self.sender.encryption = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("FERRY_RECEIVER__LISTEN_HOST") {
            self.receiver.listen_host = v;
        }
        if let Ok(v) = std::env::var("FERRY_RECEIVER__LISTEN_PORT") {
            if let Ok(p) = v.parse() {
                self.receiver.listen_port = p;
            }
        }
        if let Ok(v) = std::env::var("FERRY_RECEIVER__ENCRYPTION") {
            self.receiver.encryption = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("FERRY_STORAGE__RECEIVE_DIR") {
            self.storage.receive_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FERRY_STORAGE__DATED_SUBDIRS") {
            self.storage.dated_subdirs = v == "true" || v == "1";
        }
    }
}
