//! Configuration system for portage.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PORTAGE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/portage/config.toml
//!   3. ~/.config/portage/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::SecurityMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortageConfig {
    pub engine: EngineSettings,
    pub retry: RetrySettings,
    pub ack: AckSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Transfer chunk size for the buffered read/write loops.
    pub buffer_len: usize,
    /// Idle/backpressure wait between ticks, milliseconds.
    pub queue_wait_ms: u64,
    /// Mailbox capacity in messages. Fixed at box construction.
    pub box_capacity: usize,
    /// Largest transfer a peer may declare in its length prefix. A bigger
    /// declaration is rejected before any buffer is allocated for it.
    pub max_transfer_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Wait per dequeue attempt while gathering transmission fragments.
    pub gather_interval_ms: u64,
    /// Total retry budget before fragment gathering fails.
    pub gather_budget_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AckSettings {
    /// How long a UDP sender waits for the ACK token.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Symmetric protection mode. Must match the peer's.
    pub mode: SecurityMode,
    /// Shared passphrase. Ignored when mode is none.
    pub passphrase: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            buffer_len: 4096,
            queue_wait_ms: 100,
            box_capacity: 64,
            max_transfer_len: 64 * 1024 * 1024,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            gather_interval_ms: 100,
            gather_budget_ms: 30_000,
        }
    }
}

impl Default for AckSettings {
    fn default() -> Self {
        Self { timeout_ms: 2_000 }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            mode: SecurityMode::None,
            passphrase: String::new(),
        }
    }
}

// ── Duration accessors ───────────────────────────────────────────────────────

impl PortageConfig {
    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.engine.queue_wait_ms)
    }

    pub fn gather_interval(&self) -> Duration {
        Duration::from_millis(self.retry.gather_interval_ms)
    }

    pub fn gather_budget(&self) -> Duration {
        Duration::from_millis(self.retry.gather_budget_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack.timeout_ms)
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("portage")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ───────────────────────────────────────────────────────────────────

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

// ── Loading ──────────────────────────────────────────────────────────────────

impl PortageConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            PortageConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PORTAGE_CONFIG")
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
            let text = toml::to_string_pretty(&PortageConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PORTAGE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTAGE_ENGINE__BUFFER_LEN") {
            if let Ok(n) = v.parse() {
                self.engine.buffer_len = n;
            }
        }
        if let Ok(v) = std::env::var("PORTAGE_ENGINE__QUEUE_WAIT_MS") {
            if let Ok(n) = v.parse() {
                self.engine.queue_wait_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PORTAGE_ENGINE__BOX_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.engine.box_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("PORTAGE_ENGINE__MAX_TRANSFER_LEN") {
            if let Ok(n) = v.parse() {
                self.engine.max_transfer_len = n;
            }
        }
        if let Ok(v) = std::env::var("PORTAGE_RETRY__GATHER_BUDGET_MS") {
            if let Ok(n) = v.parse() {
                self.retry.gather_budget_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PORTAGE_ACK__TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.ack.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PORTAGE_SECURITY__PASSPHRASE") {
            self.security.passphrase = v;
        }
    }
}
