//! Configuration system for Fieldcast.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FIELDCAST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/fieldcast/config.toml
//!   3. ~/.config/fieldcast/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::wire::{MAX_PARTS, PART_HEADER_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldcastConfig {
    pub transmission: TransmissionSettings,
    pub receive: ReceiveSettings,
}

/// Send-side settings. Also what a model provider hands out per schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionSettings {
    /// Bytes per serialized part, header included. 140 = one binary SMS.
    pub part_capacity: usize,
    /// Transport address of the receiver. Empty = caller decides.
    pub destination: String,
    /// Refuse records that would need more parts than this.
    pub max_parts: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveSettings {
    /// A collecting transmission with no new part for this long is stalled.
    pub stall_timeout_secs: u64,
    /// Max transmissions tracked at once, collecting or complete.
    pub max_inflight: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TransmissionSettings {
    fn default() -> Self {
        Self {
            part_capacity: 140,
            destination: String::new(),
            max_parts: MAX_PARTS,
        }
    }
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            stall_timeout_secs: 3600,
            max_inflight: 256,
        }
    }
}

impl TransmissionSettings {
    /// Fragment bytes available per part once the header is paid for.
    pub fn fragment_capacity(&self) -> usize {
        self.part_capacity.saturating_sub(PART_HEADER_SIZE)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("fieldcast")
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

impl FieldcastConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read one file, falling back to defaults when it does not exist.
    /// No env overrides are applied.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FIELDCAST_CONFIG")
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
            let text = toml::to_string_pretty(&FieldcastConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FIELDCAST_* overrides. Unparseable numbers are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FIELDCAST_TRANSMISSION__PART_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.transmission.part_capacity = n;
            }
        }
        if let Some(v) = lookup("FIELDCAST_TRANSMISSION__DESTINATION") {
            self.transmission.destination = v;
        }
        if let Some(v) = lookup("FIELDCAST_TRANSMISSION__MAX_PARTS") {
            if let Ok(n) = v.parse() {
                self.transmission.max_parts = n;
            }
        }
        if let Some(v) = lookup("FIELDCAST_RECEIVE__STALL_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.receive.stall_timeout_secs = n;
            }
        }
        if let Some(v) = lookup("FIELDCAST_RECEIVE__MAX_INFLIGHT") {
            if let Ok(n) = v.parse() {
                self.receive.max_inflight = n;
            }
        }
    }
}
