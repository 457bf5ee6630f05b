//! Courier configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CourierError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl CourierConfig {
    /// Load config from the default path (~/.courier/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CourierError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CourierError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Courier home directory (~/.courier).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courier")
    }
}

/// Message store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Snapshot file holding all scheduled messages.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    CourierConfig::home_dir()
        .join("scheduled-messages.json")
        .to_string_lossy()
        .into_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// WhatsApp bridge configuration.
///
/// The bridge is a self-hosted HTTP service that owns the real WhatsApp
/// session (QR pairing, reconnects); Courier only talks HTTP to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Bridge base URL.
    #[serde(default = "default_bridge_url")]
    pub base_url: String,
    /// Bridge session name.
    #[serde(default = "default_session")]
    pub session: String,
    /// Bridge API key, sent as X-Api-Key when non-empty.
    #[serde(default)]
    pub api_key: String,
    /// Seconds between session status polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Country code prepended to local phone numbers.
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_bridge_url() -> String {
    "http://localhost:3001".into()
}
fn default_session() -> String {
    "default".into()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_country_code() -> String {
    "62".into()
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            session: default_session(),
            api_key: String::new(),
            poll_interval_secs: default_poll_interval(),
            country_code: default_country_code(),
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Fixed-delay retry settings. No backoff, no jitter: these guard against
/// transient blips, not prolonged outages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delivery attempts per fired message.
    #[serde(default = "default_send_attempts")]
    pub send_max_attempts: u32,
    /// Delay between delivery attempts.
    #[serde(default = "default_send_delay_ms")]
    pub send_retry_delay_ms: u64,
    /// Bridge (re)connect attempts.
    #[serde(default = "default_connect_attempts")]
    pub connect_max_attempts: u32,
    /// Delay between bridge (re)connect attempts.
    #[serde(default = "default_connect_delay_ms")]
    pub connect_retry_delay_ms: u64,
}

fn default_send_attempts() -> u32 {
    3
}
fn default_send_delay_ms() -> u64 {
    1000
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_delay_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            send_max_attempts: default_send_attempts(),
            send_retry_delay_ms: default_send_delay_ms(),
            connect_max_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_delay_ms(),
        }
    }
}
