//! CloudClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CloudClawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudClawConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
}

impl CloudClawConfig {
    /// Load config from the default path (~/.cloudclaw/config.toml).
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
            .map_err(|e| CloudClawError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CloudClawError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CloudClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the CloudClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cloudclaw")
    }
}

fn bool_true() -> bool { true }

/// Static application identity, shown by the bot's version snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
    #[serde(default = "default_repository")]
    pub repository: String,
}

fn default_app_name() -> String { "CloudClaw".into() }
fn default_app_version() -> String { env!("CARGO_PKG_VERSION").into() }
fn default_repository() -> String { "https://github.com/CloudClaw/cloudclaw".into() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            repository: default_repository(),
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.cloudclaw/cloudclaw.db".into() }

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Retry scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Floor applied to every task's retry interval.
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    /// Resume persisted `running` tasks at process start.
    #[serde(default = "bool_true")]
    pub autostart: bool,
}

fn default_min_interval() -> u64 { 10 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval(),
            autostart: true,
        }
    }
}

/// Telegram Bot API transport settings. The bot token and chat id live in the
/// settings table so they can be changed at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_api_base() -> String { "https://api.telegram.org".into() }
fn default_poll_timeout() -> u64 { 30 }
fn default_error_backoff() -> u64 { 5 }
fn default_poll_interval() -> u64 { 1 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
            error_backoff_secs: default_error_backoff(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Cloud provisioning endpoint and per-call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_cloud_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,
    #[serde(default = "default_inventory_timeout")]
    pub inventory_timeout_secs: u64,
    #[serde(default = "default_traffic_timeout")]
    pub traffic_timeout_secs: u64,
}

fn default_cloud_endpoint() -> String { "http://127.0.0.1:8700/v1".into() }
fn default_request_timeout() -> u64 { 60 }
fn default_liveness_timeout() -> u64 { 10 }
fn default_inventory_timeout() -> u64 { 30 }
fn default_traffic_timeout() -> u64 { 60 }

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: default_cloud_endpoint(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            liveness_timeout_secs: default_liveness_timeout(),
            inventory_timeout_secs: default_inventory_timeout(),
            traffic_timeout_secs: default_traffic_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CloudClawConfig::default();
        assert_eq!(config.scheduler.min_interval_secs, 10);
        assert_eq!(config.telegram.poll_timeout_secs, 30);
        assert_eq!(config.telegram.error_backoff_secs, 5);
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.cloud.liveness_timeout_secs, 10);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = CloudClawConfig::from_toml(
            r#"
            [scheduler]
            min_interval_secs = 30

            [gateway]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.min_interval_secs, 30);
        assert!(config.scheduler.autostart);
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = CloudClawConfig::from_toml("scheduler = [").unwrap_err();
        assert!(matches!(err, CloudClawError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("cloudclaw-test-config");
        let path = dir.join("config.toml");
        let mut config = CloudClawConfig::default();
        config.cloud.endpoint = "http://cloud.internal/v1".into();
        config.save_to(&path).unwrap();

        let loaded = CloudClawConfig::load_from(&path).unwrap();
        assert_eq!(loaded.cloud.endpoint, "http://cloud.internal/v1");
        std::fs::remove_dir_all(&dir).ok();
    }
}
