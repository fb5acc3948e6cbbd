use crate::core::applier::{DEFAULT_CHAIN, DEFAULT_TIMEOUT};
use crate::core::dhcp::{DEFAULT_DHCP_CONFIG, default_reload_command};
use crate::elevation::ElevationMode;
use crate::utils::{get_config_dir, get_data_dir, get_state_dir};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for `command_timeout_secs`
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Cannot write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("Invalid chain name '{0}'")]
    ChainName(String),
}

/// Service configuration
///
/// Every field has a default, so a partial (or absent) config file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the HTTP API binds to
    pub listen: SocketAddr,
    pub rules_path: PathBuf,
    pub settings_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub dhcp_config_path: PathBuf,
    /// Run after the DHCP file changes; empty disables reloading
    pub dhcp_reload_command: Vec<String>,
    pub iptables_command: String,
    pub lxc_info_command: String,
    /// Chain owned by lxcm in the NAT table
    pub chain_name: String,
    /// Timeout for each external command (clamped to 1..=300)
    pub command_timeout_secs: u64,
    pub elevation: ElevationMode,
}

fn data_file(name: &str) -> PathBuf {
    get_data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib/lxcm"))
        .join(name)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            rules_path: data_file("rules.json"),
            settings_path: data_file("settings.json"),
            audit_log_path: get_state_dir()
                .unwrap_or_else(|| PathBuf::from("/var/log/lxcm"))
                .join("audit.log"),
            dhcp_config_path: PathBuf::from(DEFAULT_DHCP_CONFIG),
            dhcp_reload_command: default_reload_command(),
            iptables_command: "iptables".to_string(),
            lxc_info_command: "lxc-info".to_string(),
            chain_name: DEFAULT_CHAIN.to_string(),
            command_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            elevation: ElevationMode::Auto,
        }
    }
}

impl AppConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.clamp(1, MAX_COMMAND_TIMEOUT_SECS))
    }

    /// Checks the chain name against what iptables accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // iptables limits chain names to 28 characters
        let chain_ok = !self.chain_name.is_empty()
            && self.chain_name.len() <= 28
            && !self.chain_name.starts_with('-')
            && self
                .chain_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
        if chain_ok {
            Ok(())
        } else {
            Err(ConfigError::ChainName(self.chain_name.clone()))
        }
    }
}

/// `~/.config/lxcm/config.json`, or `/etc/lxcm/config.json` without a home.
pub fn default_config_path() -> PathBuf {
    get_config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc/lxcm"))
        .join("config.json")
}

/// Loads the config at `path`. A missing file yields the defaults; a file
/// that exists but does not parse is an error.
pub async fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let config: AppConfig = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Saves the config to `path` using an atomic write pattern (mode 0o600).
pub async fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::from)?;
    crate::utils::write_atomic(path, json.as_bytes()).await?;
    Ok(())
}
