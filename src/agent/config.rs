use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::transport::backoff::BackoffPolicy;

const SERVER_URL_ENV: &str = "AGENT_SERVER_URL";
const DATA_DIR_ENV: &str = "AGENT_DATA_DIR";

fn default_server_url() -> String {
    "wss://rms.thesama.in".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_ping_interval() -> u64 {
    30
}
fn default_pong_timeout() -> u64 {
    5
}
fn default_network_check_interval() -> u64 {
    5
}
fn default_probe_host() -> String {
    "google.com".to_string()
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_command_timeout() -> u64 {
    1800
}
fn default_verify_attempts() -> u32 {
    5
}
fn default_verify_delay() -> u64 {
    1000
}
fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/bin")
}
fn default_icon_dir() -> PathBuf {
    PathBuf::from("/usr/share/icons/hicolor/48x48/apps")
}
fn default_fallback_icon() -> PathBuf {
    PathBuf::from("/usr/share/icons/hicolor/48x48/apps/utilities-terminal.png")
}

/// Liveness, reachability and reconnect tuning for the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_network_check_interval")]
    pub network_check_interval_secs: u64,
    /// Hostname resolved to decide whether the machine is online
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: BackoffPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            network_check_interval_secs: default_network_check_interval(),
            probe_host: default_probe_host(),
            probe_timeout_secs: default_probe_timeout(),
            reconnect: BackoffPolicy::default(),
        }
    }
}

/// Knobs for the command executor and its package-install follow-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Hard limit for one subprocess; a warning is logged at 80%
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    #[serde(default = "default_verify_delay")]
    pub verify_delay_ms: u64,
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,
    #[serde(default = "default_icon_dir")]
    pub icon_dir: PathBuf,
    #[serde(default = "default_fallback_icon")]
    pub fallback_icon: PathBuf,
    /// Where launchers are written; `~/Desktop` when unset
    #[serde(default)]
    pub desktop_dir: Option<PathBuf>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            verify_attempts: default_verify_attempts(),
            verify_delay_ms: default_verify_delay(),
            bin_dir: default_bin_dir(),
            icon_dir: default_icon_dir(),
            fallback_icon: default_fallback_icon(),
            desktop_dir: None,
        }
    }
}

impl ExecutorSettings {
    pub fn desktop_dir(&self) -> PathBuf {
        self.desktop_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Desktop")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub channel_file: Option<PathBuf>,
    #[serde(default)]
    pub ledger_file: Option<PathBuf>,
    #[serde(default)]
    pub mac_cache_file: Option<PathBuf>,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            log_level: default_log_level(),
            data_dir: None,
            channel_file: None,
            ledger_file: None,
            mac_cache_file: None,
            connection: ConnectionSettings::default(),
            executor: ExecutorSettings::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: Config = serde_json::from_str(&raw).context("parsing config JSON")?;
        Ok(cfg)
    }

    /// Like `from_file`, but a missing file means "all defaults". Environment
    /// overrides are applied either way.
    pub fn load(path: &str) -> Result<Self> {
        let mut cfg = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            info!(path, "config file not found, using defaults");
            Self::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                self.server_url = url;
            }
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("channel-agent")
        })
    }

    pub fn channel_path(&self) -> PathBuf {
        self.channel_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join("channel.json"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join("ledger.json"))
    }

    pub fn mac_cache_path(&self) -> PathBuf {
        self.mac_cache_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join("mac_address.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "server_url": "wss://control.example.com",
                "data_dir": "/var/lib/agent",
                "connection": {{
                    "ping_interval_secs": 10,
                    "reconnect": {{"base_delay_ms": 1000, "max_delay_ms": 60000}}
                }},
                "executor": {{"verify_attempts": 3}}
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server_url, "wss://control.example.com");
        assert_eq!(config.connection.ping_interval_secs, 10);
        assert_eq!(config.connection.pong_timeout_secs, 5);
        assert_eq!(config.connection.reconnect.base_delay_ms, 1000);
        assert_eq!(config.connection.reconnect.max_delay_ms, 60000);
        assert_eq!(config.connection.reconnect.growth_factor, 1.5);
        assert_eq!(config.executor.verify_attempts, 3);
        assert_eq!(config.executor.verify_delay_ms, 1000);
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/var/lib/agent/ledger.json")
        );
        assert_eq!(
            config.channel_path(),
            PathBuf::from("/var/lib/agent/channel.json")
        );
    }

    #[test]
    fn test_empty_object_yields_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{}}").unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server_url, "wss://rms.thesama.in");
        assert_eq!(config.connection.ping_interval_secs, 30);
        assert_eq!(config.connection.probe_host, "google.com");
        assert_eq!(config.connection.reconnect.max_attempts, 1000);
        assert_eq!(config.executor.bin_dir, PathBuf::from("/usr/bin"));
    }

    #[test]
    fn test_config_missing_file() {
        let result = Config::from_file("/nonexistent/path/config.json");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/path/config.json").unwrap();
        assert_eq!(config.connection.pong_timeout_secs, 5);
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json").unwrap();

        let result = Config::from_file(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_file_paths_win_over_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("/data")),
            ledger_file: Some(PathBuf::from("/elsewhere/l.json")),
            ..Config::default()
        };
        assert_eq!(config.ledger_path(), PathBuf::from("/elsewhere/l.json"));
        assert_eq!(
            config.mac_cache_path(),
            PathBuf::from("/data/mac_address.json")
        );
    }
}
