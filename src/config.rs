use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::window::WindowConfig;

/// Default config location, relative to the working directory.
pub const CONFIG_FILE: &str = "config.json";

/// Overrides the dashboard's server URL.
pub const BASE_URL_ENV: &str = "HRS_BASE_URL";

/// Settings persisted to `config.json`.
///
/// Missing keys fall back to their defaults, and the file is rewritten on
/// load so that it always lists every key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub server_host: String,
    pub server_port: u16,
    pub server_cors_origins: Vec<String>,
    /// Served at `/` when the directory exists.
    pub server_static_dir: Option<PathBuf>,

    pub last_device_address: Option<String>,
    /// Scan duration in seconds.
    pub device_discover_delay: f64,
    /// Seconds between reconnect attempts.
    pub conn_retry_interval: f64,

    /// Dashboard server; defaults to `http://{server_host}:{server_port}`.
    pub base_url: Option<String>,
    pub window_secs: u64,
    pub slack_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            server_host: "127.0.0.1".into(),
            server_port: 11642,
            server_cors_origins: vec!["*".into()],
            server_static_dir: Some(PathBuf::from("web/packages/frontend/dist")),
            last_device_address: None,
            device_discover_delay: 3.0,
            conn_retry_interval: 1.0,
            base_url: None,
            window_secs: 60,
            slack_ms: 3000,
        }
    }
}

impl Config {
    /// Read `path`, or start from defaults when it does not exist, then save.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            Config::default()
        };
        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn discover_delay(&self) -> Duration {
        Duration::from_secs_f64(self.device_discover_delay.max(0.0))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.conn_retry_interval.max(0.0))
    }

    pub fn window(&self) -> WindowConfig {
        WindowConfig {
            window: Duration::from_secs(self.window_secs),
            slack: Duration::from_millis(self.slack_ms),
        }
    }

    /// Dashboard server URL: `HRS_BASE_URL`, then `base_url`, then the
    /// local server address.
    pub fn resolve_base_url(&self) -> String {
        std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| format!("http://{}:{}", self.server_host, self.server_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn partial_file_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"server_port": 9000, "last_device_address": "AA:BB"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.last_device_address.as_deref(), Some("AA:BB"));
        assert_eq!(config.window_secs, 60);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["slack_ms"], 3000);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn durations() {
        let config = Config {
            conn_retry_interval: 1.5,
            device_discover_delay: -1.0,
            window_secs: 30,
            slack_ms: 500,
            ..Config::default()
        };
        assert_eq!(config.retry_interval(), Duration::from_millis(1500));
        assert_eq!(config.discover_delay(), Duration::ZERO);
        assert_eq!(config.window().window, Duration::from_secs(30));
        assert_eq!(config.window().slack, Duration::from_millis(500));
    }

    #[test]
    fn base_url_from_config() {
        let config = Config {
            base_url: Some("http://hr.local:8000".into()),
            ..Config::default()
        };
        // Only meaningful when the override is not set in the test environment.
        if std::env::var(BASE_URL_ENV).is_err() {
            assert_eq!(config.resolve_base_url(), "http://hr.local:8000");
            assert_eq!(
                Config::default().resolve_base_url(),
                "http://127.0.0.1:11642"
            );
        }
    }
}
