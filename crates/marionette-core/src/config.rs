//! Persistent bridge configuration.
//!
//! Stored in `~/.marionette/config.json`. Every field has a default, so a
//! partial (or missing) file is fine.
//!
//! # Example
//!
//! ```no_run
//! use marionette_core::config::BridgeConfig;
//!
//! // Load (returns defaults if the file doesn't exist)
//! let config = BridgeConfig::load();
//! println!("connecting to {}:{}", config.host, config.port);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::DEFAULT_CHUNK_SIZE;

const CONFIG_DIR: &str = ".marionette";
const CONFIG_FILENAME: &str = "config.json";

/// Default Marionette port.
pub const DEFAULT_PORT: u16 = 2828;

/// Connection and launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host running the Marionette listener.
    pub host: String,
    /// Port of the Marionette listener.
    pub port: u16,
    /// Overall deadline for establishing the connection.
    pub connect_timeout_ms: u64,
    /// Pause after each failed connection attempt.
    pub retry_interval_ms: u64,
    /// Deadline for each received message; `None` waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    /// Size of each socket read.
    pub chunk_size: usize,
    /// Browser executable started by the process launcher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_binary: Option<PathBuf>,
    /// Arguments passed to the browser executable.
    pub browser_args: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 45_000,
            retry_interval_ms: 250,
            read_timeout_ms: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            browser_binary: None,
            browser_args: vec!["-foreground".to_string()],
        }
    }
}

impl BridgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Path of the config file, if a home directory is known.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILENAME))
    }

    /// Load config from `~/.marionette/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.marionette/config.json`.
    pub fn save(&self) -> std::io::Result<PathBuf> {
        let path = Self::path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "could not determine home directory")
        })?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_targets_local_marionette() {
        let config = BridgeConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 2828);
        assert_eq!(config.connect_timeout(), Duration::from_secs(45));
        assert_eq!(config.retry_interval(), Duration::from_millis(250));
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.chunk_size, 1024);
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, BridgeConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let loaded: BridgeConfig =
            serde_json::from_str(r#"{"port": 4444, "read_timeout_ms": 3000}"#).unwrap();
        assert_eq!(loaded.port, 4444);
        assert_eq!(loaded.read_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(loaded.host, "localhost");
    }

    #[test]
    fn roundtrip_serialization() {
        let config = BridgeConfig {
            browser_binary: Some(PathBuf::from("/usr/bin/firefox")),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let loaded: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_returns_default_for_missing_file() {
        // load() should not panic even if the file doesn't exist.
        let _ = BridgeConfig::load();
    }
}
