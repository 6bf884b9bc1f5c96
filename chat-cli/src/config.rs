//! Configuration loading for linkchat.
//!
//! Configuration is read from `linkchat.toml` in the data directory. Every
//! section and field is optional; a missing file means all defaults.

use chat_client::{DiscoveryFilter, EngineConfig, DEFAULT_SERVICE};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "linkchat.toml";

/// Root configuration for linkchat.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineSection,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database, relative to the data directory.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Discovery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Advertised service identifier (default: linkchat).
    #[serde(default = "default_service")]
    pub service: String,
    /// Only connect to devices whose name starts with this prefix.
    #[serde(default)]
    pub name_prefix: Option<String>,
}

/// Engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Inbound notification queue capacity (default: 64).
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("messages.db")
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_string()
}

fn default_inbound_queue() -> usize {
    chat_client::engine::DEFAULT_INBOUND_QUEUE
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            name_prefix: None,
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            inbound_queue: default_inbound_queue(),
        }
    }
}

impl Config {
    /// Load `linkchat.toml` from the data directory, or defaults if absent.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Database location. Relative paths resolve against the data directory.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.storage.database)
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut discovery = DiscoveryFilter::new(&self.discovery.service);
        if let Some(prefix) = &self.discovery.name_prefix {
            discovery = discovery.with_name_prefix(prefix);
        }
        EngineConfig::default()
            .with_discovery(discovery)
            .with_inbound_queue(self.engine.inbound_queue)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.storage.database, PathBuf::from("messages.db"));
        assert_eq!(config.discovery.service, "linkchat");
        assert!(config.discovery.name_prefix.is_none());
        assert_eq!(config.engine.inbound_queue, 64);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[storage]
database = "/data/chat.db"

[discovery]
service = "linkchat-test"
name_prefix = "chat-"

[engine]
inbound_queue = 8
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.database, PathBuf::from("/data/chat.db"));
        assert_eq!(config.discovery.service, "linkchat-test");
        assert_eq!(config.discovery.name_prefix.as_deref(), Some("chat-"));
        assert_eq!(config.engine.inbound_queue, 8);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str("[discovery]\nname_prefix = \"x\"\n").unwrap();
        assert_eq!(config.storage.database, PathBuf::from("messages.db"));
        assert_eq!(config.discovery.service, "linkchat");
        assert_eq!(config.engine.inbound_queue, 64);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.storage.database, PathBuf::from("messages.db"));
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[engine]\ninbound_queue = \"lots\"\n")
            .unwrap();

        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn database_path_resolves_against_data_dir() {
        let config = Config::default();
        assert_eq!(
            config.database_path(Path::new("/tmp/chat")),
            PathBuf::from("/tmp/chat/messages.db")
        );

        let mut absolute = Config::default();
        absolute.storage.database = PathBuf::from("/var/db/chat.db");
        assert_eq!(
            absolute.database_path(Path::new("/tmp/chat")),
            PathBuf::from("/var/db/chat.db")
        );
    }

    #[test]
    fn engine_config_carries_discovery_settings() {
        let mut config = Config::default();
        config.discovery.name_prefix = Some("chat-".into());
        config.engine.inbound_queue = 4;

        let engine = config.engine_config();
        assert_eq!(engine.discovery.service, "linkchat");
        assert_eq!(engine.discovery.name_prefix.as_deref(), Some("chat-"));
        assert_eq!(engine.inbound_queue, 4);
    }
}
