//! Gateway configuration file handling
//!
//! Provides default configuration generation and loading for the gateway.
//! Configuration files are TOML format and stored adjacent to the
//! credential database.
//!
//! This file contains OPERATOR configuration only - deployment settings
//! the service runner controls (paths, timings, logging). Protocol
//! behavior is not configurable here.

use crate::wa::CredentialStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default session identity name in the credential store
const DEFAULT_SESSION_NAME: &str = "gateway";

const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;
const DEFAULT_TOKEN_TTL_SECS: u64 = 60;

/// Gateway configuration (operator settings only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Session and credential-store configuration
    pub session: SessionConfig,

    /// Connection-recovery configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path to the SQLite credential database
    pub database_path: PathBuf,

    /// Session identity name; credential rows are keyed by it
    #[serde(default = "default_session_name")]
    pub name: String,
}

/// Connection-recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Delay before a scheduled reconnect, in seconds
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Pairing token validity window, in seconds
    #[serde(default = "default_token_ttl_secs")]
    pub pairing_token_ttl_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_session_name() -> String {
    DEFAULT_SESSION_NAME.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY_SECS
}

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            pairing_token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with the given database path
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            session: SessionConfig {
                database_path,
                name: default_session_name(),
            },
            connection: ConnectionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: GatewayConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Credential store for this configuration
    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(&self.session.database_path, self.session.name.clone())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.connection.reconnect_delay_secs)
    }

    pub fn pairing_token_ttl(&self) -> Duration {
        Duration::from_secs(self.connection.pairing_token_ttl_secs)
    }
}

/// Get the default config file path based on the database path
///
/// The config file is stored adjacent to the credential database:
/// - Database: ~/.local/share/wagate/auth.db
/// - Config:   ~/.local/share/wagate/config.toml
pub fn default_config_path(database_path: &Path) -> PathBuf {
    database_path
        .parent()
        .unwrap_or(database_path)
        .join("config.toml")
}

/// Get the default credential database path
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wagate")
        .join("auth.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let database_path = PathBuf::from("/data/wagate/auth.db");
        let config = GatewayConfig::new(database_path.clone());

        assert_eq!(config.session.database_path, database_path);
        assert_eq!(config.session.name, "gateway");
        assert_eq!(config.connection.reconnect_delay_secs, 2);
        assert_eq!(config.connection.pairing_token_ttl_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let database_path = PathBuf::from("/data/wagate/auth.db");

        let config = GatewayConfig::new(database_path.clone());
        config.save(&config_path).unwrap();

        let loaded = GatewayConfig::load(&config_path).unwrap();
        assert_eq!(loaded.session.database_path, database_path);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_load_config_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        // Minimal config: only the required field.
        let minimal = r#"
[session]
database_path = "/tmp/auth.db"
"#;
        fs::write(&config_path, minimal).unwrap();

        let config = GatewayConfig::load(&config_path).unwrap();

        assert_eq!(config.session.name, "gateway");
        assert_eq!(config.connection.reconnect_delay_secs, 2);
        assert_eq!(config.connection.pairing_token_ttl_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_config_path() {
        let database_path = PathBuf::from("/data/wagate/auth.db");
        assert_eq!(
            default_config_path(&database_path),
            PathBuf::from("/data/wagate/config.toml")
        );
    }

    #[test]
    fn test_durations() {
        let config = GatewayConfig::new(PathBuf::from("/tmp/auth.db"));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.pairing_token_ttl(), Duration::from_secs(60));
    }
}
