//! Server configuration.

use std::path::Path;
use std::time::Duration;

use derive_getters::Getters;
use derive_more::{Display, Error};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use toroid_rules::{DEFAULT_HEIGHT, DEFAULT_WIDTH, MIN_BOARD_SIDE};
use tracing::{debug, info, instrument};

/// Environment variable overriding [`ServerConfig::host`].
pub const ENV_HOST: &str = "TOROID_HOST";
/// Environment variable overriding [`ServerConfig::port`].
pub const ENV_PORT: &str = "TOROID_PORT";
/// Environment variable overriding [`ServerConfig::database_path`].
pub const ENV_DATABASE: &str = "TOROID_DATABASE";

/// Durable store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite file at `database_path`.
    #[default]
    #[display("sqlite")]
    Sqlite,
    /// In-process, lost on restart.
    #[display("memory")]
    Memory,
}

/// Server configuration, loaded from TOML with every field defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters, Serialize, Deserialize)]
#[setters(prefix = "with_")]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    port: u16,

    /// Durable store backend.
    #[serde(default)]
    storage: StorageBackend,

    /// SQLite database file.
    #[serde(default = "default_database_path")]
    database_path: String,

    /// Board columns for new sessions.
    #[serde(default = "default_board_width")]
    board_width: usize,

    /// Board rows for new sessions.
    #[serde(default = "default_board_height")]
    board_height: usize,

    /// Session lock lease, milliseconds.
    #[serde(default = "default_lock_ttl_ms")]
    lock_ttl_ms: u64,

    /// Idle lifetime of a session, seconds.
    #[serde(default = "default_session_ttl_secs")]
    session_ttl_secs: u64,

    /// Time a dropped player has to reconnect, seconds.
    #[serde(default = "default_grace_period_secs")]
    grace_period_secs: u64,

    /// How long finished sessions stay readable, seconds.
    #[serde(default = "default_finish_linger_secs")]
    finish_linger_secs: u64,

    /// Interval between idle-session sweeps, seconds.
    #[serde(default = "default_reaper_interval_secs")]
    reaper_interval_secs: u64,

    /// Length of generated join codes.
    #[serde(default = "default_code_length")]
    code_length: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_path() -> String {
    "toroid.db".to_string()
}

fn default_board_width() -> usize {
    DEFAULT_WIDTH
}

fn default_board_height() -> usize {
    DEFAULT_HEIGHT
}

fn default_lock_ttl_ms() -> u64 {
    5000
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_grace_period_secs() -> u64 {
    180
}

fn default_finish_linger_secs() -> u64 {
    60
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_code_length() -> usize {
    6
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage: StorageBackend::default(),
            database_path: default_database_path(),
            board_width: default_board_width(),
            board_height: default_board_height(),
            lock_ttl_ms: default_lock_ttl_ms(),
            session_ttl_secs: default_session_ttl_secs(),
            grace_period_secs: default_grace_period_secs(),
            finish_linger_secs: default_finish_linger_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            code_length: default_code_length(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file and validates it.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
        let config = Self::from_toml(&content)?;
        info!(host = %config.host, port = config.port, "Config loaded successfully");
        Ok(config)
    }

    /// Parses and validates TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TOROID_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    #[instrument(skip_all)]
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup(ENV_HOST) {
            debug!(%host, "Host overridden from environment");
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::new(format!("{} is not a valid port: '{}'", ENV_PORT, port)))?;
            debug!(port = self.port, "Port overridden from environment");
        }
        if let Some(path) = lookup(ENV_DATABASE) {
            debug!(%path, "Database path overridden from environment");
            self.database_path = path;
        }
        Ok(())
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board_width < MIN_BOARD_SIDE || self.board_height < MIN_BOARD_SIDE {
            return Err(ConfigError::new(format!(
                "Board {}x{} is too small (minimum side is {})",
                self.board_width, self.board_height, MIN_BOARD_SIDE
            )));
        }
        if self.lock_ttl_ms == 0 {
            return Err(ConfigError::new("lock_ttl_ms must be positive".to_string()));
        }
        if self.grace_period_secs == 0 {
            return Err(ConfigError::new("grace_period_secs must be positive".to_string()));
        }
        if self.session_ttl_secs == 0 {
            return Err(ConfigError::new("session_ttl_secs must be positive".to_string()));
        }
        if self.code_length == 0 {
            return Err(ConfigError::new("code_length must be positive".to_string()));
        }
        Ok(())
    }

    /// Address to bind, `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lock lease duration.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    /// Idle lifetime of a session.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Reconnect window.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Lifetime of a finished session in the cache.
    pub fn finish_linger(&self) -> Duration {
        Duration::from_secs(self.finish_linger_secs)
    }

    /// Sweep interval.
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.lock_ttl(), Duration::from_millis(5000));
        assert_eq!(config.grace_period(), Duration::from_secs(180));
        assert_eq!(*config.storage(), StorageBackend::Sqlite);
    }

    #[test]
    fn test_partial_file() {
        let config = ServerConfig::from_toml(
            r#"
            port = 9000
            storage = "memory"
            board_width = 16
            "#,
        )
        .unwrap();
        assert_eq!(*config.port(), 9000);
        assert_eq!(*config.storage(), StorageBackend::Memory);
        assert_eq!(*config.board_width(), 16);
        assert_eq!(*config.board_height(), 10);
    }

    #[test]
    fn test_small_board_rejected() {
        let err = ServerConfig::from_toml("board_height = 2").unwrap_err();
        assert!(err.message.contains("too small"));
    }

    #[test]
    fn test_zero_grace_rejected() {
        assert!(ServerConfig::from_toml("grace_period_secs = 0").is_err());
        assert!(ServerConfig::from_toml("lock_ttl_ms = 0").is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_HOST, "0.0.0.0"),
            (ENV_PORT, "7001"),
            (ENV_DATABASE, "/tmp/t.db"),
        ]
        .into_iter()
        .collect();
        let mut config = ServerConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:7001");
        assert_eq!(config.database_path(), "/tmp/t.db");
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_overrides(|k| (k == ENV_PORT).then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.message.contains(ENV_PORT));
    }

    #[test]
    fn test_setters() {
        let config = ServerConfig::default()
            .with_port(0)
            .with_storage(StorageBackend::Memory);
        assert_eq!(*config.port(), 0);
        assert_eq!(*config.storage(), StorageBackend::Memory);
    }
}
