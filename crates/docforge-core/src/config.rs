use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::migration::DEFAULT_LEDGER_COLLECTION;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "DOCFORGE_CONFIG";

/// Project-local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "docforge.toml";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("no connection named '{0}' is configured")]
    UnknownConnection(String),
}

/// Settings for one database connection.
///
/// Passed explicitly into compilers and ledgers; nothing reads it from
/// ambient global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection name, used in diagnostics. Filled from the table key when
    /// loaded from a file.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Prepended to every collection name.
    #[serde(default)]
    pub prefix: String,
    /// Ledger collection name, before prefixing.
    #[serde(default = "default_migrations")]
    pub migrations: String,
    /// Cursor batch size requested from the server.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: default_connection_name(),
            endpoint: default_endpoint(),
            database: default_database(),
            username: None,
            password: None,
            prefix: String::new(),
            migrations: default_migrations(),
            batch_size: default_batch_size(),
        }
    }
}

impl ConnectionConfig {
    /// Defaults with a different collection prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// All configured connections plus the default's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_connection_name")]
    pub default: String,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let mut connections = BTreeMap::new();
        connections.insert(default_connection_name(), ConnectionConfig::default());
        Self {
            default: default_connection_name(),
            connections,
        }
    }
}

impl DatabaseConfig {
    /// The named connection, or the default one when `name` is `None`.
    pub fn connection(&self, name: Option<&str>) -> Result<&ConnectionConfig, ConfigError> {
        let name = name.unwrap_or(&self.default);
        self.connections
            .get(name)
            .ok_or_else(|| ConfigError::UnknownConnection(name.to_string()))
    }

    fn fill_names(mut self) -> Self {
        for (key, connection) in &mut self.connections {
            if connection.name.is_empty() {
                connection.name = key.clone();
            }
        }
        self
    }
}

fn default_connection_name() -> String {
    "arangodb".to_string()
}

fn default_endpoint() -> String {
    "http://localhost:8529".to_string()
}

fn default_database() -> String {
    "_system".to_string()
}

fn default_migrations() -> String {
    DEFAULT_LEDGER_COLLECTION.to_string()
}

fn default_batch_size() -> u32 {
    1000
}

/// Discovery order for the config file:
/// 1. `explicit_path`
/// 2. `DOCFORGE_CONFIG` env var
/// 3. `./docforge.toml`
///
/// Falls back to defaults when nothing is found.
pub fn load_config(explicit_path: Option<&Path>) -> Result<DatabaseConfig, ConfigError> {
    if let Some(path) = explicit_path {
        return load_config_from_path(path);
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return load_config_from_path(&path);
        }
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return load_config_from_path(&local);
    }

    tracing::debug!("no configuration file found, using defaults");
    Ok(DatabaseConfig::default())
}

/// Load and parse one configuration file.
pub fn load_config_from_path(path: &Path) -> Result<DatabaseConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: DatabaseConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(config.fill_names())
}
