//! The `tern.yaml` configuration file.
//!
//! ```yaml
//! path: ./migrations
//! version_table: public.schema_version
//! transactional: true
//! data:
//!   app_role: app
//! database:
//!   username: user
//!   password: secret
//!   host: localhost
//!   port: 5432
//!   name: postgres
//! ```
//!
//! Every key is optional. Command-line flags take precedence over the file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tern::Data;

pub const DEFAULT_CONFIG_PATH: &str = "tern.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the migration scripts.
    pub path: PathBuf,
    pub version_table: String,
    pub transactional: bool,
    /// Values available to migration templates.
    pub data: Data,
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./migrations"),
            version_table: "schema_version".to_string(),
            transactional: true,
            data: Data::new(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            username: "postgres".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            name: "postgres".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// A `postgres://` URL for this database.
    pub fn connection_string(&self) -> String {
        let credentials = if self.password.is_empty() {
            self.username.clone()
        } else {
            format!("{}:{}", self.username, self.password)
        };
        format!(
            "postgres://{}@{}:{}/{}",
            credentials, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [Config::load], but logs a warning and returns the defaults when the file
    /// cannot be used.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using default configuration", e);
                Self::default()
            }
        }
    }
}
