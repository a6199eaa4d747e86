//! Configuration for civil-registry

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::RegistryError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("civil-registry")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the registry database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// How long a writer waits for the SQLite write lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Attempts at allocating a fresh household code after a UNIQUE collision
    #[serde(default = "default_identity_retry_limit")]
    pub identity_retry_limit: u32,

    /// Jurisdiction code used by the CLI when none is given
    #[serde(default)]
    pub default_jurisdiction: Option<String>,
}

fn default_database_file() -> String {
    "registry.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_identity_retry_limit() -> u32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
            identity_retry_limit: default_identity_retry_limit(),
            default_jurisdiction: None,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Full path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Config file path inside the storage directory
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Reject values the registry cannot run with
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.database_file.trim().is_empty() {
            return Err(RegistryError::Config("database_file must not be empty".into()));
        }
        if self.identity_retry_limit == 0 {
            return Err(RegistryError::Config("identity_retry_limit must be at least 1".into()));
        }
        if let Some(code) = &self.default_jurisdiction {
            if code.len() != 9 || !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RegistryError::Config(format!(
                    "default_jurisdiction '{}' is not a 9-digit code",
                    code
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            storage_dir = "/var/lib/registry"
            identity_retry_limit = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.identity_retry_limit, 3);
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/registry/registry.db"));
        assert!(config.default_jurisdiction.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config {
            default_jurisdiction: Some("042114014".into()),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.default_jurisdiction.as_deref(), Some("042114014"));
        assert_eq!(loaded.database_file, "registry.db");
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let zero_retries = Config {
            identity_retry_limit: 0,
            ..Config::default()
        };
        assert!(matches!(zero_retries.validate(), Err(RegistryError::Config(_))));

        let bad_jurisdiction = Config {
            default_jurisdiction: Some("0421".into()),
            ..Config::default()
        };
        assert!(bad_jurisdiction.validate().is_err());
    }
}
