//! Configuration schema (bqls.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the workspace root
pub const CONFIG_FILE_NAME: &str = "bqls.toml";

/// Where table metadata comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// BigQuery tables API
    BigQuery,

    /// Directory of JSON table snapshots
    Offline,
}

impl Default for MetadataBackend {
    fn default() -> Self {
        Self::BigQuery
    }
}

/// Metadata store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Store implementation
    pub backend: MetadataBackend,

    /// How long fetched table metadata stays cached
    pub cache_ttl_secs: u64,

    /// Upper bound for a single metadata request
    pub request_timeout_ms: u64,

    /// Snapshot directory for the offline backend (relative to the project root)
    pub offline_dir: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::default(),
            cache_ttl_secs: 300,
            request_timeout_ms: 10_000,
            offline_dir: PathBuf::from("schemas"),
        }
    }
}

/// Diagnostic publishing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Publish diagnostics on open/change/save
    pub enabled: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default GCP project for table paths without a project part
    #[serde(default)]
    pub project_id: Option<String>,

    /// Default log filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Metadata store settings
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Diagnostic settings
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            log_level: default_log_level(),
            metadata: MetadataConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load `bqls.toml` from `dir` if present, otherwise defaults rooted at `dir`
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            return Self::from_file(&path);
        }

        Ok(Self {
            project_root: dir.to_path_buf(),
            ..Self::default()
        })
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Offline snapshot directory resolved against the project root
    pub fn offline_dir(&self) -> PathBuf {
        if self.metadata.offline_dir.is_absolute() {
            self.metadata.offline_dir.clone()
        } else {
            self.project_root.join(&self.metadata.offline_dir)
        }
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.metadata.backend, MetadataBackend::BigQuery);
        assert_eq!(config.metadata.cache_ttl_secs, 300);
        assert!(config.diagnostics.enabled);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            project_id = "my-project"

            [metadata]
            backend = "offline"
            "#,
        )
        .unwrap();

        assert_eq!(config.project_id.as_deref(), Some("my-project"));
        assert_eq!(config.metadata.backend, MetadataBackend::Offline);
        assert_eq!(config.metadata.request_timeout_ms, 10_000);
        assert_eq!(config.metadata.offline_dir, PathBuf::from("schemas"));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = Config::from_toml("project_id = [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.metadata, parsed.metadata);
    }

    #[test]
    fn offline_dir_is_rooted() {
        let config = Config {
            project_root: PathBuf::from("/work"),
            ..Config::default()
        };
        assert_eq!(config.offline_dir(), PathBuf::from("/work/schemas"));
    }
}
