//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration for the operation engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct EngineConfig {
    /// Location of the operation log database.
    #[builder(default = "PathBuf::from(\"data/refile.db\")")]
    pub database_path: PathBuf,

    /// Seconds a finished progress record stays pollable.
    #[builder(default = "300")]
    pub progress_ttl_secs: u64,

    /// Maximum number of staged batches kept awaiting confirmation.
    #[builder(default = "20")]
    pub max_staged_batches: usize,

    /// Suffix attempts before conflict resolution gives up.
    #[builder(default = "9999")]
    pub max_conflict_attempts: u32,

    /// Maximum number of proposals in one staged batch.
    #[builder(default = "500")]
    pub max_batch_items: usize,

    /// Number of worker tasks draining the job queue.
    #[builder(default = "2")]
    pub job_workers: usize,

    /// Capacity of the job queue.
    #[builder(default = "100")]
    pub queue_capacity: usize,

    /// Directories whose direct children are removable volume mount points.
    #[builder(default = "default_volume_roots()")]
    pub volume_roots: Vec<PathBuf>,

    /// Path prefixes the engine refuses to touch.
    #[builder(default = "default_blocked_prefixes()")]
    pub blocked_prefixes: Vec<PathBuf>,
}

fn default_volume_roots() -> Vec<PathBuf> {
    ["/Volumes", "/media", "/mnt"].into_iter().map(PathBuf::from).collect()
}

fn default_blocked_prefixes() -> Vec<PathBuf> {
    ["/System", "/usr", "/bin", "/sbin", "/private/var"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let positive = [
            ("max_staged_batches", self.max_staged_batches),
            ("max_batch_items", self.max_batch_items),
            ("job_workers", self.job_workers),
            ("queue_capacity", self.queue_capacity),
        ];
        for (name, value) in positive {
            if value == Some(0) {
                return Err(format!("{name} must be at least 1"));
            }
        }
        if self.max_conflict_attempts == Some(0) {
            return Err("max_conflict_attempts must be at least 1".to_string());
        }
        if let Some(ref path) = self.database_path {
            if path.as_os_str().is_empty() {
                return Err("database_path cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/refile.db"),
            progress_ttl_secs: 300,
            max_staged_batches: 20,
            max_conflict_attempts: 9999,
            max_batch_items: 500,
            job_workers: 2,
            queue_capacity: 100,
            volume_roots: default_volume_roots(),
            blocked_prefixes: default_blocked_prefixes(),
        }
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("refile").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// read if present and built-in defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    /// Grace period before a finished progress record is evicted.
    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let builder = EngineConfigBuilder {
            database_path: Some(self.database_path.clone()),
            progress_ttl_secs: Some(self.progress_ttl_secs),
            max_staged_batches: Some(self.max_staged_batches),
            max_conflict_attempts: Some(self.max_conflict_attempts),
            max_batch_items: Some(self.max_batch_items),
            job_workers: Some(self.job_workers),
            queue_capacity: Some(self.queue_capacity),
            volume_roots: None,
            blocked_prefixes: None,
        };
        builder
            .validate()
            .map_err(|message| ConfigError::Invalid { message })
    }
}
