//! Run configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// What happens to provider results once a chunk completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Save through the result sink.
    #[default]
    Persist,
    /// Store in the provider result cache instead of the sink (test executions).
    Cache,
    /// Compute and discard.
    DryRun,
}

/// Errors from loading or validating a [`RunConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("max_parallelism ({parallelism}) must not exceed batch_size ({batch_size})")]
    ParallelismExceedsBatch {
        parallelism: usize,
        batch_size: usize,
    },
}

/// Settings for one calculation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Providers per chunk (B).
    pub batch_size: usize,
    /// Worker threads binding and executing providers (P, at most B).
    pub max_parallelism: usize,
    /// Worker threads fetching provider datasets.
    pub dataset_fetch_parallelism: usize,
    pub mode: RunMode,
    /// Calculation names whose values feed cross-batch aggregates.
    pub aggregate_calculations: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_parallelism: 5,
            dataset_fetch_parallelism: 5,
            mode: RunMode::Persist,
            aggregate_calculations: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("batch_size", self.batch_size),
            ("max_parallelism", self.max_parallelism),
            ("dataset_fetch_parallelism", self.dataset_fetch_parallelism),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive { field });
            }
        }
        if self.max_parallelism > self.batch_size {
            return Err(ConfigError::ParallelismExceedsBatch {
                parallelism: self.max_parallelism,
                batch_size: self.batch_size,
            });
        }
        Ok(())
    }

    /// Deterministic BLAKE3 hash of the configuration.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.batch_size as u64).to_le_bytes());
        hasher.update(&(self.max_parallelism as u64).to_le_bytes());
        hasher.update(&(self.dataset_fetch_parallelism as u64).to_le_bytes());
        hasher.update(format!("{:?}", self.mode).as_bytes());
        for name in &self.aggregate_calculations {
            hasher.update(b"\x1f");
            hasher.update(name.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = RunConfig::from_toml("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.max_parallelism, 5);
        assert_eq!(config.mode, RunMode::Persist);
    }

    #[test]
    fn parses_all_fields() {
        let config = RunConfig::from_toml(
            r#"
batch_size = 50
max_parallelism = 8
dataset_fetch_parallelism = 2
mode = "dry_run"
aggregate_calculations = ["Pupil Led Funding", "Lump Sum"]
"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_parallelism, 8);
        assert_eq!(config.dataset_fetch_parallelism, 2);
        assert_eq!(config.mode, RunMode::DryRun);
        assert_eq!(config.aggregate_calculations.len(), 2);
    }

    #[test]
    fn rejects_zero_and_oversized_parallelism() {
        assert!(matches!(
            RunConfig::from_toml("batch_size = 0"),
            Err(ConfigError::NotPositive { field: "batch_size" })
        ));
        assert!(matches!(
            RunConfig::from_toml("batch_size = 3\nmax_parallelism = 4"),
            Err(ConfigError::ParallelismExceedsBatch { .. })
        ));
        assert!(matches!(
            RunConfig::from_toml("mode = \"sometimes\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let base = RunConfig::default();
        let same = RunConfig::default();
        let other = RunConfig {
            batch_size: 10,
            ..RunConfig::default()
        };
        assert_eq!(base.fingerprint(), same.fingerprint());
        assert_ne!(base.fingerprint(), other.fingerprint());
        assert_eq!(base.fingerprint().len(), 64);
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = RunConfig::from_file(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/run.toml"));
    }
}
