//! Provider result cache for test-execution runs.
//!
//! Results are stored as one JSON file per provider result id, so a repeated
//! test execution over the same provider and specification overwrites the
//! previous entry.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use fundcalc_core::domain::ProviderResult;

#[derive(Debug, Clone)]
pub struct ResultCache {
    cache_dir: PathBuf,
}

impl ResultCache {
    /// The directory is created if it doesn't exist.
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&cache_dir).with_context(|| {
            format!("Failed to create result cache directory {}", cache_dir.display())
        })?;
        Ok(Self { cache_dir })
    }

    pub fn put(&self, result: &ProviderResult) -> Result<()> {
        let json =
            serde_json::to_string_pretty(result).context("Failed to serialize provider result")?;
        let path = self.result_path(&result.id);
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write cached provider result {}", path.display()))?;
        Ok(())
    }

    fn result_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{id}.json"))
    }
}
