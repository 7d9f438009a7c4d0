//! Aggregation caches: dataset aggregations per specification and
//! calculation values per specification batch.
//!
//! Keys are `{specification_id}` and `{specification_id}_{batch}`. A miss
//! is `Ok(None)`, and so is an entry that no longer decodes; only storage
//! failures are errors. Batch writes go through
//! [`AggregationCache::merge_batch_values`], which appends under the
//! cache's own lock so concurrent writers to one key serialize.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::warn;

use fundcalc_core::aggregation::{AggregationSet, BatchValues};
use fundcalc_core::identifier::generate_identifier;

/// Storage failures of a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cache entry '{key}' could not be encoded: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key of a specification's dataset aggregations.
pub fn dataset_key(specification_id: &str) -> String {
    specification_id.to_string()
}

/// Key of one batch's calculation values.
pub fn batch_key(specification_id: &str, batch: usize) -> String {
    format!("{specification_id}_{batch}")
}

pub trait AggregationCache: Send + Sync {
    fn dataset_aggregations(&self, specification_id: &str)
        -> Result<Option<AggregationSet>, CacheError>;

    fn set_dataset_aggregations(
        &self,
        specification_id: &str,
        aggregations: &AggregationSet,
    ) -> Result<(), CacheError>;

    /// Drop cached dataset aggregations after the underlying dataset changed.
    fn invalidate_dataset_aggregations(&self, specification_id: &str) -> Result<(), CacheError>;

    fn batch_values(
        &self,
        specification_id: &str,
        batch: usize,
    ) -> Result<Option<BatchValues>, CacheError>;

    /// Append `values` to the entry for `batch`, creating it if absent.
    fn merge_batch_values(
        &self,
        specification_id: &str,
        batch: usize,
        values: &BatchValues,
    ) -> Result<(), CacheError>;

    fn remove_batch_values(&self, specification_id: &str, batch: usize) -> Result<(), CacheError>;
}

// ─── In-memory ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryAggregationCache {
    datasets: RwLock<HashMap<String, AggregationSet>>,
    batches: RwLock<HashMap<String, BatchValues>>,
}

impl InMemoryAggregationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregationCache for InMemoryAggregationCache {
    fn dataset_aggregations(
        &self,
        specification_id: &str,
    ) -> Result<Option<AggregationSet>, CacheError> {
        Ok(self
            .datasets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&dataset_key(specification_id))
            .cloned())
    }

    fn set_dataset_aggregations(
        &self,
        specification_id: &str,
        aggregations: &AggregationSet,
    ) -> Result<(), CacheError> {
        self.datasets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dataset_key(specification_id), aggregations.clone());
        Ok(())
    }

    fn invalidate_dataset_aggregations(&self, specification_id: &str) -> Result<(), CacheError> {
        self.datasets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&dataset_key(specification_id));
        Ok(())
    }

    fn batch_values(
        &self,
        specification_id: &str,
        batch: usize,
    ) -> Result<Option<BatchValues>, CacheError> {
        Ok(self
            .batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&batch_key(specification_id, batch))
            .cloned())
    }

    fn merge_batch_values(
        &self,
        specification_id: &str,
        batch: usize,
        values: &BatchValues,
    ) -> Result<(), CacheError> {
        self.batches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(batch_key(specification_id, batch))
            .or_default()
            .concat(values);
        Ok(())
    }

    fn remove_batch_values(&self, specification_id: &str, batch: usize) -> Result<(), CacheError> {
        self.batches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&batch_key(specification_id, batch));
        Ok(())
    }
}

// ─── JSON files ──────────────────────────────────────────────────────

/// One JSON file per key under a directory.
///
/// File names are `{kind}-{identifier}-{digest}.json`: the key reduced to
/// identifier characters plus a blake3 digest of the full key, so any
/// specification id maps to a distinct file inside the directory.
///
/// Writes go to a temporary file that is renamed into place, so readers
/// never observe a half-written entry.
#[derive(Debug)]
pub struct JsonFileAggregationCache {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileAggregationCache {
    /// The directory is created if it doesn't exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, key: &str, kind: &str) -> PathBuf {
        self.dir.join(entry_file_name(key, kind))
    }

    fn read<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        kind: &str,
    ) -> Result<Option<T>, CacheError> {
        let json = match std::fs::read_to_string(self.path(key, kind)) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };
        match serde_json::from_str(&json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, kind, error = %e, "discarding unreadable cache entry");
                self.remove(key, kind)?;
                Ok(None)
            }
        }
    }

    fn write<T: serde::Serialize>(&self, key: &str, kind: &str, value: &T) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        let path = self.path(key, kind);
        let tmp = path.with_extension("json.tmp");
        let io = |source| CacheError::Io {
            key: key.to_string(),
            source,
        };
        std::fs::write(&tmp, json).map_err(io)?;
        std::fs::rename(&tmp, &path).map_err(io)
    }

    fn remove(&self, key: &str, kind: &str) -> Result<(), CacheError> {
        match std::fs::remove_file(self.path(key, kind)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

fn entry_file_name(key: &str, kind: &str) -> String {
    let digest = blake3::hash(key.as_bytes()).to_hex();
    format!(
        "{kind}-{}-{}.json",
        generate_identifier(key),
        &digest.as_str()[..16]
    )
}

const DATASET_KIND: &str = "dataset";
const BATCH_KIND: &str = "batch";

impl AggregationCache for JsonFileAggregationCache {
    fn dataset_aggregations(
        &self,
        specification_id: &str,
    ) -> Result<Option<AggregationSet>, CacheError> {
        self.read(&dataset_key(specification_id), DATASET_KIND)
    }

    fn set_dataset_aggregations(
        &self,
        specification_id: &str,
        aggregations: &AggregationSet,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(&dataset_key(specification_id), DATASET_KIND, aggregations)
    }

    fn invalidate_dataset_aggregations(&self, specification_id: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove(&dataset_key(specification_id), DATASET_KIND)
    }

    fn batch_values(
        &self,
        specification_id: &str,
        batch: usize,
    ) -> Result<Option<BatchValues>, CacheError> {
        self.read(&batch_key(specification_id, batch), BATCH_KIND)
    }

    fn merge_batch_values(
        &self,
        specification_id: &str,
        batch: usize,
        values: &BatchValues,
    ) -> Result<(), CacheError> {
        let key = batch_key(specification_id, batch);
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut merged: BatchValues = self.read(&key, BATCH_KIND)?.unwrap_or_default();
        merged.concat(values);
        self.write(&key, BATCH_KIND, &merged)
    }

    fn remove_batch_values(&self, specification_id: &str, batch: usize) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove(&batch_key(specification_id, batch), BATCH_KIND)
    }
}
