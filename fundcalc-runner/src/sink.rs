//! Result and job-status sinks.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

use fundcalc_core::domain::ProviderResult;

/// Destination for provider results of a persisted run.
pub trait ResultSink: Send + Sync {
    fn save_provider_results(
        &self,
        results: &[ProviderResult],
        partition_index: usize,
        partition_size: usize,
        degree_of_parallelism: usize,
    ) -> Result<()>;
}

/// One `save_provider_results` call as seen by [`RecordingResultSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCall {
    pub partition_index: usize,
    pub partition_size: usize,
    pub degree_of_parallelism: usize,
    pub result_count: usize,
}

/// Keeps every saved result in memory.
#[derive(Debug, Default)]
pub struct RecordingResultSink {
    calls: Mutex<Vec<SaveCall>>,
    results: Mutex<Vec<ProviderResult>>,
}

impl RecordingResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SaveCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn results(&self) -> Vec<ProviderResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResultSink for RecordingResultSink {
    fn save_provider_results(
        &self,
        results: &[ProviderResult],
        partition_index: usize,
        partition_size: usize,
        degree_of_parallelism: usize,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SaveCall {
                partition_index,
                partition_size,
                degree_of_parallelism,
                result_count: results.len(),
            });
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(results);
        Ok(())
    }
}

/// Writes each partition as `partition-<index>.json` under a directory.
///
/// The directory is created on the first save, so a run that saves nothing
/// leaves no trace.
#[derive(Debug, Clone)]
pub struct JsonDirectoryResultSink {
    dir: PathBuf,
}

impl JsonDirectoryResultSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn partition_path(&self, partition_index: usize) -> PathBuf {
        self.dir.join(format!("partition-{partition_index:05}.json"))
    }
}

impl ResultSink for JsonDirectoryResultSink {
    fn save_provider_results(
        &self,
        results: &[ProviderResult],
        partition_index: usize,
        _partition_size: usize,
        _degree_of_parallelism: usize,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create results directory {}", self.dir.display())
        })?;
        let json =
            serde_json::to_string_pretty(results).context("Failed to serialize provider results")?;
        let path = self.partition_path(partition_index);
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write provider results to {}", path.display()))?;
        Ok(())
    }
}

// ─── Job status ──────────────────────────────────────────────────────

/// Progress or outcome notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub items_processed: usize,
    pub items_succeeded: usize,
    pub items_failed: usize,
    /// Set on the final notification only.
    pub completed: bool,
    pub completed_successfully: Option<bool>,
    pub outcome: Option<String>,
}

impl JobProgress {
    pub fn in_progress(job_id: &str, items_processed: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            items_processed,
            items_succeeded: 0,
            items_failed: 0,
            completed: false,
            completed_successfully: None,
            outcome: None,
        }
    }

    pub fn completed(
        job_id: &str,
        items_processed: usize,
        items_succeeded: usize,
        items_failed: usize,
        success: bool,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            items_processed,
            items_succeeded,
            items_failed,
            completed: true,
            completed_successfully: Some(success),
            outcome: Some(outcome.into()),
        }
    }
}

/// Receives job progress and outcome notifications.
pub trait JobStatusSink: Send + Sync {
    fn notify(&self, progress: &JobProgress);
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    notifications: Mutex<Vec<JobProgress>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<JobProgress> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The last notification flagged `completed`.
    pub fn completion(&self) -> Option<JobProgress> {
        self.notifications()
            .into_iter()
            .rev()
            .find(|n| n.completed)
    }
}

impl JobStatusSink for RecordingStatusSink {
    fn notify(&self, progress: &JobProgress) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(progress.clone());
    }
}

/// Emits notifications as log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatusSink;

impl JobStatusSink for LoggingStatusSink {
    fn notify(&self, progress: &JobProgress) {
        info!(
            job_id = %progress.job_id,
            processed = progress.items_processed,
            succeeded = progress.items_succeeded,
            failed = progress.items_failed,
            completed = progress.completed,
            outcome = progress.outcome.as_deref().unwrap_or(""),
            "job progress"
        );
    }
}
