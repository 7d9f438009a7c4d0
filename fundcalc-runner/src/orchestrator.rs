//! Batch Orchestrator — drives one calculation run over a provider population.
//!
//! Per run:
//! 1. load calculation summaries and the Model Definition
//! 2. load (or compute) dataset aggregations
//! 3. per chunk of `batch_size` providers: fetch datasets on the fetch pool,
//!    build this batch's aggregates, bind + execute on the calculation pool,
//!    record exceptions and batch aggregates, then persist/cache/discard
//! 4. report the outcome
//!
//! Calculation exceptions are isolated per calculation and only fail the run
//! after every chunk has been processed. Anything else is fatal at once.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use fundcalc_core::aggregation::AggregationSet;
use fundcalc_core::binder::{bind_model, BindError};
use fundcalc_core::domain::{
    CalculationIdentity, DatasetRelationshipRecord, ProviderResult, ProviderSummary,
};
use fundcalc_core::executor::execute;
use fundcalc_core::model::ModelDefinition;

use crate::aggregation::{AggregationError, RunAggregationContext};
use crate::aggregation_cache::{AggregationCache, InMemoryAggregationCache};
use crate::config::{ConfigError, RunConfig, RunMode};
use crate::result_cache::ResultCache;
use crate::sink::{JobProgress, JobStatusSink, LoggingStatusSink, ResultSink};
use crate::sources::{
    CalculationSummarySource, DatasetTableSource, ModelDefinitionSource, ProviderDatasetSource,
    SourceError,
};

/// Fatal run errors.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("job '{0}' has no providers to calculate")]
    NoProviders(String),
    #[error("calculation summaries for specification '{specification_id}' unavailable: {source}")]
    CalculationSummaries {
        specification_id: String,
        #[source]
        source: SourceError,
    },
    #[error("model definition for specification '{0}' has not been compiled")]
    ModelDefinitionMissing(String),
    #[error("model definition for specification '{specification_id}' unavailable: {source}")]
    ModelDefinition {
        specification_id: String,
        #[source]
        source: SourceError,
    },
    #[error("provider datasets for batch {batch} unavailable: {source}")]
    DatasetFetch {
        batch: usize,
        #[source]
        source: SourceError,
    },
    #[error("provider datasets missing for provider '{provider_id}'")]
    ProviderDatasetsMissing { provider_id: String },
    #[error("binding provider '{provider_id}' failed: {source}")]
    Bind {
        provider_id: String,
        #[source]
        source: BindError,
    },
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("run mode 'cache' requires a provider result cache")]
    ResultCacheUnavailable,
    #[error("saving provider results of partition {partition} failed: {message}")]
    Save { partition: usize, message: String },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
    #[error("calculation run for specification '{}' had exceptions: {}", .0.specification_id, .0.outcome)]
    CalculationExceptions(Box<RunSummary>),
}

impl RunError {
    /// Whether redelivering the run may succeed.
    ///
    /// Only transient infrastructure misses qualify: a model that has not
    /// been compiled yet or a source that is temporarily unavailable.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ModelDefinitionMissing(_) => true,
            Self::ModelDefinition { source, .. } | Self::DatasetFetch { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

/// One calculation job over a provider population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRun {
    pub job_id: String,
    pub specification_id: String,
    pub providers: Vec<ProviderSummary>,
}

/// Outcome counts of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job_id: String,
    pub specification_id: String,
    pub batches: usize,
    pub items_processed: usize,
    /// Provider results without any calculation exception.
    pub items_succeeded: usize,
    /// Provider results with at least one calculation exception.
    pub items_failed: usize,
    pub provider_results: usize,
    pub had_exceptions: bool,
    pub outcome: String,
}

/// External collaborators one run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub datasets: Arc<dyn ProviderDatasetSource>,
    pub summaries: Arc<dyn CalculationSummarySource>,
    pub models: Arc<dyn ModelDefinitionSource>,
    pub tables: Arc<dyn DatasetTableSource>,
    pub aggregation_cache: Arc<dyn AggregationCache>,
    pub results: Arc<dyn ResultSink>,
    pub status: Arc<dyn JobStatusSink>,
    pub result_cache: Option<ResultCache>,
}

impl Collaborators {
    /// All four sources from one implementation, an in-memory aggregation
    /// cache and a logging status sink.
    pub fn new<S>(sources: Arc<S>, results: Arc<dyn ResultSink>) -> Self
    where
        S: ProviderDatasetSource
            + CalculationSummarySource
            + ModelDefinitionSource
            + DatasetTableSource
            + 'static,
    {
        let datasets: Arc<dyn ProviderDatasetSource> = sources.clone();
        let summaries: Arc<dyn CalculationSummarySource> = sources.clone();
        let models: Arc<dyn ModelDefinitionSource> = sources.clone();
        let tables: Arc<dyn DatasetTableSource> = sources;
        Self {
            datasets,
            summaries,
            models,
            tables,
            aggregation_cache: Arc::new(InMemoryAggregationCache::new()),
            results,
            status: Arc::new(LoggingStatusSink),
            result_cache: None,
        }
    }

    pub fn with_status(mut self, status: Arc<dyn JobStatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn with_aggregation_cache(mut self, cache: Arc<dyn AggregationCache>) -> Self {
        self.aggregation_cache = cache;
        self
    }

    pub fn with_result_cache(mut self, cache: ResultCache) -> Self {
        self.result_cache = Some(cache);
        self
    }
}

/// Contiguous chunks of at most `size` items; the last may be shorter.
pub fn partition<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

pub struct Orchestrator {
    collaborators: Collaborators,
}

/// Mutable tallies carried across chunks.
#[derive(Default)]
struct Tally {
    processed: usize,
    succeeded: usize,
    failed: usize,
    saved: usize,
    had_exceptions: bool,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Execute a run. The job status sink always receives a completion.
    pub fn run(&self, config: &RunConfig, run: &CalculationRun) -> Result<RunSummary, RunError> {
        let outcome = self.run_chunks(config, run);
        let completion = match &outcome {
            Ok(summary) => JobProgress::completed(
                &run.job_id,
                summary.items_processed,
                summary.items_succeeded,
                summary.items_failed,
                true,
                summary.outcome.clone(),
            ),
            Err(RunError::CalculationExceptions(summary)) => JobProgress::completed(
                &run.job_id,
                summary.items_processed,
                summary.items_succeeded,
                summary.items_failed,
                false,
                summary.outcome.clone(),
            ),
            Err(err) => {
                error!(job_id = %run.job_id, error = %err, retriable = err.is_retriable(), "calculation run failed");
                JobProgress::completed(&run.job_id, 0, 0, 0, false, err.to_string())
            }
        };
        self.collaborators.status.notify(&completion);
        outcome
    }

    fn run_chunks(&self, config: &RunConfig, run: &CalculationRun) -> Result<RunSummary, RunError> {
        config.validate()?;
        if run.providers.is_empty() {
            return Err(RunError::NoProviders(run.job_id.clone()));
        }
        if config.mode == RunMode::Cache && self.collaborators.result_cache.is_none() {
            return Err(RunError::ResultCacheUnavailable);
        }
        let spec = run.specification_id.as_str();

        let identities = self
            .collaborators
            .summaries
            .calculation_summaries(spec)
            .map_err(|source| RunError::CalculationSummaries {
                specification_id: spec.to_string(),
                source,
            })?;
        let model = self
            .collaborators
            .models
            .model_definition(spec)
            .map_err(|source| RunError::ModelDefinition {
                specification_id: spec.to_string(),
                source,
            })?
            .ok_or_else(|| RunError::ModelDefinitionMissing(spec.to_string()))?;

        let chunks = partition(&run.providers, config.batch_size);
        info!(
            job_id = %run.job_id,
            specification_id = spec,
            providers = run.providers.len(),
            batches = chunks.len(),
            calculations = model.calculations().len(),
            config = %config.fingerprint(),
            "starting calculation run"
        );

        let aggregation = RunAggregationContext::new(
            spec,
            &config.aggregate_calculations,
            Arc::clone(&self.collaborators.aggregation_cache),
        );
        aggregation.reset(chunks.len())?;
        let dataset_aggregations =
            aggregation.dataset_aggregations(self.collaborators.tables.as_ref())?;

        let fetch_pool = build_pool(config.dataset_fetch_parallelism)?;
        let calc_pool = build_pool(config.max_parallelism)?;
        let relationship_ids = model.schema().relationship_ids();
        let total = run.providers.len();
        let mut tally = Tally::default();

        for (index, chunk) in chunks.iter().enumerate() {
            let batch = index + 1;
            let started = Instant::now();

            let datasets = self.fetch_datasets(
                &fetch_pool,
                chunk,
                &relationship_ids,
                config.dataset_fetch_parallelism,
                batch,
            )?;
            if let Some(missing) = chunk.iter().find(|p| !datasets.contains_key(&p.id)) {
                return Err(RunError::ProviderDatasetsMissing {
                    provider_id: missing.id.clone(),
                });
            }

            let aggregations =
                Arc::new(aggregation.aggregations_for_batch(batch, &dataset_aggregations)?);
            let results: Vec<ProviderResult> = calc_pool.install(|| {
                chunk
                    .par_iter()
                    .map(|provider| {
                        let records = datasets.get(&provider.id).map_or(&[][..], Vec::as_slice);
                        calculate_provider(
                            &model,
                            provider,
                            records,
                            Arc::clone(&aggregations),
                            &identities,
                            spec,
                        )
                    })
                    .collect::<Result<Vec<_>, RunError>>()
            })?;

            for result in &results {
                tally.processed += 1;
                if result.has_exceptions() {
                    tally.failed += 1;
                    tally.had_exceptions = true;
                    for failure in result.exceptions() {
                        error!(
                            specification_id = spec,
                            batch,
                            provider_id = %result.provider.id,
                            calculation_id = %failure.calculation.id,
                            exception_type = failure.exception_type.as_deref().unwrap_or(""),
                            message = failure.exception_message.as_deref().unwrap_or(""),
                            "calculation exception"
                        );
                    }
                } else {
                    tally.succeeded += 1;
                }
            }

            aggregation.record_batch(batch, &results)?;
            self.store(config, index, &results, &mut tally, total)?;

            info!(
                specification_id = spec,
                batch,
                providers = chunk.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "batch calculated"
            );
            self.collaborators
                .status
                .notify(&JobProgress::in_progress(&run.job_id, tally.processed));
        }

        let summary = RunSummary {
            job_id: run.job_id.clone(),
            specification_id: spec.to_string(),
            batches: chunks.len(),
            items_processed: tally.processed,
            items_succeeded: tally.succeeded,
            items_failed: tally.failed,
            provider_results: tally.processed,
            had_exceptions: tally.had_exceptions,
            outcome: if tally.had_exceptions {
                format!(
                    "{} of {} provider results recorded calculation exceptions",
                    tally.failed, tally.processed
                )
            } else {
                format!(
                    "{} provider results were generated successfully from {} providers",
                    tally.succeeded, tally.processed
                )
            },
        };

        if summary.had_exceptions {
            warn!(specification_id = spec, outcome = %summary.outcome, "calculation run completed with exceptions");
            return Err(RunError::CalculationExceptions(Box::new(summary)));
        }
        info!(specification_id = spec, outcome = %summary.outcome, "calculation run completed");
        Ok(summary)
    }

    /// Fetch a chunk's datasets in `parallelism` concurrent requests.
    fn fetch_datasets(
        &self,
        pool: &rayon::ThreadPool,
        chunk: &[ProviderSummary],
        relationship_ids: &[String],
        parallelism: usize,
        batch: usize,
    ) -> Result<HashMap<String, Vec<DatasetRelationshipRecord>>, RunError> {
        let ids: Vec<String> = chunk.iter().map(|p| p.id.clone()).collect();
        let per_request = ids.len().div_ceil(parallelism.max(1)).max(1);
        let source = self.collaborators.datasets.as_ref();

        let maps = pool
            .install(|| {
                ids.par_chunks(per_request)
                    .map(|group| source.provider_datasets(group, relationship_ids))
                    .collect::<Result<Vec<_>, SourceError>>()
            })
            .map_err(|source| RunError::DatasetFetch { batch, source })?;

        Ok(maps.into_iter().flatten().collect())
    }

    /// Hand a chunk's results to the sink, the result cache, or nowhere.
    fn store(
        &self,
        config: &RunConfig,
        partition_index: usize,
        results: &[ProviderResult],
        tally: &mut Tally,
        total: usize,
    ) -> Result<(), RunError> {
        match config.mode {
            RunMode::Persist => {
                self.collaborators
                    .results
                    .save_provider_results(
                        results,
                        partition_index,
                        config.batch_size,
                        config.max_parallelism,
                    )
                    .map_err(|e| RunError::Save {
                        partition: partition_index,
                        message: format!("{e:#}"),
                    })?;
                tally.saved += results.len();
                let percentage = tally.saved as f64 / total as f64 * 100.0;
                info!(
                    saved = tally.saved,
                    total,
                    percentage = %format!("{percentage:.1}"),
                    "provider results saved"
                );
            }
            RunMode::Cache => {
                let cache = self
                    .collaborators
                    .result_cache
                    .as_ref()
                    .ok_or(RunError::ResultCacheUnavailable)?;
                for result in results {
                    cache.put(result).map_err(|e| RunError::Save {
                        partition: partition_index,
                        message: format!("{e:#}"),
                    })?;
                }
                debug!(cached = results.len(), "provider results cached");
            }
            RunMode::DryRun => {
                debug!(discarded = results.len(), "dry run, provider results discarded");
            }
        }
        Ok(())
    }
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool, RunError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| RunError::ThreadPool(e.to_string()))
}

fn calculate_provider(
    model: &ModelDefinition,
    provider: &ProviderSummary,
    records: &[DatasetRelationshipRecord],
    aggregations: Arc<AggregationSet>,
    identities: &[CalculationIdentity],
    specification_id: &str,
) -> Result<ProviderResult, RunError> {
    let instance =
        bind_model(model, records, provider, aggregations).map_err(|source| RunError::Bind {
            provider_id: provider.id.clone(),
            source,
        })?;
    let results = execute(model, &instance);
    Ok(ProviderResult::assemble(
        provider.clone(),
        specification_id,
        results,
        identities,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_sizes() {
        let items: Vec<u32> = (0..20).collect();
        let sizes: Vec<usize> = partition(&items, 3).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 3, 3, 3, 2]);
        assert_eq!(partition(&items, 20).len(), 1);
        assert_eq!(partition(&items, 50).len(), 1);
        assert!(partition::<u32>(&[], 3).is_empty());
    }

    #[test]
    fn retriable_classification() {
        assert!(RunError::ModelDefinitionMissing("s".into()).is_retriable());
        assert!(RunError::DatasetFetch {
            batch: 1,
            source: SourceError::Unavailable("timeout".into())
        }
        .is_retriable());
        assert!(!RunError::ProviderDatasetsMissing {
            provider_id: "p".into()
        }
        .is_retriable());
        assert!(!RunError::CalculationSummaries {
            specification_id: "s".into(),
            source: SourceError::Unavailable("timeout".into())
        }
        .is_retriable());
    }
}
