//! FundCalc Runner — calculation run orchestration on top of `fundcalc-core`.
//!
//! This crate provides:
//! - Run configuration loaded from TOML
//! - Collaborator traits for provider datasets, calculation summaries,
//!   compiled models and dataset tables, with in-memory implementations
//! - Aggregation caches (in-memory and JSON files) and the run-scoped
//!   aggregation context
//! - Result and job-status sinks, plus a provider result cache
//! - The Batch Orchestrator

pub mod aggregation;
pub mod aggregation_cache;
pub mod config;
pub mod orchestrator;
pub mod result_cache;
pub mod sink;
pub mod sources;

pub use aggregation::{AggregationError, RunAggregationContext};
pub use aggregation_cache::{
    batch_key, dataset_key, AggregationCache, CacheError, InMemoryAggregationCache,
    JsonFileAggregationCache,
};
pub use config::{ConfigError, RunConfig, RunMode};
pub use orchestrator::{partition, CalculationRun, Collaborators, Orchestrator, RunError, RunSummary};
pub use result_cache::ResultCache;
pub use sink::{
    JobProgress, JobStatusSink, JsonDirectoryResultSink, LoggingStatusSink, RecordingResultSink,
    RecordingStatusSink, ResultSink, SaveCall,
};
pub use sources::{
    CalculationSummarySource, DatasetTableSource, InMemorySources, ModelDefinitionSource,
    ProviderDatasetSource, SourceError,
};
