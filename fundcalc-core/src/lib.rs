//! FundCalc Core — the calculation execution core.
//!
//! This crate is pure and synchronous; all I/O lives in `fundcalc-runner`:
//! - Domain types (provider summaries, dataset records, calculation and
//!   provider results)
//! - Model Definition: declarative schema plus an ordered registration
//!   table of calculation entry points
//! - Dynamic Model Binder: schema-driven binding of rows and provider
//!   attributes onto a model instance
//! - Calculation Executor: per-calculation fault isolation
//! - Aggregation math: Sum/Average/Min/Max over datasets and batch values

pub mod aggregation;
pub mod binder;
pub mod domain;
pub mod executor;
pub mod identifier;
pub mod model;

pub use aggregation::{AggregateValue, AggregationSet, AggregationType, BatchValues};
pub use binder::{bind_model, BindError};
pub use domain::{CalculationIdentity, CalculationResult, ProviderResult, ProviderSummary};
pub use executor::{execute, execute_iter};
pub use model::{ModelDefinition, ModelInstance};
