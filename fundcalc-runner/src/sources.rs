//! External collaborator traits the orchestrator reads its inputs from,
//! plus an in-memory implementation of all of them.
//!
//! The traits abstract over the real stores (dataset service, specification
//! service, compiled-model store) so the orchestrator can be driven from
//! files in the CLI and from fixtures in tests.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use fundcalc_core::aggregation::DatasetTable;
use fundcalc_core::domain::{CalculationIdentity, DatasetRelationshipRecord};
use fundcalc_core::model::ModelDefinition;

/// Structured errors from collaborator calls.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("specification '{0}' not found")]
    SpecificationNotFound(String),
    #[error("source returned invalid data: {0}")]
    Invalid(String),
}

impl SourceError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Per-provider dataset relationship rows.
pub trait ProviderDatasetSource: Send + Sync {
    /// Must contain an entry, possibly empty, for every requested provider.
    fn provider_datasets(
        &self,
        provider_ids: &[String],
        relationship_ids: &[String],
    ) -> Result<HashMap<String, Vec<DatasetRelationshipRecord>>, SourceError>;
}

/// The calculation identities a specification declares.
pub trait CalculationSummarySource: Send + Sync {
    fn calculation_summaries(
        &self,
        specification_id: &str,
    ) -> Result<Vec<CalculationIdentity>, SourceError>;
}

/// The compiled Model Definition of a specification.
pub trait ModelDefinitionSource: Send + Sync {
    /// `Ok(None)` when the model has not been compiled yet.
    fn model_definition(
        &self,
        specification_id: &str,
    ) -> Result<Option<Arc<ModelDefinition>>, SourceError>;
}

/// Full dataset tables of a specification, for dataset aggregations.
pub trait DatasetTableSource: Send + Sync {
    fn dataset_tables(&self, specification_id: &str) -> Result<Vec<DatasetTable>, SourceError>;
}

// ─── In-memory implementation ────────────────────────────────────────

/// Fixture-backed implementation of every source trait.
///
/// Dataset lookups return exactly the providers that were registered, so a
/// provider missing here surfaces as a missing entry to the orchestrator.
#[derive(Debug, Default, Clone)]
pub struct InMemorySources {
    datasets: HashMap<String, Vec<DatasetRelationshipRecord>>,
    summaries: HashMap<String, Vec<CalculationIdentity>>,
    models: HashMap<String, Arc<ModelDefinition>>,
    tables: HashMap<String, Vec<DatasetTable>>,
}

impl InMemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's relationship records (may be empty).
    pub fn with_provider(
        mut self,
        provider_id: impl Into<String>,
        records: Vec<DatasetRelationshipRecord>,
    ) -> Self {
        self.datasets.insert(provider_id.into(), records);
        self
    }

    /// Register a model; its calculation identities become the summaries
    /// unless set explicitly.
    pub fn with_model(mut self, model: ModelDefinition) -> Self {
        let spec = model.specification_id().to_string();
        self.summaries
            .entry(spec.clone())
            .or_insert_with(|| model.calculation_identities());
        self.models.insert(spec, Arc::new(model));
        self
    }

    pub fn with_summaries(
        mut self,
        specification_id: impl Into<String>,
        summaries: Vec<CalculationIdentity>,
    ) -> Self {
        self.summaries.insert(specification_id.into(), summaries);
        self
    }

    pub fn with_tables(
        mut self,
        specification_id: impl Into<String>,
        tables: Vec<DatasetTable>,
    ) -> Self {
        self.tables.insert(specification_id.into(), tables);
        self
    }
}

impl ProviderDatasetSource for InMemorySources {
    fn provider_datasets(
        &self,
        provider_ids: &[String],
        relationship_ids: &[String],
    ) -> Result<HashMap<String, Vec<DatasetRelationshipRecord>>, SourceError> {
        Ok(provider_ids
            .iter()
            .filter_map(|id| {
                self.datasets.get(id).map(|records| {
                    let records = records
                        .iter()
                        .filter(|r| relationship_ids.contains(&r.relationship_id))
                        .cloned()
                        .collect();
                    (id.clone(), records)
                })
            })
            .collect())
    }
}

impl CalculationSummarySource for InMemorySources {
    fn calculation_summaries(
        &self,
        specification_id: &str,
    ) -> Result<Vec<CalculationIdentity>, SourceError> {
        self.summaries
            .get(specification_id)
            .cloned()
            .ok_or_else(|| SourceError::SpecificationNotFound(specification_id.to_string()))
    }
}

impl ModelDefinitionSource for InMemorySources {
    fn model_definition(
        &self,
        specification_id: &str,
    ) -> Result<Option<Arc<ModelDefinition>>, SourceError> {
        Ok(self.models.get(specification_id).cloned())
    }
}

impl DatasetTableSource for InMemorySources {
    fn dataset_tables(&self, specification_id: &str) -> Result<Vec<DatasetTable>, SourceError> {
        Ok(self.tables.get(specification_id).cloned().unwrap_or_default())
    }
}
