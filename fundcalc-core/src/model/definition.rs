//! Model Definition: schema plus the ordered calculation registration table.

use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::domain::{CalculationIdentity, CalculationMetadata};

use super::calculation::{Calculation, CalculationError};
use super::instance::ModelInstance;
use super::schema::{ModelSchema, SchemaError};

/// One registered calculation entry point.
#[derive(Clone)]
pub struct CalculationEntry {
    pub metadata: CalculationMetadata,
    calculation: Arc<dyn Calculation>,
}

impl CalculationEntry {
    pub fn new(metadata: CalculationMetadata, calculation: Arc<dyn Calculation>) -> Self {
        Self {
            metadata,
            calculation,
        }
    }

    pub fn id(&self) -> &str {
        self.metadata.id()
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn evaluate(&self, model: &ModelInstance) -> Result<Decimal, CalculationError> {
        self.calculation.evaluate(model)
    }
}

impl fmt::Debug for CalculationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationEntry")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A loaded calculation model for one specification.
///
/// Read-only once built; shared across all provider executions of a run.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    specification_id: String,
    schema: Arc<ModelSchema>,
    calculations: Vec<CalculationEntry>,
}

impl ModelDefinition {
    pub fn builder(specification_id: impl Into<String>) -> ModelDefinitionBuilder {
        ModelDefinitionBuilder {
            specification_id: specification_id.into(),
            schema: ModelSchema::default(),
            calculations: Vec::new(),
        }
    }

    pub fn specification_id(&self) -> &str {
        &self.specification_id
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    /// Entry points in registration order.
    pub fn calculations(&self) -> &[CalculationEntry] {
        &self.calculations
    }

    pub fn calculation_identities(&self) -> Vec<CalculationIdentity> {
        self.calculations
            .iter()
            .map(|c| c.metadata.identity.clone())
            .collect()
    }
}

/// Builder that registers entry points in a fixed order.
pub struct ModelDefinitionBuilder {
    specification_id: String,
    schema: ModelSchema,
    calculations: Vec<CalculationEntry>,
}

impl ModelDefinitionBuilder {
    pub fn schema(mut self, schema: ModelSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Register a calculation written as a closure over the model instance.
    pub fn calculation<F>(self, metadata: impl Into<CalculationMetadata>, f: F) -> Self
    where
        F: Fn(&ModelInstance) -> Result<Decimal, CalculationError> + Send + Sync + 'static,
    {
        self.entry(metadata, Arc::new(f))
    }

    /// Register a calculation implemented as a trait object.
    pub fn entry(
        mut self,
        metadata: impl Into<CalculationMetadata>,
        calculation: Arc<dyn Calculation>,
    ) -> Self {
        self.calculations
            .push(CalculationEntry::new(metadata.into(), calculation));
        self
    }

    pub fn build(self) -> Result<ModelDefinition, SchemaError> {
        self.schema.validate()?;

        let mut seen = HashSet::new();
        for entry in &self.calculations {
            if !seen.insert(entry.id()) {
                return Err(SchemaError::DuplicateCalculation(entry.id().to_string()));
            }
        }

        Ok(ModelDefinition {
            specification_id: self.specification_id,
            schema: Arc::new(self.schema),
            calculations: self.calculations,
        })
    }
}
