//! Declarative model schema, built once per Model Definition and shared
//! read-only by every provider binding in a run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::domain::{Granularity, ProviderAttribute};

use super::instance::{BoundRow, BoundValue, RelationshipSlot};

/// Errors raised while assembling a Model Definition.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("model schema is invalid: {}", causes.join("; "))]
    Invalid { causes: Vec<String> },
    #[error("calculation id '{0}' is registered more than once")]
    DuplicateCalculation(String),
}

/// Target type of a bound row field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Decimal,
    Int32,
    Int64,
    /// Keep the source value as delivered.
    PassThrough,
}

impl ScalarType {
    pub fn default_value(self) -> BoundValue {
        match self {
            Self::Decimal => BoundValue::Decimal(rust_decimal::Decimal::ZERO),
            Self::Int32 => BoundValue::Int32(0),
            Self::Int64 => BoundValue::Int64(0),
            Self::PassThrough => BoundValue::Null,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::PassThrough)
    }
}

/// One declared field on a row shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name calculations read.
    pub name: String,
    /// Column name in the dataset row contents.
    pub source_name: String,
    pub scalar_type: ScalarType,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        let name = name.into();
        Self {
            source_name: name.clone(),
            name,
            scalar_type,
        }
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }
}

/// Shape of the rows of one dataset definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowShape {
    pub dataset_type: String,
    pub fields: Vec<FieldSchema>,
}

impl RowShape {
    pub fn new(dataset_type: impl Into<String>) -> Self {
        Self {
            dataset_type: dataset_type.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(self, name: impl Into<String>, scalar_type: ScalarType) -> Self {
        self.with_field(FieldSchema::new(name, scalar_type))
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Factory for an empty row: every declared field at its type default.
    pub fn default_row(&self) -> BoundRow {
        BoundRow::new(
            self.dataset_type.clone(),
            self.fields
                .iter()
                .map(|f| (f.name.clone(), f.scalar_type.default_value()))
                .collect(),
        )
    }
}

/// A named relationship slot on the model's datasets container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSlotSchema {
    pub relationship_id: String,
    pub name: String,
    pub dataset_type: String,
    pub granularity: Granularity,
}

impl RelationshipSlotSchema {
    pub fn new(
        relationship_id: impl Into<String>,
        name: impl Into<String>,
        dataset_type: impl Into<String>,
        granularity: Granularity,
    ) -> Self {
        Self {
            relationship_id: relationship_id.into(),
            name: name.into(),
            dataset_type: dataset_type.into(),
            granularity,
        }
    }

    /// Factory for an unfilled slot: a default row or an empty list.
    pub fn empty_slot(&self, shape: &RowShape) -> RelationshipSlot {
        match self.granularity {
            Granularity::SingleRowPerProvider => RelationshipSlot::Single(shape.default_row()),
            Granularity::MultipleRowsPerProvider => RelationshipSlot::Many(Vec::new()),
        }
    }
}

/// The declarative schema of a calculation model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    shapes: Vec<RowShape>,
    slots: Vec<RelationshipSlotSchema>,
    provider_attributes: Vec<String>,
}

impl ModelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shape(mut self, shape: RowShape) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn with_slot(mut self, slot: RelationshipSlotSchema) -> Self {
        self.slots.push(slot);
        self
    }

    /// Declare provider attribute names the model's provider shape exposes.
    pub fn with_provider_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provider_attributes
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare every recognized provider attribute.
    pub fn with_all_provider_attributes(self) -> Self {
        self.with_provider_attributes(ProviderAttribute::ALL.iter().map(|a| a.name()))
    }

    pub fn shape(&self, dataset_type: &str) -> Option<&RowShape> {
        self.shapes.iter().find(|s| s.dataset_type == dataset_type)
    }

    pub fn slot(&self, name: &str) -> Option<&RelationshipSlotSchema> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn shapes(&self) -> &[RowShape] {
        &self.shapes
    }

    pub fn slots(&self) -> &[RelationshipSlotSchema] {
        &self.slots
    }

    pub fn provider_attributes(&self) -> &[String] {
        &self.provider_attributes
    }

    /// Relationship ids to request from the provider-dataset source.
    pub fn relationship_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.relationship_id.clone()).collect()
    }

    /// Check structural consistency, reporting every defect at once.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut causes = Vec::new();

        let mut shape_names = HashSet::new();
        for shape in &self.shapes {
            if !shape_names.insert(shape.dataset_type.as_str()) {
                causes.push(format!("dataset type '{}' declared twice", shape.dataset_type));
            }
            let mut field_names = HashSet::new();
            for field in &shape.fields {
                if !field_names.insert(field.name.as_str()) {
                    causes.push(format!(
                        "field '{}' declared twice on dataset type '{}'",
                        field.name, shape.dataset_type
                    ));
                }
            }
        }

        let mut slot_names = HashSet::new();
        for slot in &self.slots {
            if !slot_names.insert(slot.name.as_str()) {
                causes.push(format!("relationship slot '{}' declared twice", slot.name));
            }
            if !shape_names.contains(slot.dataset_type.as_str()) {
                causes.push(format!(
                    "relationship slot '{}' references undeclared dataset type '{}'",
                    slot.name, slot.dataset_type
                ));
            }
        }

        if causes.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid { causes })
        }
    }
}
