//! Dynamic Model Binder: schema-driven mapping of untyped dataset rows and
//! provider attributes onto one execution-ready [`ModelInstance`].
//!
//! Binding is a pure function of the [`ModelSchema`] and its inputs:
//! - each record is routed to the slot with the same relationship name and
//!   must carry that slot's dataset type
//! - each declared field is converted from its source column to its
//!   declared [`ScalarType`]; absent, null or blank cells keep the default
//! - every slot without input data gets its shape's empty instance
//! - recognized provider attributes are copied from the summary

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::aggregation::AggregationSet;
use crate::domain::{
    AttributeValue, DatasetRelationshipRecord, Granularity, ProviderAttribute, ProviderSummary,
    Row, ScalarValue,
};
use crate::model::{
    BoundProvider, BoundRow, BoundValue, Datasets, ModelDefinition, ModelInstance, ModelSchema,
    RelationshipSlot, RowShape, ScalarType,
};

/// Binding failures. All are fatal for the provider being bound.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("dataset type '{dataset}' is not implemented by the model")]
    DatasetNotImplemented { dataset: String },
    #[error("relationship '{relationship}' expects dataset type '{expected}' but received '{found}'")]
    DefinitionMismatch {
        relationship: String,
        expected: String,
        found: String,
    },
    #[error("failed to construct model instance: {}", causes.join("; "))]
    Construction { causes: Vec<String> },
}

/// Bind one provider's datasets and attributes against a Model Definition.
pub fn bind_model(
    definition: &ModelDefinition,
    records: &[DatasetRelationshipRecord],
    provider: &ProviderSummary,
    aggregations: Arc<AggregationSet>,
) -> Result<ModelInstance, BindError> {
    let schema = definition.schema();
    let datasets = bind_datasets(schema, records)?;
    let provider = bind_provider(schema, provider);
    Ok(ModelInstance::new(datasets, provider, aggregations))
}

/// Populate every declared relationship slot.
pub fn bind_datasets(
    schema: &ModelSchema,
    records: &[DatasetRelationshipRecord],
) -> Result<Datasets, BindError> {
    let mut slots = BTreeMap::new();
    let mut causes = Vec::new();

    for record in records {
        let Some(slot) = schema.slot(&record.relationship_name) else {
            debug!(
                relationship = %record.relationship_name,
                "relationship not declared by the model, ignoring"
            );
            continue;
        };
        let shape = shape_for(schema, &slot.dataset_type)?;
        if record.definition_name != slot.dataset_type {
            shape_for(schema, &record.definition_name)?;
            return Err(BindError::DefinitionMismatch {
                relationship: slot.name.clone(),
                expected: slot.dataset_type.clone(),
                found: record.definition_name.clone(),
            });
        }

        let mut rows = record
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| bind_row(shape, row, &record.relationship_name, index, &mut causes));

        let bound = match slot.granularity {
            Granularity::SingleRowPerProvider => {
                if record.rows.len() > 1 {
                    debug!(
                        relationship = %record.relationship_name,
                        rows = record.rows.len(),
                        "single-row relationship received several rows, binding the first"
                    );
                }
                RelationshipSlot::Single(rows.next().unwrap_or_else(|| shape.default_row()))
            }
            Granularity::MultipleRowsPerProvider => RelationshipSlot::Many(rows.collect()),
        };
        slots.insert(slot.name.clone(), bound);
    }

    if !causes.is_empty() {
        return Err(BindError::Construction { causes });
    }

    for slot in schema.slots() {
        if !slots.contains_key(&slot.name) {
            let shape = shape_for(schema, &slot.dataset_type)?;
            slots.insert(slot.name.clone(), slot.empty_slot(shape));
        }
    }

    Ok(Datasets::new(slots))
}

/// Copy the model's declared provider attributes from the summary.
///
/// Absent text reads as `""`, absent dates stay `None`. Declared names that
/// are not recognized attributes stay `Null`.
pub fn bind_provider(schema: &ModelSchema, provider: &ProviderSummary) -> BoundProvider {
    let attributes = schema
        .provider_attributes()
        .iter()
        .map(|name| {
            let value = match ProviderAttribute::from_name(name).map(|a| a.value(provider)) {
                Some(AttributeValue::Text(text)) => BoundValue::Text(text.unwrap_or("").to_string()),
                Some(AttributeValue::Date(date)) => BoundValue::Date(date),
                None => BoundValue::Null,
            };
            (name.clone(), value)
        })
        .collect();
    BoundProvider::new(provider.id.clone(), attributes)
}

fn shape_for<'a>(schema: &'a ModelSchema, dataset_type: &str) -> Result<&'a RowShape, BindError> {
    schema
        .shape(dataset_type)
        .ok_or_else(|| BindError::DatasetNotImplemented {
            dataset: dataset_type.to_string(),
        })
}

fn bind_row(
    shape: &RowShape,
    row: &Row,
    relationship: &str,
    index: usize,
    causes: &mut Vec<String>,
) -> BoundRow {
    let mut bound = shape.default_row();
    for field in &shape.fields {
        let Some(value) = row.get(&field.source_name) else {
            continue;
        };
        match convert(value, field.scalar_type) {
            Ok(Some(converted)) => bound.set(&field.name, converted),
            Ok(None) => {}
            Err(reason) => causes.push(format!(
                "{relationship} row {index} field '{}': {reason}",
                field.name
            )),
        }
    }
    bound
}

/// Convert a cell to the declared type. `Ok(None)` keeps the field default.
fn convert(value: &ScalarValue, target: ScalarType) -> Result<Option<BoundValue>, String> {
    if target == ScalarType::PassThrough {
        return Ok(Some(pass_through(value)));
    }
    if is_blank(value) {
        return Ok(None);
    }

    let number = value.as_decimal().ok_or_else(|| {
        format!("cannot convert {} value {} to {target:?}", value.kind(), display(value))
    })?;
    let converted = match target {
        ScalarType::Decimal => BoundValue::Decimal(number),
        ScalarType::Int32 => integral(number)
            .and_then(|n| n.to_i32())
            .map(BoundValue::Int32)
            .ok_or_else(|| format!("value {number} does not fit Int32"))?,
        ScalarType::Int64 => integral(number)
            .and_then(|n| n.to_i64())
            .map(BoundValue::Int64)
            .ok_or_else(|| format!("value {number} does not fit Int64"))?,
        ScalarType::PassThrough => pass_through(value),
    };
    Ok(Some(converted))
}

fn is_blank(value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Null => true,
        ScalarValue::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn integral(number: Decimal) -> Option<Decimal> {
    number.fract().is_zero().then_some(number)
}

fn pass_through(value: &ScalarValue) -> BoundValue {
    match value {
        ScalarValue::Null => BoundValue::Null,
        ScalarValue::Text(s) => BoundValue::Text(s.clone()),
        ScalarValue::Number(d) => BoundValue::Decimal(*d),
        ScalarValue::Integer(i) => BoundValue::Int64(*i),
        ScalarValue::Boolean(b) => BoundValue::Boolean(*b),
        ScalarValue::Date(d) => BoundValue::Date(Some(*d)),
    }
}

fn display(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Text(s) => format!("'{s}'"),
        ScalarValue::Boolean(b) => b.to_string(),
        ScalarValue::Date(d) => d.to_string(),
        other => format!("{other:?}"),
    }
}
