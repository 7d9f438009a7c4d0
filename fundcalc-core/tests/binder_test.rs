//! Integration tests for binding and executing a model end to end.
//!
//! Tests:
//! 1. Calculations read bound rows, provider attributes and aggregates
//! 2. Unused relationships are usable empty instances
//! 3. Binder errors name the offending dataset
//! 4. Model-level failures stay on the failing calculation

use rust_decimal::Decimal;
use std::sync::Arc;

use fundcalc_core::aggregation::{summarize, AggregationSet, AggregationType};
use fundcalc_core::binder::{bind_model, BindError};
use fundcalc_core::domain::{
    row, CalculationMetadata, DatasetRelationshipRecord, Granularity, ProviderSummary,
    ScalarValue,
};
use fundcalc_core::executor::execute;
use fundcalc_core::model::{
    checked_div, CalculationError, ModelDefinition, ModelSchema, RelationshipSlotSchema,
    RowShape, ScalarType,
};

/// Helper: a two-relationship pupil funding model.
fn pupil_model() -> ModelDefinition {
    let schema = ModelSchema::new()
        .with_shape(
            RowShape::new("PupilNumbers")
                .field("Pupils", ScalarType::Int32)
                .field("Rate", ScalarType::Decimal),
        )
        .with_shape(RowShape::new("Sites").field("Area", ScalarType::Decimal))
        .with_slot(RelationshipSlotSchema::new(
            "rel-pupils",
            "Pupils",
            "PupilNumbers",
            Granularity::SingleRowPerProvider,
        ))
        .with_slot(RelationshipSlotSchema::new(
            "rel-sites",
            "Sites",
            "Sites",
            Granularity::MultipleRowsPerProvider,
        ))
        .with_all_provider_attributes();

    ModelDefinition::builder("spec-1")
        .schema(schema)
        .calculation(CalculationMetadata::new("c1", "Pupil Led"), |m| {
            let row = m.datasets().single("Pupils")?;
            Ok(Decimal::from(row.int32("Pupils")?) * row.decimal("Rate")?)
        })
        .calculation(CalculationMetadata::new("c2", "Site Area"), |m| {
            m.datasets()
                .many("Sites")?
                .iter()
                .try_fold(Decimal::ZERO, |acc, site| site.decimal("Area").map(|area| acc + area))
        })
        .calculation(CalculationMetadata::new("c3", "Share Of Total"), |m| {
            let total = m.aggregate("Datasets.Pupils.Pupils", AggregationType::Sum)?;
            let pupils = m.datasets().single("Pupils")?.decimal("Pupils")?;
            checked_div(pupils, total)
        })
        .calculation(CalculationMetadata::new("c4", "Is Academy"), |m| {
            let kind = m.provider().text("ProviderType")?;
            Ok(if kind == "Academy" { Decimal::ONE } else { Decimal::ZERO })
        })
        .build()
        .unwrap()
}

fn pupils(count: i64, rate: Decimal) -> DatasetRelationshipRecord {
    DatasetRelationshipRecord::new("rel-pupils", "Pupils", "PupilNumbers", Granularity::SingleRowPerProvider)
        .with_row(row([
            ("Pupils", ScalarValue::Integer(count)),
            ("Rate", ScalarValue::Number(rate)),
        ]))
}

fn aggregates(total_pupils: i64) -> Arc<AggregationSet> {
    Arc::new(AggregationSet::from_values(summarize(
        "Datasets.Pupils.Pupils",
        &[Decimal::from(total_pupils)],
    )))
}

// ── 1. Reading bound data ────────────────────────────────────────────

#[test]
fn calculations_read_rows_provider_and_aggregates() {
    let model = pupil_model();
    let mut provider = ProviderSummary::new("p1");
    provider.provider_type = Some("Academy".into());
    let sites = DatasetRelationshipRecord::new("rel-sites", "Sites", "Sites", Granularity::MultipleRowsPerProvider)
        .with_row(row([("Area", ScalarValue::Text("10.5".into()))]))
        .with_row(row([("Area", ScalarValue::Integer(4))]));

    let instance = bind_model(
        &model,
        &[pupils(20, Decimal::new(1000, 1)), sites],
        &provider,
        aggregates(80),
    )
    .unwrap();
    let results = execute(&model, &instance);

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].value, Decimal::from(2000));
    assert_eq!(results[1].value, Decimal::new(145, 1));
    assert_eq!(results[2].value, Decimal::new(25, 2));
    assert_eq!(results[3].value, Decimal::ONE);
    assert!(results.iter().all(|r| !r.has_exception()));
}

// ── 2. Unused relationships ──────────────────────────────────────────

#[test]
fn unused_relationships_are_empty_not_missing() {
    let model = pupil_model();
    let instance = bind_model(&model, &[], &ProviderSummary::new("p1"), aggregates(10)).unwrap();
    let results = execute(&model, &instance);

    assert_eq!(results[0].value, Decimal::ZERO);
    assert_eq!(results[1].value, Decimal::ZERO);
    assert_eq!(results[2].value, Decimal::ZERO);
    assert!(results.iter().all(|r| !r.has_exception()));
}

// ── 3. Binder errors ─────────────────────────────────────────────────

#[test]
fn undeclared_dataset_type_names_the_dataset() {
    let model = pupil_model();
    let record = DatasetRelationshipRecord::new("rel-x", "Pupils", "HighNeeds", Granularity::SingleRowPerProvider);

    let err = bind_model(&model, &[record], &ProviderSummary::new("p1"), aggregates(1)).unwrap_err();
    assert_eq!(
        err,
        BindError::DatasetNotImplemented {
            dataset: "HighNeeds".into()
        }
    );
    assert!(err.to_string().contains("HighNeeds"));
}

#[test]
fn record_for_another_declared_type_is_rejected_by_its_slot() {
    // GIVEN: a Pupils record that claims to carry Sites rows
    let model = pupil_model();
    let record = DatasetRelationshipRecord::new("rel-pupils", "Pupils", "Sites", Granularity::SingleRowPerProvider)
        .with_row(row([("Area", ScalarValue::Integer(7))]));

    // WHEN: it is bound
    let err = bind_model(&model, &[record], &ProviderSummary::new("p1"), aggregates(1)).unwrap_err();

    // THEN: the slot keeps its declared type and the error names the relationship
    assert_eq!(
        err,
        BindError::DefinitionMismatch {
            relationship: "Pupils".into(),
            expected: "PupilNumbers".into(),
            found: "Sites".into(),
        }
    );
    assert!(err.to_string().contains("'Pupils'"));
}

// ── 4. Failure isolation ─────────────────────────────────────────────

#[test]
fn missing_aggregate_fails_only_its_calculation() {
    let model = pupil_model();
    let instance = bind_model(
        &model,
        &[pupils(5, Decimal::ONE)],
        &ProviderSummary::new("p1"),
        Arc::new(AggregationSet::new()),
    )
    .unwrap();
    let results = execute(&model, &instance);

    assert_eq!(results[0].value, Decimal::from(5));
    assert_eq!(results[2].exception_type.as_deref(), Some("AggregateNotFound"));
    assert!(results[2]
        .exception_message
        .as_deref()
        .is_some_and(|m| m.contains("Datasets.Pupils.Pupils")));
    assert!(!results[3].has_exception());
}

#[test]
fn zero_total_is_a_recorded_divide_by_zero() {
    let model = pupil_model();
    let instance = bind_model(&model, &[pupils(5, Decimal::ONE)], &ProviderSummary::new("p1"), aggregates(0)).unwrap();
    let results = execute(&model, &instance);

    assert!(matches!(
        results[2].exception_type.as_deref(),
        Some(kind) if kind == CalculationError::DivideByZero.kind()
    ));
}
