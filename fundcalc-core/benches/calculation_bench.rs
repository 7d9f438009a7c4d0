//! Criterion benchmarks for the per-provider hot path.
//!
//! Benchmarks:
//! 1. Binding a provider's datasets and attributes
//! 2. Executing the registered calculations on a bound instance
//! 3. Bind + execute + assemble over a provider population

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;
use std::sync::Arc;

use fundcalc_core::aggregation::{summarize, AggregationSet, AggregationType};
use fundcalc_core::binder::bind_model;
use fundcalc_core::domain::{
    row, CalculationMetadata, DatasetRelationshipRecord, Granularity, ProviderResult,
    ProviderSummary, ScalarValue,
};
use fundcalc_core::executor::execute;
use fundcalc_core::model::{
    checked_div, ModelDefinition, ModelSchema, RelationshipSlotSchema, RowShape, ScalarType,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_model(calculations: usize) -> ModelDefinition {
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

    (0..calculations)
        .fold(ModelDefinition::builder("bench").schema(schema), |builder, i| {
            builder.calculation(
                CalculationMetadata::new(format!("c{i:04}"), format!("Calc {i}")),
                move |m| {
                    let row = m.datasets().single("Pupils")?;
                    let area = m
                        .datasets()
                        .many("Sites")?
                        .iter()
                        .try_fold(Decimal::ZERO, |acc, s| s.decimal("Area").map(|a| acc + a))?;
                    let total = m.aggregate("Datasets.Pupils.Pupils", AggregationType::Sum)?;
                    let share = checked_div(row.decimal("Pupils")?, total)?;
                    Ok(share * row.decimal("Rate")? + area + Decimal::from(i))
                },
            )
        })
        .build()
        .expect("bench model is valid")
}

fn make_records(provider: usize) -> Vec<DatasetRelationshipRecord> {
    let pupils = DatasetRelationshipRecord::new(
        "rel-pupils",
        "Pupils",
        "PupilNumbers",
        Granularity::SingleRowPerProvider,
    )
    .with_row(row([
        ("Pupils", ScalarValue::Integer(100 + (provider % 400) as i64)),
        ("Rate", ScalarValue::Text("4123.50".into())),
    ]));
    let sites = (0..3).fold(
        DatasetRelationshipRecord::new("rel-sites", "Sites", "Sites", Granularity::MultipleRowsPerProvider),
        |record, s| record.with_row(row([("Area", ScalarValue::Number(Decimal::new(1500 + s, 1)))])),
    );
    vec![pupils, sites]
}

fn make_aggregations() -> Arc<AggregationSet> {
    Arc::new(AggregationSet::from_values(summarize(
        "Datasets.Pupils.Pupils",
        &[Decimal::from(250_000)],
    )))
}

// ── 1. Binding ───────────────────────────────────────────────────────

fn bench_bind(c: &mut Criterion) {
    let model = make_model(10);
    let records = make_records(7);
    let provider = ProviderSummary::new("p7").with_name("Oak Primary");
    let aggregations = make_aggregations();

    c.bench_function("bind_one_provider", |b| {
        b.iter(|| {
            bind_model(
                black_box(&model),
                black_box(&records),
                black_box(&provider),
                Arc::clone(&aggregations),
            )
        })
    });
}

// ── 2. Execution ─────────────────────────────────────────────────────

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let provider = ProviderSummary::new("p1");
    for calculations in [10, 100, 500] {
        let model = make_model(calculations);
        let instance = bind_model(&model, &make_records(1), &provider, make_aggregations())
            .expect("bench inputs bind");
        group.bench_with_input(
            BenchmarkId::from_parameter(calculations),
            &calculations,
            |b, _| b.iter(|| execute(black_box(&model), black_box(&instance))),
        );
    }
    group.finish();
}

// ── 3. Population ────────────────────────────────────────────────────

fn bench_population(c: &mut Criterion) {
    let model = make_model(50);
    let identities = model.calculation_identities();
    let aggregations = make_aggregations();
    let population: Vec<(ProviderSummary, Vec<DatasetRelationshipRecord>)> = (0..1000)
        .map(|i| (ProviderSummary::new(format!("p{i}")), make_records(i)))
        .collect();

    c.bench_function("population_1000_providers_50_calcs", |b| {
        b.iter(|| {
            population
                .iter()
                .map(|(provider, records)| {
                    let instance = bind_model(&model, records, provider, Arc::clone(&aggregations))
                        .expect("bench inputs bind");
                    let results = execute(&model, &instance);
                    ProviderResult::assemble(provider.clone(), "bench", results, &identities)
                })
                .count()
        })
    });
}

criterion_group!(benches, bench_bind, bench_execute, bench_population);
criterion_main!(benches);
