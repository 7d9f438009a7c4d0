//! Deterministic synthetic provider populations.
//!
//! Rows are generated for every relationship slot a schema declares, so
//! any preset can be exercised without input files. The same seed always
//! produces the same population.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;

use fundcalc_core::domain::{
    DatasetRelationshipRecord, Granularity, ProviderSummary, Row, ScalarValue,
};
use fundcalc_core::model::{ModelSchema, RowShape, ScalarType};

use crate::inputs::{dataset_tables, RunInputs};

const PROVIDER_TYPES: &[&str] = &["Academy", "Maintained", "Free School", "Special"];
const PHASES: &[&str] = &["Primary", "Secondary", "All-through"];
const MAX_ROWS_PER_PROVIDER: usize = 3;

/// Generate `count` providers with rows for every slot of `schema`.
pub fn generate(schema: &ModelSchema, count: usize, seed: u64) -> RunInputs {
    let mut rng = StdRng::seed_from_u64(seed);

    let providers: Vec<ProviderSummary> = (0..count).map(|i| provider(i, &mut rng)).collect();

    let mut datasets = HashMap::with_capacity(count);
    for provider in &providers {
        let records = schema
            .slots()
            .iter()
            .filter_map(|slot| {
                let shape = schema.shape(&slot.dataset_type)?;
                let row_count = match slot.granularity {
                    Granularity::SingleRowPerProvider => 1,
                    Granularity::MultipleRowsPerProvider => rng.gen_range(0..=MAX_ROWS_PER_PROVIDER),
                };
                let rows = (0..row_count).map(|n| shape_row(shape, n, &mut rng)).collect();
                Some(DatasetRelationshipRecord {
                    relationship_id: slot.relationship_id.clone(),
                    relationship_name: slot.name.clone(),
                    definition_name: slot.dataset_type.clone(),
                    granularity: slot.granularity,
                    rows,
                })
            })
            .collect();
        datasets.insert(provider.id.clone(), records);
    }

    let tables = dataset_tables(schema, &providers, &datasets);
    RunInputs {
        providers,
        datasets,
        tables,
    }
}

fn provider(index: usize, rng: &mut StdRng) -> ProviderSummary {
    let id = format!("{}", 100_000 + index);
    let mut provider = ProviderSummary::new(&id)
        .with_name(format!("Synthetic Provider {index}"))
        .with_ukprn(format!("1{index:07}"));
    provider.urn = Some(id);
    provider.provider_type = Some(PROVIDER_TYPES[rng.gen_range(0..PROVIDER_TYPES.len())].to_string());
    provider.phase_of_education = Some(PHASES[rng.gen_range(0..PHASES.len())].to_string());
    provider.status = Some("Open".to_string());
    provider.date_opened = NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| (d + Duration::days(rng.gen_range(0..8_000))).and_hms_opt(0, 0, 0));
    provider
}

fn shape_row(shape: &RowShape, n: usize, rng: &mut StdRng) -> Row {
    shape
        .fields
        .iter()
        .map(|field| {
            let value = match field.scalar_type {
                ScalarType::Decimal => ScalarValue::Number(Decimal::new(rng.gen_range(0..10_000), 2)),
                ScalarType::Int32 | ScalarType::Int64 => ScalarValue::Integer(rng.gen_range(0..1_000)),
                ScalarType::PassThrough => ScalarValue::Text(format!("{} {}", field.name, n + 1)),
            };
            (field.source_name.clone(), value)
        })
        .collect()
}
