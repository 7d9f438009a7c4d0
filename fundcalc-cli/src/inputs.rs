//! Run inputs loaded from CSV files.
//!
//! - Providers: one row per provider, columns named after provider
//!   attributes (`id` required)
//! - Datasets: one `<RelationshipName>.csv` per relationship slot of the
//!   model, keyed by a `provider_id` column

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use fundcalc_core::aggregation::DatasetTable;
use fundcalc_core::domain::{DatasetRelationshipRecord, ProviderSummary, Row, ScalarValue};
use fundcalc_core::model::{ModelDefinition, ModelSchema};
use fundcalc_runner::InMemorySources;

use crate::presets::dataset_fields;

const PROVIDER_ID_COLUMN: &str = "provider_id";

/// Provider population plus everything the run reads about it.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub providers: Vec<ProviderSummary>,
    /// Relationship records per provider id; every provider has an entry.
    pub datasets: HashMap<String, Vec<DatasetRelationshipRecord>>,
    pub tables: Vec<DatasetTable>,
}

impl RunInputs {
    /// Split into the run population and in-memory sources serving `model`.
    pub fn into_sources(self, model: ModelDefinition) -> (Vec<ProviderSummary>, InMemorySources) {
        let specification_id = model.specification_id().to_string();
        let mut sources = InMemorySources::new()
            .with_model(model)
            .with_tables(specification_id, self.tables);
        for (provider_id, records) in self.datasets {
            sources = sources.with_provider(provider_id, records);
        }
        (self.providers, sources)
    }
}

/// Read the provider population.
pub fn load_providers(path: &Path) -> Result<Vec<ProviderSummary>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open providers file {}", path.display()))?;

    let headers = reader.headers().context("Failed to read providers header")?;
    if !headers.iter().any(|h| h == "id") {
        bail!("providers file {} has no 'id' column", path.display());
    }

    let mut providers = Vec::new();
    for (line, record) in reader.deserialize::<ProviderSummary>().enumerate() {
        let provider =
            record.with_context(|| format!("Invalid provider on data line {}", line + 1))?;
        if provider.id.trim().is_empty() {
            bail!("provider on data line {} has an empty id", line + 1);
        }
        providers.push(provider);
    }
    Ok(providers)
}

/// Read one CSV per relationship slot declared by `schema`.
///
/// A slot without a file is left empty. Rows for providers outside the
/// population are skipped.
pub fn load_datasets(
    dir: &Path,
    schema: &ModelSchema,
    providers: &[ProviderSummary],
) -> Result<HashMap<String, Vec<DatasetRelationshipRecord>>> {
    let mut datasets: HashMap<String, Vec<DatasetRelationshipRecord>> = providers
        .iter()
        .map(|p| (p.id.clone(), Vec::new()))
        .collect();

    for slot in schema.slots() {
        let path = dir.join(format!("{}.csv", slot.name));
        if !path.exists() {
            debug!(relationship = %slot.name, path = %path.display(), "no dataset file");
            continue;
        }

        let rows = read_dataset_rows(&path)?;
        let mut per_provider: HashMap<String, Vec<Row>> = HashMap::new();
        for (provider_id, row) in rows {
            if !datasets.contains_key(&provider_id) {
                warn!(relationship = %slot.name, provider_id = %provider_id, "row for unknown provider skipped");
                continue;
            }
            per_provider.entry(provider_id).or_default().push(row);
        }

        for (provider_id, rows) in per_provider {
            let record = DatasetRelationshipRecord {
                relationship_id: slot.relationship_id.clone(),
                relationship_name: slot.name.clone(),
                definition_name: slot.dataset_type.clone(),
                granularity: slot.granularity,
                rows,
            };
            if let Some(records) = datasets.get_mut(&provider_id) {
                records.push(record);
            }
        }
    }

    Ok(datasets)
}

fn read_dataset_rows(path: &Path) -> Result<Vec<(String, Row)>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open dataset file {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    let Some(id_index) = headers.iter().position(|h| h == PROVIDER_ID_COLUMN) else {
        bail!("dataset file {} has no '{PROVIDER_ID_COLUMN}' column", path.display());
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Invalid row in {}", path.display()))?;
        let provider_id = record.get(id_index).unwrap_or_default().trim().to_string();
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != id_index)
            .map(|(_, (column, value))| {
                let value = if value.is_empty() {
                    ScalarValue::Null
                } else {
                    ScalarValue::Text(value.to_string())
                };
                (column.to_string(), value)
            })
            .collect();
        rows.push((provider_id, row));
    }
    Ok(rows)
}

/// Full dataset tables, one per relationship slot, in population order.
pub fn dataset_tables(
    schema: &ModelSchema,
    providers: &[ProviderSummary],
    datasets: &HashMap<String, Vec<DatasetRelationshipRecord>>,
) -> Vec<DatasetTable> {
    schema
        .slots()
        .iter()
        .filter_map(|slot| {
            let shape = schema.shape(&slot.dataset_type)?;
            let rows = providers
                .iter()
                .filter_map(|p| datasets.get(&p.id))
                .flatten()
                .filter(|record| record.relationship_id == slot.relationship_id)
                .flat_map(|record| record.rows.iter().cloned())
                .collect();
            Some(DatasetTable {
                relationship_name: slot.name.clone(),
                fields: dataset_fields(shape),
                rows,
            })
        })
        .collect()
}

/// Load providers and datasets for `schema` from CSV files.
pub fn load_inputs(providers_path: &Path, datasets_dir: &Path, schema: &ModelSchema) -> Result<RunInputs> {
    let providers = load_providers(providers_path)?;
    let datasets = load_datasets(datasets_dir, schema, &providers)?;
    let tables = dataset_tables(schema, &providers, &datasets);
    Ok(RunInputs {
        providers,
        datasets,
        tables,
    })
}
