//! Run-scoped Aggregation Engine context.
//!
//! One [`RunAggregationContext`] lives for exactly one calculation run. It
//! owns the flagged calculation list and talks to the aggregation cache:
//! - dataset aggregations are computed once per specification and cached
//! - batch N sees Sum/Average/Min/Max over values recorded by batches
//!   1..N-1 only, never its own batch
//! - after batch N completes its flagged values are appended under
//!   `{specification}_{N}`

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use fundcalc_core::aggregation::{dataset_aggregations, summarize, AggregationSet, BatchValues};
use fundcalc_core::domain::ProviderResult;
use fundcalc_core::identifier::{generate_identifier, identifiers_match};

use crate::aggregation_cache::{AggregationCache, CacheError};
use crate::sources::{DatasetTableSource, SourceError};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("aggregation cache: {0}")]
    Cache(#[from] CacheError),
    #[error("dataset tables for specification '{specification_id}': {source}")]
    Tables {
        specification_id: String,
        #[source]
        source: SourceError,
    },
}

pub struct RunAggregationContext {
    specification_id: String,
    flagged: Vec<String>,
    cache: Arc<dyn AggregationCache>,
}

impl RunAggregationContext {
    /// Flagged names are reduced to their identifiers; names that match
    /// case-insensitively collapse to the first spelling.
    pub fn new(
        specification_id: impl Into<String>,
        flagged_calculations: &[String],
        cache: Arc<dyn AggregationCache>,
    ) -> Self {
        let mut flagged: Vec<String> = Vec::new();
        for name in flagged_calculations {
            let identifier = generate_identifier(name);
            if !flagged.iter().any(|f| identifiers_match(f, &identifier)) {
                flagged.push(identifier);
            }
        }
        Self {
            specification_id: specification_id.into(),
            flagged,
            cache,
        }
    }

    pub fn specification_id(&self) -> &str {
        &self.specification_id
    }

    /// Flagged calculation identifiers.
    pub fn flagged(&self) -> &[String] {
        &self.flagged
    }

    pub fn is_flagged(&self, calculation_name: &str) -> bool {
        let identifier = generate_identifier(calculation_name);
        self.flagged.iter().any(|f| identifiers_match(f, &identifier))
    }

    /// Clear batch entries a previous run of this specification left behind.
    pub fn reset(&self, batch_count: usize) -> Result<(), AggregationError> {
        if self.flagged.is_empty() {
            return Ok(());
        }
        for batch in 1..=batch_count {
            self.cache
                .remove_batch_values(&self.specification_id, batch)?;
        }
        Ok(())
    }

    /// Cached dataset aggregations, computed from the tables on a miss.
    pub fn dataset_aggregations(
        &self,
        tables: &dyn DatasetTableSource,
    ) -> Result<AggregationSet, AggregationError> {
        if let Some(cached) = self.cache.dataset_aggregations(&self.specification_id)? {
            debug!(specification_id = %self.specification_id, entries = cached.len(), "dataset aggregations cache hit");
            return Ok(cached);
        }

        let tables = tables
            .dataset_tables(&self.specification_id)
            .map_err(|source| AggregationError::Tables {
                specification_id: self.specification_id.clone(),
                source,
            })?;
        let aggregations = dataset_aggregations(&tables);
        self.cache
            .set_dataset_aggregations(&self.specification_id, &aggregations)?;
        debug!(specification_id = %self.specification_id, entries = aggregations.len(), "dataset aggregations computed");
        Ok(aggregations)
    }

    /// Aggregates visible to calculations of `batch` (1-based).
    pub fn aggregations_for_batch(
        &self,
        batch: usize,
        dataset: &AggregationSet,
    ) -> Result<AggregationSet, AggregationError> {
        let mut aggregations = dataset.clone();
        if self.flagged.is_empty() {
            return Ok(aggregations);
        }

        let mut previous = BatchValues::new();
        for earlier in 1..batch {
            match self.cache.batch_values(&self.specification_id, earlier)? {
                Some(values) => previous.concat(&values),
                None => debug!(
                    specification_id = %self.specification_id,
                    batch = earlier,
                    "no cached aggregation values for batch"
                ),
            }
        }

        for name in &self.flagged {
            let values = previous.get(name).unwrap_or(&[]);
            aggregations.extend(summarize(name, values));
        }
        Ok(aggregations)
    }

    /// Append the flagged calculations' values of a completed batch.
    ///
    /// Results that recorded an exception contribute nothing.
    pub fn record_batch(
        &self,
        batch: usize,
        results: &[ProviderResult],
    ) -> Result<(), AggregationError> {
        if self.flagged.is_empty() {
            return Ok(());
        }

        let mut values = BatchValues::new();
        for result in results.iter().flat_map(|r| &r.calculation_results) {
            if result.has_exception() {
                continue;
            }
            let identifier = generate_identifier(&result.calculation.name);
            if let Some(flagged) = self.flagged.iter().find(|f| identifiers_match(f, &identifier)) {
                values.append(flagged, [result.value]);
            }
        }

        self.cache
            .merge_batch_values(&self.specification_id, batch, &values)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation_cache::InMemoryAggregationCache;
    use crate::sources::InMemorySources;
    use fundcalc_core::aggregation::{AggregationType, DatasetField, DatasetFieldType, DatasetTable};
    use fundcalc_core::domain::{
        row, CalculationMetadata, CalculationResult, ProviderSummary, ScalarValue,
    };
    use rust_decimal::Decimal;

    fn provider_result(provider: &str, name: &str, value: i64) -> ProviderResult {
        let mut result = CalculationResult::from_metadata(&CalculationMetadata::new("c1", name));
        result.value = Decimal::from(value);
        ProviderResult::assemble(ProviderSummary::new(provider), "spec", vec![result], &[])
    }

    fn context(flagged: &[&str]) -> RunAggregationContext {
        let flagged: Vec<String> = flagged.iter().map(|s| s.to_string()).collect();
        RunAggregationContext::new("spec", &flagged, Arc::new(InMemoryAggregationCache::new()))
    }

    #[test]
    fn flagged_names_dedupe_case_insensitively() {
        let ctx = context(&["Calc1", "calc1", "CALC1", "Pupil Led"]);
        assert_eq!(ctx.flagged(), &["Calc1".to_string(), "PupilLed".to_string()]);
        assert!(ctx.is_flagged("pupil led"));
        assert!(!ctx.is_flagged("Other"));
    }

    #[test]
    fn batch_sees_only_earlier_batches() {
        let ctx = context(&["Calc1"]);
        let empty = AggregationSet::new();

        let first = ctx.aggregations_for_batch(1, &empty).unwrap();
        assert_eq!(first.get("Calc1", AggregationType::Sum), Some(Decimal::ZERO));

        ctx.record_batch(1, &[provider_result("a", "Calc1", 2), provider_result("b", "Calc1", 4)])
            .unwrap();
        let second = ctx.aggregations_for_batch(2, &empty).unwrap();
        assert_eq!(second.get("calc1", AggregationType::Sum), Some(Decimal::from(6)));
        assert_eq!(second.get("calc1", AggregationType::Average), Some(Decimal::from(3)));

        ctx.record_batch(2, &[provider_result("c", "Calc1", 10)]).unwrap();
        let second_again = ctx.aggregations_for_batch(2, &empty).unwrap();
        assert_eq!(second_again.get("Calc1", AggregationType::Sum), Some(Decimal::from(6)));
        let third = ctx.aggregations_for_batch(3, &empty).unwrap();
        assert_eq!(third.get("Calc1", AggregationType::Max), Some(Decimal::from(10)));
    }

    #[test]
    fn missing_batch_contributes_nothing() {
        let ctx = context(&["Calc1"]);
        ctx.record_batch(2, &[provider_result("a", "Calc1", 7)]).unwrap();
        let fourth = ctx.aggregations_for_batch(4, &AggregationSet::new()).unwrap();
        assert_eq!(fourth.get("Calc1", AggregationType::Sum), Some(Decimal::from(7)));
    }

    #[test]
    fn exceptions_and_unflagged_calculations_are_not_recorded() {
        let ctx = context(&["Calc1"]);
        let mut failed = provider_result("a", "Calc1", 0);
        failed.calculation_results[0].exception_type = Some("DivideByZero".into());
        ctx.record_batch(1, &[failed, provider_result("b", "Other", 5), provider_result("c", "CALC1", 1)])
            .unwrap();

        let next = ctx.aggregations_for_batch(2, &AggregationSet::new()).unwrap();
        assert_eq!(next.get("Calc1", AggregationType::Sum), Some(Decimal::ONE));
        assert_eq!(next.get("Other", AggregationType::Sum), None);
    }

    #[test]
    fn reset_clears_stale_batches() {
        let ctx = context(&["Calc1"]);
        ctx.record_batch(1, &[provider_result("a", "Calc1", 3)]).unwrap();
        ctx.reset(1).unwrap();
        let next = ctx.aggregations_for_batch(2, &AggregationSet::new()).unwrap();
        assert_eq!(next.get("Calc1", AggregationType::Sum), Some(Decimal::ZERO));
    }

    #[test]
    fn dataset_aggregations_are_computed_once() {
        let table = DatasetTable {
            relationship_name: "Pupils".into(),
            fields: vec![DatasetField::new("Count", DatasetFieldType::Integer, true)],
            rows: vec![row([("Count", ScalarValue::Integer(4))])],
        };
        let with_table = InMemorySources::new().with_tables("spec", vec![table]);
        let ctx = context(&[]);

        let first = ctx.dataset_aggregations(&with_table).unwrap();
        assert_eq!(first.get("Datasets.Pupils.Count", AggregationType::Sum), Some(Decimal::from(4)));

        // a second call is served from the cache, not the (now empty) source
        let second = ctx.dataset_aggregations(&InMemorySources::new()).unwrap();
        assert_eq!(second, first);
    }
}
