//! Calculation Executor: runs every registered calculation against one
//! bound model instance, in registration order, isolating failures.
//!
//! A failing calculation (an `Err` or a panic) is recorded on its own
//! [`CalculationResult`]; the remaining calculations still run.

use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};

use crate::domain::{normalize_value, CalculationFailure, CalculationResult};
use crate::model::{CalculationEntry, CalculationError, ModelDefinition, ModelInstance};

/// Exception type recorded for a calculation that panicked.
pub const PANIC_EXCEPTION_TYPE: &str = "Panic";

/// Lazily evaluate each calculation in registration order.
pub fn execute_iter<'a>(
    definition: &'a ModelDefinition,
    instance: &'a ModelInstance,
) -> impl Iterator<Item = CalculationResult> + 'a {
    definition
        .calculations()
        .iter()
        .map(move |entry| execute_entry(entry, instance))
}

/// Evaluate every calculation; one result per registered entry point.
pub fn execute(definition: &ModelDefinition, instance: &ModelInstance) -> Vec<CalculationResult> {
    execute_iter(definition, instance).collect()
}

/// Evaluate a single entry point.
pub fn execute_entry(entry: &CalculationEntry, instance: &ModelInstance) -> CalculationResult {
    let mut result = CalculationResult::from_metadata(&entry.metadata);
    match panic::catch_unwind(AssertUnwindSafe(|| entry.evaluate(instance))) {
        Ok(Ok(value)) => result.value = normalize_value(value),
        Ok(Err(err)) => result.record_failure(error_failure(entry, &err)),
        Err(payload) => result.record_failure(panic_failure(entry, payload.as_ref())),
    }
    result
}

fn error_failure(entry: &CalculationEntry, err: &CalculationError) -> CalculationFailure {
    let mut trace = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    trace.push(location(entry));

    CalculationFailure {
        exception_type: err.kind().to_string(),
        message: err.to_string(),
        stack_trace: trace.join("\n"),
    }
}

fn panic_failure(entry: &CalculationEntry, payload: &(dyn Any + Send)) -> CalculationFailure {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "calculation panicked".to_string());

    CalculationFailure {
        exception_type: PANIC_EXCEPTION_TYPE.to_string(),
        message,
        stack_trace: format!("panicked {}", location(entry)),
    }
}

fn location(entry: &CalculationEntry) -> String {
    format!("at {} ({})", entry.name(), entry.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationSet;
    use crate::domain::{CalculationMetadata, Reference, NO_VALUE_SENTINEL};
    use crate::model::{BoundProvider, Datasets};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn instance() -> ModelInstance {
        ModelInstance::new(
            Datasets::default(),
            BoundProvider::default(),
            Arc::new(AggregationSet::new()),
        )
    }

    #[derive(Debug)]
    struct Upstream;

    impl std::fmt::Display for Upstream {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("rate table unavailable")
        }
    }

    impl Error for Upstream {}

    #[test]
    fn failures_do_not_stop_later_calculations() {
        let definition = ModelDefinition::builder("spec")
            .calculation(CalculationMetadata::new("c1", "First"), |_| Ok(Decimal::ONE))
            .calculation(CalculationMetadata::new("c2", "Second"), |_| {
                Err(CalculationError::DivideByZero)
            })
            .calculation(CalculationMetadata::new("c3", "Third"), |_| Ok(Decimal::TEN))
            .build()
            .unwrap();

        let results = execute(&definition, &instance());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].value, Decimal::ONE);
        assert_eq!(results[1].exception_type.as_deref(), Some("DivideByZero"));
        assert_eq!(results[1].exception_message.as_deref(), Some("division by zero"));
        assert_eq!(results[1].value, Decimal::ZERO);
        assert_eq!(results[2].value, Decimal::TEN);
        assert!(!results[2].has_exception());
    }

    #[test]
    fn panics_are_recorded() {
        let definition = ModelDefinition::builder("spec")
            .calculation(CalculationMetadata::new("boom", "Boom"), |_| {
                panic!("index out of range")
            })
            .calculation(CalculationMetadata::new("ok", "Ok"), |_| Ok(Decimal::TWO))
            .build()
            .unwrap();

        let results = execute(&definition, &instance());
        assert_eq!(results[0].exception_type.as_deref(), Some(PANIC_EXCEPTION_TYPE));
        assert_eq!(results[0].exception_message.as_deref(), Some("index out of range"));
        assert_eq!(
            results[0].exception_stack_trace.as_deref(),
            Some("panicked at Boom (boom)")
        );
        assert_eq!(results[1].value, Decimal::TWO);
    }

    #[test]
    fn source_chain_lands_in_trace() {
        let definition = ModelDefinition::builder("spec")
            .calculation(CalculationMetadata::new("c1", "Rate"), |_| {
                Err(CalculationError::failed_with("lookup failed", Upstream))
            })
            .build()
            .unwrap();

        let result = &execute(&definition, &instance())[0];
        assert_eq!(result.exception_type.as_deref(), Some("CalculationFailed"));
        assert_eq!(
            result.exception_stack_trace.as_deref(),
            Some("caused by: rate table unavailable\nat Rate (c1)")
        );
    }

    #[test]
    fn sentinel_is_recorded_as_zero() {
        let definition = ModelDefinition::builder("spec")
            .calculation(CalculationMetadata::new("c1", "Nothing"), |_| {
                Ok(NO_VALUE_SENTINEL)
            })
            .build()
            .unwrap();

        assert_eq!(execute(&definition, &instance())[0].value, Decimal::ZERO);
    }

    #[test]
    fn metadata_flows_onto_results() {
        let metadata = CalculationMetadata::new("c1", "Lump Sum")
            .with_allocation_line(Reference::new("al1", "Basic"))
            .with_policy(Reference::new("p1", "Schools"));
        let definition = ModelDefinition::builder("spec")
            .calculation(metadata, |_| Ok(Decimal::ONE))
            .build()
            .unwrap();

        let result = &execute(&definition, &instance())[0];
        assert_eq!(result.calculation, Reference::new("c1", "Lump Sum"));
        assert_eq!(result.allocation_line, Some(Reference::new("al1", "Basic")));
        assert_eq!(result.policy_specifications.len(), 1);
    }

    #[test]
    fn iteration_is_lazy() {
        let definition = ModelDefinition::builder("spec")
            .calculation(CalculationMetadata::new("a", "A"), |_| Ok(Decimal::ONE))
            .calculation(CalculationMetadata::new("b", "B"), |_| panic!("not reached"))
            .build()
            .unwrap();

        let instance = instance();
        let first = execute_iter(&definition, &instance).next().unwrap();
        assert_eq!(first.value, Decimal::ONE);
    }
}
