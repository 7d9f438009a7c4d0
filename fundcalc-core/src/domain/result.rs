//! Calculation and provider results.
//!
//! A [`ProviderResult`] is assembled once per provider per run and never
//! mutated afterwards. Its calculation results are padded to the full
//! calculation identity list and sorted by calculation id, so two runs over
//! the same inputs produce byte-identical result sets.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::provider::ProviderSummary;
use super::reference::{CalculationIdentity, CalculationMetadata, CalculationType, Reference};

/// Marker a calculation returns when it has no value to report.
pub const NO_VALUE_SENTINEL: Decimal = Decimal::MIN;

/// Map the "no value" sentinel to zero; every other value passes through.
pub fn normalize_value(value: Decimal) -> Decimal {
    if value == NO_VALUE_SENTINEL {
        Decimal::ZERO
    } else {
        value
    }
}

/// Structured description of a failed calculation invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationFailure {
    pub exception_type: String,
    pub message: String,
    pub stack_trace: String,
}

/// Outcome of one calculation for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub calculation: Reference,
    pub calculation_type: CalculationType,
    pub calculation_specification: Option<Reference>,
    pub allocation_line: Option<Reference>,
    #[serde(default)]
    pub policy_specifications: Vec<Reference>,
    pub value: Decimal,
    pub exception_type: Option<String>,
    pub exception_message: Option<String>,
    pub exception_stack_trace: Option<String>,
}

impl CalculationResult {
    /// Zero-valued result carrying the entry point's metadata.
    pub fn from_metadata(metadata: &CalculationMetadata) -> Self {
        Self {
            calculation: metadata.identity.reference(),
            calculation_type: metadata.identity.calculation_type,
            calculation_specification: metadata.calculation_specification.clone(),
            allocation_line: metadata.allocation_line.clone(),
            policy_specifications: metadata.policy_specifications.clone(),
            value: Decimal::ZERO,
            exception_type: None,
            exception_message: None,
            exception_stack_trace: None,
        }
    }

    /// Placeholder for a calculation the model never produced.
    pub fn not_computed(identity: &CalculationIdentity) -> Self {
        Self {
            calculation: identity.reference(),
            calculation_type: identity.calculation_type,
            calculation_specification: None,
            allocation_line: None,
            policy_specifications: Vec::new(),
            value: Decimal::ZERO,
            exception_type: None,
            exception_message: None,
            exception_stack_trace: None,
        }
    }

    pub fn record_failure(&mut self, failure: CalculationFailure) {
        self.value = Decimal::ZERO;
        self.exception_type = Some(failure.exception_type);
        self.exception_message = Some(failure.message);
        self.exception_stack_trace = Some(failure.stack_trace);
    }

    pub fn has_exception(&self) -> bool {
        self.exception_type.is_some()
    }

    pub fn calculation_id(&self) -> &str {
        &self.calculation.id
    }
}

/// Derived provider result id: BLAKE3 over provider id and specification id.
pub fn provider_result_id(provider_id: &str, specification_id: &str) -> String {
    let key = format!("{provider_id}_{specification_id}");
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// All calculation results of one provider for one specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub id: String,
    pub provider: ProviderSummary,
    pub specification_id: String,
    pub calculation_results: Vec<CalculationResult>,
}

impl ProviderResult {
    /// Assemble a provider result from executor output.
    ///
    /// Every identity in `identities` missing from `results` is added as a
    /// not-computed zero entry. The list is then stable-sorted by calculation id.
    pub fn assemble(
        provider: ProviderSummary,
        specification_id: &str,
        mut results: Vec<CalculationResult>,
        identities: &[CalculationIdentity],
    ) -> Self {
        let present: HashSet<String> = results
            .iter()
            .map(|r| r.calculation.id.clone())
            .collect();
        for identity in identities {
            if !present.contains(&identity.id) {
                results.push(CalculationResult::not_computed(identity));
            }
        }
        results.sort_by(|a, b| a.calculation.id.cmp(&b.calculation.id));

        Self {
            id: provider_result_id(&provider.id, specification_id),
            provider,
            specification_id: specification_id.to_string(),
            calculation_results: results,
        }
    }

    pub fn has_exceptions(&self) -> bool {
        self.calculation_results.iter().any(|r| r.has_exception())
    }

    pub fn exceptions(&self) -> impl Iterator<Item = &CalculationResult> {
        self.calculation_results.iter().filter(|r| r.has_exception())
    }

    pub fn result(&self, calculation_id: &str) -> Option<&CalculationResult> {
        self.calculation_results
            .iter()
            .find(|r| r.calculation.id == calculation_id)
    }

    pub fn value(&self, calculation_id: &str) -> Option<Decimal> {
        self.result(calculation_id).map(|r| r.value)
    }

    /// BLAKE3 over the sorted calculation results.
    ///
    /// Two results with equal values and equal failures hash identically,
    /// whatever order their calculations ran in.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.provider.id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.specification_id.as_bytes());
        for result in &self.calculation_results {
            hasher.update(b"\x1e");
            hasher.update(result.calculation.id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(result.value.normalize().to_string().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(result.exception_type.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"\x1f");
            hasher.update(result.exception_message.as_deref().unwrap_or("").as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}
