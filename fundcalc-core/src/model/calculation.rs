//! The interface compiled calculation code implements.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::aggregation::AggregationType;

use super::instance::ModelInstance;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error raised by a calculation entry point.
///
/// Never propagated past the executor: it is recorded on the calculation
/// result and the next entry point runs.
#[derive(Debug, Error)]
pub enum CalculationError {
    #[error("relationship '{0}' is not declared by the model")]
    RelationshipNotFound(String),
    #[error("relationship '{relationship}' does not hold {expected}")]
    GranularityMismatch {
        relationship: String,
        expected: &'static str,
    },
    #[error("field '{field}' is not declared on dataset '{dataset}'")]
    FieldNotFound { dataset: String, field: String },
    #[error("field '{field}' on dataset '{dataset}' is not numeric")]
    NotNumeric { dataset: String, field: String },
    #[error("provider attribute '{0}' is not declared by the model")]
    ProviderAttributeNotFound(String),
    #[error("aggregate {kind} of '{name}' is not available")]
    AggregateNotFound { name: String, kind: AggregationType },
    #[error("division by zero")]
    DivideByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl CalculationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    pub fn failed_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Stable type name recorded as the exception type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RelationshipNotFound(_) => "RelationshipNotFound",
            Self::GranularityMismatch { .. } => "GranularityMismatch",
            Self::FieldNotFound { .. } => "FieldNotFound",
            Self::NotNumeric { .. } => "NotNumeric",
            Self::ProviderAttributeNotFound(_) => "ProviderAttributeNotFound",
            Self::AggregateNotFound { .. } => "AggregateNotFound",
            Self::DivideByZero => "DivideByZero",
            Self::Overflow => "Overflow",
            Self::Failed { .. } => "CalculationFailed",
        }
    }
}

/// A zero-argument, decimal-returning calculation entry point.
pub trait Calculation: Send + Sync {
    fn evaluate(&self, model: &ModelInstance) -> Result<Decimal, CalculationError>;
}

impl<F> Calculation for F
where
    F: Fn(&ModelInstance) -> Result<Decimal, CalculationError> + Send + Sync,
{
    fn evaluate(&self, model: &ModelInstance) -> Result<Decimal, CalculationError> {
        self(model)
    }
}

/// Checked division for calculation code.
pub fn checked_div(numerator: Decimal, denominator: Decimal) -> Result<Decimal, CalculationError> {
    if denominator.is_zero() {
        return Err(CalculationError::DivideByZero);
    }
    numerator
        .checked_div(denominator)
        .ok_or(CalculationError::Overflow)
}

/// Checked multiplication for calculation code.
pub fn checked_mul(left: Decimal, right: Decimal) -> Result<Decimal, CalculationError> {
    left.checked_mul(right).ok_or(CalculationError::Overflow)
}
