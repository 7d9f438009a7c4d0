//! Domain types for the calculation engine.

pub mod dataset;
pub mod provider;
pub mod reference;
pub mod result;

pub use dataset::{parse_decimal, row, DatasetRelationshipRecord, Granularity, Row, ScalarValue};
pub use provider::{AttributeValue, ProviderAttribute, ProviderSummary};
pub use reference::{CalculationIdentity, CalculationMetadata, CalculationType, Reference};
pub use result::{
    normalize_value, provider_result_id, CalculationFailure, CalculationResult, ProviderResult,
    NO_VALUE_SENTINEL,
};
