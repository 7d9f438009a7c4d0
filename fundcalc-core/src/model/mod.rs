//! Model Definition — the declarative shape of a compiled calculation model.
//!
//! A model is described ahead of time, once per specification:
//! - `ModelSchema`: row shapes, relationship slots and provider attributes
//! - `Calculation`: the interface compiled calculation code implements
//! - `ModelDefinition`: schema plus the ordered registration table of
//!   calculation entry points
//! - `ModelInstance`: one provider's bound datasets, provider and aggregates

pub mod calculation;
pub mod definition;
pub mod instance;
pub mod schema;

pub use calculation::{checked_div, checked_mul, Calculation, CalculationError};
pub use definition::{CalculationEntry, ModelDefinition, ModelDefinitionBuilder};
pub use instance::{BoundProvider, BoundRow, BoundValue, Datasets, ModelInstance, RelationshipSlot};
pub use schema::{FieldSchema, ModelSchema, RelationshipSlotSchema, RowShape, ScalarType, SchemaError};
