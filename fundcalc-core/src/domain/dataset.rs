//! Untyped dataset rows as delivered by the provider-dataset source.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// A scalar cell value in a dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Text(String),
    Number(Decimal),
    Integer(i64),
    Boolean(bool),
    Date(NaiveDateTime),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric reading of the value. Text is parsed; blanks are not numbers.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Number(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            Self::Text(s) => parse_decimal(s),
            Self::Null | Self::Boolean(_) | Self::Date(_) => None,
        }
    }

    /// Short name of the variant, used in conversion diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
        }
    }
}

/// Parse a text cell as a number, plain or scientific (`1.5e3`).
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Decimal> for ScalarValue {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<NaiveDateTime> for ScalarValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

/// One dataset row: source field name to value.
pub type Row = BTreeMap<String, ScalarValue>;

/// Build a [`Row`] from `(field, value)` pairs.
pub fn row<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Row
where
    K: Into<String>,
    V: Into<ScalarValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Whether a relationship holds one row per provider or a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    SingleRowPerProvider,
    MultipleRowsPerProvider,
}

/// The rows of one dataset relationship for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRelationshipRecord {
    pub relationship_id: String,
    /// Name of the relationship slot on the model (exact match).
    pub relationship_name: String,
    /// Name of the dataset definition, i.e. the row shape the rows conform to.
    pub definition_name: String,
    pub granularity: Granularity,
    pub rows: Vec<Row>,
}

impl DatasetRelationshipRecord {
    pub fn new(
        relationship_id: impl Into<String>,
        relationship_name: impl Into<String>,
        definition_name: impl Into<String>,
        granularity: Granularity,
    ) -> Self {
        Self {
            relationship_id: relationship_id.into(),
            relationship_name: relationship_name.into(),
            definition_name: definition_name.into(),
            granularity,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }
}
