//! Execution-ready model instance: one per provider, owned by the worker
//! that processes that provider.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::aggregation::{AggregationSet, AggregationType};

use super::calculation::CalculationError;

/// A field value after conversion to its declared scalar type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundValue {
    Null,
    Decimal(Decimal),
    Int32(i32),
    Int64(i64),
    Text(String),
    Boolean(bool),
    Date(Option<NaiveDateTime>),
}

impl BoundValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Int32(i) => Some(Decimal::from(*i)),
            Self::Int64(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(d) => *d,
            _ => None,
        }
    }
}

/// One bound dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundRow {
    dataset_type: String,
    values: BTreeMap<String, BoundValue>,
}

impl BoundRow {
    pub fn new(dataset_type: String, values: BTreeMap<String, BoundValue>) -> Self {
        Self {
            dataset_type,
            values,
        }
    }

    pub fn dataset_type(&self) -> &str {
        &self.dataset_type
    }

    pub fn get(&self, field: &str) -> Option<&BoundValue> {
        self.values.get(field)
    }

    pub(crate) fn set(&mut self, field: &str, value: BoundValue) {
        if let Some(slot) = self.values.get_mut(field) {
            *slot = value;
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &BoundValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn field(&self, field: &str) -> Result<&BoundValue, CalculationError> {
        self.values
            .get(field)
            .ok_or_else(|| CalculationError::FieldNotFound {
                dataset: self.dataset_type.clone(),
                field: field.to_string(),
            })
    }

    /// Numeric field value. Integer fields widen to decimal.
    pub fn decimal(&self, field: &str) -> Result<Decimal, CalculationError> {
        self.field(field)?
            .as_decimal()
            .ok_or_else(|| CalculationError::NotNumeric {
                dataset: self.dataset_type.clone(),
                field: field.to_string(),
            })
    }

    pub fn int32(&self, field: &str) -> Result<i32, CalculationError> {
        match self.field(field)? {
            BoundValue::Int32(i) => Ok(*i),
            _ => Err(CalculationError::NotNumeric {
                dataset: self.dataset_type.clone(),
                field: field.to_string(),
            }),
        }
    }

    pub fn int64(&self, field: &str) -> Result<i64, CalculationError> {
        match self.field(field)? {
            BoundValue::Int64(i) => Ok(*i),
            BoundValue::Int32(i) => Ok(i64::from(*i)),
            _ => Err(CalculationError::NotNumeric {
                dataset: self.dataset_type.clone(),
                field: field.to_string(),
            }),
        }
    }

    /// Text field value; anything that is not text reads as `None`.
    pub fn text(&self, field: &str) -> Result<Option<&str>, CalculationError> {
        Ok(self.field(field)?.as_text())
    }
}

/// Contents of one relationship slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationshipSlot {
    Single(BoundRow),
    Many(Vec<BoundRow>),
}

/// The datasets container: one populated slot per declared relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datasets {
    slots: BTreeMap<String, RelationshipSlot>,
}

impl Datasets {
    pub fn new(slots: BTreeMap<String, RelationshipSlot>) -> Self {
        Self { slots }
    }

    pub fn get(&self, relationship: &str) -> Option<&RelationshipSlot> {
        self.slots.get(relationship)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    fn slot(&self, relationship: &str) -> Result<&RelationshipSlot, CalculationError> {
        self.slots
            .get(relationship)
            .ok_or_else(|| CalculationError::RelationshipNotFound(relationship.to_string()))
    }

    /// The row of a single-row relationship.
    pub fn single(&self, relationship: &str) -> Result<&BoundRow, CalculationError> {
        match self.slot(relationship)? {
            RelationshipSlot::Single(row) => Ok(row),
            RelationshipSlot::Many(_) => Err(CalculationError::GranularityMismatch {
                relationship: relationship.to_string(),
                expected: "a single row",
            }),
        }
    }

    /// The rows of a multi-row relationship, in supplied order.
    pub fn many(&self, relationship: &str) -> Result<&[BoundRow], CalculationError> {
        match self.slot(relationship)? {
            RelationshipSlot::Many(rows) => Ok(rows),
            RelationshipSlot::Single(_) => Err(CalculationError::GranularityMismatch {
                relationship: relationship.to_string(),
                expected: "a list of rows",
            }),
        }
    }
}

/// Provider attributes as declared by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundProvider {
    id: String,
    attributes: BTreeMap<String, BoundValue>,
}

impl BoundProvider {
    pub fn new(id: String, attributes: BTreeMap<String, BoundValue>) -> Self {
        Self { id, attributes }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, attribute: &str) -> Option<&BoundValue> {
        self.attributes.get(attribute)
    }

    fn attribute(&self, attribute: &str) -> Result<&BoundValue, CalculationError> {
        self.attributes
            .get(attribute)
            .ok_or_else(|| CalculationError::ProviderAttributeNotFound(attribute.to_string()))
    }

    /// Text attribute; absent provider values read as the empty string.
    pub fn text(&self, attribute: &str) -> Result<&str, CalculationError> {
        Ok(self.attribute(attribute)?.as_text().unwrap_or(""))
    }

    pub fn date(&self, attribute: &str) -> Result<Option<NaiveDateTime>, CalculationError> {
        Ok(self.attribute(attribute)?.as_date())
    }
}

/// Everything one provider's calculations can read.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    datasets: Datasets,
    provider: BoundProvider,
    aggregations: Arc<AggregationSet>,
}

impl ModelInstance {
    pub fn new(
        datasets: Datasets,
        provider: BoundProvider,
        aggregations: Arc<AggregationSet>,
    ) -> Self {
        Self {
            datasets,
            provider,
            aggregations,
        }
    }

    pub fn datasets(&self) -> &Datasets {
        &self.datasets
    }

    pub fn provider(&self) -> &BoundProvider {
        &self.provider
    }

    pub fn aggregations(&self) -> &AggregationSet {
        &self.aggregations
    }

    /// Aggregate value by name (case-insensitive) and type.
    pub fn aggregate(&self, name: &str, kind: AggregationType) -> Result<Decimal, CalculationError> {
        self.aggregations
            .get(name, kind)
            .ok_or_else(|| CalculationError::AggregateNotFound {
                name: name.to_string(),
                kind,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> BoundRow {
        let mut values = BTreeMap::new();
        values.insert("Pupils".to_string(), BoundValue::Int32(12));
        values.insert("Rate".to_string(), BoundValue::Decimal(Decimal::new(25, 1)));
        values.insert("Name".to_string(), BoundValue::Text("Oak".into()));
        BoundRow::new("PupilNumbers".into(), values)
    }

    #[test]
    fn row_accessors_convert_and_report() {
        let row = row();
        assert_eq!(row.decimal("Pupils").unwrap(), Decimal::from(12));
        assert_eq!(row.int32("Pupils").unwrap(), 12);
        assert_eq!(row.int64("Pupils").unwrap(), 12);
        assert_eq!(row.text("Name").unwrap(), Some("Oak"));
        assert!(matches!(
            row.decimal("Name"),
            Err(CalculationError::NotNumeric { .. })
        ));
        assert!(matches!(
            row.decimal("Missing"),
            Err(CalculationError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn set_ignores_undeclared_fields() {
        let mut row = row();
        row.set("Undeclared", BoundValue::Int32(1));
        assert!(row.get("Undeclared").is_none());
        row.set("Pupils", BoundValue::Int32(3));
        assert_eq!(row.int32("Pupils").unwrap(), 3);
    }

    #[test]
    fn datasets_enforce_granularity() {
        let mut slots = BTreeMap::new();
        slots.insert("One".to_string(), RelationshipSlot::Single(row()));
        slots.insert("Many".to_string(), RelationshipSlot::Many(vec![row(), row()]));
        let datasets = Datasets::new(slots);

        assert!(datasets.single("One").is_ok());
        assert_eq!(datasets.many("Many").unwrap().len(), 2);
        assert!(matches!(
            datasets.single("Many"),
            Err(CalculationError::GranularityMismatch { .. })
        ));
        assert!(matches!(
            datasets.many("Nope"),
            Err(CalculationError::RelationshipNotFound(_))
        ));
    }

    #[test]
    fn provider_text_defaults_to_empty() {
        let mut attributes = BTreeMap::new();
        attributes.insert("Name".to_string(), BoundValue::Text(String::new()));
        attributes.insert("Postcode".to_string(), BoundValue::Null);
        let provider = BoundProvider::new("p1".into(), attributes);

        assert_eq!(provider.text("Name").unwrap(), "");
        assert_eq!(provider.text("Postcode").unwrap(), "");
        assert!(provider.text("URN").is_err());
    }
}
