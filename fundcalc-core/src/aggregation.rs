//! Aggregation math: Sum / Average / Min / Max over named numeric values.
//!
//! Two sources feed the aggregates calculations can reference:
//! - dataset aggregations, computed once per specification from raw rows
//! - calculation-result aggregations, accumulated batch by batch as
//!   [`BatchValues`] and summarized over earlier batches only
//!
//! Every name lookup here is case-insensitive.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::warn;

use crate::domain::Row;
use crate::identifier::{generate_identifier, identifier_key, identifiers_match};

/// Statistic an aggregate entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationType {
    Sum,
    Average,
    Min,
    Max,
}

impl AggregationType {
    pub const ALL: [AggregationType; 4] = [Self::Sum, Self::Average, Self::Min, Self::Max];
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "Sum",
            Self::Average => "Average",
            Self::Min => "Min",
            Self::Max => "Max",
        };
        f.write_str(name)
    }
}

/// One named aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateValue {
    pub field_definition_name: String,
    pub aggregation_type: AggregationType,
    pub value: Decimal,
}

/// The aggregates visible to calculations.
///
/// Entries keep insertion order; a name/type index serves lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<AggregateValue>", into = "Vec<AggregateValue>")]
pub struct AggregationSet {
    values: Vec<AggregateValue>,
    index: HashMap<(String, AggregationType), usize>,
}

impl AggregationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = AggregateValue>) -> Self {
        let mut set = Self::new();
        set.extend(values);
        set
    }

    /// Insert, replacing an existing entry with the same name and type.
    pub fn insert(&mut self, value: AggregateValue) {
        let key = (identifier_key(&value.field_definition_name), value.aggregation_type);
        match self.index.get(&key) {
            Some(&position) => self.values[position] = value,
            None => {
                self.index.insert(key, self.values.len());
                self.values.push(value);
            }
        }
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = AggregateValue>) {
        for value in values {
            self.insert(value);
        }
    }

    pub fn merge(&mut self, other: &AggregationSet) {
        self.extend(other.values.iter().cloned());
    }

    pub fn get(&self, name: &str, kind: AggregationType) -> Option<Decimal> {
        self.index
            .get(&(identifier_key(name), kind))
            .map(|&position| self.values[position].value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregateValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<AggregateValue>> for AggregationSet {
    fn from(values: Vec<AggregateValue>) -> Self {
        Self::from_values(values)
    }
}

impl From<AggregationSet> for Vec<AggregateValue> {
    fn from(set: AggregationSet) -> Self {
        set.values
    }
}

/// Sum, Average, Min and Max of `values` under `name`.
///
/// An empty input yields four zero entries, so a calculation referencing an
/// aggregate with nothing behind it reads zero instead of failing. Values
/// that would overflow the Sum are left out of Sum and Average.
pub fn summarize(name: &str, values: &[Decimal]) -> [AggregateValue; 4] {
    let mut sum = Decimal::ZERO;
    let mut counted = 0_usize;
    for value in values {
        match sum.checked_add(*value) {
            Some(total) => {
                sum = total;
                counted += 1;
            }
            None => warn!(aggregate = name, value = %value, "sum overflow, value skipped"),
        }
    }
    let average = if counted == 0 {
        Decimal::ZERO
    } else {
        sum.checked_div(Decimal::from(counted))
            .unwrap_or(Decimal::ZERO)
    };
    let min = values.iter().min().copied().unwrap_or(Decimal::ZERO);
    let max = values.iter().max().copied().unwrap_or(Decimal::ZERO);

    let entry = |aggregation_type, value| AggregateValue {
        field_definition_name: name.to_string(),
        aggregation_type,
        value,
    };
    [
        entry(AggregationType::Sum, sum),
        entry(AggregationType::Average, average),
        entry(AggregationType::Min, min),
        entry(AggregationType::Max, max),
    ]
}

// ─── Dataset aggregations ────────────────────────────────────────────

/// Declared type of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetFieldType {
    Text,
    Decimal,
    Integer,
    Float,
    Boolean,
    Date,
}

impl DatasetFieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Decimal | Self::Integer | Self::Float)
    }
}

/// One column of a dataset table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetField {
    pub name: String,
    pub field_type: DatasetFieldType,
    pub is_aggregable: bool,
}

impl DatasetField {
    pub fn new(name: impl Into<String>, field_type: DatasetFieldType, is_aggregable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_aggregable,
        }
    }
}

/// All rows of one dataset relationship for a specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetTable {
    pub relationship_name: String,
    pub fields: Vec<DatasetField>,
    pub rows: Vec<Row>,
}

/// Aggregate name of a dataset field: `Datasets.<relationship>.<field>`.
pub fn dataset_field_aggregate_name(relationship_name: &str, field_name: &str) -> String {
    format!(
        "Datasets.{}.{}",
        generate_identifier(relationship_name),
        generate_identifier(field_name)
    )
}

/// Sum/Average/Min/Max for every aggregable numeric field of every table.
///
/// Cells that are missing or not numeric are skipped.
pub fn dataset_aggregations(tables: &[DatasetTable]) -> AggregationSet {
    let mut set = AggregationSet::new();
    for table in tables {
        for field in table
            .fields
            .iter()
            .filter(|f| f.is_aggregable && f.field_type.is_numeric())
        {
            let values: Vec<Decimal> = table
                .rows
                .iter()
                .filter_map(|row| row.get(&field.name).and_then(|v| v.as_decimal()))
                .collect();
            let name = dataset_field_aggregate_name(&table.relationship_name, &field.name);
            set.extend(summarize(&name, &values));
        }
    }
    set
}

// ─── Calculation-result aggregations ─────────────────────────────────

/// Calculation values gathered per calculation identifier.
///
/// Keys keep the casing of their first insertion; lookups and appends
/// match case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchValues {
    values: BTreeMap<String, Vec<Decimal>>,
}

impl BatchValues {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(&self, name: &str) -> Option<String> {
        self.values
            .keys()
            .find(|k| identifiers_match(k, name))
            .cloned()
    }

    pub fn append(&mut self, name: &str, values: impl IntoIterator<Item = Decimal>) {
        let key = self.key_for(name).unwrap_or_else(|| name.to_string());
        self.values.entry(key).or_default().extend(values);
    }

    pub fn get(&self, name: &str) -> Option<&[Decimal]> {
        self.values
            .iter()
            .find(|(k, _)| identifiers_match(k, name))
            .map(|(_, v)| v.as_slice())
    }

    /// Append every list of `other` onto this one.
    pub fn concat(&mut self, other: &BatchValues) {
        for (name, values) in &other.values {
            self.append(name, values.iter().copied());
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{row, ScalarValue};

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn summarize_computes_all_four() {
        let [sum, avg, min, max] = summarize("Calc1", &[d(4), d(1), d(7)]);
        assert_eq!(sum.value, d(12));
        assert_eq!(avg.value, d(4));
        assert_eq!(min.value, d(1));
        assert_eq!(max.value, d(7));
        assert_eq!(sum.aggregation_type, AggregationType::Sum);
        assert_eq!(max.field_definition_name, "Calc1");
    }

    #[test]
    fn summarize_empty_is_zero() {
        for entry in summarize("Calc1", &[]) {
            assert_eq!(entry.value, Decimal::ZERO);
        }
    }

    #[test]
    fn summarize_skips_values_that_overflow_the_sum() {
        let [sum, avg, min, max] = summarize("Calc1", &[Decimal::MAX, d(5), d(1)]);
        assert_eq!(sum.value, Decimal::MAX);
        assert_eq!(avg.value, Decimal::MAX);
        assert_eq!(min.value, d(1));
        assert_eq!(max.value, Decimal::MAX);

        let [sum, avg, ..] = summarize("Calc1", &[d(-5), Decimal::MAX, d(3)]);
        assert_eq!(sum.value, Decimal::MAX - d(2));
        assert_eq!(avg.value, (Decimal::MAX - d(2)) / d(3));
    }

    #[test]
    fn set_lookup_is_case_insensitive() {
        let set = AggregationSet::from_values(summarize("Calc1", &[d(2), d(3)]));
        assert_eq!(set.get("calc1", AggregationType::Sum), Some(d(5)));
        assert_eq!(set.get("CALC1", AggregationType::Max), Some(d(3)));
        assert_eq!(set.get("Calc2", AggregationType::Sum), None);
    }

    #[test]
    fn insert_replaces_same_name_and_type() {
        let mut set = AggregationSet::from_values(summarize("Calc1", &[d(2)]));
        set.extend(summarize("CALC1", &[d(10)]));
        assert_eq!(set.len(), 4);
        assert_eq!(set.get("Calc1", AggregationType::Sum), Some(d(10)));
    }

    #[test]
    fn set_keeps_order_and_lookups_through_json() {
        let mut set = AggregationSet::from_values(summarize("Calc2", &[d(1)]));
        set.extend(summarize("Calc1", &[d(4)]));

        let json = serde_json::to_string(&set).unwrap();
        let restored: AggregationSet = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, set);
        assert_eq!(restored.iter().next().unwrap().field_definition_name, "Calc2");
        assert_eq!(restored.get("calc1", AggregationType::Max), Some(d(4)));
    }

    #[test]
    fn dataset_aggregations_use_aggregable_numeric_fields_only() {
        let table = DatasetTable {
            relationship_name: "Pupil Numbers".into(),
            fields: vec![
                DatasetField::new("Pupils", DatasetFieldType::Integer, true),
                DatasetField::new("Rate", DatasetFieldType::Decimal, false),
                DatasetField::new("Name", DatasetFieldType::Text, true),
            ],
            rows: vec![
                row([("Pupils", ScalarValue::Integer(10)), ("Name", "a".into())]),
                row([("Pupils", ScalarValue::Text("30".into()))]),
                row([("Pupils", ScalarValue::Null)]),
                row([("Pupils", ScalarValue::Text("2e1".into()))]),
            ],
        };

        let set = dataset_aggregations(&[table]);
        assert_eq!(set.len(), 4);
        assert_eq!(
            set.get("Datasets.PupilNumbers.Pupils", AggregationType::Sum),
            Some(d(60))
        );
        assert_eq!(
            set.get("Datasets.PupilNumbers.Pupils", AggregationType::Average),
            Some(d(20))
        );
        assert_eq!(
            set.get("Datasets.PupilNumbers.Rate", AggregationType::Sum),
            None
        );
    }

    #[test]
    fn batch_values_merge_keys_case_insensitively() {
        let mut values = BatchValues::new();
        values.append("Calc1", [d(1)]);
        values.append("calc1", [d(2)]);
        values.append("CALC1", [d(3)]);
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("cAlC1"), Some(&[d(1), d(2), d(3)][..]));
        assert_eq!(values.names().collect::<Vec<_>>(), vec!["Calc1"]);
    }

    #[test]
    fn concat_appends_in_order() {
        let mut first = BatchValues::new();
        first.append("A", [d(1)]);
        let mut second = BatchValues::new();
        second.append("a", [d(2)]);
        second.append("B", [d(5)]);

        first.concat(&second);
        assert_eq!(first.get("A"), Some(&[d(1), d(2)][..]));
        assert_eq!(first.get("b"), Some(&[d(5)][..]));
    }
}
