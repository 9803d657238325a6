//! Push-down filter model.
//!
//! A [`QueryFilter`] describes which rows a read targets: key conditions
//! (which must match the key schema of the table or the selected index),
//! non-key scan conditions, and an optional [`IndexInfo`]. It is pure data.
//!
//! Each per-segment request works on its own clone of the split's template
//! filter. Both condition maps own their values, so `clone()` is a deep copy
//! and mutating the clone never reaches the template.

use crate::error::{ExportError, ExportResult};
use crate::value::{AttributeValue, Item};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than or equal.
    Le,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Greater than.
    Gt,
    /// Inclusive range, two values.
    Between,
    /// Membership, one or more values.
    In,
    /// String prefix.
    BeginsWith,
    /// Attribute is present.
    NotNull,
    /// Attribute is absent.
    Null,
}

/// How many values an operator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many values.
    Exactly(usize),
    /// At least this many values.
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl FilterOperator {
    /// Returns the number of values this operator takes.
    pub fn arity(&self) -> Arity {
        match self {
            FilterOperator::Between => Arity::Exactly(2),
            FilterOperator::In => Arity::AtLeast(1),
            FilterOperator::NotNull | FilterOperator::Null => Arity::Exactly(0),
            _ => Arity::Exactly(1),
        }
    }

    /// Returns true if the operator may appear in a key condition.
    pub fn is_key_operator(&self) -> bool {
        matches!(
            self,
            FilterOperator::Eq
                | FilterOperator::Le
                | FilterOperator::Lt
                | FilterOperator::Ge
                | FilterOperator::Gt
                | FilterOperator::Between
                | FilterOperator::BeginsWith
        )
    }
}

/// Type of the column a filter compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// String column.
    String,
    /// Number column.
    Number,
}

impl ColumnType {
    /// The store's type tag for this column type.
    pub fn type_code(&self) -> &'static str {
        match self {
            ColumnType::String => "S",
            ColumnType::Number => "N",
        }
    }

    fn to_value(self, text: &str) -> ExportResult<AttributeValue> {
        match self {
            ColumnType::String => Ok(AttributeValue::S(text.to_string())),
            ColumnType::Number => {
                if text.trim().parse::<f64>().is_err() {
                    return Err(ExportError::InvalidFilter(format!(
                        "`{text}` is not a number"
                    )));
                }
                Ok(AttributeValue::N(text.trim().to_string()))
            }
        }
    }
}

/// A condition on one column: an operator and its typed operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// The comparison operator.
    pub operator: FilterOperator,
    /// Operands, in order.
    pub values: Vec<AttributeValue>,
}

impl Condition {
    /// Evaluates the condition against an attribute, `None` if absent.
    pub fn matches(&self, attribute: Option<&AttributeValue>) -> bool {
        let Some(value) = attribute else {
            return self.operator == FilterOperator::Null;
        };
        let first = self.values.first();
        match self.operator {
            FilterOperator::Null => false,
            FilterOperator::NotNull => true,
            FilterOperator::Eq => first.is_some_and(|v| compare(value, v) == Some(Ordering::Equal)),
            FilterOperator::Ne => first.is_some_and(|v| compare(value, v) != Some(Ordering::Equal)),
            FilterOperator::Le => first.is_some_and(|v| {
                matches!(compare(value, v), Some(Ordering::Less | Ordering::Equal))
            }),
            FilterOperator::Lt => first.is_some_and(|v| compare(value, v) == Some(Ordering::Less)),
            FilterOperator::Ge => first.is_some_and(|v| {
                matches!(compare(value, v), Some(Ordering::Greater | Ordering::Equal))
            }),
            FilterOperator::Gt => {
                first.is_some_and(|v| compare(value, v) == Some(Ordering::Greater))
            }
            FilterOperator::Between => match (self.values.first(), self.values.get(1)) {
                (Some(low), Some(high)) => {
                    matches!(compare(value, low), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(compare(value, high), Some(Ordering::Less | Ordering::Equal))
                }
                _ => false,
            },
            FilterOperator::In => self
                .values
                .iter()
                .any(|v| compare(value, v) == Some(Ordering::Equal)),
            FilterOperator::BeginsWith => match (value, first) {
                (AttributeValue::S(s), Some(AttributeValue::S(prefix))) => s.starts_with(prefix),
                _ => false,
            },
        }
    }
}

fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::N(_), AttributeValue::N(_)) => {
            left.as_f64()?.partial_cmp(&right.as_f64()?)
        }
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::Bool(a), AttributeValue::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// A filter on one column with any number of operands.
///
/// Operands are given as text and typed by the column type when the
/// filter is turned into a [`Condition`].
#[derive(Debug, Clone, PartialEq)]
pub struct NAryFilter {
    column_name: String,
    operator: FilterOperator,
    column_type: ColumnType,
    values: Vec<String>,
}

impl NAryFilter {
    /// Creates a filter, validating operand count and number syntax.
    pub fn new<I, V>(
        column_name: impl Into<String>,
        operator: FilterOperator,
        column_type: ColumnType,
        values: I,
    ) -> ExportResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let column_name = column_name.into();
        if column_name.is_empty() {
            return Err(ExportError::InvalidFilter("empty column name".into()));
        }
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if !operator.arity().accepts(values.len()) {
            return Err(ExportError::InvalidFilter(format!(
                "{operator:?} on `{column_name}` does not take {} value(s)",
                values.len()
            )));
        }
        for value in &values {
            column_type.to_value(value)?;
        }
        Ok(Self {
            column_name,
            operator,
            column_type,
            values,
        })
    }

    /// The column this filter applies to.
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    /// The comparison operator.
    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    /// The store type tag of the column.
    pub fn column_type(&self) -> &'static str {
        self.column_type.type_code()
    }

    /// Operand texts, in order.
    pub fn column_values(&self) -> &[String] {
        &self.values
    }

    /// Converts into a condition with typed operands.
    pub fn condition(&self) -> Condition {
        let values = self
            .values
            .iter()
            .map(|text| match self.column_type {
                ColumnType::String => AttributeValue::S(text.clone()),
                ColumnType::Number => AttributeValue::N(text.trim().to_string()),
            })
            .collect();
        Condition {
            operator: self.operator,
            values,
        }
    }
}

/// A secondary index selector and its key schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Partition (hash) key attribute of the index.
    pub hash_key: String,
    /// Sort (range) key attribute of the index, if any.
    pub range_key: Option<String>,
}

impl IndexInfo {
    /// Creates an index selector.
    pub fn new(
        name: impl Into<String>,
        hash_key: impl Into<String>,
        range_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            hash_key: hash_key.into(),
            range_key,
        }
    }
}

/// Key conditions, scan conditions and an optional index for one read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    key_conditions: BTreeMap<String, Condition>,
    scan_filter: BTreeMap<String, Condition>,
    index: Option<IndexInfo>,
}

impl QueryFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// The selected index, if any.
    pub fn index(&self) -> Option<&IndexInfo> {
        self.index.as_ref()
    }

    /// Selects an index.
    pub fn set_index(&mut self, index: IndexInfo) {
        self.index = Some(index);
    }

    /// Key conditions by column.
    pub fn key_conditions(&self) -> &BTreeMap<String, Condition> {
        &self.key_conditions
    }

    /// Non-key scan conditions by column.
    pub fn scan_filter(&self) -> &BTreeMap<String, Condition> {
        &self.scan_filter
    }

    /// Adds a key condition, replacing any previous one on the same column.
    pub fn add_key_condition(&mut self, filter: &NAryFilter) -> ExportResult<()> {
        if !filter.operator().is_key_operator() {
            return Err(ExportError::InvalidFilter(format!(
                "{:?} cannot be used in a key condition",
                filter.operator()
            )));
        }
        self.key_conditions
            .insert(filter.column_name().to_string(), filter.condition());
        Ok(())
    }

    /// Adds a scan condition, replacing any previous one on the same column.
    pub fn add_scan_filter(&mut self, filter: &NAryFilter) {
        self.scan_filter
            .insert(filter.column_name().to_string(), filter.condition());
    }

    /// Returns true if the item satisfies every key and scan condition.
    pub fn matches(&self, item: &Item) -> bool {
        self.key_conditions
            .iter()
            .chain(self.scan_filter.iter())
            .all(|(column, condition)| condition.matches(item.get(column)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMN_NAME: &str = "color";

    fn check(operator: FilterOperator, column_type: ColumnType, values: &[&str]) {
        let filter = NAryFilter::new(COLUMN_NAME, operator, column_type, values.iter().copied())
            .unwrap();
        assert_eq!(filter.column_name(), COLUMN_NAME);
        assert_eq!(filter.operator(), operator);
        assert_eq!(filter.column_type(), column_type.type_code());

        let condition = filter.condition();
        assert_eq!(condition.values.len(), values.len());
        for (value, attribute) in values.iter().zip(&condition.values) {
            match column_type {
                ColumnType::String => assert_eq!(attribute, &AttributeValue::S(value.to_string())),
                ColumnType::Number => assert_eq!(attribute, &AttributeValue::N(value.to_string())),
            }
        }
    }

    #[test]
    fn single_string_value() {
        check(FilterOperator::Eq, ColumnType::String, &["blue"]);
    }

    #[test]
    fn multiple_string_values() {
        check(FilterOperator::In, ColumnType::String, &["red", "green"]);
    }

    #[test]
    fn single_number_value() {
        check(FilterOperator::Eq, ColumnType::Number, &["135"]);
    }

    #[test]
    fn between_number_values() {
        check(FilterOperator::Between, ColumnType::Number, &["107", "145"]);
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = NAryFilter::new("x", FilterOperator::Between, ColumnType::Number, ["1"]);
        assert!(matches!(err, Err(ExportError::InvalidFilter(_))));

        let none = Vec::<String>::new();
        let err = NAryFilter::new("x", FilterOperator::In, ColumnType::String, none.clone());
        assert!(err.is_err());

        assert!(NAryFilter::new("x", FilterOperator::NotNull, ColumnType::String, none).is_ok());
    }

    #[test]
    fn rejects_non_numeric_number() {
        let err = NAryFilter::new("x", FilterOperator::Eq, ColumnType::Number, ["seven"]);
        assert!(matches!(err, Err(ExportError::InvalidFilter(_))));
    }

    #[test]
    fn key_conditions_reject_scan_only_operators() {
        let mut filter = QueryFilter::new();
        let ne = NAryFilter::new("k", FilterOperator::Ne, ColumnType::Number, ["1"]).unwrap();
        assert!(filter.add_key_condition(&ne).is_err());
        assert!(filter.key_conditions().is_empty());
    }

    #[test]
    fn clone_is_isolated_from_template() {
        let mut template = QueryFilter::new();
        template.set_index(IndexInfo::new("by_time", "bucket", Some("ts".into())));
        let range =
            NAryFilter::new("ts", FilterOperator::Between, ColumnType::Number, ["3", "5"]).unwrap();
        template.add_key_condition(&range).unwrap();

        let mut clone = template.clone();
        let key = NAryFilter::new("bucket", FilterOperator::Eq, ColumnType::Number, ["7"]).unwrap();
        clone.add_key_condition(&key).unwrap();
        clone.add_scan_filter(
            &NAryFilter::new("color", FilterOperator::Eq, ColumnType::String, ["red"]).unwrap(),
        );

        assert_eq!(template.key_conditions().len(), 1);
        assert!(template.scan_filter().is_empty());
        assert_eq!(clone.key_conditions().len(), 2);
        assert_eq!(clone.index(), template.index());
    }

    #[test]
    fn conditions_evaluate_against_items() {
        let mut item = Item::new();
        item.insert("ts".into(), AttributeValue::number(4));
        item.insert("color".into(), AttributeValue::string("red"));

        let mut filter = QueryFilter::new();
        filter
            .add_key_condition(
                &NAryFilter::new("ts", FilterOperator::Between, ColumnType::Number, ["3", "5"])
                    .unwrap(),
            )
            .unwrap();
        filter.add_scan_filter(
            &NAryFilter::new("color", FilterOperator::BeginsWith, ColumnType::String, ["re"])
                .unwrap(),
        );
        assert!(filter.matches(&item));

        item.insert("ts".into(), AttributeValue::number(10));
        assert!(!filter.matches(&item));
    }

    #[test]
    fn null_checks_use_presence() {
        let present = Condition {
            operator: FilterOperator::NotNull,
            values: vec![],
        };
        let absent = Condition {
            operator: FilterOperator::Null,
            values: vec![],
        };
        let value = AttributeValue::string("x");
        assert!(present.matches(Some(&value)));
        assert!(!present.matches(None));
        assert!(absent.matches(None));
        assert!(!absent.matches(Some(&value)));
    }
}
