//! Attribute values, items and their standard JSON rendering.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// One row of a table: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A typed attribute value as stored by the remote store.
///
/// Serializes with the store's type tags, e.g. `{"S": "blue"}` or
/// `{"N": "135"}`. Numbers are carried as their decimal text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A string.
    #[serde(rename = "S")]
    S(String),
    /// A number in decimal text form.
    #[serde(rename = "N")]
    N(String),
    /// A boolean.
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// An explicit null.
    #[serde(rename = "NULL")]
    Null(bool),
    /// A string set.
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    /// A number set.
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    /// A list of values.
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    /// A nested map.
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Creates a string value.
    pub fn string(value: impl Into<String>) -> Self {
        AttributeValue::S(value.into())
    }

    /// Creates a number value from anything that prints as a number.
    pub fn number(value: impl ToString) -> Self {
        AttributeValue::N(value.to_string())
    }

    /// Returns the number as `f64` if this is a parseable number value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::N(n) => n.parse().ok(),
            _ => None,
        }
    }

    /// Returns the string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Approximate stored size in bytes, used for capacity costing.
    pub fn approximate_size(&self) -> usize {
        match self {
            AttributeValue::S(s) => s.len(),
            AttributeValue::N(n) => n.len() / 2 + 1,
            AttributeValue::Bool(_) | AttributeValue::Null(_) => 1,
            AttributeValue::Ss(values) => values.iter().map(String::len).sum(),
            AttributeValue::Ns(values) => values.iter().map(|n| n.len() / 2 + 1).sum(),
            AttributeValue::L(values) => {
                3 + values
                    .iter()
                    .map(|v| 1 + v.approximate_size())
                    .sum::<usize>()
            }
            AttributeValue::M(map) => 3 + item_size(map),
        }
    }

    /// Renders this value as plain JSON without type tags.
    pub fn to_standard_json(&self) -> Value {
        match self {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(n) => number_to_json(n),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::Ss(values) => {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            }
            AttributeValue::Ns(values) => {
                Value::Array(values.iter().map(|n| number_to_json(n)).collect())
            }
            AttributeValue::L(values) => {
                Value::Array(values.iter().map(AttributeValue::to_standard_json).collect())
            }
            AttributeValue::M(map) => to_standard_json(map),
        }
    }
}

/// Keeps every digit of `text`; text that is not a JSON number stays a string.
fn number_to_json(text: &str) -> Value {
    text.trim()
        .parse::<Number>()
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Approximate size of an item in bytes (names plus values).
pub fn item_size(item: &Item) -> usize {
    item.iter()
        .map(|(name, value)| name.len() + value.approximate_size())
        .sum()
}

/// Renders an item as a standard JSON object without type annotations.
///
/// This is the export's output record format. It is lossy (sets become
/// arrays, type tags are dropped) and has no reverse conversion. Numbers
/// keep their digits.
pub fn to_standard_json(item: &Item) -> Value {
    let mut object = Map::new();
    for (name, value) in item {
        object.insert(name.clone(), value.to_standard_json());
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_item() -> Item {
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::string("p-1"));
        item.insert("price".into(), AttributeValue::number(12));
        item.insert("ratio".into(), AttributeValue::N("0.25".into()));
        item.insert("active".into(), AttributeValue::Bool(true));
        item.insert("gone".into(), AttributeValue::Null(true));
        item.insert(
            "tags".into(),
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
        );
        item
    }

    #[test]
    fn typed_json_uses_store_tags() {
        let encoded = serde_json::to_value(AttributeValue::string("blue")).unwrap();
        assert_eq!(encoded, json!({"S": "blue"}));

        let decoded: AttributeValue = serde_json::from_value(json!({"N": "135"})).unwrap();
        assert_eq!(decoded, AttributeValue::N("135".into()));
        assert_eq!(decoded.as_f64(), Some(135.0));
    }

    #[test]
    fn standard_json_strips_type_annotations() {
        let rendered = to_standard_json(&sample_item());
        assert_eq!(
            rendered,
            json!({
                "active": true,
                "gone": null,
                "id": "p-1",
                "price": 12,
                "ratio": 0.25,
                "tags": ["a", "b"],
            })
        );
    }

    #[test]
    fn nested_values_render_recursively() {
        let mut inner = BTreeMap::new();
        inner.insert("n".into(), AttributeValue::number(1));
        let value = AttributeValue::L(vec![AttributeValue::M(inner), AttributeValue::string("x")]);
        assert_eq!(value.to_standard_json(), json!([{"n": 1}, "x"]));
    }

    #[test]
    fn numbers_render_without_losing_digits() {
        let big = AttributeValue::N("12345678901234567891".into()).to_standard_json();
        assert_eq!(big.to_string(), "12345678901234567891");

        let precise = AttributeValue::N("0.12345678901234567891".into()).to_standard_json();
        assert_eq!(precise.to_string(), "0.12345678901234567891");

        let set = AttributeValue::Ns(vec!["-9223372036854775809".into()]).to_standard_json();
        assert_eq!(set.to_string(), "[-9223372036854775809]");
    }

    #[test]
    fn unparseable_numbers_stay_text() {
        let value = AttributeValue::N("not-a-number".into()).to_standard_json();
        assert_eq!(value, json!("not-a-number"));
    }

    #[test]
    fn item_size_counts_names_and_values() {
        let mut item = Item::new();
        item.insert("ab".into(), AttributeValue::string("xyz"));
        assert_eq!(item_size(&item), 5);
    }
}
