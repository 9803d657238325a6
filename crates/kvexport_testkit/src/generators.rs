//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use kvexport_core::{AttributeValue, ColumnType, FilterOperator, Item, NAryFilter};
use proptest::prelude::*;

/// Strategy for `(total_segments, num_workers)` pairs.
pub fn segments_and_workers_strategy() -> impl Strategy<Value = (u32, u32)> {
    (1u32..5_000, 0u32..2_000)
}

/// Strategy for valid sampling fractions in `(0, 1]`.
pub fn sample_fraction_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(1.0),
        Just(0.001),
        (1u32..=1_000_000).prop_map(|n| f64::from(n) / 1_000_000.0),
    ]
}

/// Strategy for attribute names.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for scalar attribute values.
pub fn scalar_value_strategy() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        prop::string::string_regex("[ -~]{0,24}")
            .expect("Invalid regex")
            .prop_map(AttributeValue::S),
        any::<i64>().prop_map(|n| AttributeValue::number(n)),
        any::<bool>().prop_map(AttributeValue::Bool),
    ]
}

/// Strategy for items with up to eight scalar attributes.
pub fn item_strategy() -> impl Strategy<Value = Item> {
    prop::collection::btree_map(attribute_name_strategy(), scalar_value_strategy(), 0..8)
}

/// Strategy for key-condition filters on numeric columns.
pub fn key_filter_strategy() -> impl Strategy<Value = NAryFilter> {
    let operator = prop_oneof![
        Just(FilterOperator::Eq),
        Just(FilterOperator::Lt),
        Just(FilterOperator::Le),
        Just(FilterOperator::Gt),
        Just(FilterOperator::Ge),
        Just(FilterOperator::Between),
    ];
    (attribute_name_strategy(), operator, any::<i32>(), any::<i32>()).prop_map(
        |(column, operator, a, b)| {
            let values = if operator == FilterOperator::Between {
                vec![a.min(b).to_string(), a.max(b).to_string()]
            } else {
                vec![a.to_string()]
            };
            NAryFilter::new(column, operator, ColumnType::Number, values)
                .expect("Generated filter must be valid")
        },
    )
}

/// Strategy for the transient failures preceding each page of a read.
pub fn failure_counts_strategy() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..4, 1..6)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
