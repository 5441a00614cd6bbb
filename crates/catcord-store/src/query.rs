//! Query model for collection reads and subscriptions.
//!
//! Covers the slice of the hosted backend's query surface Catcord actually
//! uses: equality and range filters on flat fields, `array-contains`, one
//! optional order-by, and a result limit. Range filters over strings compare
//! lexicographically, which is what makes `name >= q && name <= q + '\u{f8ff}'`
//! work as a prefix search.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::Document;

/// One field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value.
    Eq(String, Value),
    /// Field is at or above value (same-type comparison only).
    Gte(String, Value),
    /// Field is at or below value (same-type comparison only).
    Lte(String, Value),
    /// Field is an array containing value.
    ArrayContains(String, Value),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::ArrayContains(field.into(), value.into())
    }

    fn matches(&self, data: &Value) -> bool {
        match self {
            Self::Eq(field, want) => data.get(field) == Some(want),
            Self::Gte(field, low) => range_matches(data.get(field), low, |ord| ord != Ordering::Less),
            Self::Lte(field, high) => {
                range_matches(data.get(field), high, |ord| ord != Ordering::Greater)
            }
            Self::ArrayContains(field, want) => data
                .get(field)
                .and_then(Value::as_array)
                .map(|items| items.contains(want))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A filtered read over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document's fields satisfy every filter.
    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(data))
    }

    /// Order and clip a raw match list into the final result set.
    ///
    /// Documents tie-break on id so results are deterministic.
    pub fn arrange(&self, docs: &mut Vec<Document>) {
        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_fields(a.data.get(field), b.data.get(field))
                    .then_with(|| a.id.cmp(&b.id));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
    }
}

fn range_matches(field: Option<&Value>, bound: &Value, keep: impl Fn(Ordering) -> bool) -> bool {
    match field {
        Some(value) if type_rank(value) == type_rank(bound) => {
            keep(compare_present(value, bound))
        }
        _ => false,
    }
}

/// Missing fields sort before any present value.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_present(a, b),
    }
}

fn compare_present(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
