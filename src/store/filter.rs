//! Document predicates, sort order and find options.
//!
//! `Filter` is the narrow predicate language the relationship layer needs to
//! talk to a store: equality, membership, ordering comparisons and boolean
//! composition over top-level (or dotted) document fields. The reserved field
//! [`ID_FIELD`] addresses the document's primary key.
//!
//! Backends either evaluate a `Filter` directly ([`Filter::matches`], used by
//! `MemoryStore`) or compile it to their own query language (`PgStore`).

use serde_json::Value;
use std::cmp::Ordering;

/// Field name that addresses a document's primary key in filters and sorts
pub const ID_FIELD: &str = "_id";

/// Predicate over stored documents
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    /// Field equals value
    Eq(String, Value),
    /// Field differs from value (missing fields match)
    Ne(String, Value),
    /// Field equals one of the values
    In(String, Vec<Value>),
    /// Field is greater than value
    Gt(String, Value),
    /// Field is greater than or equal to value
    Gte(String, Value),
    /// Field is less than value
    Lt(String, Value),
    /// Field is less than or equal to value
    Lte(String, Value),
    /// Field is present (`true`) or absent (`false`)
    Exists(String, bool),
    /// Every sub-filter matches
    And(Vec<Filter>),
    /// At least one sub-filter matches
    Or(Vec<Filter>),
}

impl Filter {
    /// Equality on a field
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    /// Membership on a field
    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// Primary key membership
    pub fn ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Filter::In(
            ID_FIELD.to_string(),
            ids.into_iter().map(|id| Value::String(id.into())).collect(),
        )
    }

    /// Combine with another filter, flattening nested `And`s and dropping `All`
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Evaluate against a document whose primary key is `id`
    pub fn matches(&self, id: &str, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => {
                lookup(id, doc, field).is_some_and(|v| values_equal(&v, value))
            }
            Filter::Ne(field, value) => {
                !lookup(id, doc, field).is_some_and(|v| values_equal(&v, value))
            }
            Filter::In(field, values) => lookup(id, doc, field)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(&v, candidate))),
            Filter::Gt(field, value) => compare_field(id, doc, field, value) == Some(Ordering::Greater),
            Filter::Gte(field, value) => matches!(
                compare_field(id, doc, field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(field, value) => compare_field(id, doc, field, value) == Some(Ordering::Less),
            Filter::Lte(field, value) => matches!(
                compare_field(id, doc, field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::Exists(field, expected) => lookup(id, doc, field).is_some() == *expected,
            Filter::And(filters) => filters.iter().all(|f| f.matches(id, doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(id, doc)),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Options for `DocumentStore::find_documents`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort by field; natural (insertion) order when `None`
    pub sort: Option<(String, Order)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Keep only these top-level fields (the primary key is always kept by the caller)
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    pub fn sorted(field: impl Into<String>, order: Order) -> Self {
        Self {
            sort: Some((field.into(), order)),
            ..Self::default()
        }
    }

    /// `skip` and `limit` as in-memory bounds, saturating where `usize` is narrower than `u64`
    pub(crate) fn window(&self) -> (usize, usize) {
        let bound = |n: u64| usize::try_from(n).unwrap_or(usize::MAX);
        (self.skip.map_or(0, bound), self.limit.map_or(usize::MAX, bound))
    }
}

/// Resolve a (possibly dotted) field path, with `_id` mapped to the primary key
fn lookup(id: &str, doc: &Value, field: &str) -> Option<Value> {
    if field == ID_FIELD {
        return Some(Value::String(id.to_string()));
    }
    let mut current = doc;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

fn compare_field(id: &str, doc: &Value, field: &str, value: &Value) -> Option<Ordering> {
    lookup(id, doc, field).and_then(|v| compare_values(&v, value))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two JSON values of the same kind; `None` across kinds
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Rank of a value's kind in `jsonb` ordering
fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by kind as `jsonb` ranks them, then within the kind
fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y)
                .map(|(l, r)| compare_json(l, r))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        (Value::Object(x), Value::Object(y)) => x
            .len()
            .cmp(&y.len())
            .then_with(|| a.to_string().cmp(&b.to_string())),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

/// Sort key comparison used by in-process sorting: missing values first
///
/// A total order, so mixed-kind fields sort deterministically.
pub(crate) fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_json(x, y),
    }
}

/// Sort key for a document, with `_id` mapped to the primary key
pub(crate) fn sort_key(id: &str, doc: &Value, field: &str) -> Option<Value> {
    lookup(id, doc, field)
}

/// Keep only the listed top-level fields of an object document
pub fn project(doc: Value, fields: &[String]) -> Value {
    match doc {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| fields.iter().any(|f| f == key))
                .collect(),
        ),
        other => other,
    }
}
