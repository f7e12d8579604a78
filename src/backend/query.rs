//! Backend-neutral query and update model
//!
//! Repositories describe what they want with these types; each
//! [`SearchBackend`](super::SearchBackend) translates them into its own DSL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

/// A single predicate over document fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Field equals value (any element, for array fields)
    Term { field: String, value: Value },

    /// Field equals one of the values
    Terms { field: String, values: Vec<Value> },

    /// Document id is in the set
    Ids(Vec<String>),

    /// Date field within the inclusive bounds
    DateRange {
        field: String,
        gte: Option<DateTime<Utc>>,
        lte: Option<DateTime<Utc>>,
    },

    /// Field absent or null
    Missing { field: String },

    Not(Box<Filter>),

    And(Vec<Filter>),

    /// Free-form query string passed through to the backend
    QueryString(String),
}

impl Filter {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ids<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        Filter::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn date_range(
        field: impl Into<String>,
        gte: Option<DateTime<Utc>>,
        lte: Option<DateTime<Utc>>,
    ) -> Self {
        Filter::DateRange {
            field: field.into(),
            gte,
            lte,
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Filter::Missing {
            field: field.into(),
        }
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn query_string(query: impl Into<String>) -> Self {
        Filter::QueryString(query.into())
    }
}

/// Conjunction of filters; an empty query matches everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub filters: Vec<Filter>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter to the conjunction
    pub fn and(mut self, filter: Filter) -> Self {
        self.push(filter);
        self
    }

    pub fn push(&mut self, filter: Filter) {
        match filter {
            Filter::And(inner) => self.filters.extend(inner),
            other => self.filters.push(other),
        }
    }

    /// Append every filter of `other`
    pub fn merge(&mut self, other: &SearchQuery) {
        self.filters.extend(other.filters.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl From<Filter> for SearchQuery {
    fn from(filter: Filter) -> Self {
        SearchQuery::new().and(filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

/// One field operation of a conditional update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptOp {
    /// Replace when the stored value is later than `value`, or when
    /// `or_when_zero` names a numeric field currently equal to zero
    SetIfEarlier {
        field: String,
        value: Value,
        or_when_zero: Option<String>,
    },

    /// Replace when the stored value is earlier than `value`
    SetIfLater { field: String, value: Value },

    Increment { field: String, by: i64 },

    Set { field: String, value: Value },
}

impl ScriptOp {
    pub fn field(&self) -> &str {
        match self {
            ScriptOp::SetIfEarlier { field, .. }
            | ScriptOp::SetIfLater { field, .. }
            | ScriptOp::Increment { field, .. }
            | ScriptOp::Set { field, .. } => field,
        }
    }
}

/// Ordered field operations applied atomically to one document
///
/// Operations run in order against the stored document, so a zero check
/// placed before an increment sees the pre-increment value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateScript {
    pub ops: Vec<ScriptOp>,
}

impl UpdateScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_if_earlier(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
        or_when_zero: Option<&str>,
    ) -> Self {
        self.ops.push(ScriptOp::SetIfEarlier {
            field: field.into(),
            value: value.into(),
            or_when_zero: or_when_zero.map(str::to_string),
        });
        self
    }

    pub fn set_if_later(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(ScriptOp::SetIfLater {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn increment(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(ScriptOp::Increment {
            field: field.into(),
            by,
        });
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(ScriptOp::Set {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Script parameters keyed by field name, as passed alongside
    /// [`to_painless`](Self::to_painless)
    pub fn params(&self) -> serde_json::Map<String, Value> {
        self.ops
            .iter()
            .map(|op| {
                let value = match op {
                    ScriptOp::SetIfEarlier { value, .. }
                    | ScriptOp::SetIfLater { value, .. }
                    | ScriptOp::Set { value, .. } => value.clone(),
                    ScriptOp::Increment { by, .. } => Value::from(*by),
                };
                (op.field().to_string(), value)
            })
            .collect()
    }

    /// Painless source for an Elasticsearch `_update` call
    pub fn to_painless(&self) -> String {
        let mut source = String::new();
        for op in &self.ops {
            match op {
                ScriptOp::SetIfEarlier {
                    field,
                    or_when_zero,
                    ..
                } => {
                    let zero = or_when_zero
                        .as_ref()
                        .map(|z| format!("ctx._source.{} == 0 || ", z))
                        .unwrap_or_default();
                    let _ = write!(
                        source,
                        "if ({zero}ctx._source.{f} == null || ctx._source.{f}.compareTo(params.{f}) > 0) {{ ctx._source.{f} = params.{f}; }} ",
                        zero = zero,
                        f = field
                    );
                }
                ScriptOp::SetIfLater { field, .. } => {
                    let _ = write!(
                        source,
                        "if (ctx._source.{f} == null || ctx._source.{f}.compareTo(params.{f}) < 0) {{ ctx._source.{f} = params.{f}; }} ",
                        f = field
                    );
                }
                ScriptOp::Increment { field, .. } => {
                    let _ = write!(source, "ctx._source.{f} += params.{f}; ", f = field);
                }
                ScriptOp::Set { field, .. } => {
                    let _ = write!(source, "ctx._source.{f} = params.{f}; ", f = field);
                }
            }
        }
        source.trim_end().to_string()
    }
}
