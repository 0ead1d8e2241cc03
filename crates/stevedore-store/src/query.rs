//! Field-predicate document queries.
//!
//! Queries are evaluated against document bodies. Results are delivered
//! over a channel; the channel closing is the "no more results"
//! sentinel. Consumers collect while receiving and decide emptiness
//! only after the sequence ends.

use serde_json::Value;

use crate::document::Document;
use crate::error::StoreError;

/// One query event. A closed channel marks the end of the sequence.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    /// A matching document, delivered when the query expands content.
    Document(Document),
    /// A matching document link, delivered when the query does not
    /// expand content.
    Link(String),
    /// The query failed; no further events follow.
    Failure(StoreError),
}

/// A single field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Field equals the given value.
    Term {
        /// Dot-separated field path.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Field value is one of the given values.
    In {
        /// Dot-separated field path.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// Array-valued field contains the given element.
    Contains {
        /// Dot-separated field path.
        field: String,
        /// Element that must be present.
        value: Value,
    },
    /// Numeric field lies within the inclusive range.
    Range {
        /// Dot-separated field path.
        field: String,
        /// Inclusive lower bound, if any.
        min: Option<i64>,
        /// Inclusive upper bound, if any.
        max: Option<i64>,
    },
    /// At least one of the nested clauses matches.
    AnyOf(Vec<Clause>),
}

impl Clause {
    /// Evaluate the clause against a document body.
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Clause::Term { field, value } => field_value(body, field) == Some(value),
            Clause::In { field, values } => field_value(body, field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            Clause::Contains { field, value } => field_value(body, field)
                .and_then(Value::as_array)
                .map(|items| items.contains(value))
                .unwrap_or(false),
            Clause::Range { field, min, max } => {
                let Some(n) = field_value(body, field).and_then(Value::as_i64) else {
                    return false;
                };
                min.map(|m| n >= m).unwrap_or(true) && max.map(|m| n <= m).unwrap_or(true)
            }
            Clause::AnyOf(clauses) => clauses.iter().any(|c| c.matches(body)),
        }
    }
}

fn field_value<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// A kind-scoped query with conjunctive clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    /// Document kind to scan.
    pub kind: String,
    /// Clauses that must all match.
    pub clauses: Vec<Clause>,
    /// Whether to deliver full documents or just links.
    pub expand_content: bool,
}

impl DocumentQuery {
    /// Start a query over the given document kind.
    pub fn for_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            clauses: Vec::new(),
            expand_content: false,
        }
    }

    /// Add a clause; all clauses must match.
    pub fn with_clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Request full documents instead of links.
    pub fn expand(mut self) -> Self {
        self.expand_content = true;
        self
    }

    /// Evaluate all clauses against a document body.
    pub fn matches(&self, body: &Value) -> bool {
        self.clauses.iter().all(|c| c.matches(body))
    }
}
