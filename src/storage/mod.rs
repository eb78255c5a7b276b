pub mod memory;
pub mod disk;

pub use memory::MemoryEventStore;

use crate::error::TrendsResult;
use crate::query::filter::Predicate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

/// A dimension value as seen on an event. Missing and null both map to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DimensionKey {
    None,
    Value(String),
}

impl DimensionKey {
    pub fn from_property(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => DimensionKey::None,
            Some(Value::String(s)) => DimensionKey::Value(s.clone()),
            Some(other) => DimensionKey::Value(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            DimensionKey::None => "none",
            DimensionKey::Value(s) => s,
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub event: String,
    pub predicates: Vec<Predicate>,
    /// Inclusive.
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
    pub dimension: Option<String>,
    pub property: Option<String>,
}

impl FetchRequest {
    pub fn new(event: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            event: event.into(),
            predicates: Vec::new(),
            start,
            end,
            dimension: None,
            property: None,
        }
    }

    pub fn with_predicates(mut self, predicates: Vec<Predicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_dimension(mut self, dimension: Option<String>) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_property(mut self, property: Option<String>) -> Self {
        self.property = property;
        self
    }
}

/// One matching event, projected down to what aggregation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub timestamp: DateTime<Utc>,
    /// Numeric value of the requested property, if present and numeric.
    pub value: Option<f64>,
    /// `DimensionKey::None` when no dimension was requested.
    pub dimension: DimensionKey,
    pub distinct_id: String,
}

/// Read side of the event store. Implementations return rows ordered by timestamp,
/// already scoped to the caller's tenant.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> TrendsResult<Vec<EventRow>>;
}
