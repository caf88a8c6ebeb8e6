mod assignments;
mod entities;
mod metrics;
mod tags;

pub use assignments::*;
use chrono::{DateTime, Utc};
pub use entities::*;
pub use metrics::*;
pub use tags::*;
use uuid::Uuid;

use crate::models::EntityKind;

/// Half-open time range `[start, end)` for sample queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Which entities a report covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub kind: EntityKind,
    /// Restrict to a single entity
    pub entity_id: Option<Uuid>,
}
