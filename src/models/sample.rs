use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Tag, TagFilter};

/// One time-stamped usage observation for an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRollupSample {
    pub timestamp: DateTime<Utc>,
    /// Metric values by metric name, e.g. `cpu_usage_cores`
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Tags applied to the resource at this instant (`None` = untagged)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl MetricRollupSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
            tags: None,
        }
    }

    pub fn with_value(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.values.insert(metric.into(), value);
        self
    }

    pub fn with_tags(mut self, tags: Option<Vec<Tag>>) -> Self {
        self.tags = tags;
        self
    }

    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }

    pub fn is_untagged(&self) -> bool {
        self.tags.as_ref().is_none_or(Vec::is_empty)
    }

    /// Whether this sample places the entity inside a tag-filtered report.
    ///
    /// Untagged samples fall back to the entity's current tags, which have
    /// already matched the filter.
    pub fn counts_for(&self, filter: &TagFilter) -> bool {
        match &self.tags {
            Some(tags) if !tags.is_empty() => filter.matches(tags),
            _ => true,
        }
    }
}
