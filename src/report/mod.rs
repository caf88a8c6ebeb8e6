//! Report options and result assembly.

mod assemble;
mod options;

use std::collections::BTreeMap;

pub use assemble::{ResultRow, RowField, assemble};
pub use options::{ExtOptions, ReportOptions, ReportPlan};
use serde::Serialize;

use crate::{
    aggregation::ReportWindow,
    fields::{FieldId, FieldRegistry},
    grouping::GroupKey,
};

/// Entity accounting of one report run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    /// Entities listed for the report scope
    pub entities_in_scope: usize,
    /// Entities priced and grouped
    pub entities_billed: usize,
    /// Entities without an applicable rate
    pub entities_without_rate: usize,
    /// Entities dropped by the tag filter
    pub entities_filtered: usize,
    /// Entities with no rollup samples in the window
    pub entities_without_samples: usize,
}

/// Window-level totals of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal {
    pub group: GroupKey,
    /// Metrics and costs summed over the group's rows; fixed metrics count
    /// billed sub-intervals
    pub fields: Vec<RowField>,
    pub total_cost: i64,
    pub intervals: usize,
}

/// Result of a report run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub window: ReportWindow,
    pub rows: Vec<ResultRow>,
    pub stats: ReportStats,
}

impl Report {
    /// Rows of the group with display label `label`.
    pub fn rows_for<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a ResultRow> + 'a {
        self.rows.iter().filter(move |r| r.group.label == label)
    }

    /// Per-group totals over the whole window, in row order.
    pub fn totals(&self, fields: &FieldRegistry) -> Vec<GroupTotal> {
        let mut totals: BTreeMap<&GroupKey, GroupTotal> = BTreeMap::new();
        for row in &self.rows {
            let total = totals.entry(&row.group).or_insert_with(|| GroupTotal {
                group: row.group.clone(),
                fields: fields
                    .iter()
                    .map(|f| RowField {
                        field: f.id.clone(),
                        metric: 0.0,
                        cost: 0,
                    })
                    .collect(),
                total_cost: 0,
                intervals: 0,
            });
            for field in &mut total.fields {
                let (metric, cost) = row
                    .field(field.field.as_str())
                    .map_or((0.0, 0), |f| (f.metric, f.cost));
                field.metric += metric;
                field.cost = field.cost.saturating_add(cost);
            }
            total.total_cost = total.total_cost.saturating_add(row.total_cost);
            total.intervals += 1;
        }
        totals.into_values().collect()
    }

    pub fn total_cost(&self) -> i64 {
        self.rows
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.total_cost))
    }

    /// Field ids in column order.
    pub fn columns(fields: &FieldRegistry) -> Vec<FieldId> {
        fields.iter().map(|f| f.id.clone()).collect()
    }
}
