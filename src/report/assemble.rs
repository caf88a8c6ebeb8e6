use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    aggregation::Interval,
    fields::{FieldId, FieldRegistry},
    grouping::{GroupKey, GroupResult},
    pricing::{FieldCharge, microdollars_to_dollars},
};

/// Metric and cost of one field within a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowField {
    pub field: FieldId,
    pub metric: f64,
    /// Microdollars
    pub cost: i64,
}

/// One group's result for one sub-interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub group: GroupKey,
    pub interval: Interval,
    /// Every registered field, in registry order
    pub fields: Vec<RowField>,
    pub total_cost: i64,
    pub entity_count: usize,
}

impl ResultRow {
    pub fn field(&self, id: &str) -> Option<&RowField> {
        self.fields.iter().find(|f| f.field.as_str() == id)
    }

    pub fn metric(&self, id: &str) -> f64 {
        self.field(id).map_or(0.0, |f| f.metric)
    }

    pub fn cost(&self, id: &str) -> i64 {
        self.field(id).map_or(0, |f| f.cost)
    }

    pub fn cost_dollars(&self, id: &str) -> f64 {
        microdollars_to_dollars(self.cost(id))
    }
}

fn row_fields(charges: &BTreeMap<FieldId, FieldCharge>, fields: &FieldRegistry) -> Vec<RowField> {
    fields
        .iter()
        .map(|field| {
            let charge = charges.get(&field.id).copied().unwrap_or_default();
            RowField {
                field: field.id.clone(),
                metric: charge.metric.max(0.0),
                cost: charge.cost.max(0),
            }
        })
        .collect()
}

/// Build the ordered rows: by group label, then group key, then interval.
///
/// A group only gets a row for intervals in which it had members.
pub fn assemble(
    groups: &BTreeMap<GroupKey, GroupResult>,
    intervals: &[Interval],
    fields: &FieldRegistry,
) -> Vec<ResultRow> {
    let mut rows = Vec::new();
    for (key, group) in groups {
        for interval in intervals {
            let Some(charges) = group.intervals.get(&interval.index) else {
                continue;
            };
            if charges.entity_count == 0 {
                continue;
            }
            let fields = row_fields(&charges.charges, fields);
            let total_cost = fields.iter().fold(0i64, |acc, f| acc.saturating_add(f.cost));
            rows.push(ResultRow {
                group: key.clone(),
                interval: interval.clone(),
                fields,
                total_cost,
                entity_count: charges.entity_count,
            });
        }
    }
    rows
}
