//! Tag grouping.
//!
//! Buckets priced entity results by entity, by tag categories or by label
//! keys, and merges each bucket into per-interval group totals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    fields::{FieldId, FieldRegistry},
    models::{EntitySnapshot, TagFilter},
    pricing::FieldCharge,
};

/// Label of the group holding entities without a tag in any requested category.
pub const EMPTY_GROUP: &str = "<Empty>";

/// Grouping dimension of a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One group per entity
    #[default]
    Entity,
    /// One component per tag category
    Tags(Vec<String>),
    /// One component per label key
    Labels(Vec<String>),
}

/// Identity of a report group.
///
/// Ordered by display label first so rows sort the way they are shown.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub label: String,
    /// One entry per grouping dimension; `None` when the entity lacks it
    pub parts: Vec<Option<String>>,
}

impl GroupKey {
    fn from_parts(parts: Vec<Option<String>>) -> Self {
        let present: Vec<&str> = parts.iter().flatten().map(String::as_str).collect();
        let label = if present.is_empty() {
            EMPTY_GROUP.to_string()
        } else {
            present.join(", ")
        };
        Self { label, parts }
    }

    fn for_entity(id: Uuid, name: &str) -> Self {
        Self {
            label: name.to_string(),
            parts: vec![Some(id.to_string())],
        }
    }

    pub fn is_empty_group(&self) -> bool {
        self.parts.iter().all(Option::is_none)
    }

    /// Key of `entity` under `group_by`.
    pub fn of(entity: &EntitySnapshot, group_by: &GroupBy) -> Self {
        match group_by {
            GroupBy::Entity => Self::for_entity(entity.id(), &entity.entity.name),
            GroupBy::Tags(categories) => Self::from_parts(
                categories
                    .iter()
                    .map(|c| entity.tag_in_category(c).map(|t| t.display_value().to_string()))
                    .collect(),
            ),
            GroupBy::Labels(keys) => Self::from_parts(
                keys.iter()
                    .map(|k| entity.label_for_key(k).map(|l| l.value.clone()))
                    .collect(),
            ),
        }
    }
}

/// Priced field values of one entity or group for one sub-interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalCharges {
    pub charges: BTreeMap<FieldId, FieldCharge>,
    /// Entities contributing to these charges
    pub entity_count: usize,
}

impl IntervalCharges {
    pub fn for_entity(charges: BTreeMap<FieldId, FieldCharge>) -> Self {
        Self {
            charges,
            entity_count: 1,
        }
    }

    pub fn charge(&self, field: &str) -> FieldCharge {
        self.charges.get(field).copied().unwrap_or_default()
    }

    /// Field-by-field merge; fixed metrics by maximum, everything else summed.
    pub fn merge(&mut self, other: &IntervalCharges, fields: &FieldRegistry) {
        for (id, charge) in &other.charges {
            let merged = match (self.charges.get(id), fields.get(id.as_str())) {
                (Some(existing), Some(field)) => existing.merge(*charge, field),
                (Some(existing), None) => FieldCharge::new(
                    existing.metric + charge.metric,
                    existing.cost.saturating_add(charge.cost),
                ),
                (None, _) => *charge,
            };
            self.charges.insert(id.clone(), merged);
        }
        self.entity_count += other.entity_count;
    }

    pub fn total_cost(&self) -> i64 {
        self.charges
            .values()
            .fold(0i64, |acc, c| acc.saturating_add(c.cost))
    }
}

/// Priced result of one entity, per interval index.
#[derive(Debug, Clone)]
pub struct EntityResult {
    pub entity: EntitySnapshot,
    pub intervals: BTreeMap<usize, IntervalCharges>,
}

/// Merged totals of one group, per interval index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupResult {
    pub intervals: BTreeMap<usize, IntervalCharges>,
}

/// Bucket `results` by `group_by` and merge each bucket.
///
/// With a tag filter, entities carrying none of its tags are dropped rather
/// than merged into the [`EMPTY_GROUP`].
pub fn group(
    results: impl IntoIterator<Item = EntityResult>,
    group_by: &GroupBy,
    tag_filter: Option<&TagFilter>,
    fields: &FieldRegistry,
) -> BTreeMap<GroupKey, GroupResult> {
    let mut groups: BTreeMap<GroupKey, GroupResult> = BTreeMap::new();

    for result in results {
        if let Some(filter) = tag_filter
            && !filter.matches(&result.entity.tags)
        {
            tracing::debug!(
                entity_id = %result.entity.id(),
                "Entity carries none of the filter tags, excluded from grouping"
            );
            continue;
        }

        let key = GroupKey::of(&result.entity, group_by);
        let group = groups.entry(key).or_default();
        for (index, charges) in result.intervals {
            match group.intervals.get_mut(&index) {
                Some(existing) => existing.merge(&charges, fields),
                None => {
                    group.intervals.insert(index, charges);
                }
            }
        }
    }

    groups
}
