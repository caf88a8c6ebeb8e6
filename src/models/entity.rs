use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Label, Tag};

/// Kinds of billable resources.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[cfg_attr(feature = "cli", value(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    ContainerImage,
    Container,
    ContainerProject,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerImage => "container_image",
            Self::Container => "container",
            Self::ContainerProject => "container_project",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an entity with children derives an allocation attribute from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// Total of the children's allocations
    #[default]
    Sum,
    /// Mean of the children's allocations
    Average,
    /// Largest child allocation
    Max,
}

/// A billable resource, e.g. a container image and the containers running it.
///
/// Allocation attributes are keyed by attribute name (`limit_cpu_cores`,
/// `limit_memory_bytes`, ...) and expressed in the unit the chargeable field
/// descriptor declares for that attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub allocations: BTreeMap<String, f64>,
    #[serde(default)]
    pub children: Vec<Entity>,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>, created_on: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            created_on,
            allocations: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_allocation(mut self, attribute: impl Into<String>, value: f64) -> Self {
        self.allocations.insert(attribute.into(), value);
        self
    }

    pub fn with_child(mut self, child: Entity) -> Self {
        self.children.push(child);
        self
    }

    /// Current-state allocation for `attribute`, or 0 when unknown.
    ///
    /// An entity with children reports the children's values reduced by
    /// `method`; it falls back to its own value when no child carries the
    /// attribute.
    pub fn allocation(&self, attribute: &str, method: AllocationMethod) -> f64 {
        self.allocation_value(attribute, method).unwrap_or(0.0)
    }

    fn allocation_value(&self, attribute: &str, method: AllocationMethod) -> Option<f64> {
        let own = self.allocations.get(attribute).copied();
        if self.children.is_empty() {
            return own;
        }

        let values: Vec<f64> = self
            .children
            .iter()
            .filter_map(|c| c.allocation_value(attribute, method))
            .collect();
        if values.is_empty() {
            return own;
        }

        Some(match method {
            AllocationMethod::Sum => values.iter().sum(),
            AllocationMethod::Average => values.iter().sum::<f64>() / values.len() as f64,
            AllocationMethod::Max => values.iter().copied().fold(f64::MIN, f64::max),
        })
    }
}

/// An entity together with the tags and labels read for one report run.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub entity: Entity,
    pub tags: Vec<Tag>,
    pub labels: Vec<Label>,
}

impl EntitySnapshot {
    pub fn new(entity: Entity, tags: Vec<Tag>, labels: Vec<Label>) -> Self {
        Self {
            entity,
            tags,
            labels,
        }
    }

    pub fn id(&self) -> Uuid {
        self.entity.id
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.iter().any(|t| t.same_as(tag))
    }

    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    /// The entity's tag in `category`; the first by name when it has several.
    pub fn tag_in_category(&self, category: &str) -> Option<&Tag> {
        self.tags
            .iter()
            .filter(|t| t.category == category)
            .min_by(|a, b| a.name.cmp(&b.name))
    }

    /// The entity's label for `key`; the first by value when several namespaces carry it.
    pub fn label_for_key(&self, key: &str) -> Option<&Label> {
        self.labels
            .iter()
            .filter(|l| l.key == key)
            .min_by(|a, b| a.value.cmp(&b.value))
    }
}
