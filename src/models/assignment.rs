use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Label, Tag, TagError};

/// What a rate assignment is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentTarget {
    /// Entities carrying the tag
    Tag(Tag),
    /// Entities carrying the label (key, value and namespace)
    Label(Label),
    /// Every entity without a more specific assignment
    Enterprise,
}

impl AssignmentTarget {
    pub fn is_enterprise(&self) -> bool {
        matches!(self, Self::Enterprise)
    }
}

/// Binds a chargeback rate, by name, to a scope of entities.
#[derive(Debug, Clone, PartialEq)]
pub struct RateAssignment {
    pub rate: String,
    pub target: AssignmentTarget,
    /// Restricts the assignment to one entity kind
    pub resource: Option<EntityKind>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl RateAssignment {
    pub fn new(rate: impl Into<String>, target: AssignmentTarget) -> Self {
        Self {
            rate: rate.into(),
            target,
            resource: None,
            priority: 0,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn for_resource(mut self, kind: EntityKind) -> Self {
        self.resource = Some(kind);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn applies_to_kind(&self, kind: EntityKind) -> bool {
        self.resource.is_none_or(|r| r == kind)
    }
}

/// Rate assignment as written in configuration and fixture files.
///
/// Exactly one of `tag`, `label` or `enterprise = true` selects the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentConfig {
    pub rate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    #[serde(default)]
    pub enterprise: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<EntityKind>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Why an [`AssignmentConfig`] could not be turned into an assignment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssignmentConfigError {
    #[error("Assignment of rate '{0}' must set exactly one of tag, label or enterprise")]
    AmbiguousTarget(String),

    #[error(transparent)]
    Tag(#[from] TagError),
}

impl TryFrom<AssignmentConfig> for RateAssignment {
    type Error = AssignmentConfigError;

    fn try_from(config: AssignmentConfig) -> Result<Self, Self::Error> {
        let target = match (config.tag, config.label, config.enterprise) {
            (Some(tag), None, false) => AssignmentTarget::Tag(Tag::parse(&tag)?),
            (None, Some(label), false) => AssignmentTarget::Label(label),
            (None, None, true) => AssignmentTarget::Enterprise,
            _ => return Err(AssignmentConfigError::AmbiguousTarget(config.rate)),
        };

        Ok(Self {
            rate: config.rate,
            target,
            resource: config.resource,
            priority: config.priority,
            created_at: config.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        })
    }
}
