use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix used by the tagging subsystem for managed classification tags.
const MANAGED_PREFIX: &str = "managed/";

/// Errors raised while parsing tag strings at the tagging boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("Tag '{0}' must have the form <category>/<name>")]
    MissingCategory(String),

    #[error("Tag '{0}' has an empty category or name")]
    EmptyComponent(String),

    #[error("Tag '{0}' contains whitespace")]
    Whitespace(String),
}

/// A classification tag: a value (`name`) within a category.
///
/// Two tags are the same tag when category and name match; `description`
/// is display metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub category: String,
    pub name: String,
    /// Human readable value, e.g. "Cost Center 001" for `cc/001`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Tag {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Parse a tag from `/managed/<category>/<name>` or `<category>/<name>`.
    pub fn parse(raw: &str) -> Result<Self, TagError> {
        let trimmed = raw.trim();
        let path = trimmed.trim_start_matches('/');
        let path = path.strip_prefix(MANAGED_PREFIX).unwrap_or(path);

        let (category, name) = path
            .split_once('/')
            .ok_or_else(|| TagError::MissingCategory(raw.to_string()))?;

        if category.is_empty() || name.is_empty() {
            return Err(TagError::EmptyComponent(raw.to_string()));
        }
        if path.chars().any(char::is_whitespace) {
            return Err(TagError::Whitespace(raw.to_string()));
        }

        Ok(Self::new(category, name))
    }

    /// Parse the pipe separated tag list carried by rollup samples.
    ///
    /// `None`, empty and whitespace-only inputs mean "untagged at this instant"
    /// and yield `Ok(None)`.
    pub fn parse_list(raw: Option<&str>) -> Result<Option<Vec<Self>>, TagError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let tags = raw
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(if tags.is_empty() { None } else { Some(tags) })
    }

    /// Whether `other` names the same category and value.
    pub fn same_as(&self, other: &Tag) -> bool {
        self.category == other.category && self.name == other.name
    }

    /// The value shown in reports.
    pub fn display_value(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }

    /// Canonical managed path, e.g. `/managed/department/accounting`.
    pub fn path(&self) -> String {
        format!("/{MANAGED_PREFIX}{}/{}", self.category, self.name)
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Tag {}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// A key/value label attached to an entity by its source system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
    /// Source namespace, e.g. `docker_labels` or `kubernetes_labels`
    pub namespace: String,
}

impl Label {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            namespace: namespace.into(),
        }
    }
}

/// A report's tag filter: an entity qualifies when it carries any listed tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: Vec<Tag>,
}

impl TagFilter {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self { tags }
    }

    /// Parse a filter from tag strings. An empty list yields `None`.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Option<Self>, TagError> {
        let tags = raw
            .iter()
            .map(|s| Tag::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((!tags.is_empty()).then(|| Self::new(tags)))
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Whether any of `tags` is listed in the filter.
    pub fn matches(&self, tags: &[Tag]) -> bool {
        tags.iter().any(|t| self.tags.iter().any(|f| f.same_as(t)))
    }
}
