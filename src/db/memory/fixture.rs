//! JSON fixtures describing entities, tags, samples and assignments.

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MemoryStore;
use crate::{
    db::{DbError, DbResult},
    models::{AssignmentConfig, Entity, EntityKind, Label, MetricRollupSample, RateAssignment, Tag},
};

/// Contents of a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    #[serde(default)]
    pub entities: Vec<FixtureEntity>,
    /// Display values by tag path, e.g. `"department/accounting": "Accounting"`
    #[serde(default)]
    pub tag_descriptions: BTreeMap<String, String>,
    #[serde(default)]
    pub samples: Vec<FixtureSample>,
    #[serde(default)]
    pub series: Vec<FixtureSeries>,
    #[serde(default)]
    pub assignments: Vec<AssignmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureEntity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    pub created_on: DateTime<Utc>,
    /// Parent entity, e.g. the image a container runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub allocations: BTreeMap<String, f64>,
    /// Tag paths, `/managed/<category>/<name>` or `<category>/<name>`
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// One rollup sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureSample {
    pub entity_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Pipe separated tag paths; `null` or `""` means untagged
    #[serde(default)]
    pub tag_names: Option<String>,
}

/// A regular series of identical samples over `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureSeries {
    pub entity_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step_secs: u32,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub tag_names: Option<String>,
}

fn invalid(e: impl std::fmt::Display) -> DbError {
    DbError::Validation(e.to_string())
}

impl Fixture {
    pub fn from_json(json: &str) -> DbResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DbError::Internal(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    fn describe(&self, mut tag: Tag) -> Tag {
        if let Some(description) = self.tag_descriptions.get(&tag.to_string()) {
            tag = tag.with_description(description.clone());
        }
        tag
    }

    fn parse_tags(&self, raw: Option<&str>) -> DbResult<Option<Vec<Tag>>> {
        let tags = Tag::parse_list(raw).map_err(invalid)?;
        Ok(tags.map(|tags| tags.into_iter().map(|t| self.describe(t)).collect()))
    }

    /// Rate assignments declared by the fixture, in file order.
    pub fn rate_assignments(&self) -> DbResult<Vec<RateAssignment>> {
        self.assignments
            .iter()
            .cloned()
            .map(|a| RateAssignment::try_from(a).map_err(invalid))
            .collect()
    }

    /// Load everything into `store`.
    ///
    /// Child entities are stored on their own and also attached to their
    /// parent's children for allocation rollups.
    pub fn load_into(&self, store: &MemoryStore) -> DbResult<()> {
        let mut entities: BTreeMap<Uuid, Entity> = BTreeMap::new();
        for record in &self.entities {
            let entity = Entity {
                id: record.id,
                kind: record.kind,
                name: record.name.clone(),
                created_on: record.created_on,
                allocations: record.allocations.clone(),
                children: Vec::new(),
            };
            if entities.insert(record.id, entity).is_some() {
                return Err(invalid(format!("entity {} is defined twice", record.id)));
            }

            let tags = record
                .tags
                .iter()
                .map(|raw| Tag::parse(raw).map(|t| self.describe(t)).map_err(invalid))
                .collect::<DbResult<Vec<_>>>()?;
            store.set_tags(record.id, tags);
            store.set_labels(record.id, record.labels.clone());
        }

        for record in &self.entities {
            let Some(parent_id) = record.parent_id else {
                continue;
            };
            let child = entities
                .get(&record.id)
                .cloned()
                .ok_or_else(|| invalid(format!("entity {} is missing", record.id)))?;
            let parent = entities.get_mut(&parent_id).ok_or_else(|| {
                invalid(format!("entity {} has unknown parent {parent_id}", record.id))
            })?;
            parent.children.push(child);
        }

        // Keep file order for listing
        for record in &self.entities {
            if let Some(entity) = entities.remove(&record.id) {
                store.insert_entity(entity);
            }
        }

        for sample in &self.samples {
            let mut rollup = MetricRollupSample::new(sample.timestamp)
                .with_tags(self.parse_tags(sample.tag_names.as_deref())?);
            rollup.values = sample.values.clone();
            store.add_samples(sample.entity_id, [rollup]);
        }

        for series in &self.series {
            if series.step_secs == 0 || series.end <= series.start {
                return Err(invalid(format!(
                    "series for entity {} needs a positive step and end after start",
                    series.entity_id
                )));
            }
            let tags = self.parse_tags(series.tag_names.as_deref())?;
            let step = Duration::seconds(i64::from(series.step_secs));
            let mut ts = series.start;
            let mut samples = Vec::new();
            while ts < series.end {
                let mut rollup = MetricRollupSample::new(ts).with_tags(tags.clone());
                rollup.values = series.values.clone();
                samples.push(rollup);
                ts += step;
            }
            store.add_samples(series.entity_id, samples);
        }

        for assignment in self.rate_assignments()? {
            store.add_assignment(assignment);
        }

        tracing::debug!(
            entities = self.entities.len(),
            samples = self.samples.len(),
            series = self.series.len(),
            assignments = self.assignments.len(),
            "Loaded fixture"
        );
        Ok(())
    }

    /// Build a fresh store holding this fixture.
    pub fn into_store(self) -> DbResult<MemoryStore> {
        let store = MemoryStore::new();
        self.load_into(&store)?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repos::{AssignmentRepo, EntityRepo, MetricsRepo, ScopeFilter, TaggingRepo, TimeRange};

    const FIXTURE: &str = r#"{
        "entities": [
            {
                "id": "00000000-0000-0000-0000-000000000001",
                "kind": "container_image",
                "name": "image",
                "created_on": "2012-09-01T00:00:00Z",
                "tags": ["/managed/environment/prod"],
                "labels": [{"key": "version", "value": "1.2", "namespace": "docker_labels"}]
            },
            {
                "id": "00000000-0000-0000-0000-000000000002",
                "kind": "container",
                "name": "container",
                "created_on": "2012-09-01T00:00:00Z",
                "parent_id": "00000000-0000-0000-0000-000000000001",
                "allocations": {"limit_cpu_cores": 1.0, "limit_memory_bytes": 1048576.0}
            }
        ],
        "tag_descriptions": {"environment/prod": "Production"},
        "samples": [
            {
                "entity_id": "00000000-0000-0000-0000-000000000001",
                "timestamp": "2012-09-01T00:00:00Z",
                "values": {"cpu_usage_cores": 0.5},
                "tag_names": null
            }
        ],
        "series": [
            {
                "entity_id": "00000000-0000-0000-0000-000000000001",
                "start": "2012-09-01T12:00:00Z",
                "end": "2012-09-03T00:00:00Z",
                "step_secs": 43200,
                "tag_names": "environment/prod"
            }
        ],
        "assignments": [
            {"rate": "default", "tag": "environment/prod", "resource": "container_image"}
        ]
    }"#;

    fn image_id() -> Uuid {
        Uuid::from_u128(1)
    }

    #[tokio::test]
    async fn test_load_fixture() {
        let store = Fixture::from_json(FIXTURE).unwrap().into_store().unwrap();
        assert_eq!(store.entity_count(), 2);

        let images = store
            .list_in_scope(&ScopeFilter {
                kind: EntityKind::ContainerImage,
                entity_id: None,
            })
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].children.len(), 1);
        assert_eq!(images[0].children[0].allocations["limit_cpu_cores"], 1.0);

        let tags = store.get_tags(image_id()).await.unwrap();
        assert_eq!(tags[0].display_value(), "Production");

        let samples = store
            .get_rollup_samples(
                image_id(),
                TimeRange::new(
                    "2012-09-01T00:00:00Z".parse().unwrap(),
                    "2012-09-04T00:00:00Z".parse().unwrap(),
                ),
            )
            .await
            .unwrap();
        // 1 explicit sample + 3 series samples
        assert_eq!(samples.len(), 4);
        assert!(samples[0].is_untagged());
        assert!(!samples[1].is_untagged());

        let assignments = store.get_assignments(EntityKind::ContainerImage).await.unwrap();
        assert_eq!(assignments.len(), 1);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let fixture = Fixture {
            entities: vec![FixtureEntity {
                id: Uuid::new_v4(),
                kind: EntityKind::Container,
                name: "orphan".into(),
                created_on: Utc::now(),
                parent_id: Some(Uuid::new_v4()),
                allocations: BTreeMap::new(),
                tags: vec![],
                labels: vec![],
            }],
            ..Default::default()
        };
        assert!(matches!(fixture.into_store(), Err(DbError::Validation(_))));
    }

    #[test]
    fn test_malformed_tag_names_rejected() {
        let mut fixture = Fixture::from_json(FIXTURE).unwrap();
        fixture.samples[0].tag_names = Some("no_category".into());
        assert!(fixture.into_store().is_err());
    }
}
