//! In-memory implementation of the collaborator repositories.
//!
//! Every read hands out owned copies, so a report run never observes a
//! later write halfway through.

mod fixture;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
pub use fixture::{Fixture, FixtureEntity, FixtureSample, FixtureSeries};
use uuid::Uuid;

use super::{
    DbError, DbResult,
    repos::{AssignmentRepo, EntityRepo, MetricsRepo, ScopeFilter, TaggingRepo, TimeRange},
};
use crate::models::{Entity, EntityKind, Label, MetricRollupSample, RateAssignment, Tag};

/// Concurrent in-memory store backing all four repository traits.
#[derive(Default)]
pub struct MemoryStore {
    /// Entities keyed by id, with their insertion sequence for stable listing
    entities: DashMap<Uuid, (u64, Entity)>,
    tags: DashMap<Uuid, Vec<Tag>>,
    labels: DashMap<Uuid, Vec<Label>>,
    samples: DashMap<Uuid, Vec<MetricRollupSample>>,
    assignments: DashMap<u64, RateAssignment>,
    sequence: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn check_available(&self) -> DbResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(DbError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    /// Make every subsequent read fail, simulating a collaborator outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Insert or replace an entity.
    pub fn insert_entity(&self, entity: Entity) {
        let seq = self
            .entities
            .get(&entity.id)
            .map(|e| e.0)
            .unwrap_or_else(|| self.next_sequence());
        self.entities.insert(entity.id, (seq, entity));
    }

    pub fn set_tags(&self, entity_id: Uuid, tags: Vec<Tag>) {
        self.tags.insert(entity_id, tags);
    }

    pub fn set_labels(&self, entity_id: Uuid, labels: Vec<Label>) {
        self.labels.insert(entity_id, labels);
    }

    /// Append samples to an entity's rollup series, keeping it time ordered.
    pub fn add_samples(&self, entity_id: Uuid, samples: impl IntoIterator<Item = MetricRollupSample>) {
        let mut series = self.samples.entry(entity_id).or_default();
        series.extend(samples);
        series.sort_by_key(|s| s.timestamp);
    }

    pub fn add_assignment(&self, assignment: RateAssignment) {
        let seq = self.next_sequence();
        self.assignments.insert(seq, assignment);
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

#[async_trait]
impl EntityRepo for MemoryStore {
    async fn list_in_scope(&self, scope: &ScopeFilter) -> DbResult<Vec<Entity>> {
        self.check_available()?;
        let mut matching: Vec<(u64, Entity)> = self
            .entities
            .iter()
            .filter(|e| e.1.kind == scope.kind)
            .filter(|e| scope.entity_id.is_none_or(|id| id == e.1.id))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);
        Ok(matching.into_iter().map(|(_, entity)| entity).collect())
    }
}

#[async_trait]
impl AssignmentRepo for MemoryStore {
    async fn get_assignments(&self, kind: EntityKind) -> DbResult<Vec<RateAssignment>> {
        self.check_available()?;
        let mut matching: Vec<(u64, RateAssignment)> = self
            .assignments
            .iter()
            .filter(|a| a.value().applies_to_kind(kind))
            .map(|a| (*a.key(), a.value().clone()))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);
        Ok(matching.into_iter().map(|(_, a)| a).collect())
    }
}

#[async_trait]
impl MetricsRepo for MemoryStore {
    async fn get_rollup_samples(
        &self,
        entity_id: Uuid,
        range: TimeRange,
    ) -> DbResult<Vec<MetricRollupSample>> {
        self.check_available()?;
        let series = self.samples.get(&entity_id).ok_or(DbError::NotFound)?;
        let lo = series.partition_point(|s| s.timestamp < range.start);
        let hi = series.partition_point(|s| s.timestamp < range.end);
        Ok(series[lo..hi].to_vec())
    }
}

#[async_trait]
impl TaggingRepo for MemoryStore {
    async fn get_tags(&self, entity_id: Uuid) -> DbResult<Vec<Tag>> {
        self.check_available()?;
        Ok(self
            .tags
            .get(&entity_id)
            .map(|t| t.value().clone())
            .unwrap_or_default())
    }

    async fn get_labels(&self, entity_id: Uuid) -> DbResult<Vec<Label>> {
        self.check_available()?;
        Ok(self
            .labels
            .get(&entity_id)
            .map(|l| l.value().clone())
            .unwrap_or_default())
    }
}
