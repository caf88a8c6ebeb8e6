//! Rate resolution for a single entity.
//!
//! A tag or label assignment carried by the entity beats the enterprise
//! default. Ties among several matches are broken by [`PrecedencePolicy`].

use std::sync::Arc;

use super::PrecedencePolicy;
use crate::{
    ChargebackError, ChargebackResult,
    catalog::{ChargebackRate, RateCatalog},
    models::{AssignmentTarget, EntitySnapshot, RateAssignment},
};

/// The rate chosen for an entity, with the assignment that selected it.
#[derive(Debug, Clone)]
pub struct ResolvedRate {
    pub rate: Arc<ChargebackRate>,
    pub assignment: RateAssignment,
}

/// Pick the rate applying to `entity`.
///
/// Returns [`ChargebackError::NoApplicableRate`] when nothing matches, and
/// [`ChargebackError::UnknownRate`] when the winning assignment names a rate
/// missing from `catalog`.
#[tracing::instrument(skip_all, fields(entity_id = %entity.id(), policy = ?policy))]
pub fn resolve(
    entity: &EntitySnapshot,
    assignments: &[RateAssignment],
    catalog: &RateCatalog,
    policy: PrecedencePolicy,
) -> ChargebackResult<ResolvedRate> {
    let applicable: Vec<(usize, &RateAssignment)> = assignments
        .iter()
        .enumerate()
        .filter(|(_, a)| a.applies_to_kind(entity.entity.kind))
        .collect();

    let specific: Vec<(usize, &RateAssignment)> = applicable
        .iter()
        .copied()
        .filter(|(_, a)| match &a.target {
            AssignmentTarget::Tag(tag) => entity.has_tag(tag),
            AssignmentTarget::Label(label) => entity.has_label(label),
            AssignmentTarget::Enterprise => false,
        })
        .collect();

    if specific.len() > 1 {
        tracing::warn!(
            entity_id = %entity.id(),
            matches = specific.len(),
            rates = ?specific.iter().map(|(_, a)| a.rate.as_str()).collect::<Vec<_>>(),
            "Several rate assignments match entity, applying precedence policy"
        );
    }

    let winner = policy.select(&specific).or_else(|| {
        let defaults: Vec<(usize, &RateAssignment)> = applicable
            .iter()
            .copied()
            .filter(|(_, a)| a.target.is_enterprise())
            .collect();
        policy.select(&defaults)
    });

    let Some(assignment) = winner else {
        return Err(ChargebackError::NoApplicableRate(entity.id()));
    };

    Ok(ResolvedRate {
        rate: catalog.require(&assignment.rate)?,
        assignment: assignment.clone(),
    })
}
