//! Rate assignment resolution.

mod resolver;

pub use resolver::{ResolvedRate, resolve};
use serde::{Deserialize, Serialize};

use crate::{ChargebackError, ChargebackResult, catalog::RateCatalog, models::RateAssignment};

/// How one assignment is chosen when several match an entity equally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedencePolicy {
    /// Earliest `created_at`, then declaration order
    #[default]
    CreationOrder,
    /// Highest `priority`, then creation order
    Priority,
}

impl PrecedencePolicy {
    /// Pick the winning assignment among `(declaration index, assignment)` candidates.
    pub(crate) fn select<'a>(
        self,
        candidates: &[(usize, &'a RateAssignment)],
    ) -> Option<&'a RateAssignment> {
        let creation = |(i, a): &(usize, &RateAssignment)| (a.created_at, *i);
        let winner = match self {
            Self::CreationOrder => candidates.iter().min_by_key(|c| creation(c)),
            Self::Priority => candidates.iter().min_by(|a, b| {
                b.1.priority
                    .cmp(&a.1.priority)
                    .then_with(|| creation(a).cmp(&creation(b)))
            }),
        };
        winner.map(|(_, a)| *a)
    }
}

/// Reject assignments naming a rate absent from the catalog.
pub fn validate_assignments(
    assignments: &[RateAssignment],
    catalog: &RateCatalog,
) -> ChargebackResult<()> {
    match assignments.iter().find(|a| !catalog.contains(&a.rate)) {
        Some(missing) => Err(ChargebackError::UnknownRate(missing.rate.clone())),
        None => Ok(()),
    }
}
