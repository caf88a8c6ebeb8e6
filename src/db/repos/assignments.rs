use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{EntityKind, RateAssignment},
};

#[async_trait]
pub trait AssignmentRepo: Send + Sync {
    /// Assignments that may apply to entities of `kind`, in declaration order.
    ///
    /// Includes assignments without a resource restriction.
    async fn get_assignments(&self, kind: EntityKind) -> DbResult<Vec<RateAssignment>>;
}
