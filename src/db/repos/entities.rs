use async_trait::async_trait;

use super::ScopeFilter;
use crate::{db::error::DbResult, models::Entity};

#[async_trait]
pub trait EntityRepo: Send + Sync {
    /// List the entities covered by `scope`, children attached.
    ///
    /// An unknown `scope.entity_id` yields an empty list.
    async fn list_in_scope(&self, scope: &ScopeFilter) -> DbResult<Vec<Entity>>;
}
