use async_trait::async_trait;
use uuid::Uuid;

use super::TimeRange;
use crate::{db::error::DbResult, models::MetricRollupSample};

#[async_trait]
pub trait MetricsRepo: Send + Sync {
    /// Rollup samples of `entity_id` inside `range`, ascending by timestamp.
    ///
    /// Returns [`DbError::NotFound`](crate::db::DbError::NotFound) when the
    /// store holds no rollup series at all for the entity.
    async fn get_rollup_samples(
        &self,
        entity_id: Uuid,
        range: TimeRange,
    ) -> DbResult<Vec<MetricRollupSample>>;
}
