use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{Label, Tag},
};

#[async_trait]
pub trait TaggingRepo: Send + Sync {
    async fn get_tags(&self, entity_id: Uuid) -> DbResult<Vec<Tag>>;
    async fn get_labels(&self, entity_id: Uuid) -> DbResult<Vec<Label>>;
}
