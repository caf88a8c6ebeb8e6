mod error;
pub mod memory;
pub mod repos;

use std::sync::Arc;

pub use error::{DbError, DbResult};
use memory::MemoryStore;
pub use repos::*;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    entities: Arc<dyn EntityRepo>,
    assignments: Arc<dyn AssignmentRepo>,
    metrics: Arc<dyn MetricsRepo>,
    tagging: Arc<dyn TaggingRepo>,
}

/// Bundle of the collaborator repositories the engine reads from.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    repos: CachedRepos,
}

impl DbPool {
    /// Assemble a pool from individual repository implementations.
    pub fn from_repos(
        entities: Arc<dyn EntityRepo>,
        assignments: Arc<dyn AssignmentRepo>,
        metrics: Arc<dyn MetricsRepo>,
        tagging: Arc<dyn TaggingRepo>,
    ) -> Self {
        Self {
            repos: CachedRepos {
                entities,
                assignments,
                metrics,
                tagging,
            },
        }
    }

    /// Serve every repository from one in-memory store.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self::from_repos(store.clone(), store.clone(), store.clone(), store)
    }

    pub fn entities(&self) -> &Arc<dyn EntityRepo> {
        &self.repos.entities
    }

    pub fn assignments(&self) -> &Arc<dyn AssignmentRepo> {
        &self.repos.assignments
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsRepo> {
        &self.repos.metrics
    }

    pub fn tagging(&self) -> &Arc<dyn TaggingRepo> {
        &self.repos.tagging
    }
}
