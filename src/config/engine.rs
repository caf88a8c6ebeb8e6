use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{assignment::PrecedencePolicy, models::AllocationMethod};

/// Report engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Entities processed concurrently during one report run.
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1, max = 1024))]
    pub max_concurrency: usize,

    /// Per-entity deadline in seconds. 0 disables the deadline.
    #[serde(default = "default_entity_timeout_secs")]
    pub entity_timeout_secs: u64,

    /// Tie-break between equally specific rate assignments.
    #[serde(default)]
    pub precedence: PrecedencePolicy,

    /// How parent allocations derive from child allocations.
    #[serde(default)]
    pub allocation_method: AllocationMethod,

    /// IANA zone used when a report does not name one.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            entity_timeout_secs: default_entity_timeout_secs(),
            precedence: PrecedencePolicy::default(),
            allocation_method: AllocationMethod::default(),
            default_timezone: default_timezone(),
        }
    }
}

impl EngineConfig {
    pub fn entity_timeout(&self) -> Option<Duration> {
        (self.entity_timeout_secs > 0).then(|| Duration::from_secs(self.entity_timeout_secs))
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_entity_timeout_secs() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}
