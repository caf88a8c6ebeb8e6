//! Configuration module for the chargeback engine.
//!
//! The engine is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [engine]
//! max_concurrency = 16
//! default_timezone = "${REPORT_TZ}"
//!
//! [[rates]]
//! name = "default"
//!
//! [[rates.details]]
//! field = "cpu_cores_allocated"
//! per_time = "daily"
//! tiers = [{ variable_rate = "0.24" }]
//!
//! [[assignments]]
//! rate = "default"
//! enterprise = true
//! ```

mod engine;
mod observability;

use std::path::Path;

pub use engine::EngineConfig;
pub use observability::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    ChargebackError,
    aggregation::parse_timezone,
    assignment::validate_assignments,
    catalog::{RateCatalog, RateConfig},
    fields::{FieldDescriptor, FieldRegistry},
    models::{AssignmentConfig, RateAssignment},
};

/// Root configuration for the chargeback engine.
///
/// Every section is optional. A file with no rates loads, but every entity
/// of a report run against it ends up unrated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChargebackConfig {
    /// Logging configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Report engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Chargeable fields added to the built-in container fields.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,

    /// Rate definitions.
    #[serde(default)]
    pub rates: Vec<RateConfig>,

    /// Rate assignments, in precedence order.
    #[serde(default)]
    pub assignments: Vec<AssignmentConfig>,
}

impl ChargebackConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let config: ChargebackConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|e| ConfigError::Validation(format!("engine: {e}")))?;
        parse_timezone(&self.engine.default_timezone)?;

        // Rate tiers and assignment targets are checked as a whole
        let (_, catalog) = self.build_catalog()?;
        validate_assignments(&self.rate_assignments()?, &catalog)?;

        Ok(())
    }

    /// Field registry and validated rate catalog described by this file.
    pub fn build_catalog(&self) -> Result<(FieldRegistry, RateCatalog), ConfigError> {
        let fields = FieldRegistry::with_fields(self.fields.iter().cloned())?;
        let catalog = RateCatalog::load(self.rates.iter().cloned(), &fields)?;
        Ok((fields, catalog))
    }

    /// Rate assignments in declaration order.
    pub fn rate_assignments(&self) -> Result<Vec<RateAssignment>, ConfigError> {
        self.assignments
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, a)| {
                RateAssignment::try_from(a)
                    .map_err(|e| ConfigError::Validation(format!("assignments[{i}]: {e}")))
            })
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Chargeback(#[from] ChargebackError),
}

/// Substitute `${VAR}` references with values from the environment.
///
/// Anything after a `#` on a line is left as written, so a commented-out rate
/// or assignment never requires its variables to be set.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let reference =
        regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Validation(e.to_string()))?;

    let lines = input
        .split_inclusive('\n')
        .map(|line| {
            let (setting, comment) = line.split_at(line.find('#').unwrap_or(line.len()));
            expand_setting(&reference, setting).map(|expanded| expanded + comment)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.concat())
}

fn expand_setting(reference: &regex::Regex, setting: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(setting.len());
    let mut copied = 0;
    for cap in reference.captures_iter(setting) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let value = std::env::var(name.as_str())
            .map_err(|_| ConfigError::EnvVarNotFound(name.as_str().to_string()))?;
        expanded.push_str(&setting[copied..whole.start()]);
        expanded.push_str(&value);
        copied = whole.end();
    }
    expanded.push_str(&setting[copied..]);
    Ok(expanded)
}
