use thiserror::Error;
use uuid::Uuid;

use crate::{db::DbError, models::TagError};

/// Errors raised by the chargeback engine.
///
/// Some variants are informational: [`ChargebackError::NoApplicableRate`] and
/// [`ChargebackError::MissingSampleData`] describe entities that are skipped or
/// priced at zero usage, and never abort a report run. Use
/// [`ChargebackError::is_fatal`] to tell the two classes apart.
#[derive(Debug, Error)]
pub enum ChargebackError {
    #[error("No applicable rate for entity {0}")]
    NoApplicableRate(Uuid),

    #[error("No rollup samples for entity {0}")]
    MissingSampleData(Uuid),

    #[error("Malformed tier set for field '{field}' in rate '{rate}': {reason}")]
    MalformedTierSet {
        rate: String,
        field: String,
        reason: String,
    },

    #[error("Invalid interval configuration: {0}")]
    InvalidIntervalConfiguration(String),

    #[error("Invalid report options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    InvalidTag(#[from] TagError),

    #[error("Unknown chargeable field '{0}'")]
    UnknownField(String),

    #[error("Chargeable field '{0}' is registered twice")]
    DuplicateField(String),

    #[error("Rate '{0}' is not defined")]
    UnknownRate(String),

    #[error("Rate '{0}' is defined twice")]
    DuplicateRate(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Report run cancelled")]
    Cancelled,

    #[error("Timed out processing entity {0}")]
    EntityTimeout(Uuid),
}

impl ChargebackError {
    /// Whether this error aborts a report run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::NoApplicableRate(_) | Self::MissingSampleData(_)
        )
    }
}

pub type ChargebackResult<T> = Result<T, ChargebackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_fatal_kinds() {
        let id = Uuid::new_v4();
        assert!(!ChargebackError::NoApplicableRate(id).is_fatal());
        assert!(!ChargebackError::MissingSampleData(id).is_fatal());
        assert!(ChargebackError::Cancelled.is_fatal());
        assert!(ChargebackError::Storage(DbError::Unavailable("down".into())).is_fatal());
        assert!(
            ChargebackError::InvalidIntervalConfiguration("end before start".into()).is_fatal()
        );
    }

    #[test]
    fn test_malformed_tier_set_message() {
        let err = ChargebackError::MalformedTierSet {
            rate: "default".into(),
            field: "cpu_cores_allocated".into(),
            reason: "gap between 1 and 2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cpu_cores_allocated"), "{msg}");
        assert!(msg.contains("default"), "{msg}");
    }
}
