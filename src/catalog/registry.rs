//! Rate catalog keyed by rate name.
//!
//! The catalog is built once at startup from configuration and shared
//! read-only across report runs, so lookups never lock.

use std::{collections::BTreeMap, sync::Arc};

use super::types::{ChargebackRate, RateConfig};
use crate::{ChargebackError, ChargebackResult, fields::FieldRegistry};

#[derive(Debug, Clone, Default)]
pub struct RateCatalog {
    rates: BTreeMap<String, Arc<ChargebackRate>>,
}

impl RateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and index every rate in `configs`.
    pub fn load(
        configs: impl IntoIterator<Item = RateConfig>,
        fields: &FieldRegistry,
    ) -> ChargebackResult<Self> {
        let mut catalog = Self::new();
        for config in configs {
            catalog.insert(ChargebackRate::from_config(config, fields)?)?;
        }
        tracing::debug!(rates = catalog.len(), "Loaded rate catalog");
        Ok(catalog)
    }

    pub fn insert(&mut self, rate: ChargebackRate) -> ChargebackResult<()> {
        if self.rates.contains_key(rate.name()) {
            return Err(ChargebackError::DuplicateRate(rate.name().to_string()));
        }
        self.rates.insert(rate.name().to_string(), Arc::new(rate));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ChargebackRate>> {
        self.rates.get(name).cloned()
    }

    /// Like [`get`](Self::get) but an absent rate is an error.
    pub fn require(&self, name: &str) -> ChargebackResult<Arc<ChargebackRate>> {
        self.get(name)
            .ok_or_else(|| ChargebackError::UnknownRate(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rates.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;
    use crate::{
        catalog::{RateDetail, RateTier},
        fields::FIXED_COMPUTE_1,
    };

    fn config(name: &str) -> RateConfig {
        RateConfig {
            name: name.into(),
            description: String::new(),
            details: vec![RateDetail::new(
                FIXED_COMPUTE_1,
                vec![RateTier::flat(dec!(0), dec!(0.01))],
            )],
        }
    }

    #[test]
    fn test_load_and_lookup() {
        let catalog =
            RateCatalog::load([config("default"), config("gold")], &FieldRegistry::seeded())
                .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["default", "gold"]);
        assert!(catalog.get("gold").unwrap().detail(FIXED_COMPUTE_1).is_some());
        assert!(matches!(
            catalog.require("silver"),
            Err(ChargebackError::UnknownRate(name)) if name == "silver"
        ));
    }

    #[test]
    fn test_duplicate_rate_rejected() {
        let err = RateCatalog::load([config("default"), config("default")], &FieldRegistry::seeded())
            .unwrap_err();
        assert!(matches!(err, ChargebackError::DuplicateRate(_)));
    }
}
