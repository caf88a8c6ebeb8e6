//! Chargeback rate catalog.
//!
//! A [`ChargebackRate`] prices a set of chargeable fields. Each field gets a
//! [`RateDetail`]: the period the rate is quoted for, the unit it is quoted
//! in, and a tier set covering `[0, inf)` without gaps or overlaps. Tier sets
//! are validated when the catalog is loaded, so pricing never sees a
//! malformed one.
//!
//! # Usage
//!
//! ```rust,ignore
//! let catalog = RateCatalog::load(config.rates.clone(), &fields)?;
//! let rate = catalog.require("default")?;
//! if let Some(detail) = rate.detail("cpu_cores_allocated") {
//!     let tier = detail.find_tier(2.0);
//! }
//! ```

mod registry;
mod types;

pub use registry::RateCatalog;
pub use types::{ChargebackRate, PerTime, RateConfig, RateDetail, RateTier};
