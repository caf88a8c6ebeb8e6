//! Chargeback engine for container workloads.
//!
//! Combines time-series usage rollups with tiered chargeback rates and
//! attributes the resulting cost to tag (or label) groupings over a
//! reporting window.
//!
//! The pipeline, leaf to root:
//! - [`catalog`]: validated rate definitions
//! - [`assignment`]: which rate applies to an entity
//! - [`aggregation`]: report window partitioning and per-interval metrics
//! - [`pricing`]: tier evaluation in microdollars
//! - [`grouping`]: per-group merging of entity results
//! - [`report`]: ordered result rows
//! - [`services`]: the `build_report` entry point wired to the [`db`] collaborators

pub mod aggregation;
pub mod assignment;
pub mod catalog;
pub mod config;
pub mod db;
mod error;
pub mod fields;
pub mod grouping;
pub mod models;
#[cfg(feature = "cli")]
pub mod observability;
pub mod pricing;
pub mod report;
pub mod services;

#[cfg(test)]
mod tests;

pub use error::{ChargebackError, ChargebackResult};
