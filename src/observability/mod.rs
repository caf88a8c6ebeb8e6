//! Log output for the `chargeback` binary.
//!
//! Structured logging with configurable formats (pretty, compact, JSON).
//! Logs go to stderr so report output on stdout stays machine readable.

mod tracing_init;

pub use tracing_init::*;
