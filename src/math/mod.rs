//! Numeric helpers: summary statistics and regression metrics.

pub mod metrics;
pub mod stats;

pub use metrics::*;
pub use stats::*;
