//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - entity identifiers (`StateCode`, `IntensityKind`, `EntityKey`)
//! - date windows and their batch partitioning (`DateWindow`)
//! - feature rows (`FeatureRow`, `CalendarFields`)
//! - run configuration derived from CLI flags (`config`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
