//! Input/output helpers.
//!
//! - raw series stores, one CSV per entity (`store`)
//! - the feature table CSV (`dataset`)
//! - tracking runs and the model registry (`registry`)
//! - whole-file atomic replacement shared by all writers (`atomic`)

pub mod atomic;
pub mod dataset;
pub mod registry;
pub mod store;

pub use dataset::{FeatureTable, read_feature_table, write_feature_table};
pub use registry::{ModelArtifact, ModelRegistry, RegisteredModel, RunRecord};
pub use store::{SeriesTable, load_store, normalize_legacy, write_store};
