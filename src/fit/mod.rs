//! Model fitting orchestration.
//!
//! - chronological hold-out training and registration (`trainer`)
//! - expanding-window cross-validation (`cv`)

pub mod cv;
pub mod trainer;

pub use cv::{CvOutcome, cross_validate, run_cross_validation, time_series_folds};
pub use trainer::{EvalMetrics, HoldoutFit, TrainOutcome, fit_holdout, split_point, train_model};
