//! Regression models and the feature layout they consume.
//!
//! Fitting code talks to models through [`Regressor`], so the trainer and the
//! cross-validator do not depend on a concrete learner.

pub mod encoding;
pub mod gbdt;
pub mod tree;

use nalgebra::DMatrix;

use crate::error::AppError;

pub use encoding::{design_matrix, encode_features, encode_row, feature_names};
pub use gbdt::{BoostParams, GradientBoostedTrees};

/// A model mapping a feature matrix (rows = observations) to predictions.
pub trait Regressor {
    fn fit(&mut self, x: &DMatrix<f64>, y: &[f64]) -> Result<(), AppError>;

    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>, AppError>;
}
