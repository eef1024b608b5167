//! Gradient-boosted regression trees (squared error).
//!
//! Each round fits a tree to the current residuals on a random row subsample
//! and a random column subset, then adds `learning_rate * tree` to the
//! ensemble. Randomness comes from a seeded `StdRng`, so a fit is reproducible.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;
use crate::models::Regressor;
use crate::models::tree::{BinnedMatrix, RegressionTree, TreeParams};

/// Booster hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Row fraction drawn per tree.
    pub subsample: f64,
    /// Column fraction drawn per tree.
    pub colsample: f64,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            subsample: 0.8,
            colsample: 0.8,
            lambda: 1.0,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

impl BoostParams {
    pub fn validate(&self) -> Result<(), AppError> {
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if self.n_estimators == 0 {
            return Err(AppError::config("n_estimators must be at least 1."));
        }
        if self.max_depth == 0 {
            return Err(AppError::config("max_depth must be at least 1."));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(AppError::config("learning_rate must be positive."));
        }
        if !in_unit(self.subsample) || !in_unit(self.colsample) {
            return Err(AppError::config("subsample and colsample must be in (0, 1]."));
        }
        if self.lambda < 0.0 {
            return Err(AppError::config("lambda must be non-negative."));
        }
        Ok(())
    }

    /// `(name, value)` pairs for run records.
    pub fn as_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("n_estimators", self.n_estimators.to_string()),
            ("max_depth", self.max_depth.to_string()),
            ("learning_rate", self.learning_rate.to_string()),
            ("subsample", self.subsample.to_string()),
            ("colsample", self.colsample.to_string()),
            ("lambda", self.lambda.to_string()),
            ("min_samples_leaf", self.min_samples_leaf.to_string()),
            ("seed", self.seed.to_string()),
        ]
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            lambda: self.lambda,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

/// A fitted (or empty) boosted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: BoostParams,
    n_features: usize,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    pub fn new(params: BoostParams) -> Self {
        Self {
            params,
            n_features: 0,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn params(&self) -> &BoostParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn is_fitted(&self) -> bool {
        self.n_features > 0
    }

    /// Predict a single feature row.
    pub fn predict_one(&self, features: &[f64]) -> f64 {
        let sum: f64 = self
            .trees
            .iter()
            .map(|t| t.predict_row(|f| features.get(f).copied().unwrap_or(f64::NAN)))
            .sum();
        self.base_score + self.params.learning_rate * sum
    }
}

impl Regressor for GradientBoostedTrees {
    fn fit(&mut self, x: &DMatrix<f64>, y: &[f64]) -> Result<(), AppError> {
        self.params.validate()?;
        let (n_rows, n_features) = x.shape();
        if n_rows == 0 || n_features == 0 {
            return Err(AppError::no_data("Cannot fit a model on an empty feature matrix."));
        }
        if y.len() != n_rows {
            return Err(AppError::model(format!(
                "Target length {} does not match {} feature rows.",
                y.len(),
                n_rows
            )));
        }
        if y.iter().any(|v| !v.is_finite()) || x.iter().any(|v| !v.is_finite()) {
            return Err(AppError::model("Training data contains non-finite values."));
        }

        let binned = BinnedMatrix::from_matrix(x);
        let base_score = y.iter().sum::<f64>() / n_rows as f64;
        let mut predictions = vec![base_score; n_rows];
        let mut residuals = vec![0.0; n_rows];
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let tree_params = self.params.tree_params();
        let n_cols = ((n_features as f64 * self.params.colsample).ceil() as usize).clamp(1, n_features);

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for round in 0..self.params.n_estimators {
            residuals
                .par_iter_mut()
                .zip(predictions.par_iter())
                .zip(y.par_iter())
                .for_each(|((r, p), t)| *r = t - p);

            let rows: Vec<u32> = if self.params.subsample < 1.0 {
                let drawn: Vec<u32> = (0..n_rows as u32)
                    .filter(|_| rng.r#gen::<f64>() < self.params.subsample)
                    .collect();
                if drawn.is_empty() { (0..n_rows as u32).collect() } else { drawn }
            } else {
                (0..n_rows as u32).collect()
            };
            let mut features: Vec<usize> = sample(&mut rng, n_features, n_cols).into_vec();
            features.sort_unstable();

            let tree = RegressionTree::grow(&binned, &residuals, rows, &features, &tree_params);

            let lr = self.params.learning_rate;
            predictions.par_iter_mut().enumerate().for_each(|(i, p)| {
                *p += lr * tree.predict_row(|f| x[(i, f)]);
            });
            if round % 25 == 0 {
                debug!(round, depth = tree.depth(), "boosting round");
            }
            trees.push(tree);
        }

        self.n_features = n_features;
        self.base_score = base_score;
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>, AppError> {
        if !self.is_fitted() {
            return Err(AppError::model("Model has not been fitted."));
        }
        if x.ncols() != self.n_features {
            return Err(AppError::model(format!(
                "Expected {} features, got {}.",
                self.n_features,
                x.ncols()
            )));
        }
        Ok((0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                self.predict_one(&row)
            })
            .collect())
    }
}
