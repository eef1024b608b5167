//! Expanding-window cross-validation for time-ordered rows.
//!
//! With `n` rows and `k` splits each validation fold holds `n / (k + 1)` rows.
//! Fold `i` trains on every row before its validation block, so the training
//! window grows by one fold each time and the last fold ends at the final row.

use std::ops::Range;

use tracing::info;

use crate::domain::TrainConfig;
use crate::error::AppError;
use crate::fit::trainer::sort_chronologically;
use crate::io::dataset::{FeatureTable, read_feature_table};
use crate::io::registry::{ModelRegistry, RunRecord};
use crate::math::{mae, mean, population_std};
use crate::models::{BoostParams, GradientBoostedTrees, Regressor, design_matrix};

pub const CV_RUN_NAME: &str = "cross_validation";

/// Train/validation index ranges for one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub validate: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CvOutcome {
    pub fold_mae: Vec<f64>,
    pub mean_mae: f64,
    pub std_mae: f64,
    pub run_id: Option<String>,
}

pub fn time_series_folds(n: usize, n_splits: usize) -> Result<Vec<Fold>, AppError> {
    if n_splits < 2 {
        return Err(AppError::config(format!("cv splits must be at least 2, got {n_splits}.")));
    }
    let fold_size = n / (n_splits + 1);
    if fold_size == 0 {
        return Err(AppError::no_data(format!(
            "Not enough rows ({n}) for {n_splits} cross-validation splits."
        )));
    }
    let first_validate = n - n_splits * fold_size;
    Ok((0..n_splits)
        .map(|i| {
            let start = first_validate + i * fold_size;
            Fold {
                train: 0..start,
                validate: start..start + fold_size,
            }
        })
        .collect())
}

/// Fold models use full rows and columns; only tree shape and rate carry over.
fn fold_params(params: BoostParams) -> BoostParams {
    BoostParams {
        subsample: 1.0,
        colsample: 1.0,
        ..params
    }
}

/// Mean absolute error of each fold, in fold order.
pub fn cross_validate(table: &FeatureTable, n_splits: usize, params: BoostParams) -> Result<Vec<f64>, AppError> {
    let mut rows = table.rows.clone();
    sort_chronologically(&mut rows);
    let folds = time_series_folds(rows.len(), n_splits)?;

    let x = design_matrix(&rows);
    let y: Vec<f64> = rows.iter().map(|r| r.value).collect();
    let params = fold_params(params);

    let mut scores = Vec::with_capacity(folds.len());
    for (i, fold) in folds.iter().enumerate() {
        let x_train = x.rows(fold.train.start, fold.train.len()).into_owned();
        let x_val = x.rows(fold.validate.start, fold.validate.len()).into_owned();

        let mut model = GradientBoostedTrees::new(params);
        model.fit(&x_train, &y[fold.train.clone()])?;
        let score = mae(&y[fold.validate.clone()], &model.predict(&x_val)?);
        info!(fold = i, train = fold.train.len(), mae = score, "fold done");
        scores.push(score);
    }
    Ok(scores)
}

/// Cross-validate the dataset file and log the run.
pub fn run_cross_validation(config: &TrainConfig) -> Result<CvOutcome, AppError> {
    let table = read_feature_table(&config.dataset)?;
    let fold_mae = cross_validate(&table, config.cv_splits, config.params)?;
    let mean_mae = mean(&fold_mae);
    let std_mae = population_std(&fold_mae);

    let mut run = RunRecord::new(&config.registry.experiment, CV_RUN_NAME);
    run.log_param("n_splits", config.cv_splits);
    for (key, value) in fold_params(config.params).as_pairs() {
        run.log_param(key, value);
    }
    for (i, score) in fold_mae.iter().enumerate() {
        run.log_metric(format!("fold_{i}_mae"), *score);
    }
    run.log_metric("cv_mean_mae", mean_mae);
    run.log_metric("cv_std_mae", std_mae);
    ModelRegistry::new(&config.registry.root).log_run(&run)?;

    Ok(CvOutcome {
        fold_mae,
        mean_mae,
        std_mae,
        run_id: Some(run.run_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelVersion, RegistryConfig, StateCode};
    use crate::fit::trainer::testing::synthetic_table;
    use crate::io::dataset::write_feature_table;

    #[test]
    fn folds_expand_and_cover_the_tail() {
        let folds = time_series_folds(12, 5).unwrap();
        assert_eq!(folds.len(), 5);
        assert_eq!(folds[0], Fold { train: 0..2, validate: 2..4 });
        assert_eq!(folds[4], Fold { train: 0..10, validate: 10..12 });

        // Remainder rows go to the first training window.
        let folds = time_series_folds(14, 5).unwrap();
        assert_eq!(folds[0].train, 0..4);
        assert_eq!(folds[4].validate, 12..14);
    }

    #[test]
    fn too_few_rows_or_splits() {
        assert!(time_series_folds(5, 5).is_err());
        assert!(time_series_folds(100, 1).is_err());
    }

    #[test]
    fn cv_logs_fold_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("ml_dataset.csv");
        write_feature_table(&dataset, &synthetic_table(&[StateCode::Bw], 24 * 8)).unwrap();
        let config = TrainConfig {
            dataset,
            registry: RegistryConfig {
                root: dir.path().join("mlruns"),
                experiment: "exp".into(),
                model_name: "m".into(),
                model_version: ModelVersion::Latest,
            },
            test_size: 0.2,
            cv_splits: 3,
            params: BoostParams {
                n_estimators: 15,
                ..BoostParams::default()
            },
        };

        let outcome = run_cross_validation(&config).unwrap();
        assert_eq!(outcome.fold_mae.len(), 3);
        assert!(outcome.std_mae >= 0.0);

        let runs = ModelRegistry::new(&config.registry.root).list_runs("exp").unwrap();
        assert_eq!(runs.len(), 1);
        for key in ["fold_0_mae", "fold_1_mae", "fold_2_mae", "cv_mean_mae", "cv_std_mae"] {
            assert!(runs[0].metric(key).is_some(), "{key}");
        }
        assert_eq!(runs[0].metric("cv_mean_mae"), Some(outcome.mean_mae));
    }
}
