//! Hold-out training: chronological split, fit, evaluate, register.

use chrono::Utc;
use tracing::info;

use crate::domain::{FeatureRow, TrainConfig};
use crate::error::AppError;
use crate::io::dataset::{FeatureTable, read_feature_table};
use crate::io::registry::{ModelArtifact, ModelRegistry, RunRecord};
use crate::math::{mae, r2, rmse};
use crate::models::{BoostParams, GradientBoostedTrees, Regressor, design_matrix, feature_names};

pub const TRAINING_RUN_NAME: &str = "model_training";

/// Error metrics on one evaluation set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl EvalMetrics {
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Self {
        Self {
            mae: mae(y_true, y_pred),
            rmse: rmse(y_true, y_pred),
            r2: r2(y_true, y_pred),
        }
    }

    fn log_to(&self, run: &mut RunRecord, prefix: &str) {
        run.log_metric(format!("{prefix}_mae"), self.mae);
        run.log_metric(format!("{prefix}_rmse"), self.rmse);
        run.log_metric(format!("{prefix}_r2"), self.r2);
    }
}

/// A model fitted on the training part and scored on both parts.
#[derive(Debug, Clone)]
pub struct HoldoutFit {
    pub model: GradientBoostedTrees,
    pub feature_names: Vec<String>,
    pub n_train: usize,
    pub n_test: usize,
    pub train: EvalMetrics,
    pub test: EvalMetrics,
}

/// Result of `co2 train`.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model_name: String,
    pub version: u32,
    pub run_id: String,
    pub fit: HoldoutFit,
}

/// Number of training rows for a chronological split of `n` rows.
///
/// The test part takes the last `ceil(n * test_size)` rows; both parts must be
/// non-empty.
pub fn split_point(n: usize, test_size: f64) -> Result<usize, AppError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(AppError::config(format!("test size must be in (0, 1), got {test_size}.")));
    }
    let n_test = (n as f64 * test_size).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(AppError::no_data(format!(
            "Not enough rows ({n}) for a train/test split with test size {test_size}."
        )));
    }
    Ok(n - n_test)
}

/// Order rows by timestamp, keeping the table order among equal timestamps.
pub fn sort_chronologically(rows: &mut [FeatureRow]) {
    rows.sort_by_key(|r| r.timestamp);
}

/// Fit on the first part of `table` and evaluate on both parts.
pub fn fit_holdout(table: &FeatureTable, test_size: f64, params: BoostParams) -> Result<HoldoutFit, AppError> {
    let mut rows = table.rows.clone();
    sort_chronologically(&mut rows);
    let cut = split_point(rows.len(), test_size)?;
    let (train_rows, test_rows) = rows.split_at(cut);

    let x_train = design_matrix(train_rows);
    let x_test = design_matrix(test_rows);
    let y_train: Vec<f64> = train_rows.iter().map(|r| r.value).collect();
    let y_test: Vec<f64> = test_rows.iter().map(|r| r.value).collect();

    info!(train = train_rows.len(), test = test_rows.len(), "fitting model");
    let mut model = GradientBoostedTrees::new(params);
    model.fit(&x_train, &y_train)?;

    let train = EvalMetrics::compute(&y_train, &model.predict(&x_train)?);
    let test = EvalMetrics::compute(&y_test, &model.predict(&x_test)?);

    Ok(HoldoutFit {
        model,
        feature_names: feature_names(&table.lags),
        n_train: train_rows.len(),
        n_test: test_rows.len(),
        train,
        test,
    })
}

/// Train from the dataset file and register the result.
pub fn train_model(config: &TrainConfig) -> Result<TrainOutcome, AppError> {
    info!(path = %config.dataset.display(), "loading dataset");
    let table = read_feature_table(&config.dataset)?;
    let fit = fit_holdout(&table, config.test_size, config.params)?;

    let mut run = RunRecord::new(&config.registry.experiment, TRAINING_RUN_NAME);
    for (key, value) in config.params.as_pairs() {
        run.log_param(key, value);
    }
    run.log_param("test_size", config.test_size);
    run.log_param("train_samples", fit.n_train);
    run.log_param("test_samples", fit.n_test);
    run.log_param("features", fit.feature_names.join(","));
    fit.train.log_to(&mut run, "train");
    fit.test.log_to(&mut run, "test");

    let artifact = ModelArtifact {
        feature_names: fit.feature_names.clone(),
        lags: table.lags.clone(),
        trained_at: Utc::now(),
        model: fit.model.clone(),
    };
    let registry = ModelRegistry::new(&config.registry.root);
    let version = registry.register_model(&config.registry.model_name, &artifact, &run)?;

    Ok(TrainOutcome {
        model_name: config.registry.model_name.clone(),
        version,
        run_id: run.run_id,
        fit,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Duration, NaiveDate};

    use crate::domain::{CalendarFields, FeatureRow, IntensityKind, StateCode};
    use crate::io::dataset::FeatureTable;

    /// A daily-cycle series with lags 1 and 24 for the given states.
    pub fn synthetic_table(states: &[StateCode], hours: usize) -> FeatureTable {
        let lags = vec![1, 24];
        let t0 = NaiveDate::from_ymd_opt(2023, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let level = |s: StateCode, h: usize| {
            200.0 + 20.0 * s.encoded() as f64 + 50.0 * ((h % 24) as f64 / 24.0 * std::f64::consts::TAU).sin()
        };
        let mut rows = Vec::new();
        for &state in states {
            for h in 24..hours {
                let ts = t0 + Duration::hours(h as i64);
                rows.push(FeatureRow {
                    timestamp: ts,
                    value: level(state, h),
                    state,
                    kind: IntensityKind::Consumption,
                    calendar: CalendarFields::from_timestamp(ts),
                    lags: vec![level(state, h - 1), level(state, h - 24)],
                });
            }
        }
        FeatureTable { lags, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::synthetic_table;
    use super::*;
    use crate::domain::{ModelVersion, RegistryConfig, StateCode};
    use crate::io::dataset::write_feature_table;

    #[test]
    fn split_uses_ceiling_for_test_part() {
        assert_eq!(split_point(10, 0.2).unwrap(), 8);
        assert_eq!(split_point(11, 0.2).unwrap(), 8);
        assert_eq!(split_point(2, 0.5).unwrap(), 1);
        assert!(split_point(1, 0.2).is_err());
        assert!(split_point(10, 0.0).is_err());
        assert!(split_point(10, 1.0).is_err());
    }

    #[test]
    fn sort_is_stable_across_entities() {
        let mut table = synthetic_table(&[StateCode::Bw, StateCode::By], 30);
        sort_chronologically(&mut table.rows);
        assert!(table.rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(table.rows[0].state, StateCode::Bw);
        assert_eq!(table.rows[1].state, StateCode::By);
    }

    #[test]
    fn holdout_fit_scores_well_on_regular_data() {
        let table = synthetic_table(&[StateCode::Bw, StateCode::Sn], 24 * 20);
        let fit = fit_holdout(&table, 0.2, BoostParams::default()).unwrap();
        assert_eq!(fit.n_train + fit.n_test, table.len());
        assert_eq!(fit.n_test, (table.len() as f64 * 0.2).ceil() as usize);
        assert!(fit.test.r2 > 0.9, "test r2 = {}", fit.test.r2);
        assert_eq!(fit.feature_names.len(), 5 + 2 + 2);
    }

    #[test]
    fn train_registers_a_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("ml_dataset.csv");
        write_feature_table(&dataset, &synthetic_table(&[StateCode::Bw], 24 * 10)).unwrap();

        let config = TrainConfig {
            dataset,
            registry: RegistryConfig {
                root: dir.path().join("mlruns"),
                experiment: "exp".into(),
                model_name: "m".into(),
                model_version: ModelVersion::Latest,
            },
            test_size: 0.2,
            cv_splits: 5,
            params: BoostParams {
                n_estimators: 10,
                ..BoostParams::default()
            },
        };
        let first = train_model(&config).unwrap();
        let second = train_model(&config).unwrap();
        assert_eq!((first.version, second.version), (1, 2));

        let registry = ModelRegistry::new(&config.registry.root);
        let loaded = registry.load_model("m", ModelVersion::Latest).unwrap();
        let run = loaded.run.unwrap();
        assert!(run.metric("test_mae").is_some());
        assert!(run.metric("train_r2").is_some());
        assert_eq!(run.params.get("train_samples"), Some(&first.fit.n_train.to_string()));
        assert_eq!(registry.list_runs("exp").unwrap().len(), 2);
    }
}
