//! Multi-step workflows shared by the CLI commands.
//!
//! `run_pipeline` chains prepare → train → cv → health → monitor in-process,
//! timing each step and carrying on after a failure.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::domain::{DatasetConfig, IntensityKind, MonitorConfig, RegistryConfig, StateCode, TrainConfig};
use crate::error::AppError;
use crate::features::prepare_dataset;
use crate::fit::{run_cross_validation, train_model};
use crate::io::registry::ModelRegistry;
use crate::models::encode_features;
use crate::monitor::{HealthStatus, check_api_health, generate_report, log_report};
use crate::serve::{LoadedModel, PredictionRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Success,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: &'static str,
    pub status: StepStatus,
    pub duration: Duration,
}

fn run_step(name: &'static str, step: impl FnOnce() -> Result<(), AppError>) -> StepResult {
    info!(step = name, "running");
    let started = Instant::now();
    let status = match step() {
        Ok(()) => StepStatus::Success,
        Err(err) => {
            warn!(step = name, %err, "step failed");
            StepStatus::Failed(err.to_string())
        }
    };
    StepResult {
        name,
        status,
        duration: started.elapsed(),
    }
}

/// Run every stage; a failed stage is recorded and the next one still runs.
pub fn run_pipeline(dataset: &DatasetConfig, train: &TrainConfig, monitor: &MonitorConfig) -> Vec<StepResult> {
    vec![
        run_step("Data Processing", || prepare_dataset(dataset).map(|_| ())),
        run_step("Model Training", || train_model(train).map(|_| ())),
        run_step("Model Validation", || run_cross_validation(train).map(|_| ())),
        run_step("API Health Check", || {
            let check = check_api_health(&monitor.api_url, monitor.health_timeout);
            match check.status {
                HealthStatus::Healthy { .. } => Ok(()),
                HealthStatus::Unhealthy { status_code, .. } => {
                    Err(AppError::model(format!("{} answered HTTP {status_code}", check.url)))
                }
                HealthStatus::Error { message } => Err(AppError::model(message)),
            }
        }),
        run_step("Monitoring", || {
            let report = generate_report(monitor);
            if monitor.log_metrics {
                log_report(monitor, &report)?;
            }
            report.drift.map(|_| ()).map_err(AppError::no_data)
        }),
    ]
}

/// Predict with the registered model for the default request at each hour.
pub fn sample_predictions(
    registry: &RegistryConfig,
    state: StateCode,
    kind: IntensityKind,
    hours: &[u32],
) -> Result<(LoadedModel, Vec<(u32, f64)>), AppError> {
    let registered = ModelRegistry::new(&registry.root).load_model(&registry.model_name, registry.model_version)?;
    let loaded = LoadedModel::from_registered(registered).map_err(AppError::model)?;

    let mut out = Vec::with_capacity(hours.len());
    for &hour in hours {
        let request = PredictionRequest {
            state: state.code().to_string(),
            intensity_type: kind.as_str().to_string(),
            hour: i64::from(hour),
            ..PredictionRequest::default()
        };
        let valid = request.validate().map_err(|e| AppError::config(e.to_string()))?;
        let features = encode_features(valid.state, valid.kind, &valid.calendar, &valid.lags);
        out.push((hour, loaded.model.predict_one(&features)));
    }
    Ok((loaded, out))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;
    use crate::domain::{DEFAULT_LAGS, ModelVersion};
    use crate::models::BoostParams;

    fn hourly_store(hours: usize, base: f64) -> String {
        let mut s = String::from("start,value\n");
        for h in 0..hours {
            let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap()
                + chrono::Duration::hours(h as i64);
            let v = base + 40.0 * ((h % 24) as f64 / 24.0 * std::f64::consts::TAU).sin();
            s.push_str(&format!("{},{v}\n", ts.format("%Y-%m-%dT%H:%M:%S")));
        }
        s
    }

    #[test]
    fn pipeline_runs_end_to_end_and_predicts() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("BW_consumption_intensity.csv"), hourly_store(24 * 12, 300.0)).unwrap();
        std::fs::write(raw.join("BY_consumption_intensity.csv"), hourly_store(24 * 12, 250.0)).unwrap();

        let registry = RegistryConfig {
            root: dir.path().join("mlruns"),
            experiment: "exp".into(),
            model_name: "m".into(),
            model_version: ModelVersion::Latest,
        };
        let dataset = DatasetConfig {
            raw_dir: raw,
            output: dir.path().join("ml_dataset.csv"),
            states: StateCode::ALL.to_vec(),
            kinds: IntensityKind::ALL.to_vec(),
            lags: DEFAULT_LAGS.to_vec(),
        };
        let train = TrainConfig {
            dataset: dataset.output.clone(),
            registry: registry.clone(),
            test_size: 0.2,
            cv_splits: 3,
            params: BoostParams {
                n_estimators: 10,
                ..BoostParams::default()
            },
        };
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let monitor = MonitorConfig {
            api_url: format!("http://{addr}"),
            dataset: dataset.output.clone(),
            registry: registry.clone(),
            window: 100,
            health_timeout: Duration::from_secs(2),
            log_metrics: false,
            interval: None,
        };

        let steps = run_pipeline(&dataset, &train, &monitor);
        let names: Vec<&str> = steps.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            ["Data Processing", "Model Training", "Model Validation", "API Health Check", "Monitoring"]
        );
        for step in &steps {
            if step.name == "API Health Check" {
                assert!(matches!(step.status, StepStatus::Failed(_)));
            } else {
                assert_eq!(step.status, StepStatus::Success, "{}", step.name);
            }
        }

        let (loaded, preds) = sample_predictions(&registry, StateCode::Bw, IntensityKind::Consumption, &[6, 12]).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(preds.len(), 2);
        assert!(preds.iter().all(|(_, v)| v.is_finite()));
    }
}
