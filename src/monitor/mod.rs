//! Monitoring report: service health, data drift and recent model error.
//!
//! Each section is computed independently; a failing section is reported as
//! an error string and does not stop the others.

pub mod drift;
pub mod health;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::MonitorConfig;
use crate::error::AppError;
use crate::fit::trainer::sort_chronologically;
use crate::io::dataset::read_feature_table;
use crate::io::registry::{ModelRegistry, RunRecord};
use crate::models::{Regressor, design_matrix, feature_names};

pub use drift::{DriftReport, ModelMetrics, calculate_model_metrics, monitor_data_drift};
pub use health::{HealthCheck, HealthStatus, check_api_health};

pub const MONITORING_RUN_NAME: &str = "model_performance";

/// Registered model scored on the newest dataset rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluation {
    pub model_name: String,
    pub version: u32,
    pub rows: usize,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone)]
pub struct MonitoringReport {
    pub health: HealthCheck,
    pub drift: Result<DriftReport, String>,
    pub model: Result<ModelEvaluation, String>,
    pub generated_at: DateTime<Utc>,
}

impl MonitoringReport {
    /// Numeric values worth recording as metrics.
    pub fn numeric_metrics(&self) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        if let Some(rt) = self.health.status.response_time() {
            out.push(("response_time_seconds".to_string(), rt.as_secs_f64()));
        }
        out.push((
            "api_healthy".to_string(),
            f64::from(u8::from(matches!(self.health.status, HealthStatus::Healthy { .. }))),
        ));
        if let Ok(d) = &self.drift {
            out.push(("mean_drift".to_string(), d.mean_drift));
            out.push(("std_drift".to_string(), d.std_drift));
            out.push(("drift_detected".to_string(), f64::from(u8::from(d.drift_detected))));
        }
        if let Ok(m) = &self.model {
            out.push(("mae".to_string(), m.metrics.mae));
            out.push(("rmse".to_string(), m.metrics.rmse));
            out.push(("mape".to_string(), m.metrics.mape));
        }
        out
    }
}

/// Drift between the first and last `window` values of the dataset.
pub fn dataset_drift(config: &MonitorConfig) -> Result<DriftReport, AppError> {
    let table = read_feature_table(&config.dataset)?;
    let values = table.values();
    let window = config.window.min(values.len());
    let reference = &values[..window];
    let current = &values[values.len() - window..];
    monitor_data_drift(current, reference)
}

/// Score the configured model on the `window` most recent dataset rows.
pub fn evaluate_recent(config: &MonitorConfig) -> Result<ModelEvaluation, AppError> {
    let registry = ModelRegistry::new(&config.registry.root);
    let registered = registry.load_model(&config.registry.model_name, config.registry.model_version)?;

    let mut table = read_feature_table(&config.dataset)?;
    if registered.artifact.feature_names != feature_names(&table.lags) {
        return Err(AppError::model(format!(
            "Model {} v{} does not match the dataset's feature columns.",
            registered.name, registered.version
        )));
    }
    sort_chronologically(&mut table.rows);
    let recent = &table.rows[table.rows.len().saturating_sub(config.window)..];

    let y_true: Vec<f64> = recent.iter().map(|r| r.value).collect();
    let y_pred = registered.artifact.model.predict(&design_matrix(recent))?;
    Ok(ModelEvaluation {
        model_name: registered.name,
        version: registered.version,
        rows: recent.len(),
        metrics: calculate_model_metrics(&y_true, &y_pred)?,
    })
}

pub fn generate_report(config: &MonitorConfig) -> MonitoringReport {
    let health = check_api_health(&config.api_url, config.health_timeout);
    let drift = dataset_drift(config).map_err(|e| e.to_string());
    let model = evaluate_recent(config).map_err(|e| e.to_string());
    MonitoringReport {
        health,
        drift,
        model,
        generated_at: Utc::now(),
    }
}

/// Record the report's numeric values as a tracking run.
pub fn log_report(config: &MonitorConfig, report: &MonitoringReport) -> Result<String, AppError> {
    let mut run = RunRecord::new(&config.registry.experiment, MONITORING_RUN_NAME);
    run.log_param("monitoring_type", MONITORING_RUN_NAME);
    run.log_param("timestamp", report.generated_at.to_rfc3339());
    run.log_param("api_status", report.health.status.label());
    for (key, value) in report.numeric_metrics() {
        run.log_metric(key, value);
    }
    ModelRegistry::new(&config.registry.root).log_run(&run)?;
    info!(run_id = %run.run_id, "monitoring metrics logged");
    Ok(run.run_id)
}
