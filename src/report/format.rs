//! Terminal output for each command.
//!
//! Formatting lives here so the pipeline code only returns data.

use std::path::{Path, PathBuf};

use crate::app::pipeline::{StepResult, StepStatus};
use crate::data::EntityOutcome;
use crate::domain::{INTENSITY_UNIT, IntensityKind, StateCode};
use crate::features::BuildSummary;
use crate::fit::{CvOutcome, TrainOutcome};
use crate::io::dataset::FeatureTable;
use crate::monitor::{HealthStatus, MonitoringReport};

const RULE: &str = "==================================================";

/// One block per entity, then totals.
pub fn format_fetch_summary(outcomes: &[EntityOutcome]) -> String {
    let mut out = String::new();
    let mut saved = 0usize;
    let mut failed = 0usize;

    for o in outcomes {
        out.push_str(&format!("\nFetching {} data for {}...\n", o.entity.kind, o.entity.state));
        match &o.result {
            Ok(report) => {
                out.push_str(&format!(
                    "  batches: {} total, {} already stored, {} fetched, {} failed\n",
                    report.batches_total, report.batches_skipped, report.batches_fetched, report.batches_failed
                ));
                match report.stored_rows {
                    Some(rows) => {
                        saved += 1;
                        out.push_str(&format!("Saved {rows} total records to {}\n", report.path.display()));
                    }
                    None => out.push_str(&format!("No new data for {}.\n", o.entity.state)),
                }
            }
            Err(err) => {
                failed += 1;
                out.push_str(&format!("Failed for {}: {err}\n", o.entity));
            }
        }
    }
    out.push_str(&format!(
        "\n{} entities: {saved} updated, {} unchanged, {failed} failed\n",
        outcomes.len(),
        outcomes.len() - saved - failed
    ));
    out
}

pub fn format_normalize_summary(rewritten: &[PathBuf], checked: usize) -> String {
    let mut out = String::new();
    for path in rewritten {
        out.push_str(&format!("Normalized {}\n", path.display()));
    }
    out.push_str(&format!("{} of {checked} store files rewritten\n", rewritten.len()));
    out
}

pub fn format_dataset_summary(summary: &BuildSummary, table: &FeatureTable, path: &Path) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Loaded {} raw stores ({} rows)",
        summary.entities_loaded, summary.rows_loaded
    ));
    if !summary.entities_missing.is_empty() {
        let missing: Vec<String> = summary.entities_missing.iter().map(|e| e.to_string()).collect();
        out.push_str(&format!("; missing: {}", missing.join(", ")));
    }
    out.push('\n');
    if summary.rows_unparsed > 0 {
        out.push_str(&format!("Dropped {} rows with unparsable timestamp or value\n", summary.rows_unparsed));
    }
    out.push_str(&format!(
        "Dropped {} rows without a full lag window\n",
        summary.rows_incomplete
    ));
    out.push_str(&format!("Saved to {}\n", path.display()));
    out.push_str(&format!("Dataset shape: ({}, {})\n", table.len(), summary.columns));
    out
}

pub fn format_train_summary(outcome: &TrainOutcome) -> String {
    let fit = &outcome.fit;
    let mut out = String::new();
    out.push_str(&format!(
        "Model trained and registered as {} v{} (run {})\n",
        outcome.model_name, outcome.version, outcome.run_id
    ));
    out.push_str(&format!("Samples: train={} test={}\n", fit.n_train, fit.n_test));
    out.push_str(&format!(
        "{:<6} {:>10} {:>10} {:>8}\n",
        "", "MAE", "RMSE", "R²"
    ));
    for (label, m) in [("train", &fit.train), ("test", &fit.test)] {
        out.push_str(&format!("{label:<6} {:>10.3} {:>10.3} {:>8.3}\n", m.mae, m.rmse, m.r2));
    }
    out
}

pub fn format_cv_summary(outcome: &CvOutcome) -> String {
    let mut out = String::new();
    for (i, mae) in outcome.fold_mae.iter().enumerate() {
        out.push_str(&format!("Fold {i}: MAE {mae:.3}\n"));
    }
    out.push_str(&format!(
        "Cross-validation MAE: {:.3} ± {:.3}\n",
        outcome.mean_mae, outcome.std_mae
    ));
    out
}

pub fn format_predictions(
    model_name: &str,
    version: u32,
    state: StateCode,
    kind: IntensityKind,
    predictions: &[(u32, f64)],
) -> String {
    let mut out = format!("Sample predictions from {model_name} v{version} for {state} ({kind}):\n");
    for (hour, value) in predictions {
        out.push_str(&format!("Hour {hour:2}: {value:.1} {INTENSITY_UNIT}\n"));
    }
    out
}

pub fn format_monitoring_report(report: &MonitoringReport) -> String {
    let mut out = String::new();
    out.push_str("CO₂ Forecast Model Monitoring Report\n");
    out.push_str(RULE);
    out.push('\n');

    out.push_str(&format!("API Status: {}\n", report.health.status.label()));
    match &report.health.status {
        HealthStatus::Healthy { response_time, .. } => {
            out.push_str(&format!("Response Time: {:.3}s\n", response_time.as_secs_f64()));
        }
        HealthStatus::Unhealthy {
            status_code,
            response_time,
        } => {
            out.push_str(&format!(
                "Response Time: {:.3}s (HTTP {status_code})\n",
                response_time.as_secs_f64()
            ));
        }
        HealthStatus::Error { message } => out.push_str(&format!("Error: {message}\n")),
    }

    match &report.drift {
        Ok(d) => {
            out.push_str(&format!("Data Drift Detected: {}\n", d.drift_detected));
            out.push_str(&format!("Mean Drift: {:.3}\n", d.mean_drift));
            out.push_str(&format!("Std Drift: {:.3}\n", d.std_drift));
        }
        Err(e) => out.push_str(&format!("Data drift monitoring failed: {e}\n")),
    }

    match &report.model {
        Ok(m) => {
            out.push_str(&format!(
                "Model {} v{} on last {} rows: MAE {:.3} | RMSE {:.3} | MAPE {:.2}%\n",
                m.model_name, m.version, m.rows, m.metrics.mae, m.metrics.rmse, m.metrics.mape
            ));
        }
        Err(e) => out.push_str(&format!("Model evaluation failed: {e}\n")),
    }

    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Report generated at: {}\n", report.generated_at.to_rfc3339()));
    out
}

pub fn format_pipeline_summary(steps: &[StepResult]) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(RULE);
    out.push_str("\nPipeline Summary\n");
    out.push_str(RULE);
    out.push('\n');
    for step in steps {
        match &step.status {
            StepStatus::Success => {
                out.push_str(&format!("SUCCESS: {} ({:.1}s)\n", step.name, step.duration.as_secs_f64()));
            }
            StepStatus::Failed(reason) => {
                out.push_str(&format!(
                    "FAILED: {} ({:.1}s): {reason}\n",
                    step.name,
                    step.duration.as_secs_f64()
                ));
            }
        }
    }
    let ok = steps.iter().filter(|s| s.status == StepStatus::Success).count();
    out.push_str(&format!("\nOverall: {ok}/{} steps completed successfully\n", steps.len()));
    out
}
