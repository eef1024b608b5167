//! Error metrics on recent predictions and a mean/std drift heuristic.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::math::{mae, mape, mean, rmse, sample_std};

/// `|μc − μr| / σr` above this flags drift.
pub const MEAN_DRIFT_THRESHOLD: f64 = 2.0;
/// `|σc − σr| / σr` above this flags drift.
pub const STD_DRIFT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Percent; pairs with a zero target are left out.
    pub mape: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn calculate_model_metrics(y_true: &[f64], y_pred: &[f64]) -> Result<ModelMetrics, AppError> {
    if y_true.len() != y_pred.len() {
        return Err(AppError::model(format!(
            "Got {} targets but {} predictions.",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(AppError::no_data("No values to evaluate."));
    }
    Ok(ModelMetrics {
        mae: mae(y_true, y_pred),
        rmse: rmse(y_true, y_pred),
        mape: mape(y_true, y_pred),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriftReport {
    pub current_mean: f64,
    pub reference_mean: f64,
    pub current_std: f64,
    pub reference_std: f64,
    pub mean_drift: f64,
    pub std_drift: f64,
    pub drift_detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Compare `current` against `reference` using sample standard deviations.
pub fn monitor_data_drift(current: &[f64], reference: &[f64]) -> Result<DriftReport, AppError> {
    if current.len() < 2 || reference.len() < 2 {
        return Err(AppError::no_data("Drift needs at least two values in each window."));
    }
    let (current_mean, reference_mean) = (mean(current), mean(reference));
    let (current_std, reference_std) = (sample_std(current), sample_std(reference));

    let mean_drift = relative_shift(current_mean, reference_mean, reference_std);
    let std_drift = relative_shift(current_std, reference_std, reference_std);

    Ok(DriftReport {
        current_mean,
        reference_mean,
        current_std,
        reference_std,
        mean_drift,
        std_drift,
        drift_detected: mean_drift > MEAN_DRIFT_THRESHOLD || std_drift > STD_DRIFT_THRESHOLD,
        timestamp: Utc::now(),
    })
}

/// `|a − b| / scale`; a zero scale gives 0 for equal values and +∞ otherwise.
fn relative_shift(a: f64, b: f64, scale: f64) -> f64 {
    let diff = (a - b).abs();
    if scale == 0.0 {
        if diff == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        diff / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifted_mean_is_flagged() {
        let reference: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 90.0 } else { 110.0 }).collect();
        let current: Vec<f64> = reference.iter().map(|v| v + 25.0).collect();
        let report = monitor_data_drift(&current, &reference).unwrap();

        let expected = 25.0 / sample_std(&reference);
        assert!((report.mean_drift - expected).abs() < 1e-9);
        assert!(report.mean_drift > 2.0 && report.mean_drift < 2.6);
        assert_eq!(report.std_drift, 0.0);
        assert!(report.drift_detected);
    }

    #[test]
    fn same_distribution_is_quiet() {
        let values: Vec<f64> = (0..100).map(|i| 200.0 + (i % 10) as f64).collect();
        let report = monitor_data_drift(&values, &values).unwrap();
        assert_eq!(report.mean_drift, 0.0);
        assert!(!report.drift_detected);
    }

    #[test]
    fn widened_spread_is_flagged() {
        let reference = [99.0, 101.0, 99.0, 101.0];
        let current = [98.0, 102.0, 98.0, 102.0];
        let report = monitor_data_drift(&current, &reference).unwrap();
        assert!((report.std_drift - 1.0).abs() < 1e-12);
        assert!(report.drift_detected);
    }

    #[test]
    fn constant_reference() {
        let flat = [5.0, 5.0, 5.0];
        let report = monitor_data_drift(&flat, &flat).unwrap();
        assert_eq!((report.mean_drift, report.std_drift), (0.0, 0.0));
        assert!(!report.drift_detected);

        let report = monitor_data_drift(&[6.0, 6.0], &flat).unwrap();
        assert!(report.mean_drift.is_infinite());
        assert!(report.drift_detected);
        assert!(monitor_data_drift(&[1.0], &flat).is_err());
    }

    #[test]
    fn model_metrics() {
        let m = calculate_model_metrics(&[100.0, 200.0, 0.0], &[110.0, 190.0, 5.0]).unwrap();
        assert!((m.mae - 25.0 / 3.0).abs() < 1e-12);
        assert!((m.mape - 7.5).abs() < 1e-12);
        assert!(calculate_model_metrics(&[], &[]).is_err());
        assert!(calculate_model_metrics(&[1.0], &[]).is_err());
    }
}
