//! Regression error metrics.
//!
//! All functions take `(y_true, y_pred)` of equal length. Empty input yields
//! `NaN` rather than panicking; callers check for empty sets earlier.

use crate::math::mean;

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    mean_of(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()))
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    mean_of(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2))).sqrt()
}

/// Coefficient of determination.
///
/// A constant target gives `1.0` for a perfect fit and `0.0` otherwise.
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    if y_true.is_empty() {
        return f64::NAN;
    }
    let m = mean(y_true);
    let ss_tot: f64 = y_true.iter().map(|t| (t - m).powi(2)).sum();
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Mean absolute percentage error, in percent. Rows with `y_true == 0` are
/// skipped.
pub fn mape(y_true: &[f64], y_pred: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    mean_of(
        y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, _)| **t != 0.0)
            .map(|(t, p)| ((t - p) / t).abs()),
    ) * 100.0
}

fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_on_known_values() {
        let t = [1.0, 2.0, 3.0, 4.0];
        let p = [1.0, 2.0, 3.0, 6.0];
        assert_eq!(mae(&t, &p), 0.5);
        assert_eq!(rmse(&t, &p), 1.0);
        assert!((r2(&t, &p) - (1.0 - 4.0 / 5.0)).abs() < 1e-12);
        assert!((mape(&t, &p) - 12.5).abs() < 1e-12);
    }

    #[test]
    fn perfect_fit() {
        let t = [5.0, 7.0];
        assert_eq!(mae(&t, &t), 0.0);
        assert_eq!(r2(&t, &t), 1.0);
        assert_eq!(r2(&[3.0, 3.0], &[3.0, 3.0]), 1.0);
    }

    #[test]
    fn mape_skips_zero_targets_and_empty_is_nan() {
        assert!((mape(&[0.0, 10.0], &[5.0, 11.0]) - 10.0).abs() < 1e-12);
        assert!(mae(&[], &[]).is_nan());
        assert!(mape(&[0.0], &[1.0]).is_nan());
    }
}
