//! Feature layout shared by training and serving.
//!
//! Column order: calendar fields, lag values, then the encoded state and
//! intensity kind. State codes are encoded by their position in
//! [`StateCode::ALL`] and kinds by [`IntensityKind::ALL`], so a row built at
//! serving time matches the matrix the model was trained on.

use nalgebra::DMatrix;

use crate::domain::{CalendarFields, FeatureRow, IntensityKind, StateCode};
use crate::io::dataset::FeatureTable;

pub const CALENDAR_FEATURES: [&str; 5] = ["hour", "day_of_week", "month", "quarter", "is_weekend"];
pub const STATE_FEATURE: &str = "state_encoded";
pub const KIND_FEATURE: &str = "type_encoded";

/// Model input column names for a lag list.
pub fn feature_names(lags: &[usize]) -> Vec<String> {
    CALENDAR_FEATURES
        .iter()
        .map(|s| s.to_string())
        .chain(lags.iter().map(|&l| FeatureTable::lag_column(l)))
        .chain([STATE_FEATURE.to_string(), KIND_FEATURE.to_string()])
        .collect()
}

/// Encode one input row in [`feature_names`] order.
pub fn encode_features(
    state: StateCode,
    kind: IntensityKind,
    calendar: &CalendarFields,
    lags: &[f64],
) -> Vec<f64> {
    let mut out = Vec::with_capacity(CALENDAR_FEATURES.len() + lags.len() + 2);
    out.extend([
        f64::from(calendar.hour),
        f64::from(calendar.day_of_week),
        f64::from(calendar.month),
        f64::from(calendar.quarter),
        f64::from(u8::from(calendar.is_weekend)),
    ]);
    out.extend_from_slice(lags);
    out.push(state.encoded() as f64);
    out.push(kind.encoded() as f64);
    out
}

pub fn encode_row(row: &FeatureRow) -> Vec<f64> {
    encode_features(row.state, row.kind, &row.calendar, &row.lags)
}

/// Stack rows into a design matrix (one row per observation).
pub fn design_matrix(rows: &[FeatureRow]) -> DMatrix<f64> {
    let encoded: Vec<Vec<f64>> = rows.iter().map(encode_row).collect();
    let width = encoded.first().map_or(0, Vec::len);
    DMatrix::from_fn(encoded.len(), width, |i, j| encoded[i][j])
}
