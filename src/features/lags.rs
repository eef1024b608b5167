//! Lag features for one time-ordered group.

/// One row that survived the lag window: its index in the group, its value,
/// and one lag value per requested lag.
pub type LaggedRow = (usize, f64, Vec<f64>);

/// Shift `values` by each lag and keep the rows whose value and every lag are
/// present.
///
/// `value_lag_n` of row `i` is `values[i - n]`, so a missing value leaves a
/// hole in every row that refers back to it. Returns the kept rows and the
/// number of rows with a value that were dropped for an incomplete window.
pub fn attach_lags(values: &[Option<f64>], lags: &[usize]) -> (Vec<LaggedRow>, usize) {
    let mut kept = Vec::with_capacity(values.len());
    let mut dropped = 0usize;

    for (i, value) in values.iter().enumerate() {
        let Some(value) = *value else {
            continue;
        };
        let window: Option<Vec<f64>> = lags
            .iter()
            .map(|&n| i.checked_sub(n).and_then(|j| values[j]))
            .collect();
        match window {
            Some(window) => kept.push((i, value, window)),
            None => dropped += 1,
        }
    }
    (kept, dropped)
}
