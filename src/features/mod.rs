//! Dataset builder: raw stores → one feature table.
//!
//! Steps, per entity and then across entities:
//! 1. load the store (legacy files are normalized on disk first)
//! 2. resolve timestamp/value columns and tag rows with (state, kind)
//! 3. derive calendar fields
//! 4. derive lag features within each (state, kind) group, ordered by time
//! 5. drop rows whose own value or any lag is missing

pub mod lags;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::domain::{CalendarFields, DatasetConfig, EntityKey, FeatureRow, parse_timestamp};
use crate::error::AppError;
use crate::io::dataset::{FeatureTable, write_feature_table};
use crate::io::store::{SeriesTable, load_store};

pub use lags::attach_lags;

const TIMESTAMP_COLUMN: &str = "timestamp";
const VALUE_COLUMN: &str = "value";
const NON_VALUE_COLUMNS: [&str; 3] = ["start", "end", TIMESTAMP_COLUMN];

/// Counters reported after a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub entities_loaded: usize,
    pub entities_missing: Vec<EntityKey>,
    pub rows_loaded: usize,
    pub rows_unparsed: usize,
    pub rows_incomplete: usize,
    pub rows_out: usize,
    pub columns: usize,
}

/// A single entity's series. Rows whose value does not parse stay in place
/// as `None` so lags still count them.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySeries {
    pub entity: EntityKey,
    pub points: Vec<(NaiveDateTime, Option<f64>)>,
    pub unparsed: usize,
}

/// Pick the value column: `value` if present, else the first column whose
/// non-empty cells all parse as numbers.
pub fn resolve_value_column(table: &SeriesTable) -> Option<String> {
    if table.columns().iter().any(|c| c == VALUE_COLUMN) {
        return Some(VALUE_COLUMN.to_string());
    }
    table
        .columns()
        .iter()
        .filter(|c| !NON_VALUE_COLUMNS.contains(&c.as_str()))
        .find(|c| {
            let mut seen = false;
            let all_numeric = table.rows().iter().all(|r| match r.get(c) {
                None | Some("") => true,
                Some(v) => {
                    seen = true;
                    v.trim().parse::<f64>().is_ok()
                }
            });
            all_numeric && seen
        })
        .cloned()
}

/// Extract a typed series from a store table.
pub fn series_from_table(entity: EntityKey, table: &SeriesTable) -> Result<EntitySeries, AppError> {
    let value_col = resolve_value_column(table).ok_or_else(|| {
        AppError::config(format!("Store for {entity} has no numeric value column."))
    })?;
    let use_timestamp_col = table.columns().iter().any(|c| c == TIMESTAMP_COLUMN);

    let mut points = Vec::with_capacity(table.len());
    let mut unparsed = 0usize;
    for r in table.rows() {
        let ts = if use_timestamp_col {
            r.get(TIMESTAMP_COLUMN).and_then(parse_timestamp)
        } else {
            Some(r.start)
        };
        let value = r
            .get(&value_col)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite());
        if ts.is_none() || value.is_none() {
            unparsed += 1;
        }
        if let Some(ts) = ts {
            points.push((ts, value));
        }
    }
    Ok(EntitySeries {
        entity,
        points,
        unparsed,
    })
}

/// Turn per-entity series into feature rows.
pub fn build_rows(series: Vec<EntitySeries>, lags: &[usize]) -> (Vec<FeatureRow>, usize) {
    let mut out = Vec::new();
    let mut incomplete = 0usize;

    let mut series = series;
    series.sort_by_key(|s| s.entity);

    for s in series {
        let mut points = s.points;
        points.sort_by_key(|(ts, _)| *ts);
        let values: Vec<Option<f64>> = points.iter().map(|(_, v)| *v).collect();

        let (kept, dropped) = attach_lags(&values, lags);
        incomplete += dropped;
        out.extend(kept.into_iter().map(|(i, value, lags)| {
            let timestamp = points[i].0;
            FeatureRow {
                timestamp,
                value,
                state: s.entity.state,
                kind: s.entity.kind,
                calendar: CalendarFields::from_timestamp(timestamp),
                lags,
            }
        }));
    }
    (out, incomplete)
}

/// Load every configured entity and build the feature table (not yet written).
pub fn build_feature_table(config: &DatasetConfig) -> Result<(FeatureTable, BuildSummary), AppError> {
    let mut summary = BuildSummary::default();
    let mut series = Vec::new();

    for entity in EntityKey::all_for(&config.kinds, &config.states) {
        let path = config.raw_dir.join(entity.file_name());
        let Some(table) = load_store(&path)? else {
            summary.entities_missing.push(entity);
            continue;
        };
        let s = series_from_table(entity, &table)?;
        summary.entities_loaded += 1;
        summary.rows_loaded += table.len();
        summary.rows_unparsed += s.unparsed;
        series.push(s);
    }

    if summary.entities_loaded == 0 {
        return Err(AppError::no_data(format!(
            "No raw intensity files found in '{}'.",
            config.raw_dir.display()
        )));
    }
    if !summary.entities_missing.is_empty() {
        warn!(missing = summary.entities_missing.len(), "some raw stores are missing");
    }

    let (rows, incomplete) = build_rows(series, &config.lags);
    summary.rows_incomplete = incomplete;
    summary.rows_out = rows.len();

    let table = FeatureTable {
        lags: config.lags.clone(),
        rows,
    };
    summary.columns = table.column_names().len();
    Ok((table, summary))
}

/// Build and write the feature table to `config.output`.
pub fn prepare_dataset(config: &DatasetConfig) -> Result<(FeatureTable, BuildSummary), AppError> {
    info!(raw_dir = %config.raw_dir.display(), "loading raw data");
    let (table, summary) = build_feature_table(config)?;
    if table.is_empty() {
        return Err(AppError::no_data(
            "No rows remain after lag features were applied.",
        ));
    }
    info!(path = %config.output.display(), rows = table.len(), "saving dataset");
    write_feature_table(&config.output, &table)?;
    Ok((table, summary))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::domain::{IntensityKind, StateCode};

    fn hourly_csv(header: &str, hours: usize, offset: f64) -> String {
        let mut s = format!("{header}\n");
        for h in 0..hours {
            let day = 1 + h / 24;
            s.push_str(&format!("2022-01-{day:02}T{:02}:00:00,{}\n", h % 24, offset + h as f64));
        }
        s
    }

    fn config(dir: &std::path::Path, lags: Vec<usize>) -> DatasetConfig {
        DatasetConfig {
            raw_dir: dir.to_path_buf(),
            output: dir.join("processed/ml_dataset.csv"),
            states: vec![StateCode::Bw, StateCode::By],
            kinds: vec![IntensityKind::Consumption, IntensityKind::Production],
            lags,
        }
    }

    #[test]
    fn builds_lagged_rows_per_entity() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("BW_consumption_intensity.csv"), hourly_csv("start,value", 30, 100.0)).unwrap();
        fs::write(dir.path().join("BY_production_intensity.csv"), hourly_csv("start,value", 10, 500.0)).unwrap();

        let cfg = config(dir.path(), vec![1, 24]);
        let (table, summary) = prepare_dataset(&cfg).unwrap();

        assert_eq!(summary.entities_loaded, 2);
        assert_eq!(summary.entities_missing.len(), 2);
        // 30 - 24 rows survive for BW; BY has too little history.
        assert_eq!(table.len(), 6);
        assert_eq!(summary.rows_incomplete, 24 + 10);
        assert!(table.rows.iter().all(|r| r.state == StateCode::Bw));

        let first = &table.rows[0];
        assert_eq!(first.value, 124.0);
        assert_eq!(first.lags, vec![123.0, 100.0]);
        assert_eq!(first.calendar.hour, 0);
        assert!(cfg.output.exists());
    }

    #[test]
    fn legacy_store_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BW_consumption_intensity.csv");
        fs::write(&path, hourly_csv("0,1", 5, 10.0)).unwrap();

        let (table, _) = build_feature_table(&config(dir.path(), vec![1])).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.rows[0].lags, vec![10.0]);
        assert!(fs::read_to_string(&path).unwrap().starts_with("start,value\n"));
    }

    #[test]
    fn value_column_falls_back_to_numeric_field() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BW_consumption_intensity.csv"),
            "start,end,label,intensity\n\
             2022-01-01T00:00:00,2022-01-01T01:00:00,a,300\n\
             2022-01-01T01:00:00,2022-01-01T02:00:00,b,301\n",
        )
        .unwrap();
        let table = load_store(&dir.path().join("BW_consumption_intensity.csv")).unwrap().unwrap();
        assert_eq!(resolve_value_column(&table).as_deref(), Some("intensity"));
    }

    #[test]
    fn blank_value_drops_rows_that_lag_over_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BW_consumption_intensity.csv"),
            "start,value\n\
             2022-01-01T00:00:00,0\n\
             2022-01-01T01:00:00,\n\
             2022-01-01T02:00:00,20\n\
             2022-01-01T03:00:00,30\n",
        )
        .unwrap();

        let (table, summary) = build_feature_table(&config(dir.path(), vec![1])).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].value, 30.0);
        assert_eq!(table.rows[0].lags, vec![20.0]);
        assert_eq!(summary.rows_unparsed, 1);
        assert_eq!(summary.rows_incomplete, 2);
    }

    #[test]
    fn no_inputs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_feature_table(&config(dir.path(), vec![1])).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_NO_DATA);
    }
}
