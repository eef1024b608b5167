//! Feature table CSV (the hand-off between `prepare`, `train` and `monitor`).
//!
//! Layout:
//!
//! ```text
//! timestamp,value,state,type,hour,day_of_week,month,quarter,is_weekend,value_lag_1,...
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::StringRecord;
use tracing::warn;

use crate::domain::{CalendarFields, FeatureRow, IntensityKind, StateCode, parse_timestamp};
use crate::error::AppError;
use crate::io::atomic::replace_file;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LAG_PREFIX: &str = "value_lag_";
const BASE_COLUMNS: [&str; 9] = [
    "timestamp",
    "value",
    "state",
    "type",
    "hour",
    "day_of_week",
    "month",
    "quarter",
    "is_weekend",
];

/// Rows plus the lag list their `lags` vectors follow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub lags: Vec<usize>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn lag_column(lag: usize) -> String {
        format!("{LAG_PREFIX}{lag}")
    }

    pub fn column_names(&self) -> Vec<String> {
        BASE_COLUMNS
            .iter()
            .map(|s| s.to_string())
            .chain(self.lags.iter().map(|&l| Self::lag_column(l)))
            .collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.value).collect()
    }
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Write the table, replacing `path` atomically.
pub fn write_feature_table(path: &Path, table: &FeatureTable) -> Result<(), AppError> {
    replace_file(path, |out| {
        let mut writer = csv::Writer::from_writer(out);
        let write_err =
            |e: csv::Error| AppError::config(format!("Failed to write dataset '{}': {e}", path.display()));

        writer.write_record(table.column_names()).map_err(write_err)?;
        for r in &table.rows {
            let mut record = vec![
                format_timestamp(&r.timestamp),
                r.value.to_string(),
                r.state.code().to_string(),
                r.kind.as_str().to_string(),
                r.calendar.hour.to_string(),
                r.calendar.day_of_week.to_string(),
                r.calendar.month.to_string(),
                r.calendar.quarter.to_string(),
                u8::from(r.calendar.is_weekend).to_string(),
            ];
            record.extend(r.lags.iter().map(|v| v.to_string()));
            writer.write_record(&record).map_err(write_err)?;
        }
        writer
            .flush()
            .map_err(|e| AppError::config(format!("Failed to flush dataset '{}': {e}", path.display())))
    })
}

/// Read a feature table written by `write_feature_table`.
///
/// Malformed rows are skipped with a warning; an empty result is an error.
pub fn read_feature_table(path: &Path) -> Result<FeatureTable, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open dataset '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("Failed to read dataset headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    for col in BASE_COLUMNS {
        if !header_map.contains_key(col) {
            return Err(AppError::config(format!(
                "Dataset '{}' is missing required column `{col}`.",
                path.display()
            )));
        }
    }

    // Lag columns in header order.
    let lag_columns: Vec<(usize, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| {
            name.trim()
                .strip_prefix(LAG_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
                .map(|lag| (lag, idx))
        })
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| parse_row(&record, &header_map, &lag_columns));
        match parsed {
            Ok(row) => rows.push(row),
            Err(message) => {
                skipped += 1;
                if skipped <= 5 {
                    warn!(line, %message, "skipping dataset row");
                }
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, path = %path.display(), "skipped malformed dataset rows");
    }
    if rows.is_empty() {
        return Err(AppError::no_data(format!(
            "Dataset '{}' contains no usable rows.",
            path.display()
        )));
    }

    Ok(FeatureTable {
        lags: lag_columns.iter().map(|(lag, _)| *lag).collect(),
        rows,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase(), idx))
        .collect()
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    lag_columns: &[(usize, usize)],
) -> Result<FeatureRow, String> {
    let field = |name: &str| -> Result<&str, String> {
        header_map
            .get(name)
            .and_then(|&i| record.get(i))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing `{name}`"))
    };
    let number = |name: &str| -> Result<f64, String> {
        let raw = field(name)?;
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid `{name}`: {raw}"))
    };
    let small = |name: &str| -> Result<u32, String> {
        let raw = field(name)?;
        raw.parse::<u32>().map_err(|_| format!("invalid `{name}`: {raw}"))
    };

    let timestamp = parse_timestamp(field("timestamp")?).ok_or("invalid `timestamp`")?;
    let state_raw = field("state")?;
    let state = StateCode::from_code(state_raw).ok_or_else(|| format!("unknown state `{state_raw}`"))?;
    let kind_raw = field("type")?;
    let kind = IntensityKind::from_name(kind_raw).ok_or_else(|| format!("unknown type `{kind_raw}`"))?;

    let is_weekend = match field("is_weekend")? {
        "1" | "true" | "True" => true,
        "0" | "false" | "False" => false,
        other => return Err(format!("invalid `is_weekend`: {other}")),
    };

    let mut lags = Vec::with_capacity(lag_columns.len());
    for (lag, idx) in lag_columns {
        let raw = record.get(*idx).unwrap_or("");
        let v = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid `{}`: {raw}", FeatureTable::lag_column(*lag)))?;
        lags.push(v);
    }

    Ok(FeatureRow {
        timestamp,
        value: number("value")?,
        state,
        kind,
        calendar: CalendarFields {
            hour: small("hour")?,
            day_of_week: small("day_of_week")?,
            month: small("month")?,
            quarter: small("quarter")?,
            is_weekend,
        },
        lags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: &str, value: f64, lags: Vec<f64>) -> FeatureRow {
        let timestamp = parse_timestamp(ts).unwrap();
        FeatureRow {
            timestamp,
            value,
            state: StateCode::Bw,
            kind: IntensityKind::Consumption,
            calendar: CalendarFields::from_timestamp(timestamp),
            lags,
        }
    }

    #[test]
    fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed/ml_dataset.csv");
        let table = FeatureTable {
            lags: vec![1, 24],
            rows: vec![
                row("2022-01-02 00:00:00", 150.5, vec![149.0, 140.0]),
                row("2022-01-02 01:00:00", 151.0, vec![150.5, 141.0]),
            ],
        };
        write_feature_table(&path, &table).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "timestamp,value,state,type,hour,day_of_week,month,quarter,is_weekend,value_lag_1,value_lag_24\n"
        ));
        assert!(text.contains("2022-01-02 00:00:00,150.5,BW,consumption,0,6,1,1,1,149,140\n"));

        assert_eq!(read_feature_table(&path).unwrap(), table);
    }

    #[test]
    fn skips_bad_rows_and_rejects_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.csv");
        std::fs::write(
            &path,
            "timestamp,value,state,type,hour,day_of_week,month,quarter,is_weekend,value_lag_1\n\
             2022-01-01 05:00:00,100,BW,consumption,5,5,1,1,1,99\n\
             2022-01-01 06:00:00,100,ZZ,consumption,6,5,1,1,1,99\n\
             2022-01-01 07:00:00,,BW,consumption,7,5,1,1,1,99\n",
        )
        .unwrap();
        let table = read_feature_table(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lags, vec![1]);

        std::fs::write(&path, "timestamp,value\n2022-01-01,1\n").unwrap();
        assert!(read_feature_table(&path).is_err());
    }
}
