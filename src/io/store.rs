//! Raw series store: one CSV file per entity.
//!
//! Invariants of a stored file:
//! - a header row whose first column is `start`
//! - no two rows share the same `start` timestamp
//! - rows ascend by `start`
//!
//! Files are only ever replaced whole (temp file in the same directory, then
//! rename), so a reader sees either the previous version or the new one.
//!
//! Older exports carry two unnamed columns (`0`, `1`). Those are rewritten once
//! to `start,value` the first time they are opened.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::{parse_instant, parse_timestamp};
use crate::error::AppError;
use crate::io::atomic::replace_file;

/// Name of the key column.
pub const START_COLUMN: &str = "start";

const LEGACY_HEADER: [&str; 2] = ["0", "1"];
const LEGACY_RENAMED: [&str; 2] = [START_COLUMN, "value"];

/// Header layout of a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// Has a `start` column.
    Canonical,
    /// Exactly two columns named `0` and `1` (timestamp, value).
    Legacy,
    /// Neither; cannot be used as a store.
    Unknown,
}

pub fn detect_schema(headers: &[String]) -> SchemaVersion {
    if headers.len() == 2 && headers[0] == LEGACY_HEADER[0] && headers[1] == LEGACY_HEADER[1] {
        SchemaVersion::Legacy
    } else if headers.iter().any(|h| h == START_COLUMN) {
        SchemaVersion::Canonical
    } else {
        SchemaVersion::Unknown
    }
}

/// One measurement with all origin fields kept as text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Wall-clock time as reported; its date decides batch coverage.
    pub start: NaiveDateTime,
    /// UTC instant of `start`; the dedup and sort key.
    pub instant: NaiveDateTime,
    /// Every field including `start`, verbatim.
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Build from one element of the API's record array.
    ///
    /// Returns `None` for non-objects and for objects without a parseable `start`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let start_raw = match obj.get(START_COLUMN)? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let start = parse_timestamp(&start_raw)?;
        let instant = parse_instant(&start_raw)?;
        let fields = obj
            .iter()
            .map(|(k, v)| (k.clone(), render_json_field(v)))
            .collect();
        Some(Self { start, instant, fields })
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

fn render_json_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

/// In-memory contents of one store file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesTable {
    columns: Vec<String>,
    rows: Vec<RawRecord>,
}

impl SeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row, extending the column list with any unseen fields.
    pub fn push(&mut self, record: RawRecord) {
        if self.columns.is_empty() || self.columns[0] != START_COLUMN {
            self.columns.retain(|c| c != START_COLUMN);
            self.columns.insert(0, START_COLUMN.to_string());
        }
        for key in record.fields.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(record);
    }

    /// Calendar dates present in the `start` column.
    pub fn covered_dates(&self) -> HashSet<NaiveDate> {
        self.rows.iter().map(RawRecord::date).collect()
    }

    /// Concatenate, keep the first row per `start`, then sort ascending.
    ///
    /// Existing rows come first, so they win over re-fetched duplicates.
    pub fn merge(mut self, fetched: impl IntoIterator<Item = RawRecord>) -> Self {
        for record in fetched {
            self.push(record);
        }
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.rows.retain(|r| seen.insert(r.instant));
        self.rows.sort_by_key(|r| r.instant);
        self
    }
}

/// Open a store file, normalizing a legacy file on disk first.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load_store(path: &Path) -> Result<Option<SeriesTable>, AppError> {
    if !path.exists() {
        return Ok(None);
    }
    normalize_legacy(path)?;
    let (headers, records) = read_raw_csv(path)?;
    match detect_schema(&headers) {
        SchemaVersion::Canonical => {}
        SchemaVersion::Legacy | SchemaVersion::Unknown if headers.is_empty() => {
            return Ok(Some(SeriesTable::new()));
        }
        _ => {
            return Err(AppError::config(format!(
                "Store '{}' has no `{START_COLUMN}` column.",
                path.display()
            )));
        }
    }
    Ok(Some(table_from_rows(path, &headers, records)))
}

/// Rewrite a legacy two-column file as `start,value`, sorted and deduplicated.
///
/// Returns `true` when the file was rewritten.
pub fn normalize_legacy(path: &Path) -> Result<bool, AppError> {
    if !path.exists() {
        return Ok(false);
    }
    let (headers, records) = read_raw_csv(path)?;
    if detect_schema(&headers) != SchemaVersion::Legacy {
        return Ok(false);
    }

    let renamed: Vec<String> = LEGACY_RENAMED.iter().map(|s| s.to_string()).collect();
    let table = SeriesTable::new().merge(table_from_rows(path, &renamed, records).rows);
    write_store(path, &table)?;
    info!(path = %path.display(), rows = table.len(), "normalized legacy store");
    Ok(true)
}

/// Atomically replace `path` with `table`.
pub fn write_store(path: &Path, table: &SeriesTable) -> Result<(), AppError> {
    replace_file(path, |out| {
        let mut writer = csv::Writer::from_writer(out);
        let write_err = |e: csv::Error| AppError::config(format!("Failed to write store '{}': {e}", path.display()));

        let mut columns: Vec<&str> = table.columns.iter().map(String::as_str).collect();
        if columns.is_empty() {
            columns.push(START_COLUMN);
        }
        writer.write_record(&columns).map_err(write_err)?;
        for row in &table.rows {
            writer
                .write_record(columns.iter().map(|c| row.get(c).unwrap_or("")))
                .map_err(write_err)?;
        }
        writer
            .flush()
            .map_err(|e| AppError::config(format!("Failed to flush store '{}': {e}", path.display())))
    })
}

fn read_raw_csv(path: &Path) -> Result<(Vec<String>, Vec<csv::StringRecord>), AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open store '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("Failed to read store headers '{}': {e}", path.display())))?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for result in reader.records() {
        let record =
            result.map_err(|e| AppError::config(format!("Failed to read store '{}': {e}", path.display())))?;
        records.push(record);
    }
    Ok((headers, records))
}

fn table_from_rows(path: &Path, headers: &[String], records: Vec<csv::StringRecord>) -> SeriesTable {
    let mut table = SeriesTable::new();
    let start_idx = headers.iter().position(|h| h == START_COLUMN);
    let mut dropped = 0usize;

    for record in records {
        let raw = start_idx.and_then(|i| record.get(i)).unwrap_or("");
        let (Some(start), Some(instant)) = (parse_timestamp(raw), parse_instant(raw)) else {
            dropped += 1;
            continue;
        };
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        table.push(RawRecord { start, instant, fields });
    }

    // Keep the file's own column order.
    let mut columns: Vec<String> = headers.to_vec();
    for c in &table.columns {
        if !columns.contains(c) {
            columns.push(c.clone());
        }
    }
    if let Some(pos) = columns.iter().position(|c| c == START_COLUMN) {
        let start = columns.remove(pos);
        columns.insert(0, start);
    }
    table.columns = columns;

    if dropped > 0 {
        warn!(path = %path.display(), dropped, "skipped store rows without a parseable start");
    }
    table
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use serde_json::json;

    fn rec(start: &str, value: f64) -> RawRecord {
        RawRecord::from_json(&json!({ "start": start, "value": value })).unwrap()
    }

    #[test]
    fn from_json_keeps_all_fields() {
        let r = RawRecord::from_json(&json!({
            "start": "2022-01-01T00:00:00",
            "end": "2022-01-01T01:00:00",
            "value": 312.5,
            "flag": null
        }))
        .unwrap();
        assert_eq!(r.get("value"), Some("312.5"));
        assert_eq!(r.get("end"), Some("2022-01-01T01:00:00"));
        assert_eq!(r.get("flag"), Some(""));
        assert!(RawRecord::from_json(&json!({ "value": 1 })).is_none());
        assert!(RawRecord::from_json(&json!([1, 2])).is_none());
    }

    #[test]
    fn merge_dedups_and_sorts() {
        let existing = SeriesTable::new().merge(vec![
            rec("2022-01-01T02:00:00", 2.0),
            rec("2022-01-01T00:00:00", 0.0),
            rec("2022-01-01T01:00:00", 1.0),
        ]);
        assert_eq!(existing.len(), 3);

        // Two of these overlap with the existing rows.
        let fetched = vec![
            rec("2022-01-01T01:00:00", 99.0),
            rec("2022-01-01T03:00:00", 3.0),
            rec("2022-01-01T02:00:00", 98.0),
            rec("2022-01-01T04:00:00", 4.0),
        ];
        let merged = existing.merge(fetched);

        assert_eq!(merged.len(), 3 + 4 - 2);
        let starts: Vec<_> = merged.rows().iter().map(|r| r.start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
        // Existing rows win.
        assert_eq!(merged.rows()[1].get("value"), Some("1.0"));
    }

    #[test]
    fn merge_keeps_both_hours_of_the_autumn_clock_change() {
        let merged = SeriesTable::new().merge(vec![
            rec("2022-10-30T03:00:00+01:00", 3.0),
            rec("2022-10-30T02:00:00+01:00", 2.5),
            rec("2022-10-30T02:00:00+02:00", 2.0),
            rec("2022-10-30T01:00:00+02:00", 1.0),
        ]);
        let merged = merged.merge(vec![rec("2022-10-30T02:00:00+01:00", 99.0)]);

        assert_eq!(merged.len(), 4);
        let values: Vec<_> = merged.rows().iter().map(|r| r.get("value").unwrap()).collect();
        assert_eq!(values, ["1.0", "2.0", "2.5", "3.0"]);
        assert_eq!(merged.covered_dates().len(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let rows = vec![rec("2022-01-01T00:00:00", 1.0), rec("2022-01-01T01:00:00", 2.0)];
        let once = SeriesTable::new().merge(rows.clone());
        let twice = once.clone().merge(rows);
        assert_eq!(once, twice);
    }

    #[test]
    fn write_then_load_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BW_consumption_intensity.csv");
        let table = SeriesTable::new().merge(vec![
            rec("2022-01-01T00:00:00", 1.0),
            rec("2022-01-02T00:00:00", 2.0),
        ]);
        write_store(&path, &table).unwrap();

        let loaded = load_store(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.columns()[0], START_COLUMN);
        assert_eq!(loaded.rows()[1].get("value"), Some("2.0"));
        assert_eq!(loaded.covered_dates().len(), 2);
    }

    #[test]
    fn missing_store_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_store(&dir.path().join("nope.csv")).unwrap().is_none());
    }

    #[test]
    fn legacy_file_is_normalized_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HE_production_intensity.csv");
        fs::write(
            &path,
            "0,1\n2022-01-01 01:00:00,200\n2022-01-01 00:00:00,100\n2022-01-01 00:00:00,100\n",
        )
        .unwrap();

        assert!(normalize_legacy(&path).unwrap());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("start,value\n"));
        assert!(!normalize_legacy(&path).unwrap());

        let table = load_store(&path).unwrap().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].get("value"), Some("100"));
    }

    #[test]
    fn store_without_start_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "time,value\n2022-01-01,1\n").unwrap();
        let err = load_store(&path).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG);
    }
}
