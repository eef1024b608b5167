//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the fetcher, dataset builder, trainer and service
//! - written to CSV/JSON
//! - parsed from CLI flags and request bodies

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Weekday};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Default lag offsets (rows, i.e. hours for hourly series).
pub const DEFAULT_LAGS: [usize; 6] = [1, 2, 3, 24, 48, 168];

/// Unit attached to every served prediction.
pub const INTENSITY_UNIT: &str = "gCO₂/kWh";

/// German federal state (grid region) codes served by the intensity API.
///
/// Declaration order is also the label encoding used by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
#[value(rename_all = "UPPER")]
pub enum StateCode {
    Bw,
    By,
    Bb,
    He,
    Mv,
    Ni,
    Nw,
    Rp,
    Sl,
    Sn,
    St,
    Sh,
    Th,
}

impl StateCode {
    pub const ALL: [StateCode; 13] = [
        StateCode::Bw,
        StateCode::By,
        StateCode::Bb,
        StateCode::He,
        StateCode::Mv,
        StateCode::Ni,
        StateCode::Nw,
        StateCode::Rp,
        StateCode::Sl,
        StateCode::Sn,
        StateCode::St,
        StateCode::Sh,
        StateCode::Th,
    ];

    /// Two-letter code as used by the API and in file names.
    pub fn code(self) -> &'static str {
        match self {
            StateCode::Bw => "BW",
            StateCode::By => "BY",
            StateCode::Bb => "BB",
            StateCode::He => "HE",
            StateCode::Mv => "MV",
            StateCode::Ni => "NI",
            StateCode::Nw => "NW",
            StateCode::Rp => "RP",
            StateCode::Sl => "SL",
            StateCode::Sn => "SN",
            StateCode::St => "ST",
            StateCode::Sh => "SH",
            StateCode::Th => "TH",
        }
    }

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            StateCode::Bw => "Baden-Wuerttemberg",
            StateCode::By => "Bavaria",
            StateCode::Bb => "Brandenburg and Berlin",
            StateCode::He => "Hesse",
            StateCode::Mv => "Mecklenburg-Western Pomerania",
            StateCode::Ni => "Lower Saxony and Bremen",
            StateCode::Nw => "North Rhine-Westphalia",
            StateCode::Rp => "Rhineland-Palatinate",
            StateCode::Sl => "Saarland",
            StateCode::Sn => "Saxony",
            StateCode::St => "Saxony-Anhalt",
            StateCode::Sh => "Schleswig-Holstein and Hamburg",
            StateCode::Th => "Thuringia",
        }
    }

    /// Dense integer code fed to the model.
    pub fn encoded(self) -> usize {
        self as usize
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Which intensity series: consumption-based or production-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IntensityKind {
    Consumption,
    Production,
}

impl IntensityKind {
    pub const ALL: [IntensityKind; 2] = [IntensityKind::Consumption, IntensityKind::Production];

    pub fn as_str(self) -> &'static str {
        match self {
            IntensityKind::Consumption => "consumption",
            IntensityKind::Production => "production",
        }
    }

    /// Path segment of the historical endpoint (relative to the API base).
    pub fn series_path(self) -> &'static str {
        match self {
            IntensityKind::Consumption => "ConsumptionIntensityHistorical/",
            IntensityKind::Production => "ProductionIntensityHistorical/",
        }
    }

    /// JSON key holding the record array in the API response.
    pub fn response_key(self) -> &'static str {
        match self {
            IntensityKind::Consumption => "Consumption-based Intensity (historical)",
            IntensityKind::Production => "Production-based Intensity (historical)",
        }
    }

    pub fn encoded(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for IntensityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `--mode` for the fetch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchMode {
    Consumption,
    Production,
    Both,
}

impl FetchMode {
    pub fn kinds(self) -> Vec<IntensityKind> {
        match self {
            FetchMode::Consumption => vec![IntensityKind::Consumption],
            FetchMode::Production => vec![IntensityKind::Production],
            FetchMode::Both => IntensityKind::ALL.to_vec(),
        }
    }
}

/// One time series: a region plus a series kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub state: StateCode,
    pub kind: IntensityKind,
}

impl EntityKey {
    pub fn new(state: StateCode, kind: IntensityKind) -> Self {
        Self { state, kind }
    }

    /// Raw store file name, e.g. `BW_consumption_intensity.csv`.
    pub fn file_name(&self) -> String {
        format!("{}_{}_intensity.csv", self.state.code(), self.kind.as_str())
    }

    /// Every entity in fetch order: kind-major, then regions in declaration order.
    pub fn all_for(kinds: &[IntensityKind], states: &[StateCode]) -> Vec<EntityKey> {
        kinds
            .iter()
            .flat_map(|&kind| states.iter().map(move |&state| EntityKey::new(state, kind)))
            .collect()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.state.code(), self.kind.as_str())
    }
}

/// Inclusive calendar-day window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Returns `None` when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of calendar days covered (always >= 1).
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Split into consecutive sub-windows of at most `batch_days` days.
    ///
    /// The last batch may be shorter. A `batch_days` of zero is treated as one.
    pub fn batches(&self, batch_days: u32) -> Vec<DateWindow> {
        let step = Duration::days(i64::from(batch_days.max(1)) - 1);
        let mut out = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            let batch_end = (current + step).min(self.end);
            out.push(DateWindow {
                start: current,
                end: batch_end,
            });
            match batch_end.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        out
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Parse the timestamp formats seen in API payloads and pandas-written CSVs.
///
/// Offsets are dropped after conversion to the local wall-clock time they carry,
/// so the calendar date matches what the source reported.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    parse_with(raw, |dt| dt.naive_local())
}

/// Like [`parse_timestamp`], but offset-bearing values become their UTC instant.
///
/// Two readings of the same wall-clock hour (the autumn DST switch) stay
/// distinct and order by when they happened. Naive values are taken as UTC.
pub fn parse_instant(raw: &str) -> Option<NaiveDateTime> {
    parse_with(raw, |dt| dt.naive_utc())
}

fn parse_with(raw: &str, resolve: impl Fn(DateTime<FixedOffset>) -> NaiveDateTime) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(resolve(dt));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(resolve(dt));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Calendar fields derived from a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFields {
    pub hour: u32,
    /// Monday = 0 … Sunday = 6.
    pub day_of_week: u32,
    pub month: u32,
    pub quarter: u32,
    pub is_weekend: bool,
}

impl CalendarFields {
    pub fn from_timestamp(ts: NaiveDateTime) -> Self {
        let weekday = ts.weekday();
        Self {
            hour: ts.hour(),
            day_of_week: weekday.num_days_from_monday(),
            month: ts.month(),
            quarter: (ts.month() - 1) / 3 + 1,
            is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
        }
    }
}

/// One row of the ML feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub timestamp: NaiveDateTime,
    pub value: f64,
    pub state: StateCode,
    pub kind: IntensityKind,
    pub calendar: CalendarFields,
    /// Lagged values, aligned with the table's lag list.
    pub lags: Vec<f64>,
}

/// Registry version selector: a concrete number or the newest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVersion {
    Latest,
    Number(u32),
}

impl FromStr for ModelVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Ok(ModelVersion::Latest);
        }
        s.parse::<u32>()
            .map(ModelVersion::Number)
            .map_err(|_| format!("invalid model version '{s}' (expected 'latest' or a number)"))
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVersion::Latest => f.write_str("latest"),
            ModelVersion::Number(n) => write!(f, "{n}"),
        }
    }
}
