//! Command-line parsing for the CO₂ intensity pipeline.
//!
//! Every tunable has a flag and, where it is deployment configuration, an
//! environment fallback (also read from `.env`). Conversion into the
//! domain config structs happens in `app`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::domain::{FetchMode, IntensityKind, ModelVersion, StateCode};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "co2", version, about = "German electricity CO₂ intensity: ingest, train, serve, monitor")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download historical intensity into per-entity raw stores (resumable).
    Fetch(FetchArgs),
    /// Rewrite legacy two-column raw stores to `start,value`.
    Normalize(NormalizeArgs),
    /// Build the feature table from the raw stores.
    Prepare(PrepareArgs),
    /// Train on a chronological split and register the model.
    Train(TrainArgs),
    /// Expanding-window cross-validation.
    Cv(TrainArgs),
    /// Print sample predictions from the registered model.
    Predict(PredictArgs),
    /// Run the prediction HTTP service.
    Serve(ServeArgs),
    /// Print a monitoring report (health, drift, recent error).
    Monitor(MonitorArgs),
    /// Run prepare, train, cv, health check and monitor in sequence.
    Pipeline(PipelineArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    /// First day to fetch (inclusive).
    #[arg(long, env = "CO2_START", default_value = "2022-01-01")]
    pub start: NaiveDate,

    /// Last day to fetch (inclusive).
    #[arg(long, env = "CO2_END", default_value = "2025-07-27")]
    pub end: NaiveDate,

    /// Which series to fetch.
    #[arg(long, value_enum, default_value_t = FetchMode::Both)]
    pub mode: FetchMode,

    /// Restrict to these states (repeatable). Defaults to all 13.
    #[arg(long = "state", value_enum)]
    pub states: Vec<StateCode>,

    /// Days per request.
    #[arg(long, env = "CO2_BATCH_DAYS", default_value_t = 30)]
    pub batch_days: u32,

    #[command(flatten)]
    pub http: HttpArgs,

    #[arg(long, env = "CO2_API_BASE", default_value = crate::data::DEFAULT_BASE_URL)]
    pub api_base: String,

    #[arg(long, env = "CO2_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,
}

/// Request pacing and retry budget.
#[derive(Debug, Args, Clone)]
pub struct HttpArgs {
    /// Total requests allowed for a rate-limited batch.
    #[arg(long, env = "CO2_RETRIES", default_value_t = 5)]
    pub retries: u32,

    /// First backoff delay after a 429 without `Retry-After` (seconds).
    #[arg(long, env = "CO2_BASE_DELAY_SECS", default_value_t = 30.0)]
    pub base_delay_secs: f64,

    /// Delay before every batch request (seconds).
    #[arg(long, env = "CO2_REQUEST_DELAY_SECS", default_value_t = 1.0)]
    pub request_delay_secs: f64,

    /// Delay after every batch attempt (seconds).
    #[arg(long, env = "CO2_POST_BATCH_DELAY_SECS", default_value_t = 0.5)]
    pub post_batch_delay_secs: f64,

    /// Per-request timeout (seconds).
    #[arg(long, default_value_t = 20.0)]
    pub timeout_secs: f64,
}

#[derive(Debug, Args, Clone)]
pub struct NormalizeArgs {
    #[arg(long, env = "CO2_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,
}

/// Inputs of the dataset builder.
#[derive(Debug, Args, Clone)]
pub struct DatasetArgs {
    #[arg(long, env = "CO2_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,

    /// Which series to include.
    #[arg(long, value_enum, default_value_t = FetchMode::Both)]
    pub mode: FetchMode,

    /// Restrict to these states (repeatable). Defaults to all 13.
    #[arg(long = "state", value_enum)]
    pub states: Vec<StateCode>,

    /// Lags in rows (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,24,48,168")]
    pub lags: Vec<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Feature table to write.
    #[arg(long = "data", env = "CO2_DATASET", default_value = "data/processed/ml_dataset.csv")]
    pub output: PathBuf,
}

/// Registry location and the model entry to address.
#[derive(Debug, Args, Clone)]
pub struct RegistryArgs {
    #[arg(long, env = "CO2_REGISTRY_DIR", default_value = "mlruns")]
    pub registry_dir: PathBuf,

    #[arg(long, env = "CO2_EXPERIMENT", default_value = "co2-intensity-forecast")]
    pub experiment: String,

    #[arg(long, env = "CO2_MODEL_NAME", default_value = "co2-intensity-xgboost")]
    pub model_name: String,

    /// `latest` or a version number.
    #[arg(long, env = "CO2_MODEL_VERSION", default_value = "latest")]
    pub model_version: ModelVersion,
}

/// Booster hyperparameters.
#[derive(Debug, Args, Clone)]
pub struct BoostArgs {
    #[arg(long, default_value_t = 100)]
    pub n_estimators: usize,

    #[arg(long, default_value_t = 6)]
    pub max_depth: usize,

    #[arg(long, default_value_t = 0.1)]
    pub learning_rate: f64,

    /// Row fraction sampled per tree.
    #[arg(long, default_value_t = 0.8)]
    pub subsample: f64,

    /// Column fraction sampled per tree.
    #[arg(long, default_value_t = 0.8)]
    pub colsample: f64,

    /// L2 penalty on leaf values.
    #[arg(long, default_value_t = 1.0)]
    pub lambda: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct TrainArgs {
    #[arg(long, env = "CO2_DATASET", default_value = "data/processed/ml_dataset.csv")]
    pub data: PathBuf,

    /// Fraction of rows (the most recent) held out for testing.
    #[arg(long, default_value_t = 0.2)]
    pub test_size: f64,

    /// Number of cross-validation folds.
    #[arg(long, default_value_t = 5)]
    pub cv_splits: usize,

    #[command(flatten)]
    pub boost: BoostArgs,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Debug, Args, Clone)]
pub struct PredictArgs {
    #[arg(long, value_enum, default_value_t = StateCode::Bw)]
    pub state: StateCode,

    #[arg(long, value_enum, default_value_t = IntensityKind::Consumption)]
    pub intensity_type: IntensityKind,

    /// Hours of day to predict (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "6,12,18,22")]
    pub hours: Vec<u32>,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Report inputs shared by `monitor` and `pipeline`.
#[derive(Debug, Args, Clone)]
pub struct ReportArgs {
    /// Base URL of the prediction service.
    #[arg(long, env = "CO2_API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Rows taken from each end of the dataset.
    #[arg(long, default_value_t = 1000)]
    pub window: usize,

    #[arg(long, default_value_t = 5.0)]
    pub health_timeout_secs: f64,

    /// Record the report as a `model_performance` run.
    #[arg(long)]
    pub log: bool,
}

#[derive(Debug, Args, Clone)]
pub struct MonitorArgs {
    #[arg(long, env = "CO2_DATASET", default_value = "data/processed/ml_dataset.csv")]
    pub data: PathBuf,

    #[command(flatten)]
    pub report: ReportArgs,

    /// Repeat the report every N seconds.
    #[arg(long)]
    pub interval: Option<u64>,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Debug, Args, Clone)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    pub train: TrainArgs,

    #[command(flatten)]
    pub report: ReportArgs,
}
