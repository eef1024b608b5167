//! Run configuration as understood by the pipeline.
//!
//! These are derived from CLI flags (which fall back to environment variables
//! and `.env`), so library code never reads the environment itself.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{DateWindow, IntensityKind, ModelVersion, StateCode};
use crate::models::BoostParams;

/// Settings for one `co2 fetch` run.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// API base URL; series paths are appended to it.
    pub api_base: String,
    /// Directory holding one raw store CSV per entity.
    pub raw_dir: PathBuf,
    pub window: DateWindow,
    pub batch_days: u32,
    pub kinds: Vec<IntensityKind>,
    pub states: Vec<StateCode>,
    pub http: HttpSettings,
}

/// Pacing and retry knobs for remote calls.
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    /// Total request budget for a rate-limited batch.
    pub retries: u32,
    /// First backoff delay after a 429 without a usable `Retry-After`.
    pub base_delay: Duration,
    /// Applied before every batch request.
    pub request_delay: Duration,
    /// Applied after every batch attempt, success or not.
    pub post_batch_delay: Duration,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            retries: 5,
            base_delay: Duration::from_secs(30),
            request_delay: Duration::from_secs(1),
            post_batch_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Settings for `co2 prepare`.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub raw_dir: PathBuf,
    pub output: PathBuf,
    pub states: Vec<StateCode>,
    pub kinds: Vec<IntensityKind>,
    pub lags: Vec<usize>,
}

/// Where the model registry lives and which entry to address.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub root: PathBuf,
    pub experiment: String,
    pub model_name: String,
    pub model_version: ModelVersion,
}

/// Settings for `co2 train` and `co2 cv`.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub dataset: PathBuf,
    pub registry: RegistryConfig,
    /// Fraction of rows (taken from the end) held out for testing.
    pub test_size: f64,
    pub cv_splits: usize,
    pub params: BoostParams,
}

/// Settings for `co2 serve`.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub registry: RegistryConfig,
}

/// Settings for `co2 monitor`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base URL of a running prediction service.
    pub api_url: String,
    pub dataset: PathBuf,
    pub registry: RegistryConfig,
    /// Rows taken from each end of the dataset for drift and error checks.
    pub window: usize,
    pub health_timeout: Duration,
    /// Record numeric report values as a tracking run.
    pub log_metrics: bool,
    /// Repeat the report on this period; `None` runs once.
    pub interval: Option<Duration>,
}
