//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - turns them into the domain config structs
//! - runs the requested command and prints its report

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{
    BoostArgs, Command, DatasetArgs, FetchArgs, HttpArgs, MonitorArgs, NormalizeArgs, PipelineArgs, PredictArgs,
    PrepareArgs, RegistryArgs, ReportArgs, ServeArgs, TrainArgs,
};
use crate::data::{BatchFetcher, IntensityClient, ReqwestTransport, ThreadPause};
use crate::domain::{
    DatasetConfig, DateWindow, EntityKey, FetchConfig, HttpSettings, IntensityKind, MonitorConfig, RegistryConfig,
    ServeConfig, StateCode, TrainConfig,
};
use crate::error::AppError;
use crate::models::BoostParams;

pub mod pipeline;

const DEFAULT_LOG_FILTER: &str = "co2_forecast=info,tower_http=info";

/// Install the global `tracing` subscriber (stderr; `RUST_LOG` overrides).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();
}

/// Entry point for the `co2` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fetch(args) => handle_fetch(args),
        Command::Normalize(args) => handle_normalize(args),
        Command::Prepare(args) => handle_prepare(args),
        Command::Train(args) => handle_train(args),
        Command::Cv(args) => handle_cv(args),
        Command::Predict(args) => handle_predict(args),
        Command::Serve(args) => handle_serve(args),
        Command::Monitor(args) => handle_monitor(args),
        Command::Pipeline(args) => handle_pipeline(args),
    }
}

fn handle_fetch(args: FetchArgs) -> Result<(), AppError> {
    let config = fetch_config_from_args(&args)?;
    let transport = ReqwestTransport::new(config.http.timeout)
        .map_err(|e| AppError::config(format!("Failed to build HTTP client: {e}")))?;
    let client = IntensityClient::new(transport, ThreadPause, config.api_base.clone(), config.http);
    let fetcher = BatchFetcher::new(client, &config.raw_dir, config.batch_days);

    let entities = EntityKey::all_for(&config.kinds, &config.states);
    info!(entities = entities.len(), window = %config.window, "fetching");
    let outcomes = fetcher.ensure_all(&entities, &config.window);
    print!("{}", crate::report::format_fetch_summary(&outcomes));
    Ok(())
}

fn handle_normalize(args: NormalizeArgs) -> Result<(), AppError> {
    let mut rewritten = Vec::new();
    let mut checked = 0usize;
    for entity in EntityKey::all_for(&IntensityKind::ALL, &StateCode::ALL) {
        let path = args.raw_dir.join(entity.file_name());
        if !path.exists() {
            continue;
        }
        checked += 1;
        if crate::io::store::normalize_legacy(&path)? {
            rewritten.push(path);
        }
    }
    print!("{}", crate::report::format_normalize_summary(&rewritten, checked));
    Ok(())
}

fn handle_prepare(args: PrepareArgs) -> Result<(), AppError> {
    let config = dataset_config_from_args(&args.dataset, args.output.clone());
    let (table, summary) = crate::features::prepare_dataset(&config)?;
    print!("{}", crate::report::format_dataset_summary(&summary, &table, &config.output));
    Ok(())
}

fn handle_train(args: TrainArgs) -> Result<(), AppError> {
    let config = train_config_from_args(&args)?;
    let outcome = crate::fit::train_model(&config)?;
    print!("{}", crate::report::format_train_summary(&outcome));
    Ok(())
}

fn handle_cv(args: TrainArgs) -> Result<(), AppError> {
    let config = train_config_from_args(&args)?;
    let outcome = crate::fit::run_cross_validation(&config)?;
    print!("{}", crate::report::format_cv_summary(&outcome));
    Ok(())
}

fn handle_predict(args: PredictArgs) -> Result<(), AppError> {
    let registry = registry_config_from_args(&args.registry);
    let (model, predictions) =
        pipeline::sample_predictions(&registry, args.state, args.intensity_type, &args.hours)?;
    print!(
        "{}",
        crate::report::format_predictions(&model.name, model.version, args.state, args.intensity_type, &predictions)
    );
    Ok(())
}

fn handle_serve(args: ServeArgs) -> Result<(), AppError> {
    let config = ServeConfig {
        host: args.host,
        port: args.port,
        registry: registry_config_from_args(&args.registry),
    };
    crate::serve::run_server(&config)
}

fn handle_monitor(args: MonitorArgs) -> Result<(), AppError> {
    let config = monitor_config_from_args(&args.report, args.data.clone(), &args.registry, args.interval)?;
    loop {
        let report = crate::monitor::generate_report(&config);
        print!("{}", crate::report::format_monitoring_report(&report));
        if config.log_metrics {
            crate::monitor::log_report(&config, &report)?;
        }
        match config.interval {
            Some(period) => std::thread::sleep(period),
            None => return Ok(()),
        }
    }
}

fn handle_pipeline(args: PipelineArgs) -> Result<(), AppError> {
    let dataset = dataset_config_from_args(&args.dataset, args.train.data.clone());
    let train = train_config_from_args(&args.train)?;
    let monitor = monitor_config_from_args(&args.report, args.train.data.clone(), &args.train.registry, None)?;

    println!("Starting CO₂ Forecast Pipeline");
    let steps = pipeline::run_pipeline(&dataset, &train, &monitor);
    print!("{}", crate::report::format_pipeline_summary(&steps));
    Ok(())
}

fn secs(value: f64, flag: &str) -> Result<Duration, AppError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| AppError::config(format!("--{flag} must be a non-negative number of seconds, got {value}.")))
}

fn selected_states(states: &[StateCode]) -> Vec<StateCode> {
    if states.is_empty() {
        StateCode::ALL.to_vec()
    } else {
        let mut out = states.to_vec();
        out.sort();
        out.dedup();
        out
    }
}

pub fn http_settings_from_args(args: &HttpArgs) -> Result<HttpSettings, AppError> {
    Ok(HttpSettings {
        retries: args.retries,
        base_delay: secs(args.base_delay_secs, "base-delay-secs")?,
        request_delay: secs(args.request_delay_secs, "request-delay-secs")?,
        post_batch_delay: secs(args.post_batch_delay_secs, "post-batch-delay-secs")?,
        timeout: secs(args.timeout_secs, "timeout-secs")?,
    })
}

pub fn fetch_config_from_args(args: &FetchArgs) -> Result<FetchConfig, AppError> {
    let window = DateWindow::new(args.start, args.end).ok_or_else(|| {
        AppError::config(format!("Start date {} is after end date {}.", args.start, args.end))
    })?;
    if args.batch_days == 0 {
        return Err(AppError::config("--batch-days must be at least 1."));
    }
    Ok(FetchConfig {
        api_base: args.api_base.clone(),
        raw_dir: args.raw_dir.clone(),
        window,
        batch_days: args.batch_days,
        kinds: args.mode.kinds(),
        states: selected_states(&args.states),
        http: http_settings_from_args(&args.http)?,
    })
}

pub fn dataset_config_from_args(args: &DatasetArgs, output: PathBuf) -> DatasetConfig {
    let mut lags = args.lags.clone();
    lags.sort_unstable();
    lags.dedup();
    lags.retain(|&l| l > 0);
    DatasetConfig {
        raw_dir: args.raw_dir.clone(),
        output,
        states: selected_states(&args.states),
        kinds: args.mode.kinds(),
        lags,
    }
}

pub fn registry_config_from_args(args: &RegistryArgs) -> RegistryConfig {
    RegistryConfig {
        root: args.registry_dir.clone(),
        experiment: args.experiment.clone(),
        model_name: args.model_name.clone(),
        model_version: args.model_version,
    }
}

pub fn boost_params_from_args(args: &BoostArgs) -> Result<BoostParams, AppError> {
    let params = BoostParams {
        n_estimators: args.n_estimators,
        max_depth: args.max_depth,
        learning_rate: args.learning_rate,
        subsample: args.subsample,
        colsample: args.colsample,
        lambda: args.lambda,
        seed: args.seed,
        ..BoostParams::default()
    };
    params.validate()?;
    Ok(params)
}

pub fn train_config_from_args(args: &TrainArgs) -> Result<TrainConfig, AppError> {
    Ok(TrainConfig {
        dataset: args.data.clone(),
        registry: registry_config_from_args(&args.registry),
        test_size: args.test_size,
        cv_splits: args.cv_splits,
        params: boost_params_from_args(&args.boost)?,
    })
}

pub fn monitor_config_from_args(
    args: &ReportArgs,
    dataset: PathBuf,
    registry: &RegistryArgs,
    interval: Option<u64>,
) -> Result<MonitorConfig, AppError> {
    if args.window < 2 {
        return Err(AppError::config("--window must be at least 2."));
    }
    Ok(MonitorConfig {
        api_url: args.api_url.clone(),
        dataset,
        registry: registry_config_from_args(registry),
        window: args.window,
        health_timeout: secs(args.health_timeout_secs, "health-timeout-secs")?,
        log_metrics: args.log,
        interval: interval.filter(|s| *s > 0).map(Duration::from_secs),
    })
}
