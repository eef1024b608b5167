//! File-backed tracking store and model registry.
//!
//! Layout under the registry root:
//!
//! ```text
//! runs/<experiment>/<run_id>.json
//! models/<name>/<version>/model.json
//! models/<name>/<version>/run.json
//! ```
//!
//! Versions are positive integers allocated by creating the next version
//! directory, so two concurrent registrations never share a version.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::ModelVersion;
use crate::error::AppError;
use crate::io::atomic::replace_file;
use crate::models::GradientBoostedTrees;

const MODEL_FILE: &str = "model.json";
const RUN_FILE: &str = "run.json";

/// A trained model plus the input layout it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub lags: Vec<usize>,
    pub trained_at: DateTime<Utc>,
    pub model: GradientBoostedTrees,
}

/// Params and metrics from one tracked run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub experiment: String,
    pub run_id: String,
    pub run_name: String,
    pub started_at: DateTime<Utc>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

impl RunRecord {
    pub fn new(experiment: &str, run_name: &str) -> Self {
        let started_at = Utc::now();
        let suffix: u32 = rand::thread_rng().r#gen();
        Self {
            experiment: experiment.to_string(),
            run_id: format!("{}-{suffix:08x}", started_at.format("%Y%m%dT%H%M%S%.3f")),
            run_name: run_name.to_string(),
            started_at,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn log_param(&mut self, key: impl Into<String>, value: impl ToString) {
        self.params.insert(key.into(), value.to_string());
    }

    /// Record a metric. Non-finite values are dropped (JSON has no NaN).
    pub fn log_metric(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        if value.is_finite() {
            self.metrics.insert(key, value);
        } else {
            warn!(metric = %key, "dropping non-finite metric");
        }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

/// A model loaded back from the registry.
#[derive(Debug, Clone)]
pub struct RegisteredModel {
    pub name: String,
    pub version: u32,
    pub artifact: ModelArtifact,
    pub run: Option<RunRecord>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join("models").join(name)
    }

    fn run_dir(&self, experiment: &str) -> PathBuf {
        self.root.join("runs").join(experiment)
    }

    /// Persist a run record under its experiment.
    pub fn log_run(&self, run: &RunRecord) -> Result<PathBuf, AppError> {
        let path = self.run_dir(&run.experiment).join(format!("{}.json", run.run_id));
        write_json(&path, run)?;
        info!(experiment = %run.experiment, run_id = %run.run_id, "run logged");
        Ok(path)
    }

    /// All runs of an experiment, oldest first.
    pub fn list_runs(&self, experiment: &str) -> Result<Vec<RunRecord>, AppError> {
        let dir = self.run_dir(experiment);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir)
            .map_err(|e| AppError::model(format!("Failed to list runs in '{}': {e}", dir.display())))?;

        let mut runs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<RunRecord>(&path) {
                Ok(run) => runs.push(run),
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable run"),
            }
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    /// Registered versions of `name`, ascending. Unknown names have none.
    pub fn versions(&self, name: &str) -> Result<Vec<u32>, AppError> {
        let dir = self.model_dir(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir)
            .map_err(|e| AppError::model(format!("Failed to list versions in '{}': {e}", dir.display())))?;
        let mut versions: Vec<u32> = entries
            .flatten()
            .filter(|e| e.path().join(MODEL_FILE).is_file())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Store `artifact` as the next version of `name`, alongside its run record.
    pub fn register_model(&self, name: &str, artifact: &ModelArtifact, run: &RunRecord) -> Result<u32, AppError> {
        let dir = self.model_dir(name);
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::model(format!("Failed to create '{}': {e}", dir.display())))?;

        let mut version = highest_version_dir(&dir)? + 1;
        let version_dir = loop {
            let candidate = dir.join(version.to_string());
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => version += 1,
                Err(e) => {
                    return Err(AppError::model(format!(
                        "Failed to create '{}': {e}",
                        candidate.display()
                    )));
                }
            }
        };

        write_json(&version_dir.join(RUN_FILE), run)?;
        write_json(&version_dir.join(MODEL_FILE), artifact)?;
        self.log_run(run)?;
        info!(name, version, "model registered");
        Ok(version)
    }

    pub fn resolve_version(&self, name: &str, version: ModelVersion) -> Result<u32, AppError> {
        let versions = self.versions(name)?;
        match version {
            ModelVersion::Latest => versions
                .last()
                .copied()
                .ok_or_else(|| AppError::model(format!("No registered versions of model '{name}'."))),
            ModelVersion::Number(n) if versions.contains(&n) => Ok(n),
            ModelVersion::Number(n) => Err(AppError::model(format!("Model '{name}' has no version {n}."))),
        }
    }

    pub fn load_model(&self, name: &str, version: ModelVersion) -> Result<RegisteredModel, AppError> {
        let version = self.resolve_version(name, version)?;
        let dir = self.model_dir(name).join(version.to_string());
        let artifact: ModelArtifact = read_json(&dir.join(MODEL_FILE))?;
        let run_path = dir.join(RUN_FILE);
        let run = if run_path.exists() { Some(read_json(&run_path)?) } else { None };
        Ok(RegisteredModel {
            name: name.to_string(),
            version,
            artifact,
            run,
        })
    }
}

fn highest_version_dir(dir: &Path) -> Result<u32, AppError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::model(format!("Failed to list '{}': {e}", dir.display())))?;
    Ok(entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
        .max()
        .unwrap_or(0))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    replace_file(path, |out| {
        serde_json::to_writer_pretty(out, value)
            .map_err(|e| AppError::model(format!("Failed to write '{}': {e}", path.display())))
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::model(format!("Failed to open '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::model(format!("Failed to parse '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use nalgebra::DMatrix;

    use super::*;
    use crate::models::{BoostParams, Regressor};

    fn artifact() -> ModelArtifact {
        let mut model = GradientBoostedTrees::new(BoostParams {
            n_estimators: 3,
            ..BoostParams::default()
        });
        let x = DMatrix::from_fn(20, 2, |i, j| (i * (j + 1)) as f64);
        let y: Vec<f64> = (0..20).map(|i| i as f64 * 2.0).collect();
        model.fit(&x, &y).unwrap();
        ModelArtifact {
            feature_names: vec!["a".into(), "b".into()],
            lags: vec![],
            trained_at: Utc::now(),
            model,
        }
    }

    #[test]
    fn versions_increment_and_latest_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        assert!(registry.versions("m").unwrap().is_empty());
        assert!(registry.load_model("m", ModelVersion::Latest).is_err());

        let mut run = RunRecord::new("exp", "train");
        run.log_param("max_depth", 6);
        run.log_metric("test_mae", 12.5);
        let art = artifact();
        assert_eq!(registry.register_model("m", &art, &run).unwrap(), 1);
        assert_eq!(registry.register_model("m", &art, &run).unwrap(), 2);

        let loaded = registry.load_model("m", ModelVersion::Latest).unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.artifact, art);
        assert_eq!(loaded.run.unwrap().metric("test_mae"), Some(12.5));

        assert_eq!(registry.load_model("m", ModelVersion::Number(1)).unwrap().version, 1);
        assert!(registry.load_model("m", ModelVersion::Number(9)).is_err());
    }

    #[test]
    fn runs_are_listed_per_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        let mut run = RunRecord::new("monitoring", "model_performance");
        run.log_metric("mae", 3.0);
        run.log_metric("mape", f64::NAN);
        registry.log_run(&run).unwrap();

        let runs = registry.list_runs("monitoring").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].metrics.len(), 1);
        assert!(registry.list_runs("other").unwrap().is_empty());
    }
}
