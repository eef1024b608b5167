//! State shared by every request handler.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{DEFAULT_LAGS, RegistryConfig};
use crate::io::registry::{ModelRegistry, RegisteredModel};
use crate::models::{GradientBoostedTrees, feature_names};

/// A registered model that accepts the request layout.
#[derive(Debug)]
pub struct LoadedModel {
    pub name: String,
    pub version: u32,
    pub model: GradientBoostedTrees,
}

impl LoadedModel {
    /// Accept `registered` only if it was trained on the serving feature layout.
    pub fn from_registered(registered: RegisteredModel) -> Result<Self, String> {
        let expected = feature_names(&DEFAULT_LAGS);
        let got = &registered.artifact.feature_names;
        if *got != expected {
            return Err(format!(
                "model {} v{} was trained on features [{}], expected [{}]",
                registered.name,
                registered.version,
                got.join(", "),
                expected.join(", ")
            ));
        }
        if registered.artifact.model.n_features() != expected.len() {
            return Err(format!(
                "model {} v{} takes {} inputs, expected {}",
                registered.name,
                registered.version,
                registered.artifact.model.n_features(),
                expected.len()
            ));
        }
        Ok(Self {
            name: registered.name,
            version: registered.version,
            model: registered.artifact.model,
        })
    }
}

#[derive(Debug, Clone)]
pub enum ModelSlot {
    Loaded(Arc<LoadedModel>),
    NotLoaded { reason: String },
}

#[derive(Debug, Clone)]
pub struct ServiceContext {
    slot: ModelSlot,
}

impl ServiceContext {
    pub fn new(slot: ModelSlot) -> Self {
        Self { slot }
    }

    pub fn with_model(model: LoadedModel) -> Self {
        Self::new(ModelSlot::Loaded(Arc::new(model)))
    }

    pub fn not_loaded(reason: impl Into<String>) -> Self {
        Self::new(ModelSlot::NotLoaded { reason: reason.into() })
    }

    /// Load the configured model; any failure leaves the slot empty.
    pub fn from_registry(config: &RegistryConfig) -> Self {
        let registry = ModelRegistry::new(&config.root);
        let loaded = registry
            .load_model(&config.model_name, config.model_version)
            .map_err(|e| e.to_string())
            .and_then(LoadedModel::from_registered);
        match loaded {
            Ok(model) => {
                info!(name = %model.name, version = model.version, "model loaded");
                Self::with_model(model)
            }
            Err(reason) => {
                warn!(%reason, "serving without a model");
                Self::not_loaded(reason)
            }
        }
    }

    pub fn slot(&self) -> &ModelSlot {
        &self.slot
    }

    pub fn model(&self) -> Option<&Arc<LoadedModel>> {
        match &self.slot {
            ModelSlot::Loaded(m) => Some(m),
            ModelSlot::NotLoaded { .. } => None,
        }
    }
}
