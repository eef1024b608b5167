//! Prediction service.
//!
//! Routes:
//! - `GET /` service banner
//! - `GET /health` liveness plus whether a model is loaded
//! - `GET /states` supported state codes
//! - `POST /predict` one prediction from a feature vector
//!
//! The model is resolved once at startup into a [`ServiceContext`]; handlers
//! never touch the registry.

pub mod context;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::domain::ServeConfig;
use crate::error::AppError;

pub use context::{LoadedModel, ModelSlot, ServiceContext};
pub use routes::{PredictionRequest, PredictionResponse, ServiceError};

pub fn router(ctx: ServiceContext) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/states", get(routes::states))
        .route("/predict", post(routes::predict))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(ctx))
}

/// Load the model, bind, and serve until Ctrl-C.
pub fn run_server(config: &ServeConfig) -> Result<(), AppError> {
    let ctx = ServiceContext::from_registry(&config.registry);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| AppError::config(format!("Invalid HOST:PORT '{}:{}': {e}", config.host, config.port)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::config(format!("Failed to start async runtime: {e}")))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::config(format!("Failed to bind {addr}: {e}")))?;
        info!("co2 prediction service v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

        axum::serve(listener, router(ctx))
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
                info!("shutting down");
            })
            .await
            .map_err(|e| AppError::config(format!("Server error: {e}")))
    })
}
