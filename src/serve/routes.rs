//! HTTP route handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::domain::{CalendarFields, INTENSITY_UNIT, IntensityKind, StateCode};
use crate::models::encode_features;
use crate::serve::context::ServiceContext;

pub type SharedContext = Arc<ServiceContext>;

/// Failures rendered as `{"detail": ...}` with a matching status code.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid type: {0}")]
    InvalidKind(String),
    #[error("Hour must be 0-23")]
    InvalidHour,
    #[error("{0}")]
    BadBody(String),
    #[error("Model not loaded")]
    ModelNotLoaded,
    #[error("Prediction failed: {0}")]
    Prediction(String),
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidState(_) | ServiceError::InvalidKind(_) | ServiceError::InvalidHour => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::BadBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Prediction(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Request body for `POST /predict`; omitted fields take these defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictionRequest {
    pub state: String,
    pub intensity_type: String,
    pub hour: i64,
    /// Monday = 0.
    pub day_of_week: u32,
    pub month: u32,
    pub quarter: u32,
    pub is_weekend: bool,
    pub value_lag_1: f64,
    pub value_lag_2: f64,
    pub value_lag_3: f64,
    pub value_lag_24: f64,
    pub value_lag_48: f64,
    pub value_lag_168: f64,
}

impl Default for PredictionRequest {
    fn default() -> Self {
        Self {
            state: "BW".to_string(),
            intensity_type: "consumption".to_string(),
            hour: 12,
            day_of_week: 0,
            month: 8,
            quarter: 3,
            is_weekend: false,
            value_lag_1: 150.0,
            value_lag_2: 148.0,
            value_lag_3: 145.0,
            value_lag_24: 140.0,
            value_lag_48: 135.0,
            value_lag_168: 142.0,
        }
    }
}

/// A request that passed validation, ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRequest {
    pub state: StateCode,
    pub kind: IntensityKind,
    pub calendar: CalendarFields,
    pub lags: [f64; 6],
}

impl PredictionRequest {
    pub fn validate(&self) -> Result<ValidRequest, ServiceError> {
        let state = StateCode::from_code(&self.state).ok_or_else(|| ServiceError::InvalidState(self.state.clone()))?;
        let kind = IntensityKind::from_name(&self.intensity_type)
            .ok_or_else(|| ServiceError::InvalidKind(self.intensity_type.clone()))?;
        let hour = u32::try_from(self.hour)
            .ok()
            .filter(|h| *h <= 23)
            .ok_or(ServiceError::InvalidHour)?;
        Ok(ValidRequest {
            state,
            kind,
            calendar: CalendarFields {
                hour,
                day_of_week: self.day_of_week,
                month: self.month,
                quarter: self.quarter,
                is_weekend: self.is_weekend,
            },
            lags: [
                self.value_lag_1,
                self.value_lag_2,
                self.value_lag_3,
                self.value_lag_24,
                self.value_lag_48,
                self.value_lag_168,
            ],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResponse {
    pub prediction: f64,
    pub unit: String,
    pub state: String,
    pub intensity_type: String,
    pub timestamp: String,
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "CO₂ Intensity Forecast API",
        "status": "running",
    }))
}

pub async fn health(State(ctx): State<SharedContext>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "model_loaded": ctx.model().is_some(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn states() -> Json<serde_json::Value> {
    let codes: Vec<&str> = StateCode::ALL.iter().map(|s| s.code()).collect();
    Json(json!({ "states": codes }))
}

pub async fn predict(
    State(ctx): State<SharedContext>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ServiceError> {
    let Json(request) = payload.map_err(|e| ServiceError::BadBody(e.body_text()))?;
    let valid = request.validate()?;
    let loaded = ctx.model().ok_or(ServiceError::ModelNotLoaded)?;

    let features = encode_features(valid.state, valid.kind, &valid.calendar, &valid.lags);
    let prediction = loaded.model.predict_one(&features);
    if !prediction.is_finite() {
        return Err(ServiceError::Prediction("model returned a non-finite value".to_string()));
    }
    debug!(state = %valid.state, kind = valid.kind.as_str(), prediction, "prediction served");

    Ok(Json(PredictionResponse {
        prediction,
        unit: INTENSITY_UNIT.to_string(),
        state: valid.state.code().to_string(),
        intensity_type: valid.kind.as_str().to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}
