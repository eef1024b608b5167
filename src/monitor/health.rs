//! Prediction service health probe.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// `/health` answered 200.
    Healthy { status_code: u16, response_time: Duration },
    /// `/health` answered with another status.
    Unhealthy { status_code: u16, response_time: Duration },
    /// No HTTP answer at all.
    Error { message: String },
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy { .. } => "healthy",
            HealthStatus::Unhealthy { .. } => "unhealthy",
            HealthStatus::Error { .. } => "error",
        }
    }

    pub fn response_time(&self) -> Option<Duration> {
        match self {
            HealthStatus::Healthy { response_time, .. } | HealthStatus::Unhealthy { response_time, .. } => {
                Some(*response_time)
            }
            HealthStatus::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub url: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

/// `GET <base_url>/health` with a bounded timeout.
pub fn check_api_health(base_url: &str, timeout: Duration) -> HealthCheck {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let started = Instant::now();

    let status = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Err(e) => HealthStatus::Error {
            message: format!("failed to build HTTP client: {e}"),
        },
        Ok(client) => match client.get(&url).send() {
            Ok(resp) => {
                let status_code = resp.status().as_u16();
                let response_time = started.elapsed();
                if status_code == 200 {
                    HealthStatus::Healthy {
                        status_code,
                        response_time,
                    }
                } else {
                    HealthStatus::Unhealthy {
                        status_code,
                        response_time,
                    }
                }
            }
            Err(e) => HealthStatus::Error { message: e.to_string() },
        },
    };
    debug!(%url, status = status.label(), "health probe");

    HealthCheck {
        url,
        status,
        timestamp: Utc::now(),
    }
}
