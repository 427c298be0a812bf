//! Health check endpoints for Kubernetes probes

use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use super::state::AppState;
use crate::api::types::Json;

const WRITER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<HealthCheck>>,
}

#[derive(Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

/// Returns 200 while the process is serving
pub async fn health_check() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: None,
    };

    (StatusCode::OK, Json(response))
}

pub async fn live_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Ready when the usage writer drains within the timeout
pub async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let check = check_key_store(&state).await;
    let status = check.status;

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: Some(vec![check]),
    };

    let status_code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

async fn check_key_store(state: &AppState) -> HealthCheck {
    let start = Instant::now();
    let store = state.manager.store();

    let (status, message) = match tokio::time::timeout(WRITER_TIMEOUT, store.sync()).await {
        Ok(()) => (
            HealthStatus::Healthy,
            format!("{} keys loaded", store.len()),
        ),
        Err(_) => (
            HealthStatus::Unhealthy,
            "Usage writer is not draining".to_string(),
        ),
    };

    HealthCheck {
        name: "key_store".to_string(),
        status,
        message: Some(message),
        latency_ms: start.elapsed().as_millis() as u64,
    }
}
