//! Endpoints for callers holding an API key

use axum::{routing::get, Router};
use serde::Serialize;

use super::middleware::{AuthenticatedKey, RequireApiKey};
use super::state::AppState;
use super::types::{ApiKeyResponse, Json, RateLimitInfo};

#[derive(Debug, Serialize)]
pub struct KeyInfoResponse {
    pub api_key: ApiKeyResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

/// GET /v1/key
///
/// Describes the presented key. Every call counts against its rate limits.
pub async fn current_key(
    RequireApiKey(AuthenticatedKey { key, rate_limit }): RequireApiKey,
) -> Json<KeyInfoResponse> {
    let rate_limit = rate_limit
        .as_ref()
        .map(|decision| RateLimitInfo::new(*key.rate_limits(), decision));

    Json(KeyInfoResponse {
        api_key: ApiKeyResponse::from(&key),
        rate_limit,
    })
}

/// Create v1 API router
pub fn create_v1_router() -> Router<AppState> {
    Router::new().route("/key", get(current_key))
}
