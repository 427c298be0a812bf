//! Admin API endpoints for managing API keys

pub mod api_keys;

use axum::{
    routing::{get, patch, post},
    Router,
};

use super::state::AppState;

/// Create admin API router
pub fn create_admin_router() -> Router<AppState> {
    Router::new()
        .route(
            "/api-keys",
            get(api_keys::list_api_keys).post(api_keys::create_api_key),
        )
        .route("/api-keys/{key_id}", get(api_keys::get_api_key))
        .route("/api-keys/{key_id}/revoke", post(api_keys::revoke_api_key))
        .route("/api-keys/{key_id}/rotate", post(api_keys::rotate_api_key))
        .route(
            "/api-keys/{key_id}/metadata",
            patch(api_keys::update_api_key_metadata),
        )
}
