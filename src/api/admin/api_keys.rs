//! API key management admin endpoints

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::debug;

use crate::api::middleware::RequireUser;
use crate::api::state::AppState;
use crate::api::types::{
    ApiError, ApiKeyResponse, CreateApiKeyRequest, CreatedApiKeyResponse, Json,
    ListApiKeysResponse, RevokeApiKeyRequest, RotatedApiKeyResponse, UpdateMetadataRequest,
};
use crate::domain::{ApiKeyId, UserId};

const DEFAULT_REVOCATION_REASON: &str = "Revoked by user";

#[derive(Debug, Default, Deserialize)]
pub struct ListApiKeysQuery {
    /// Defaults to the caller
    pub owner_id: Option<String>,
}

fn parse_key_id(key_id: String) -> Result<ApiKeyId, ApiError> {
    ApiKeyId::new(key_id).map_err(|e| ApiError::bad_request(e.to_string()))
}

/// The revoke body is optional
fn revocation_reason(body: &[u8]) -> Result<String, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DEFAULT_REVOCATION_REASON.to_string());
    }

    let request: RevokeApiKeyRequest = serde_json::from_slice(body).map_err(|e| {
        ApiError::bad_request(format!("Invalid JSON data: {}", e)).with_code("json_parse_error")
    })?;

    Ok(request
        .reason
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_REVOCATION_REASON.to_string()))
}

/// GET /admin/api-keys
pub async fn list_api_keys(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Query(query): Query<ListApiKeysQuery>,
) -> Result<Json<ListApiKeysResponse>, ApiError> {
    let owner_id = query.owner_id.map(UserId::new).unwrap_or_else(|| user.id.clone());
    debug!(caller = %user.id, owner_id = %owner_id, "Listing API keys");

    let keys = RequireUser(user)
        .scope(state.manager.list_keys(&owner_id))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ListApiKeysResponse::new(&keys)))
}

/// POST /admin/api-keys
pub async fn create_api_key(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), ApiError> {
    let owner_id = request
        .owner_id
        .clone()
        .map(UserId::new)
        .unwrap_or_else(|| user.id.clone());
    debug!(caller = %user.id, owner_id = %owner_id, name = %request.name, "Creating API key");

    let created = RequireUser(user)
        .scope(state.manager.create_key(&owner_id, request.into()))
        .await
        .map_err(ApiError::from)?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// GET /admin/api-keys/{key_id}
pub async fn get_api_key(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(key_id): Path<String>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let key_id = parse_key_id(key_id)?;

    let key = RequireUser(user)
        .scope(state.manager.get_key(&key_id))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ApiKeyResponse::from(&key)))
}

/// POST /admin/api-keys/{key_id}/revoke
pub async fn revoke_api_key(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(key_id): Path<String>,
    body: Bytes,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let key_id = parse_key_id(key_id)?;
    let reason = revocation_reason(&body)?;
    debug!(caller = %user.id, key_id = %key_id, "Revoking API key");

    let key = RequireUser(user)
        .scope(state.manager.revoke_key(&key_id, &reason))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ApiKeyResponse::from(&key)))
}

/// POST /admin/api-keys/{key_id}/rotate
pub async fn rotate_api_key(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(key_id): Path<String>,
) -> Result<Json<RotatedApiKeyResponse>, ApiError> {
    let key_id = parse_key_id(key_id)?;
    debug!(caller = %user.id, key_id = %key_id, "Rotating API key");

    let rotated = RequireUser(user)
        .scope(state.manager.rotate_key(&key_id))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(rotated.into()))
}

/// PATCH /admin/api-keys/{key_id}/metadata
pub async fn update_api_key_metadata(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(key_id): Path<String>,
    Json(request): Json<UpdateMetadataRequest>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let key_id = parse_key_id(key_id)?;

    let key = RequireUser(user)
        .scope(state.manager.update_metadata(&key_id, request.metadata))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ApiKeyResponse::from(&key)))
}
