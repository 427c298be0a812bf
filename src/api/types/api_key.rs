//! API key request and response bodies
//!
//! Responses never carry the encrypted secret or the locator. The raw secret
//! appears only in the create and rotate responses.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ApiKey, KeyState, RateLimits};
use crate::infrastructure::api_key::{
    CreateKeyOptions, CreatedApiKey, RateLimitDecision, RatePeriod, Remaining, RotatedApiKey,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    /// Defaults to the caller
    #[serde(default)]
    pub owner_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub rate_limits: Option<RateLimits>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl From<CreateApiKeyRequest> for CreateKeyOptions {
    fn from(request: CreateApiKeyRequest) -> Self {
        Self {
            name: request.name,
            scopes: request.scopes,
            permissions: request.permissions,
            rate_limits: request.rate_limits,
            expires_at: request.expires_at,
            allowed_ips: request.allowed_ips,
            allowed_domains: request.allowed_domains,
            metadata: request.metadata,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevokeApiKeyRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMetadataRequest {
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyResponse {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub organization_id: String,
    pub status: String,
    pub key_preview: String,
    pub scopes: Vec<String>,
    pub permissions: Vec<String>,
    pub rate_limits: RateLimits,
    pub allowed_ips: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl From<&ApiKey> for ApiKeyResponse {
    fn from(key: &ApiKey) -> Self {
        let (grace_until, revoked_at, revocation_reason) = match key.state() {
            KeyState::Deprecated { grace_until, .. } => (Some(*grace_until), None, None),
            KeyState::Revoked(revocation) => (
                None,
                Some(revocation.revoked_at),
                Some(revocation.reason.clone()),
            ),
            KeyState::Active | KeyState::Expired { .. } => (None, None, None),
        };

        Self {
            id: key.id().to_string(),
            name: key.name().to_string(),
            owner_id: key.owner_id().to_string(),
            organization_id: key.organization_id().to_string(),
            status: key.status().to_string(),
            key_preview: key.key_preview().to_string(),
            scopes: key.scopes().iter().cloned().collect(),
            permissions: key.permissions().iter().cloned().collect(),
            rate_limits: *key.rate_limits(),
            allowed_ips: key.allowed_ips().iter().cloned().collect(),
            allowed_domains: key.allowed_domains().iter().cloned().collect(),
            usage_count: key.usage_count(),
            created_at: key.created_at(),
            updated_at: key.updated_at(),
            expires_at: key.expires_at(),
            last_used_at: key.last_used_at(),
            grace_until,
            revoked_at,
            revocation_reason,
            rotated_from: key.rotated_from().map(ToString::to_string),
            replaced_by: key.replaced_by().map(ToString::to_string),
            rotation_due_at: key.rotation_due_at(),
            metadata: key.metadata().clone(),
        }
    }
}

/// Returned once, at creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKeyResponse {
    #[serde(flatten)]
    pub api_key: ApiKeyResponse,
    pub secret: String,
}

impl From<CreatedApiKey> for CreatedApiKeyResponse {
    fn from(created: CreatedApiKey) -> Self {
        Self {
            api_key: ApiKeyResponse::from(&created.api_key),
            secret: created.secret.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RotatedApiKeyResponse {
    pub predecessor: ApiKeyResponse,
    pub successor: ApiKeyResponse,
    pub secret: String,
}

impl From<RotatedApiKey> for RotatedApiKeyResponse {
    fn from(rotated: RotatedApiKey) -> Self {
        Self {
            predecessor: ApiKeyResponse::from(&rotated.predecessor),
            successor: ApiKeyResponse::from(&rotated.successor),
            secret: rotated.secret.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListApiKeysResponse {
    pub api_keys: Vec<ApiKeyResponse>,
    pub total: usize,
}

impl ListApiKeysResponse {
    pub fn new(keys: &[ApiKey]) -> Self {
        let api_keys: Vec<ApiKeyResponse> = keys.iter().map(ApiKeyResponse::from).collect();
        let total = api_keys.len();

        Self { api_keys, total }
    }
}

/// Rate limit state after a request
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub limits: RateLimits,
    pub remaining: Remaining,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<RatePeriod>,
}

impl RateLimitInfo {
    pub fn new(limits: RateLimits, decision: &RateLimitDecision) -> Self {
        Self {
            limits,
            remaining: decision.remaining,
            reset_time: decision.reset_time,
            period: decision.period,
        }
    }
}
