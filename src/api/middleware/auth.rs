//! API key authentication
//!
//! Maps the validation pipeline's structured result to an HTTP outcome:
//! unknown, inactive or expired keys are 401, allowlist failures 403 and
//! rate limiting 429.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::ApiKey;
use crate::infrastructure::api_key::{
    RateLimitDecision, RequestContext, ValidationFailure, ValidationResult,
};

/// A key that passed every validation check
#[derive(Debug, Clone)]
pub struct AuthenticatedKey {
    pub key: ApiKey,
    pub rate_limit: Option<RateLimitDecision>,
}

/// Extractor that requires a valid API key
///
/// Reads `Authorization: Bearer <key>` or `X-API-Key: <key>`.
#[derive(Debug, Clone)]
pub struct RequireApiKey(pub AuthenticatedKey);

impl FromRequestParts<AppState> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = extract_api_key_from_headers(&parts.headers)?;
        let context = request_context(parts);

        let result = state.manager.validate(&secret, &context).await;

        match result {
            ValidationResult {
                valid: true,
                key: Some(key),
                rate_limit,
                ..
            } => Ok(RequireApiKey(AuthenticatedKey { key, rate_limit })),
            rejected => {
                debug!(reason = rejected.reason, "Rejected API key");
                Err(rejection(&rejected, state))
            }
        }
    }
}

fn rejection(result: &ValidationResult, state: &AppState) -> ApiError {
    let failure = result.failure.unwrap_or(ValidationFailure::InvalidKey);
    let message = failure.reason();
    let code = failure.kind().as_str();

    match failure {
        ValidationFailure::InvalidKey | ValidationFailure::KeyExpired => {
            ApiError::unauthorized(message).with_code(code)
        }
        ValidationFailure::IpNotAllowed | ValidationFailure::DomainNotAllowed => {
            ApiError::forbidden(message).with_code(code)
        }
        ValidationFailure::RateLimitExceeded => {
            let error = ApiError::rate_limited(message).with_code(code);

            match result.rate_limit.as_ref().and_then(|d| d.reset_time) {
                Some(reset) => {
                    let wait = reset - state.manager.clock().now();
                    error.with_retry_after(wait.num_seconds() + 1)
                }
                None => error,
            }
        }
    }
}

fn extract_api_key_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid Authorization header encoding"))?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            return Ok(token.trim().to_string());
        }
    }

    if let Some(api_key_header) = headers.get("x-api-key") {
        let key = api_key_header
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid X-API-Key header encoding"))?;

        return Ok(key.trim().to_string());
    }

    Err(ApiError::unauthorized(
        "API key required. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header",
    ))
}

/// Build the validation context of an inbound request
///
/// The client IP is the first `X-Forwarded-For` hop, then `X-Real-IP`, then
/// the socket peer. The origin is `Origin`, falling back to `Referer`.
pub fn request_context(parts: &Parts) -> RequestContext {
    let header_value = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let ip = header_value("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(|hop| hop.trim().to_string())
        .or_else(|| header_value("x-real-ip").map(String::from))
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

    let origin = header_value(header::ORIGIN.as_str())
        .or_else(|| header_value(header::REFERER.as_str()));

    let mut context = RequestContext::new()
        .with_endpoint(parts.uri.path())
        .with_method(parts.method.as_str());
    context.ip = ip;
    context.origin = origin.map(String::from);
    context
}
