//! Caller identity for the admin surface
//!
//! The upstream session layer authenticates users and forwards their identity
//! in trusted headers. Handlers run lifecycle calls inside
//! [`RequireUser::scope`] so the identity provider can see the caller.

use std::future::Future;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::api::types::ApiError;
use crate::domain::CurrentUser;
use crate::infrastructure::identity::TaskLocalIdentity;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ORGANIZATION_ID_HEADER: &str = "x-organization-id";

/// Extractor that requires an identified caller
#[derive(Debug, Clone)]
pub struct RequireUser(pub CurrentUser);

impl RequireUser {
    /// Run `future` as this caller
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        TaskLocalIdentity::scope(self.0, future).await
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Result<String, ApiError> {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(String::from)
                .ok_or_else(|| {
                    ApiError::unauthorized(format!("Missing or invalid '{}' header", name))
                })
        };

        let user_id = header(USER_ID_HEADER)?;
        let organization_id = header(ORGANIZATION_ID_HEADER)?;

        Ok(RequireUser(CurrentUser::new(user_id, organization_id)))
    }
}
