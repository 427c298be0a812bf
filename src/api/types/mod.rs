//! Request and response types shared by the HTTP handlers

pub mod api_key;
pub mod error;
pub mod json;

pub use api_key::{
    ApiKeyResponse, CreateApiKeyRequest, CreatedApiKeyResponse, ListApiKeysResponse,
    RateLimitInfo, RevokeApiKeyRequest, RotatedApiKeyResponse, UpdateMetadataRequest,
};
pub use error::{ApiError, ApiErrorResponse, ApiErrorType};
pub use json::Json;
