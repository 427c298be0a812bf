//! API Key domain
//!
//! This module provides domain types and traits for API key management:
//! the key record, its lifecycle state machine, input validation and the
//! persistence contract.

mod entity;
mod repository;
mod validation;

#[cfg(test)]
pub(crate) use entity::fixtures;
pub use entity::{
    ApiKey, ApiKeyId, ApiKeyPatch, ApiKeyStatus, EncryptedSecret, KeyCredential, KeyState,
    KeyUsability, RateLimits, Revocation,
};
#[cfg(test)]
pub use repository::mock;
pub use repository::ApiKeyRepository;
pub use validation::{
    validate_api_key_id, validate_domain_pattern, validate_ip_pattern, validate_key_name,
    validate_tag, ApiKeyValidationError,
};
