use serde::Serialize;
use thiserror::Error;

use super::api_key::{ApiKeyStatus, ApiKeyValidationError};

/// Stable, machine-readable error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    QuotaExceeded,
    KeyNotFound,
    InvalidKey,
    KeyExpired,
    IpNotAllowed,
    DomainNotAllowed,
    RateLimitExceeded,
    DecryptionFailure,
    StorageFailure,
    Validation,
    InvalidTransition,
    Conflict,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::QuotaExceeded => "quota_exceeded",
            Self::KeyNotFound => "key_not_found",
            Self::InvalidKey => "invalid_key",
            Self::KeyExpired => "key_expired",
            Self::IpNotAllowed => "ip_not_allowed",
            Self::DomainNotAllowed => "domain_not_allowed",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::DecryptionFailure => "decryption_failure",
            Self::StorageFailure => "storage_failure",
            Self::Validation => "validation",
            Self::InvalidTransition => "invalid_transition",
            Self::Conflict => "conflict",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Key not found: {message}")]
    KeyNotFound { message: String },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    #[error("Key expired: {message}")]
    KeyExpired { message: String },

    #[error("IP not allowed: {message}")]
    IpNotAllowed { message: String },

    #[error("Domain not allowed: {message}")]
    DomainNotAllowed { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    #[error("Decryption failure: {message}")]
    DecryptionFailure { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: ApiKeyStatus, to: ApiKeyStatus },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
        }
    }

    pub fn key_not_found(message: impl Into<String>) -> Self {
        Self::KeyNotFound {
            message: message.into(),
        }
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    pub fn key_expired(message: impl Into<String>) -> Self {
        Self::KeyExpired {
            message: message.into(),
        }
    }

    pub fn ip_not_allowed(message: impl Into<String>) -> Self {
        Self::IpNotAllowed {
            message: message.into(),
        }
    }

    pub fn domain_not_allowed(message: impl Into<String>) -> Self {
        Self::DomainNotAllowed {
            message: message.into(),
        }
    }

    pub fn rate_limit_exceeded(message: impl Into<String>) -> Self {
        Self::RateLimitExceeded {
            message: message.into(),
        }
    }

    pub fn decryption_failure(message: impl Into<String>) -> Self {
        Self::DecryptionFailure {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_transition(from: ApiKeyStatus, to: ApiKeyStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::KeyExpired { .. } => ErrorKind::KeyExpired,
            Self::IpNotAllowed { .. } => ErrorKind::IpNotAllowed,
            Self::DomainNotAllowed { .. } => ErrorKind::DomainNotAllowed,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::DecryptionFailure { .. } => ErrorKind::DecryptionFailure,
            Self::Storage { .. } => ErrorKind::StorageFailure,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<ApiKeyValidationError> for DomainError {
    fn from(err: ApiKeyValidationError) -> Self {
        Self::validation(err.to_string())
    }
}
