//! Domain layer - Core business logic and entities

pub mod api_key;
pub mod audit;
pub mod clock;
pub mod error;
pub mod identity;

pub use api_key::{
    ApiKey, ApiKeyId, ApiKeyPatch, ApiKeyRepository, ApiKeyStatus, ApiKeyValidationError,
    EncryptedSecret, KeyCredential, KeyState, KeyUsability, RateLimits, Revocation,
};
pub use audit::{AuditEvent, AuditEventKind, AuditSink};
pub use clock::Clock;
pub use error::{DomainError, ErrorKind};
pub use identity::{
    AccessControl, CurrentUser, IdentityProvider, OrganizationId, UserId, PERMISSION_API_WRITE,
    ROLE_ADMIN,
};
