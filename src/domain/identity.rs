//! Identity and authorization collaborators
//!
//! The engine never defines users or roles itself. It asks an identity
//! provider who is calling and an access-control oracle what they may do.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// Permission required to issue or rotate keys
pub const PERMISSION_API_WRITE: &str = "api.write";

/// Role that may act on keys owned by other users
pub const ROLE_ADMIN: &str = "admin";

/// User identifier supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Actor recorded for transitions made by background jobs
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Organization identifier supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub organization_id: OrganizationId,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            organization_id: OrganizationId::new(organization_id),
        }
    }
}

/// Supplies ownership context for lifecycle operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The user on whose behalf the current operation runs, if any
    async fn current_user(&self) -> Option<CurrentUser>;
}

/// Yes/no authorization oracle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn has_permission(&self, user_id: &UserId, permission: &str) -> bool;

    async fn has_role(&self, user_id: &UserId, role: &str) -> bool;
}
