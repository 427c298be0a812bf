//! Identity and access-control adapters
//!
//! `TaskLocalIdentity` exposes the caller established by the HTTP layer to the
//! lifecycle manager; `StaticAccessControl` answers RBAC questions from
//! configured grants.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{AccessControl, CurrentUser, IdentityProvider, UserId, ROLE_ADMIN};

tokio::task_local! {
    static CURRENT_USER: CurrentUser;
}

/// Identity provider reading the caller bound to the current task
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalIdentity;

impl TaskLocalIdentity {
    /// Run `future` with `user` as the current caller
    pub async fn scope<F>(user: CurrentUser, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT_USER.scope(user, future).await
    }
}

#[async_trait]
impl IdentityProvider for TaskLocalIdentity {
    async fn current_user(&self) -> Option<CurrentUser> {
        CURRENT_USER.try_with(Clone::clone).ok()
    }
}

/// A configured grant for one user
#[derive(Debug, Clone, Deserialize)]
pub struct AccessGrant {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Static RBAC configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    /// Permissions every identified user holds
    #[serde(default)]
    pub default_permissions: Vec<String>,
    #[serde(default)]
    pub grants: Vec<AccessGrant>,
}

#[derive(Debug, Default)]
struct Grants {
    roles: HashSet<String>,
    permissions: HashSet<String>,
}

/// Access control backed by configuration
///
/// The admin role implies every permission.
#[derive(Debug, Default)]
pub struct StaticAccessControl {
    default_permissions: HashSet<String>,
    grants: HashMap<String, Grants>,
}

impl StaticAccessControl {
    pub fn new(config: &AccessConfig) -> Self {
        let mut grants: HashMap<String, Grants> = HashMap::new();

        for grant in &config.grants {
            let entry = grants.entry(grant.user_id.clone()).or_default();
            entry.roles.extend(grant.roles.iter().cloned());
            entry.permissions.extend(grant.permissions.iter().cloned());
        }

        Self {
            default_permissions: config.default_permissions.iter().cloned().collect(),
            grants,
        }
    }
}

#[async_trait]
impl AccessControl for StaticAccessControl {
    async fn has_permission(&self, user_id: &UserId, permission: &str) -> bool {
        if self.default_permissions.contains(permission) {
            return true;
        }

        self.grants.get(user_id.as_str()).is_some_and(|grants| {
            grants.permissions.contains(permission) || grants.roles.contains(ROLE_ADMIN)
        })
    }

    async fn has_role(&self, user_id: &UserId, role: &str) -> bool {
        self.grants
            .get(user_id.as_str())
            .is_some_and(|grants| grants.roles.contains(role))
    }
}
