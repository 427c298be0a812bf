//! Shared wiring for API key service tests

use std::future::Future;
use std::sync::Arc;

use crate::domain::{AccessControl, CurrentUser, IdentityProvider, ROLE_ADMIN};
use crate::infrastructure::audit::InMemoryAuditSink;
use crate::infrastructure::clock::MockClock;
use crate::infrastructure::crypto::CryptoVault;
use crate::infrastructure::identity::{
    AccessConfig, AccessGrant, StaticAccessControl, TaskLocalIdentity,
};

use super::anomaly::{AnomalyConfig, AnomalyDetector};
use super::rate_limiter::RateLimiter;
use super::repository::InMemoryApiKeyRepository;
use super::service::{ApiKeyPolicy, CreateKeyOptions, KeyLifecycleManager, LifecycleDeps};
use super::store::KeyStore;
use super::usage_tracker::UsageTracker;

/// User holding the admin role in every harness
pub const ADMIN: &str = "root";

pub struct Harness {
    pub clock: MockClock,
    pub audit: InMemoryAuditSink,
    pub repository: Arc<InMemoryApiKeyRepository>,
    pub store: Arc<KeyStore>,
    pub manager: KeyLifecycleManager,
}

impl Harness {
    pub async fn build(
        policy: ApiKeyPolicy,
        identity: Arc<dyn IdentityProvider>,
        access: Arc<dyn AccessControl>,
        clock: MockClock,
        audit: InMemoryAuditSink,
    ) -> Self {
        let repository = Arc::new(InMemoryApiKeyRepository::new());
        let store = Arc::new(KeyStore::load(repository.clone()).await.unwrap());
        let tracker = Arc::new(UsageTracker::new());
        let anomaly = Arc::new(AnomalyDetector::new(
            Arc::clone(&tracker),
            Arc::new(audit.clone()),
            AnomalyConfig::default(),
        ));

        let deps = LifecycleDeps {
            store: Arc::clone(&store),
            vault: Arc::new(CryptoVault::generate().unwrap()),
            rate_limiter: RateLimiter::new(tracker),
            anomaly,
            identity,
            access,
            audit: Arc::new(audit.clone()),
            clock: Arc::new(clock.clone()),
        };
        let manager = KeyLifecycleManager::new(deps, policy).unwrap();

        Self {
            clock,
            audit,
            repository,
            store,
            manager,
        }
    }
}

fn access_config() -> AccessConfig {
    AccessConfig {
        default_permissions: vec!["api.write".to_string()],
        grants: vec![AccessGrant {
            user_id: ADMIN.to_string(),
            roles: vec![ROLE_ADMIN.to_string()],
            permissions: vec![],
        }],
    }
}

pub async fn harness() -> Harness {
    harness_with(ApiKeyPolicy {
        key_prefix: "pk_test_".to_string(),
        ..Default::default()
    })
    .await
}

pub async fn harness_with(policy: ApiKeyPolicy) -> Harness {
    Harness::build(
        policy,
        Arc::new(TaskLocalIdentity),
        Arc::new(StaticAccessControl::new(&access_config())),
        MockClock::at_epoch_offset(1_700_000_040),
        InMemoryAuditSink::new(),
    )
    .await
}

/// Run `future` as `user` of `org-1`
pub fn as_user<F>(user: &str, future: F) -> impl Future<Output = F::Output> + use<F>
where
    F: Future,
{
    TaskLocalIdentity::scope(CurrentUser::new(user, "org-1"), future)
}

pub fn options(name: &str) -> CreateKeyOptions {
    CreateKeyOptions::named(name)
}
