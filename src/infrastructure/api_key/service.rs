//! API key lifecycle service
//!
//! Orchestrates creation, revocation, rotation and metadata updates, and
//! fronts the validation pipeline. Authorization questions go to the
//! identity and access-control collaborators; persistence goes through the
//! key store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::domain::api_key::{validate_domain_pattern, validate_ip_pattern, validate_key_name, validate_tag};
use crate::domain::{
    AccessControl, ApiKey, ApiKeyId, ApiKeyPatch, ApiKeyStatus, AuditEvent, AuditEventKind,
    AuditSink, Clock, CurrentUser, DomainError, IdentityProvider, KeyCredential, KeyState,
    KeyUsability, RateLimits, Revocation, UserId, PERMISSION_API_WRITE, ROLE_ADMIN,
};
use crate::infrastructure::crypto::CryptoVault;
use crate::infrastructure::observability::record_lifecycle;

use super::anomaly::AnomalyDetector;
use super::generator::ApiKeyGenerator;
use super::rate_limiter::RateLimiter;
use super::store::KeyStore;
use super::validator::{KeyValidator, RequestContext, ValidationResult};

/// Issuance policy
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyPolicy {
    /// Fixed prefix of every raw secret
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Live (`Active` or `Deprecated`) keys allowed per owner
    #[serde(default = "default_max_keys_per_user")]
    pub max_keys_per_user: usize,
    /// How long a rotated-out key keeps working
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: u32,
    #[serde(default)]
    pub default_rate_limits: RateLimits,
}

fn default_key_prefix() -> String {
    "pk_live_".to_string()
}

fn default_max_keys_per_user() -> usize {
    10
}

fn default_grace_period_hours() -> u32 {
    24
}

impl Default for ApiKeyPolicy {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            max_keys_per_user: default_max_keys_per_user(),
            grace_period_hours: default_grace_period_hours(),
            default_rate_limits: RateLimits::default(),
        }
    }
}

impl ApiKeyPolicy {
    pub fn grace_period(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.grace_period_hours))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.key_prefix.is_empty() {
            return Err(DomainError::configuration("Key prefix cannot be empty"));
        }
        if self.max_keys_per_user == 0 {
            return Err(DomainError::configuration(
                "max_keys_per_user must be at least 1",
            ));
        }
        self.default_rate_limits.validate()?;
        Ok(())
    }
}

/// Options for a new key
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateKeyOptions {
    pub name: String,
    pub scopes: Vec<String>,
    pub permissions: Vec<String>,
    pub rate_limits: Option<RateLimits>,
    pub expires_at: Option<DateTime<Utc>>,
    pub allowed_ips: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl CreateKeyOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        validate_key_name(&self.name)?;

        for tag in self.scopes.iter().chain(&self.permissions) {
            validate_tag(tag)?;
        }
        for pattern in &self.allowed_ips {
            validate_ip_pattern(pattern)?;
        }
        for pattern in &self.allowed_domains {
            validate_domain_pattern(pattern)?;
        }
        if let Some(limits) = &self.rate_limits {
            limits.validate()?;
        }
        if self.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(DomainError::validation("Expiration must be in the future"));
        }

        Ok(())
    }
}

/// A freshly issued key and its raw secret
///
/// The secret exists only in this value; it is wiped when dropped.
pub struct CreatedApiKey {
    pub api_key: ApiKey,
    pub secret: Zeroizing<String>,
}

impl std::fmt::Debug for CreatedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedApiKey")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Result of a rotation: the deprecated predecessor and its successor
pub struct RotatedApiKey {
    pub predecessor: ApiKey,
    pub successor: ApiKey,
    pub secret: Zeroizing<String>,
}

impl std::fmt::Debug for RotatedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatedApiKey")
            .field("predecessor", &self.predecessor.id())
            .field("successor", &self.successor)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Collaborators of the lifecycle manager
pub struct LifecycleDeps {
    pub store: Arc<KeyStore>,
    pub vault: Arc<CryptoVault>,
    pub rate_limiter: RateLimiter,
    pub anomaly: Arc<AnomalyDetector>,
    pub identity: Arc<dyn IdentityProvider>,
    pub access: Arc<dyn AccessControl>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

/// Top-level API key service
pub struct KeyLifecycleManager {
    store: Arc<KeyStore>,
    vault: Arc<CryptoVault>,
    generator: ApiKeyGenerator,
    rate_limiter: RateLimiter,
    anomaly: Arc<AnomalyDetector>,
    validator: KeyValidator,
    identity: Arc<dyn IdentityProvider>,
    access: Arc<dyn AccessControl>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: ApiKeyPolicy,
}

impl std::fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("keys", &self.store.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl KeyLifecycleManager {
    /// Create a new lifecycle manager
    pub fn new(deps: LifecycleDeps, policy: ApiKeyPolicy) -> Result<Self, DomainError> {
        policy.validate()?;

        let generator = ApiKeyGenerator::new(policy.key_prefix.clone());
        let validator = KeyValidator::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.vault),
            generator.clone(),
            deps.rate_limiter.clone(),
            Arc::clone(&deps.anomaly),
            Arc::clone(&deps.audit),
            Arc::clone(&deps.clock),
        );

        Ok(Self {
            store: deps.store,
            vault: deps.vault,
            generator,
            rate_limiter: deps.rate_limiter,
            anomaly: deps.anomaly,
            validator,
            identity: deps.identity,
            access: deps.access,
            audit: deps.audit,
            clock: deps.clock,
            policy,
        })
    }

    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub fn anomaly(&self) -> &Arc<AnomalyDetector> {
        &self.anomaly
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policy(&self) -> &ApiKeyPolicy {
        &self.policy
    }

    /// Issue a new key for `owner_id`
    ///
    /// The caller needs `api.write`; issuing for someone else also needs the
    /// admin role.
    pub async fn create_key(
        &self,
        owner_id: &UserId,
        options: CreateKeyOptions,
    ) -> Result<CreatedApiKey, DomainError> {
        let actor = self.actor().await?;
        self.require_permission(&actor, PERMISSION_API_WRITE).await?;
        self.require_owner_or_admin(&actor, owner_id).await?;

        let now = self.clock.now();
        options.validate(now)?;

        let _owner_guard = self.store.lock_owner(owner_id).await;
        self.ensure_quota(owner_id, 1, now).await?;

        let id = ApiKeyId::generate();
        let (credential, secret) = self.issue_secret(&id)?;

        let mut api_key = ApiKey::new(
            id.clone(),
            owner_id.clone(),
            actor.organization_id.clone(),
            options.name.trim(),
            credential,
            now,
        )
        .with_scopes(options.scopes)
        .with_permissions(options.permissions)
        .with_rate_limits(options.rate_limits.unwrap_or(self.policy.default_rate_limits))
        .with_allowed_ips(options.allowed_ips)
        .with_allowed_domains(options.allowed_domains)
        .with_metadata(options.metadata);

        if let Some(expires_at) = options.expires_at {
            api_key = api_key.with_expiration(expires_at);
        }

        let api_key = self.store.insert(api_key).await?;

        record_lifecycle("create");
        info!(key_id = %id, owner_id = %owner_id, actor = %actor.id, "API key created");
        self.audit.record(
            AuditEvent::new(AuditEventKind::ApiKeyCreated, now)
                .with_key(&id)
                .with_user(&actor.id)
                .with_detail("owner_id", owner_id.as_str())
                .with_detail("name", api_key.name()),
        );

        Ok(CreatedApiKey { api_key, secret })
    }

    /// Revoke a key; revoking an already revoked key is a no-op
    pub async fn revoke_key(&self, id: &ApiKeyId, reason: &str) -> Result<ApiKey, DomainError> {
        let actor = self.actor().await?;
        let key = self.require_key(id)?;
        self.require_owner_or_admin(&actor, key.owner_id()).await?;

        let _guard = self.store.lock_key(id).await;
        let current = self.require_key(id)?;

        match current.status() {
            ApiKeyStatus::Revoked => {
                debug!(key_id = %id, "API key already revoked");
                return Ok(current);
            }
            ApiKeyStatus::Expired => {
                return Err(DomainError::invalid_transition(
                    ApiKeyStatus::Expired,
                    ApiKeyStatus::Revoked,
                ));
            }
            ApiKeyStatus::Active | ApiKeyStatus::Deprecated => {}
        }

        let now = self.clock.now();
        let revocation = Revocation {
            revoked_at: now,
            revoked_by: actor.id.clone(),
            reason: reason.to_string(),
        };
        let revoked = self.store.revoke(id, &revocation).await?;

        self.rate_limiter.reset(id);

        record_lifecycle("revoke");
        info!(key_id = %id, actor = %actor.id, reason = reason, "API key revoked");
        self.audit.record(
            AuditEvent::new(AuditEventKind::ApiKeyRevoked, now)
                .with_key(id)
                .with_user(&actor.id)
                .with_detail("reason", reason),
        );

        Ok(revoked)
    }

    /// Replace a key with a fresh secret
    ///
    /// The successor copies every restriction of the predecessor. The
    /// predecessor becomes `Deprecated` and keeps validating for the grace
    /// period.
    pub async fn rotate_key(&self, id: &ApiKeyId) -> Result<RotatedApiKey, DomainError> {
        let actor = self.actor().await?;
        self.require_permission(&actor, PERMISSION_API_WRITE).await?;
        let key = self.require_key(id)?;
        self.require_owner_or_admin(&actor, key.owner_id()).await?;

        let _owner_guard = self.store.lock_owner(key.owner_id()).await;
        let _key_guard = self.store.lock_key(id).await;
        let current = self.require_key(id)?;
        let now = self.clock.now();

        if current.status() != ApiKeyStatus::Active {
            return Err(DomainError::invalid_transition(
                current.status(),
                ApiKeyStatus::Deprecated,
            ));
        }
        if current.usability_at(now) == KeyUsability::Expired {
            return Err(DomainError::key_expired(format!("API key '{}' has expired", id)));
        }
        self.ensure_quota(current.owner_id(), 1, now).await?;

        let successor_id = ApiKeyId::generate();
        let (credential, secret) = self.issue_secret(&successor_id)?;
        let successor = successor_of(&current, successor_id.clone(), credential, now);

        let grace_until = now + self.policy.grace_period();
        let patch = ApiKeyPatch::transition(
            KeyState::Deprecated {
                deprecated_at: now,
                grace_until,
            },
            now,
        )
        .with_replaced_by(successor_id.clone())
        .clearing_rotation_schedule();

        let (predecessor, successor) = self.store.commit_rotation(id, &patch, successor).await?;

        record_lifecycle("rotate");
        info!(
            key_id = %id,
            successor_id = %successor_id,
            grace_until = %grace_until,
            "API key rotated"
        );
        self.audit.record(
            AuditEvent::new(AuditEventKind::ApiKeyRotated, now)
                .with_key(id)
                .with_user(&actor.id)
                .with_detail("successor_id", successor_id.as_str())
                .with_detail("grace_until", grace_until.to_rfc3339()),
        );

        Ok(RotatedApiKey {
            predecessor,
            successor,
            secret,
        })
    }

    /// Replace a key's metadata map
    pub async fn update_metadata(
        &self,
        id: &ApiKeyId,
        metadata: BTreeMap<String, String>,
    ) -> Result<ApiKey, DomainError> {
        let actor = self.actor().await?;
        let key = self.require_key(id)?;
        self.require_owner_or_admin(&actor, key.owner_id()).await?;

        if metadata.keys().any(|name| name.trim().is_empty()) {
            return Err(DomainError::validation("Metadata keys cannot be empty"));
        }

        let _guard = self.store.lock_key(id).await;
        let updated = self
            .store
            .apply(id, &ApiKeyPatch::metadata(metadata, self.clock.now()))
            .await?;

        record_lifecycle("update_metadata");
        info!(key_id = %id, actor = %actor.id, "API key metadata updated");
        Ok(updated)
    }

    /// Keys owned by `owner_id`, oldest first
    pub async fn list_keys(&self, owner_id: &UserId) -> Result<Vec<ApiKey>, DomainError> {
        let actor = self.actor().await?;
        self.require_owner_or_admin(&actor, owner_id).await?;

        Ok(self.store.list_by_owner(owner_id))
    }

    /// A single key visible to the caller
    pub async fn get_key(&self, id: &ApiKeyId) -> Result<ApiKey, DomainError> {
        let actor = self.actor().await?;
        let key = self.require_key(id)?;
        self.require_owner_or_admin(&actor, key.owner_id()).await?;

        Ok(key)
    }

    /// Validate a presented secret; never fails
    pub async fn validate(&self, secret: &str, context: &RequestContext) -> ValidationResult {
        self.validator.validate(secret, context).await
    }

    // Helpers

    fn issue_secret(
        &self,
        id: &ApiKeyId,
    ) -> Result<(KeyCredential, Zeroizing<String>), DomainError> {
        let generated = self.generator.generate()?;
        let encrypted_secret = self.vault.encrypt(&generated.secret, id.as_str())?;

        let credential = KeyCredential {
            encrypted_secret,
            key_preview: generated.preview,
            locator: generated.locator,
        };

        Ok((credential, generated.secret))
    }

    /// Callers hold the owner lock. Keys past their expiry or grace period
    /// are expired first so they stop counting.
    async fn ensure_quota(
        &self,
        owner_id: &UserId,
        additional: usize,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        for key in self.store.list_by_owner(owner_id) {
            if key.is_live() && key.usability_at(now) == KeyUsability::Expired {
                self.store.expire_if_lapsed(key.id(), now).await?;
            }
        }

        let live = self.store.count_live_for_owner(owner_id);

        if live + additional > self.policy.max_keys_per_user {
            return Err(DomainError::quota_exceeded(format!(
                "User '{}' already holds {} of {} allowed API keys",
                owner_id, live, self.policy.max_keys_per_user
            )));
        }

        Ok(())
    }

    fn require_key(&self, id: &ApiKeyId) -> Result<ApiKey, DomainError> {
        self.store
            .get(id)
            .ok_or_else(|| DomainError::key_not_found(format!("API key '{}' not found", id)))
    }

    async fn actor(&self) -> Result<CurrentUser, DomainError> {
        self.identity
            .current_user()
            .await
            .ok_or_else(|| DomainError::permission_denied("No authenticated user"))
    }

    async fn require_permission(
        &self,
        actor: &CurrentUser,
        permission: &str,
    ) -> Result<(), DomainError> {
        if self.access.has_permission(&actor.id, permission).await {
            Ok(())
        } else {
            Err(DomainError::permission_denied(format!(
                "Missing permission '{}'",
                permission
            )))
        }
    }

    async fn require_owner_or_admin(
        &self,
        actor: &CurrentUser,
        owner_id: &UserId,
    ) -> Result<(), DomainError> {
        if &actor.id == owner_id || self.access.has_role(&actor.id, ROLE_ADMIN).await {
            Ok(())
        } else {
            Err(DomainError::permission_denied(
                "Only the key owner or an administrator may do this",
            ))
        }
    }
}

/// Build the successor of `current`, keeping every restriction and the
/// original lifetime
fn successor_of(
    current: &ApiKey,
    id: ApiKeyId,
    credential: KeyCredential,
    now: DateTime<Utc>,
) -> ApiKey {
    let successor = ApiKey::new(
        id,
        current.owner_id().clone(),
        current.organization_id().clone(),
        current.name(),
        credential,
        now,
    )
    .with_scopes(current.scopes().iter().cloned())
    .with_permissions(current.permissions().iter().cloned())
    .with_rate_limits(*current.rate_limits())
    .with_allowed_ips(current.allowed_ips().iter().cloned())
    .with_allowed_domains(current.allowed_domains().iter().cloned())
    .with_metadata(current.metadata().clone())
    .with_rotated_from(current.id().clone());

    match current.lifetime() {
        Some(lifetime) => successor.with_expiration(now + lifetime),
        None => successor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::{MockAccessControl, MockIdentityProvider};
    use crate::domain::{ApiKeyRepository, ErrorKind};
    use crate::infrastructure::api_key::testing::{
        as_user, harness, harness_with, options, Harness, ADMIN,
    };
    use crate::infrastructure::audit::InMemoryAuditSink;
    use crate::infrastructure::clock::MockClock;

    async fn create(h: &Harness, owner: &str, name: &str) -> CreatedApiKey {
        as_user(owner, h.manager.create_key(&owner.into(), options(name)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_key() {
        let h = harness().await;
        let created = create(&h, "alice", "CI deploy").await;

        assert!(created.secret.starts_with("pk_test_"));
        assert_eq!(created.api_key.name(), "CI deploy");
        assert_eq!(created.api_key.status(), ApiKeyStatus::Active);
        assert_eq!(created.api_key.owner_id().as_str(), "alice");
        assert_eq!(created.api_key.organization_id().as_str(), "org-1");
        assert_eq!(created.api_key.rate_limits(), &RateLimits::default());
        assert_eq!(h.audit.count(AuditEventKind::ApiKeyCreated), 1);
    }

    #[tokio::test]
    async fn test_secret_is_never_persisted_in_plaintext() {
        let h = harness().await;
        let created = create(&h, "alice", "CI").await;

        let stored = h.repository.get(created.api_key.id()).await.unwrap().unwrap();
        let json = serde_json::to_string(&stored).unwrap();

        assert!(!json.contains(created.secret.as_str()));
        assert_eq!(
            stored.key_preview(),
            crate::infrastructure::api_key::generator::preview(&created.secret)
        );
        assert!(!format!("{:?}", created).contains(created.secret.as_str()));
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let h = harness_with(ApiKeyPolicy {
            key_prefix: "pk_test_".to_string(),
            max_keys_per_user: 3,
            ..Default::default()
        })
        .await;

        for i in 0..3 {
            create(&h, "alice", &format!("key {}", i)).await;
        }

        let result = as_user("alice", h.manager.create_key(&"alice".into(), options("one more"))).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::QuotaExceeded);

        // Terminal keys do not count
        let first = h.manager.store().list_by_owner(&"alice".into())[0].clone();
        as_user("alice", h.manager.revoke_key(first.id(), "cleanup"))
            .await
            .unwrap();
        create(&h, "alice", "replacement").await;
    }

    #[tokio::test]
    async fn test_lapsed_keys_stop_counting_toward_quota() {
        let h = harness_with(ApiKeyPolicy {
            key_prefix: "pk_test_".to_string(),
            max_keys_per_user: 2,
            grace_period_hours: 1,
            ..Default::default()
        })
        .await;
        let created = create(&h, "alice", "CI").await;
        let rotated = as_user("alice", h.manager.rotate_key(created.api_key.id()))
            .await
            .unwrap();

        let result = as_user("alice", h.manager.create_key(&"alice".into(), options("blocked"))).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::QuotaExceeded);

        h.clock.advance(TimeDelta::hours(2));
        create(&h, "alice", "after grace").await;

        let stored = h.repository.get(created.api_key.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), ApiKeyStatus::Expired);
        assert_eq!(
            h.store.get(rotated.successor.id()).unwrap().status(),
            ApiKeyStatus::Active
        );
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_quota() {
        let h = harness_with(ApiKeyPolicy {
            key_prefix: "pk_test_".to_string(),
            max_keys_per_user: 4,
            ..Default::default()
        })
        .await;
        let manager = Arc::new(h.manager);

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(as_user("alice", async move {
                    manager
                        .create_key(&"alice".into(), options(&format!("key {}", i)))
                        .await
                        .is_ok()
                }))
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 4);
    }

    #[tokio::test]
    async fn test_create_requires_permission() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_current_user()
            .returning(|| Some(CurrentUser::new("mallory", "org-1")));

        let mut access = MockAccessControl::new();
        access.expect_has_permission().returning(|_, _| false);

        let h = Harness::build(
            ApiKeyPolicy::default(),
            Arc::new(identity),
            Arc::new(access),
            MockClock::at_epoch_offset(1_700_000_040),
            InMemoryAuditSink::new(),
        )
        .await;

        let result = h
            .manager
            .create_key(&"mallory".into(), options("nope"))
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_create_for_other_user_requires_admin() {
        let h = harness().await;

        let denied = as_user("bob", h.manager.create_key(&"alice".into(), options("x"))).await;
        assert_eq!(denied.unwrap_err().kind(), ErrorKind::PermissionDenied);

        let allowed = as_user(ADMIN, h.manager.create_key(&"alice".into(), options("x")))
            .await
            .unwrap();
        assert_eq!(allowed.api_key.owner_id().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_unauthenticated_calls_are_denied() {
        let h = harness().await;

        let result = h.manager.create_key(&"alice".into(), options("x")).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let h = harness().await;

        let mut bad_ip = options("x");
        bad_ip.allowed_ips = vec!["not-an-ip".to_string()];
        let mut past = options("x");
        past.expires_at = Some(h.clock.now() - TimeDelta::seconds(1));

        for opts in [options("  "), bad_ip, past] {
            let result = as_user("alice", h.manager.create_key(&"alice".into(), opts)).await;
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
        }
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let h = harness().await;
        let created = create(&h, "alice", "CI").await;
        let id = created.api_key.id();

        let revoked = as_user("alice", h.manager.revoke_key(id, "leaked"))
            .await
            .unwrap();
        let again = as_user("alice", h.manager.revoke_key(id, "leaked again"))
            .await
            .unwrap();

        assert_eq!(revoked.status(), ApiKeyStatus::Revoked);
        assert_eq!(again.status(), ApiKeyStatus::Revoked);
        match again.state() {
            KeyState::Revoked(revocation) => {
                assert_eq!(revocation.reason, "leaked");
                assert_eq!(revocation.revoked_by.as_str(), "alice");
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(h.audit.count(AuditEventKind::ApiKeyRevoked), 1);
    }

    #[tokio::test]
    async fn test_revoke_requires_owner_or_admin() {
        let h = harness().await;
        let created = create(&h, "alice", "CI").await;

        let denied = as_user("bob", h.manager.revoke_key(created.api_key.id(), "x")).await;
        assert_eq!(denied.unwrap_err().kind(), ErrorKind::PermissionDenied);

        as_user(ADMIN, h.manager.revoke_key(created.api_key.id(), "x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_revoke_expired_key_is_rejected() {
        let h = harness().await;
        let mut opts = options("short");
        opts.expires_at = Some(h.clock.now() + TimeDelta::minutes(5));
        let created = as_user("alice", h.manager.create_key(&"alice".into(), opts))
            .await
            .unwrap();

        h.clock.advance(TimeDelta::minutes(10));
        h.manager
            .validate(&created.secret, &RequestContext::new())
            .await;

        let result = as_user("alice", h.manager.revoke_key(created.api_key.id(), "x")).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_revoke_unknown_key() {
        let h = harness().await;
        let id = ApiKeyId::new("missing").unwrap();

        let result = as_user("alice", h.manager.revoke_key(&id, "x")).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::KeyNotFound);
    }

    #[tokio::test]
    async fn test_rotation_links_and_grace_period() {
        let h = harness().await;
        let mut opts = options("CI");
        opts.scopes = vec!["read".to_string(), "write".to_string()];
        opts.rate_limits = Some(RateLimits::new(7, 70, 700).unwrap());
        opts.allowed_domains = vec!["example.com".to_string()];
        opts.expires_at = Some(h.clock.now() + TimeDelta::days(90));
        let created = as_user("alice", h.manager.create_key(&"alice".into(), opts))
            .await
            .unwrap();
        let old_id = created.api_key.id().clone();

        h.clock.advance(TimeDelta::days(10));
        let rotated = as_user("alice", h.manager.rotate_key(&old_id))
            .await
            .unwrap();

        assert_eq!(rotated.predecessor.status(), ApiKeyStatus::Deprecated);
        assert_eq!(rotated.predecessor.replaced_by(), Some(rotated.successor.id()));
        assert_eq!(rotated.successor.rotated_from(), Some(&old_id));
        assert_eq!(rotated.successor.scopes(), created.api_key.scopes());
        assert_eq!(rotated.successor.rate_limits(), created.api_key.rate_limits());
        assert_eq!(
            rotated.successor.allowed_domains(),
            created.api_key.allowed_domains()
        );
        assert_eq!(rotated.successor.lifetime(), Some(TimeDelta::days(90)));
        assert_ne!(*rotated.secret, *created.secret);

        let context = RequestContext::new().with_origin("https://example.com");

        // Both credentials work during the grace period
        assert!(h.manager.validate(&created.secret, &context).await.valid);
        assert!(h.manager.validate(&rotated.secret, &context).await.valid);

        // The old one stops at the end of it
        h.clock.advance(TimeDelta::hours(25));
        let old = h.manager.validate(&created.secret, &context).await;
        assert_eq!(old.reason, Some("API key expired"));
        assert!(h.manager.validate(&rotated.secret, &context).await.valid);

        assert_eq!(
            h.store.get(&old_id).unwrap().status(),
            ApiKeyStatus::Expired
        );
        assert_eq!(h.audit.count(AuditEventKind::ApiKeyRotated), 1);
    }

    #[tokio::test]
    async fn test_deprecated_key_cannot_be_rotated_again() {
        let h = harness().await;
        let created = create(&h, "alice", "CI").await;

        as_user("alice", h.manager.rotate_key(created.api_key.id()))
            .await
            .unwrap();
        let again = as_user("alice", h.manager.rotate_key(created.api_key.id())).await;

        assert_eq!(again.unwrap_err().kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_rotation_respects_quota() {
        let h = harness_with(ApiKeyPolicy {
            key_prefix: "pk_test_".to_string(),
            max_keys_per_user: 1,
            ..Default::default()
        })
        .await;
        let created = create(&h, "alice", "only").await;

        let result = as_user("alice", h.manager.rotate_key(created.api_key.id())).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::QuotaExceeded);
        assert_eq!(
            h.store.get(created.api_key.id()).unwrap().status(),
            ApiKeyStatus::Active
        );
    }

    #[tokio::test]
    async fn test_concurrent_rotations_produce_one_successor() {
        let h = harness().await;
        let created = create(&h, "alice", "CI").await;
        let id = created.api_key.id().clone();
        let manager = Arc::new(h.manager);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let id = id.clone();
                tokio::spawn(as_user("alice", async move {
                    manager.rotate_key(&id).await.is_ok()
                }))
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(h.store.list_by_owner(&"alice".into()).len(), 2);
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let h = harness().await;
        let created = create(&h, "alice", "CI").await;
        let metadata = BTreeMap::from([("team".to_string(), "payments".to_string())]);

        let updated = as_user(
            "alice",
            h.manager
                .update_metadata(created.api_key.id(), metadata.clone()),
        )
        .await
        .unwrap();

        assert_eq!(updated.metadata(), &metadata);
        let stored = h.repository.get(created.api_key.id()).await.unwrap().unwrap();
        assert_eq!(stored.metadata(), &metadata);

        let denied = as_user("bob", h.manager.update_metadata(created.api_key.id(), metadata)).await;
        assert_eq!(denied.unwrap_err().kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_list_and_get_keys() {
        let h = harness().await;
        let first = create(&h, "alice", "one").await;
        create(&h, "alice", "two").await;
        create(&h, "bob", "three").await;

        let alice_keys = as_user("alice", h.manager.list_keys(&"alice".into()))
            .await
            .unwrap();
        assert_eq!(alice_keys.len(), 2);

        let denied = as_user("bob", h.manager.list_keys(&"alice".into())).await;
        assert_eq!(denied.unwrap_err().kind(), ErrorKind::PermissionDenied);

        let fetched = as_user("alice", h.manager.get_key(first.api_key.id()))
            .await
            .unwrap();
        assert_eq!(fetched.id(), first.api_key.id());

        let all = as_user(ADMIN, h.manager.list_keys(&"bob".into()))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_policy_validation() {
        assert!(ApiKeyPolicy::default().validate().is_ok());

        let policy = ApiKeyPolicy {
            max_keys_per_user: 0,
            ..Default::default()
        };
        assert_eq!(policy.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }
}
