//! API Key entity and related types

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::validation::{validate_api_key_id, ApiKeyValidationError};
use crate::domain::identity::{OrganizationId, UserId};
use crate::domain::DomainError;

/// API Key identifier - alphanumeric + hyphens, max 50 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiKeyId(String);

impl ApiKeyId {
    /// Create a new ApiKeyId after validation
    pub fn new(id: impl Into<String>) -> Result<Self, ApiKeyValidationError> {
        let id = id.into();
        validate_api_key_id(&id)?;
        Ok(Self(id))
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(format!("key-{}", Uuid::new_v4().simple()))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ApiKeyId {
    type Error = ApiKeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApiKeyId> for String {
    fn from(id: ApiKeyId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an API key
///
/// `Revoked` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Deprecated,
    Revoked,
    Expired,
}

impl ApiKeyStatus {
    /// Transition table of the key state machine
    pub fn can_transition_to(self, next: ApiKeyStatus) -> bool {
        use ApiKeyStatus::*;

        matches!(
            (self, next),
            (Active, Deprecated)
                | (Active, Revoked)
                | (Active, Expired)
                | (Deprecated, Revoked)
                | (Deprecated, Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Revoked | Self::Expired)
    }

    /// Live keys count against the per-owner quota
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who revoked a key, when and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: UserId,
    pub reason: String,
}

/// Key state together with the data each state carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyState {
    Active,
    Deprecated {
        deprecated_at: DateTime<Utc>,
        grace_until: DateTime<Utc>,
    },
    Revoked(Revocation),
    Expired {
        expired_at: DateTime<Utc>,
    },
}

impl KeyState {
    pub fn status(&self) -> ApiKeyStatus {
        match self {
            Self::Active => ApiKeyStatus::Active,
            Self::Deprecated { .. } => ApiKeyStatus::Deprecated,
            Self::Revoked(_) => ApiKeyStatus::Revoked,
            Self::Expired { .. } => ApiKeyStatus::Expired,
        }
    }
}

/// Request limits per sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
            per_day: 10000,
        }
    }
}

impl RateLimits {
    /// Create rate limits; every window must allow at least one request
    pub fn new(per_minute: u32, per_hour: u32, per_day: u32) -> Result<Self, ApiKeyValidationError> {
        let limits = Self {
            per_minute,
            per_hour,
            per_day,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), ApiKeyValidationError> {
        if self.per_minute == 0 {
            return Err(ApiKeyValidationError::ZeroRateLimit("per_minute"));
        }
        if self.per_hour == 0 {
            return Err(ApiKeyValidationError::ZeroRateLimit("per_hour"));
        }
        if self.per_day == 0 {
            return Err(ApiKeyValidationError::ZeroRateLimit("per_day"));
        }
        Ok(())
    }
}

/// AEAD ciphertext of a raw secret, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub nonce: String,
}

/// Everything persisted about a secret: never the plaintext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCredential {
    pub encrypted_secret: EncryptedSecret,
    /// First 8 + last 4 characters of the raw secret
    pub key_preview: String,
    /// Non-secret lookup value derived from the key's public prefix
    pub locator: String,
}

/// Result of evaluating a key for use at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsability {
    Usable,
    /// Revoked or already expired
    Inactive,
    /// Past `expires_at` or past the rotation grace period
    Expired,
}

/// Partial update of a key record
///
/// Usage counters only ever move forward; applying an older usage patch
/// after a newer one is a no-op for those fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiKeyPatch {
    pub state: Option<KeyState>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: Option<u64>,
    pub replaced_by: Option<ApiKeyId>,
    pub rotation_due_at: Option<Option<DateTime<Utc>>>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApiKeyPatch {
    pub fn transition(state: KeyState, at: DateTime<Utc>) -> Self {
        Self {
            state: Some(state),
            updated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn usage(last_used_at: DateTime<Utc>, usage_count: u64) -> Self {
        Self {
            last_used_at: Some(last_used_at),
            usage_count: Some(usage_count),
            ..Default::default()
        }
    }

    pub fn metadata(metadata: BTreeMap<String, String>, at: DateTime<Utc>) -> Self {
        Self {
            metadata: Some(metadata),
            updated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn schedule_rotation(due_at: DateTime<Utc>, at: DateTime<Utc>) -> Self {
        Self {
            rotation_due_at: Some(Some(due_at)),
            updated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn with_replaced_by(mut self, successor: ApiKeyId) -> Self {
        self.replaced_by = Some(successor);
        self
    }

    pub fn clearing_rotation_schedule(mut self) -> Self {
        self.rotation_due_at = Some(None);
        self
    }
}

/// API Key entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    id: ApiKeyId,
    owner_id: UserId,
    organization_id: OrganizationId,
    name: String,
    #[serde(default)]
    scopes: BTreeSet<String>,
    #[serde(default)]
    permissions: BTreeSet<String>,
    state: KeyState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    usage_count: u64,
    rate_limits: RateLimits,
    #[serde(default)]
    allowed_ips: BTreeSet<String>,
    #[serde(default)]
    allowed_domains: BTreeSet<String>,
    key_preview: String,
    locator: String,
    /// Ciphertext only; never exposed in API responses (separate DTOs used)
    encrypted_secret: EncryptedSecret,
    #[serde(skip_serializing_if = "Option::is_none")]
    rotated_from: Option<ApiKeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replaced_by: Option<ApiKeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rotation_due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl ApiKey {
    /// Create a new active API key
    pub fn new(
        id: ApiKeyId,
        owner_id: UserId,
        organization_id: OrganizationId,
        name: impl Into<String>,
        credential: KeyCredential,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            organization_id,
            name: name.into(),
            scopes: BTreeSet::new(),
            permissions: BTreeSet::new(),
            state: KeyState::Active,
            created_at,
            updated_at: created_at,
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            rate_limits: RateLimits::default(),
            allowed_ips: BTreeSet::new(),
            allowed_domains: BTreeSet::new(),
            key_preview: credential.key_preview,
            locator: credential.locator,
            encrypted_secret: credential.encrypted_secret,
            rotated_from: None,
            replaced_by: None,
            rotation_due_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions(
        mut self,
        permissions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimits) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_allowed_ips(mut self, ips: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_ips = ips.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_domains(
        mut self,
        domains: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_rotated_from(mut self, predecessor: ApiKeyId) -> Self {
        self.rotated_from = Some(predecessor);
        self
    }

    // Getters

    pub fn id(&self) -> &ApiKeyId {
        &self.id
    }

    pub fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn state(&self) -> &KeyState {
        &self.state
    }

    pub fn status(&self) -> ApiKeyStatus {
        self.state.status()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used_at
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    pub fn allowed_ips(&self) -> &BTreeSet<String> {
        &self.allowed_ips
    }

    pub fn allowed_domains(&self) -> &BTreeSet<String> {
        &self.allowed_domains
    }

    pub fn key_preview(&self) -> &str {
        &self.key_preview
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn encrypted_secret(&self) -> &EncryptedSecret {
        &self.encrypted_secret
    }

    pub fn rotated_from(&self) -> Option<&ApiKeyId> {
        self.rotated_from.as_ref()
    }

    pub fn replaced_by(&self) -> Option<&ApiKeyId> {
        self.replaced_by.as_ref()
    }

    pub fn rotation_due_at(&self) -> Option<DateTime<Utc>> {
        self.rotation_due_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    // Status checks

    /// Whether the key counts against its owner's quota
    pub fn is_live(&self) -> bool {
        self.status().is_live()
    }

    /// Lifetime granted at creation, if the key expires
    pub fn lifetime(&self) -> Option<TimeDelta> {
        self.expires_at.map(|expires_at| expires_at - self.created_at)
    }

    /// Evaluate whether the key may authenticate a request at `now`
    ///
    /// State is checked before expiry so a revoked key reports `Inactive`
    /// regardless of `expires_at`.
    pub fn usability_at(&self, now: DateTime<Utc>) -> KeyUsability {
        match &self.state {
            KeyState::Active => {}
            KeyState::Deprecated { grace_until, .. } => {
                if now >= *grace_until {
                    return KeyUsability::Expired;
                }
            }
            KeyState::Revoked(_) | KeyState::Expired { .. } => return KeyUsability::Inactive,
        }

        match self.expires_at {
            Some(expires_at) if now >= expires_at => KeyUsability::Expired,
            _ => KeyUsability::Usable,
        }
    }

    // Mutators

    /// Move to a new state, rejecting edges missing from the transition table
    pub fn transition(&mut self, next: KeyState, at: DateTime<Utc>) -> Result<(), DomainError> {
        let from = self.status();
        let to = next.status();

        if !from.can_transition_to(to) {
            return Err(DomainError::invalid_transition(from, to));
        }

        self.state = next;
        self.updated_at = at;
        Ok(())
    }

    /// Record one successful authentication
    pub fn record_usage(&mut self, at: DateTime<Utc>) {
        self.usage_count += 1;
        self.last_used_at = Some(self.last_used_at.map_or(at, |last| last.max(at)));
    }

    /// Apply a partial update; nothing changes if the state transition is illegal
    pub fn apply_patch(&mut self, patch: &ApiKeyPatch) -> Result<(), DomainError> {
        if let Some(next) = &patch.state {
            let from = self.status();
            let to = next.status();
            if !from.can_transition_to(to) {
                return Err(DomainError::invalid_transition(from, to));
            }
            self.state = next.clone();
        }

        if let Some(last_used_at) = patch.last_used_at {
            self.last_used_at = Some(
                self.last_used_at
                    .map_or(last_used_at, |last| last.max(last_used_at)),
            );
        }

        if let Some(usage_count) = patch.usage_count {
            self.usage_count = self.usage_count.max(usage_count);
        }

        if let Some(successor) = &patch.replaced_by {
            self.replaced_by = Some(successor.clone());
        }

        if let Some(due_at) = patch.rotation_due_at {
            self.rotation_due_at = due_at;
        }

        if let Some(metadata) = &patch.metadata {
            self.metadata = metadata.clone();
        }

        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::api_key;
    use super::*;

    fn revocation() -> Revocation {
        Revocation {
            revoked_at: Utc::now(),
            revoked_by: UserId::new("user-1"),
            reason: "compromised".to_string(),
        }
    }

    #[test]
    fn test_api_key_id_valid() {
        let id = ApiKeyId::new("my-api-key-1").unwrap();
        assert_eq!(id.as_str(), "my-api-key-1");
    }

    #[test]
    fn test_api_key_id_invalid() {
        assert!(ApiKeyId::new("").is_err());
        assert!(ApiKeyId::new("my_key").is_err());
        assert!(ApiKeyId::new("-key").is_err());
    }

    #[test]
    fn test_generated_ids_are_valid_and_unique() {
        let a = ApiKeyId::generate();
        let b = ApiKeyId::generate();

        assert!(ApiKeyId::new(a.as_str()).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_transition_table() {
        use ApiKeyStatus::*;

        assert!(Active.can_transition_to(Deprecated));
        assert!(Active.can_transition_to(Revoked));
        assert!(Active.can_transition_to(Expired));
        assert!(Deprecated.can_transition_to(Revoked));
        assert!(Deprecated.can_transition_to(Expired));

        assert!(!Deprecated.can_transition_to(Active));
        assert!(!Active.can_transition_to(Active));
        for terminal in [Revoked, Expired] {
            for next in [Active, Deprecated, Revoked, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_rate_limits_must_be_positive() {
        assert!(RateLimits::new(5, 100, 1000).is_ok());
        assert_eq!(
            RateLimits::new(0, 100, 1000),
            Err(ApiKeyValidationError::ZeroRateLimit("per_minute"))
        );
        assert_eq!(
            RateLimits::new(5, 100, 0),
            Err(ApiKeyValidationError::ZeroRateLimit("per_day"))
        );
    }

    #[test]
    fn test_api_key_creation() {
        let key = api_key("test-key", "user-1")
            .with_scopes(["read", "write"])
            .with_permissions(["models:list"]);

        assert_eq!(key.status(), ApiKeyStatus::Active);
        assert_eq!(key.owner_id().as_str(), "user-1");
        assert!(key.scopes().contains("read"));
        assert_eq!(key.usage_count(), 0);
        assert!(key.last_used_at().is_none());
        assert_eq!(key.usability_at(Utc::now()), KeyUsability::Usable);
    }

    #[test]
    fn test_api_key_expiration() {
        let past = Utc::now() - TimeDelta::hours(1);
        let key = api_key("test-key", "user-1").with_expiration(past);

        assert_eq!(key.usability_at(Utc::now()), KeyUsability::Expired);
    }

    #[test]
    fn test_revoked_is_inactive_even_before_expiry() {
        let mut key =
            api_key("test-key", "user-1").with_expiration(Utc::now() - TimeDelta::hours(1));
        key.transition(KeyState::Revoked(revocation()), Utc::now())
            .unwrap();

        assert_eq!(key.usability_at(Utc::now()), KeyUsability::Inactive);
    }

    #[test]
    fn test_deprecated_usable_until_grace_ends() {
        let now = Utc::now();
        let mut key = api_key("test-key", "user-1");
        key.transition(
            KeyState::Deprecated {
                deprecated_at: now,
                grace_until: now + TimeDelta::hours(1),
            },
            now,
        )
        .unwrap();

        assert_eq!(key.usability_at(now), KeyUsability::Usable);
        assert_eq!(
            key.usability_at(now + TimeDelta::hours(1)),
            KeyUsability::Expired
        );
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut key = api_key("test-key", "user-1");
        key.transition(KeyState::Revoked(revocation()), Utc::now())
            .unwrap();

        let result = key.transition(KeyState::Active, Utc::now());
        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition {
                from: ApiKeyStatus::Revoked,
                to: ApiKeyStatus::Active
            })
        ));
        assert_eq!(key.status(), ApiKeyStatus::Revoked);
    }

    #[test]
    fn test_record_usage() {
        let mut key = api_key("test-key", "user-1");
        let at = Utc::now();

        key.record_usage(at);
        key.record_usage(at - TimeDelta::seconds(5));

        assert_eq!(key.usage_count(), 2);
        assert_eq!(key.last_used_at(), Some(at));
    }

    #[test]
    fn test_usage_patch_never_moves_backwards() {
        let mut key = api_key("test-key", "user-1");
        let at = Utc::now();

        key.apply_patch(&ApiKeyPatch::usage(at, 10)).unwrap();
        key.apply_patch(&ApiKeyPatch::usage(at - TimeDelta::minutes(1), 7))
            .unwrap();

        assert_eq!(key.usage_count(), 10);
        assert_eq!(key.last_used_at(), Some(at));
    }

    #[test]
    fn test_illegal_patch_changes_nothing() {
        let mut key = api_key("test-key", "user-1");
        key.transition(
            KeyState::Expired {
                expired_at: Utc::now(),
            },
            Utc::now(),
        )
        .unwrap();

        let mut patch = ApiKeyPatch::transition(KeyState::Active, Utc::now());
        patch.metadata = Some(BTreeMap::from([("env".to_string(), "prod".to_string())]));

        assert!(key.apply_patch(&patch).is_err());
        assert!(key.metadata().is_empty());
    }

    #[test]
    fn test_serialization_keeps_state_tag() {
        let key = api_key("test-key", "user-1");
        let json = serde_json::to_value(&key).unwrap();

        assert_eq!(json["state"]["status"], "active");
        assert_eq!(json["id"], "test-key");

        let restored: ApiKey = serde_json::from_value(json).unwrap();
        assert_eq!(restored.status(), ApiKeyStatus::Active);
        assert_eq!(restored.locator(), key.locator());
    }
}
