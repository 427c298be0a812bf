//! API Key repository trait
//!
//! The logical contract a persistence layer must satisfy. Records are
//! stored with ciphertext only; implementations never see a raw secret.

use async_trait::async_trait;
use std::fmt::Debug;

use super::entity::{ApiKey, ApiKeyId, ApiKeyPatch, ApiKeyStatus, Revocation};
use crate::domain::identity::UserId;
use crate::domain::DomainError;

/// Repository trait for API key storage
#[async_trait]
pub trait ApiKeyRepository: Send + Sync + Debug {
    /// Get an API key by its ID
    async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError>;

    /// List all API keys belonging to an owner
    async fn list_by_owner(&self, owner_id: &UserId) -> Result<Vec<ApiKey>, DomainError>;

    /// List all API keys (optionally filtered by status)
    async fn list(&self, status: Option<ApiKeyStatus>) -> Result<Vec<ApiKey>, DomainError>;

    /// Create a new API key
    async fn create(&self, api_key: ApiKey) -> Result<ApiKey, DomainError>;

    /// Apply a partial update and return the stored record
    async fn patch(&self, id: &ApiKeyId, patch: &ApiKeyPatch) -> Result<ApiKey, DomainError>;

    /// Move a key to `Revoked`
    async fn revoke(&self, id: &ApiKeyId, revocation: &Revocation) -> Result<ApiKey, DomainError>;

    /// Persist a rotation as one unit: create the successor and patch the
    /// predecessor, or do neither
    async fn commit_rotation(
        &self,
        predecessor_id: &ApiKeyId,
        predecessor_patch: &ApiKeyPatch,
        successor: ApiKey,
    ) -> Result<(ApiKey, ApiKey), DomainError>;

    /// Check if an API key ID exists
    async fn exists(&self, id: &ApiKeyId) -> Result<bool, DomainError> {
        Ok(self.get(id).await?.is_some())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::domain::api_key::KeyState;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// Mock API key repository for testing
    #[derive(Debug, Default)]
    pub struct MockApiKeyRepository {
        keys: Arc<RwLock<HashMap<String, ApiKey>>>,
        should_fail: Arc<RwLock<bool>>,
    }

    impl MockApiKeyRepository {
        /// Create a new mock repository
        pub fn new() -> Self {
            Self::default()
        }

        /// Set whether operations should fail
        pub async fn set_should_fail(&self, fail: bool) {
            *self.should_fail.write().await = fail;
        }

        async fn check_should_fail(&self) -> Result<(), DomainError> {
            if *self.should_fail.read().await {
                return Err(DomainError::storage("Mock repository configured to fail"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ApiKeyRepository for MockApiKeyRepository {
        async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
            self.check_should_fail().await?;
            let keys = self.keys.read().await;
            Ok(keys.get(id.as_str()).cloned())
        }

        async fn list_by_owner(&self, owner_id: &UserId) -> Result<Vec<ApiKey>, DomainError> {
            self.check_should_fail().await?;
            let keys = self.keys.read().await;
            Ok(keys
                .values()
                .filter(|k| k.owner_id() == owner_id)
                .cloned()
                .collect())
        }

        async fn list(&self, status: Option<ApiKeyStatus>) -> Result<Vec<ApiKey>, DomainError> {
            self.check_should_fail().await?;
            let keys = self.keys.read().await;
            Ok(keys
                .values()
                .filter(|k| status.is_none_or(|s| k.status() == s))
                .cloned()
                .collect())
        }

        async fn create(&self, api_key: ApiKey) -> Result<ApiKey, DomainError> {
            self.check_should_fail().await?;
            let mut keys = self.keys.write().await;
            let id = api_key.id().as_str().to_string();

            if keys.contains_key(&id) {
                return Err(DomainError::conflict(format!(
                    "API key with ID '{}' already exists",
                    id
                )));
            }

            keys.insert(id, api_key.clone());
            Ok(api_key)
        }

        async fn patch(&self, id: &ApiKeyId, patch: &ApiKeyPatch) -> Result<ApiKey, DomainError> {
            self.check_should_fail().await?;
            let mut keys = self.keys.write().await;
            let key = keys
                .get_mut(id.as_str())
                .ok_or_else(|| DomainError::key_not_found(format!("API key '{}' not found", id)))?;

            key.apply_patch(patch)?;
            Ok(key.clone())
        }

        async fn revoke(
            &self,
            id: &ApiKeyId,
            revocation: &Revocation,
        ) -> Result<ApiKey, DomainError> {
            self.check_should_fail().await?;
            let mut keys = self.keys.write().await;
            let key = keys
                .get_mut(id.as_str())
                .ok_or_else(|| DomainError::key_not_found(format!("API key '{}' not found", id)))?;

            key.transition(KeyState::Revoked(revocation.clone()), revocation.revoked_at)?;
            Ok(key.clone())
        }

        async fn commit_rotation(
            &self,
            predecessor_id: &ApiKeyId,
            predecessor_patch: &ApiKeyPatch,
            successor: ApiKey,
        ) -> Result<(ApiKey, ApiKey), DomainError> {
            self.check_should_fail().await?;
            let mut keys = self.keys.write().await;

            let mut predecessor = keys
                .get(predecessor_id.as_str())
                .cloned()
                .ok_or_else(|| {
                    DomainError::key_not_found(format!("API key '{}' not found", predecessor_id))
                })?;
            predecessor.apply_patch(predecessor_patch)?;

            keys.insert(predecessor_id.as_str().to_string(), predecessor.clone());
            keys.insert(successor.id().as_str().to_string(), successor.clone());
            Ok((predecessor, successor))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::api_key::entity::fixtures::api_key;
        use chrono::Utc;

        #[tokio::test]
        async fn test_create_and_get() {
            let repo = MockApiKeyRepository::new();
            let key = api_key("test-1", "user-1");

            repo.create(key.clone()).await.unwrap();

            let retrieved = repo.get(key.id()).await.unwrap();
            assert!(retrieved.is_some());
            assert_eq!(retrieved.unwrap().name(), key.name());
        }

        #[tokio::test]
        async fn test_revoke() {
            let repo = MockApiKeyRepository::new();
            let key = api_key("test-1", "user-1");
            repo.create(key.clone()).await.unwrap();

            let revocation = Revocation {
                revoked_at: Utc::now(),
                revoked_by: UserId::new("user-1"),
                reason: "rotated out".to_string(),
            };
            let revoked = repo.revoke(key.id(), &revocation).await.unwrap();

            assert_eq!(revoked.status(), ApiKeyStatus::Revoked);
        }

        #[tokio::test]
        async fn test_should_fail() {
            let repo = MockApiKeyRepository::new();
            repo.set_should_fail(true).await;

            let result = repo.list(None).await;
            assert!(matches!(result, Err(DomainError::Storage { .. })));
        }
    }
}
