//! In-memory API key repository implementation

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::api_key::{
    ApiKey, ApiKeyId, ApiKeyPatch, ApiKeyRepository, ApiKeyStatus, KeyState, Revocation,
};
use crate::domain::{DomainError, UserId};

#[derive(Debug, Default)]
struct Tables {
    keys: HashMap<String, ApiKey>,
    owner_index: HashMap<UserId, BTreeSet<String>>,
}

impl Tables {
    fn insert_new(&mut self, api_key: ApiKey) -> Result<(), DomainError> {
        let id = api_key.id().as_str().to_string();

        if self.keys.contains_key(&id) {
            return Err(DomainError::conflict(format!(
                "API key with ID '{}' already exists",
                id
            )));
        }

        self.owner_index
            .entry(api_key.owner_id().clone())
            .or_default()
            .insert(id.clone());
        self.keys.insert(id, api_key);
        Ok(())
    }

    fn get_mut(&mut self, id: &ApiKeyId) -> Result<&mut ApiKey, DomainError> {
        self.keys
            .get_mut(id.as_str())
            .ok_or_else(|| DomainError::key_not_found(format!("API key '{}' not found", id)))
    }
}

/// In-memory implementation of ApiKeyRepository
#[derive(Debug, Default)]
pub struct InMemoryApiKeyRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryApiKeyRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with initial keys
    pub async fn with_keys(keys: Vec<ApiKey>) -> Result<Self, DomainError> {
        let repo = Self::new();
        {
            let mut tables = repo.tables.write().await;
            for key in keys {
                tables.insert_new(key)?;
            }
        }
        Ok(repo)
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        let tables = self.tables.read().await;
        Ok(tables.keys.get(id.as_str()).cloned())
    }

    async fn list_by_owner(&self, owner_id: &UserId) -> Result<Vec<ApiKey>, DomainError> {
        let tables = self.tables.read().await;

        let keys: Vec<ApiKey> = tables
            .owner_index
            .get(owner_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.keys.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(keys)
    }

    async fn list(&self, status: Option<ApiKeyStatus>) -> Result<Vec<ApiKey>, DomainError> {
        let tables = self.tables.read().await;

        let mut result: Vec<ApiKey> = tables
            .keys
            .values()
            .filter(|k| status.is_none_or(|s| k.status() == s))
            .cloned()
            .collect();

        result.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        Ok(result)
    }

    async fn create(&self, api_key: ApiKey) -> Result<ApiKey, DomainError> {
        let mut tables = self.tables.write().await;
        tables.insert_new(api_key.clone())?;
        Ok(api_key)
    }

    async fn patch(&self, id: &ApiKeyId, patch: &ApiKeyPatch) -> Result<ApiKey, DomainError> {
        let mut tables = self.tables.write().await;
        let key = tables.get_mut(id)?;

        key.apply_patch(patch)?;
        Ok(key.clone())
    }

    async fn revoke(&self, id: &ApiKeyId, revocation: &Revocation) -> Result<ApiKey, DomainError> {
        let mut tables = self.tables.write().await;
        let key = tables.get_mut(id)?;

        key.transition(KeyState::Revoked(revocation.clone()), revocation.revoked_at)?;
        Ok(key.clone())
    }

    async fn commit_rotation(
        &self,
        predecessor_id: &ApiKeyId,
        predecessor_patch: &ApiKeyPatch,
        successor: ApiKey,
    ) -> Result<(ApiKey, ApiKey), DomainError> {
        let mut tables = self.tables.write().await;

        // Validate both halves before touching anything
        let mut predecessor = tables.get_mut(predecessor_id)?.clone();
        predecessor.apply_patch(predecessor_patch)?;

        tables.insert_new(successor.clone())?;
        tables
            .keys
            .insert(predecessor_id.as_str().to_string(), predecessor.clone());

        Ok((predecessor, successor))
    }
}
