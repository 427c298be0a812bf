//! Key store
//!
//! Holds the authoritative in-memory view of every key record and delegates
//! durability to an [`ApiKeyRepository`]. Lifecycle mutations are persisted
//! before they become visible in memory. Usage counters are the exception:
//! they change in memory immediately and reach the repository through an
//! ordered background writer so the validation path never waits on storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::domain::{
    ApiKey, ApiKeyId, ApiKeyPatch, ApiKeyRepository, DomainError, KeyState, KeyUsability,
    Revocation, UserId,
};
use crate::infrastructure::observability::record_lifecycle;

#[derive(Debug)]
enum WriteCommand {
    Usage {
        id: ApiKeyId,
        last_used_at: DateTime<Utc>,
        usage_count: u64,
    },
    Flush(oneshot::Sender<()>),
}

/// In-memory key records backed by a repository
#[derive(Debug)]
pub struct KeyStore {
    repository: Arc<dyn ApiKeyRepository>,
    records: DashMap<ApiKeyId, ApiKey>,
    locators: DashMap<String, Vec<ApiKeyId>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    writer: mpsc::UnboundedSender<WriteCommand>,
}

impl KeyStore {
    /// Hydrate from the repository and start the usage writer
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn load(repository: Arc<dyn ApiKeyRepository>) -> Result<Self, DomainError> {
        let existing = repository.list(None).await?;
        let (writer, receiver) = mpsc::unbounded_channel();

        let store = Self {
            repository: Arc::clone(&repository),
            records: DashMap::new(),
            locators: DashMap::new(),
            locks: DashMap::new(),
            writer,
        };

        for key in existing {
            store.index(key);
        }

        tokio::spawn(run_writer(repository, receiver));

        info!(keys = store.records.len(), "Key store loaded");
        Ok(store)
    }

    fn index(&self, key: ApiKey) {
        self.locators
            .entry(key.locator().to_string())
            .or_default()
            .push(key.id().clone());
        self.records.insert(key.id().clone(), key);
    }

    fn lock_for(&self, name: String) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(name).or_default().value())
    }

    /// Serialize read-then-write operations on one key
    pub async fn lock_key(&self, id: &ApiKeyId) -> OwnedMutexGuard<()> {
        self.lock_for(format!("key:{}", id)).lock_owned().await
    }

    /// Serialize quota-sensitive operations for one owner
    ///
    /// Taken before any key lock when both are needed.
    pub async fn lock_owner(&self, owner_id: &UserId) -> OwnedMutexGuard<()> {
        self.lock_for(format!("owner:{}", owner_id)).lock_owned().await
    }

    pub fn get(&self, id: &ApiKeyId) -> Option<ApiKey> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Records sharing a locator
    pub fn candidates(&self, locator: &str) -> Vec<ApiKey> {
        self.locators
            .get(locator)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// All keys of an owner, oldest first
    pub fn list_by_owner(&self, owner_id: &UserId) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self
            .records
            .iter()
            .filter(|entry| entry.owner_id() == owner_id)
            .map(|entry| entry.value().clone())
            .collect();

        keys.sort_by_key(|key| key.created_at());
        keys
    }

    /// Snapshot of all `Active` and `Deprecated` keys, oldest first
    pub fn live_keys(&self) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self
            .records
            .iter()
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value().clone())
            .collect();

        keys.sort_by_key(|key| key.created_at());
        keys
    }

    pub fn count_live_for_owner(&self, owner_id: &UserId) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.owner_id() == owner_id && entry.is_live())
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Persist and index a new key
    pub async fn insert(&self, key: ApiKey) -> Result<ApiKey, DomainError> {
        let created = self.repository.create(key).await?;
        self.index(created.clone());
        Ok(created)
    }

    /// Persist a patch, then apply it in memory
    ///
    /// Callers changing `state` must hold the key lock.
    pub async fn apply(&self, id: &ApiKeyId, patch: &ApiKeyPatch) -> Result<ApiKey, DomainError> {
        let mut preview = self.require(id)?;
        preview.apply_patch(patch)?;

        self.repository.patch(id, patch).await?;
        self.apply_in_memory(id, patch)
    }

    /// Persist `Expired` for a live key whose expiry or grace period has passed
    ///
    /// Takes the key lock. Returns `None` when the key did not need it.
    pub async fn expire_if_lapsed(
        &self,
        id: &ApiKeyId,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, DomainError> {
        let _guard = self.lock_key(id).await;

        let Some(current) = self.get(id) else {
            return Ok(None);
        };
        if !current.is_live() || current.usability_at(now) != KeyUsability::Expired {
            return Ok(None);
        }

        let patch = ApiKeyPatch::transition(KeyState::Expired { expired_at: now }, now);
        let expired = self.apply(id, &patch).await?;

        record_lifecycle("expire");
        info!(key_id = %id, previous = %current.status(), "API key expired");
        Ok(Some(expired))
    }

    /// Persist a revocation, then apply it in memory
    pub async fn revoke(
        &self,
        id: &ApiKeyId,
        revocation: &Revocation,
    ) -> Result<ApiKey, DomainError> {
        let patch = ApiKeyPatch::transition(
            KeyState::Revoked(revocation.clone()),
            revocation.revoked_at,
        );
        let mut preview = self.require(id)?;
        preview.apply_patch(&patch)?;

        self.repository.revoke(id, revocation).await?;
        self.apply_in_memory(id, &patch)
    }

    /// Persist a rotation, then publish the successor and the deprecated
    /// predecessor
    ///
    /// The successor becomes visible first; it already links back to its
    /// predecessor.
    pub async fn commit_rotation(
        &self,
        predecessor_id: &ApiKeyId,
        predecessor_patch: &ApiKeyPatch,
        successor: ApiKey,
    ) -> Result<(ApiKey, ApiKey), DomainError> {
        let mut preview = self.require(predecessor_id)?;
        preview.apply_patch(predecessor_patch)?;

        let (_, successor) = self
            .repository
            .commit_rotation(predecessor_id, predecessor_patch, successor)
            .await?;

        self.index(successor.clone());
        let predecessor = self.apply_in_memory(predecessor_id, predecessor_patch)?;

        Ok((predecessor, successor))
    }

    /// Count one successful use
    ///
    /// Visible immediately; persisted in the background. Returns `None` when
    /// the key is gone or no longer usable at `at`. The check and the update
    /// share the record's entry lock.
    pub fn record_usage(&self, id: &ApiKeyId, at: DateTime<Utc>) -> Option<ApiKey> {
        let updated = {
            let mut entry = self.records.get_mut(id)?;
            if entry.usability_at(at) != KeyUsability::Usable {
                return None;
            }
            entry.record_usage(at);
            entry.value().clone()
        };

        let command = WriteCommand::Usage {
            id: id.clone(),
            last_used_at: updated.last_used_at().unwrap_or(at),
            usage_count: updated.usage_count(),
        };
        if self.writer.send(command).is_err() {
            warn!(key_id = %id, "Usage writer stopped; usage not persisted");
        }

        Some(updated)
    }

    /// Wait until every usage update queued so far has been written
    pub async fn sync(&self) {
        let (done, wait) = oneshot::channel();

        if self.writer.send(WriteCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn require(&self, id: &ApiKeyId) -> Result<ApiKey, DomainError> {
        self.get(id)
            .ok_or_else(|| DomainError::key_not_found(format!("API key '{}' not found", id)))
    }

    fn apply_in_memory(&self, id: &ApiKeyId, patch: &ApiKeyPatch) -> Result<ApiKey, DomainError> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| DomainError::key_not_found(format!("API key '{}' not found", id)))?;

        entry.apply_patch(patch)?;
        Ok(entry.value().clone())
    }
}

/// Applies usage updates in arrival order until the store is dropped
async fn run_writer(
    repository: Arc<dyn ApiKeyRepository>,
    mut receiver: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            WriteCommand::Usage {
                id,
                last_used_at,
                usage_count,
            } => {
                let patch = ApiKeyPatch::usage(last_used_at, usage_count);

                if let Err(e) = repository.patch(&id, &patch).await {
                    warn!(key_id = %id, error = %e, "Failed to persist key usage");
                }
            }
            WriteCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!("Usage writer stopped");
}
