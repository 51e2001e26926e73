//! Storage abstraction for the coordinating server's tables.
//!
//! The store holds memberships, resource key versions, wrapped keys and key
//! requests. It never sees a resource key in the clear.
//!
//! Two constraints carry all of the concurrency safety:
//! - one `WrappedKey` per `(resource, recipient, key_version)`; a recipient's
//!   current wrap is the one with the highest version
//! - one pending `KeyRequest` per `(resource, requester)`

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use hush_crypto::identity::Principal;
use hush_crypto::{PublicId, WrappedKey};

use crate::types::{KeyRequest, KeyRequestStatus};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of writing a wrapped key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// First wrap of this key version for the recipient.
    Inserted,
    /// A wrap of the same key version was superseded.
    Replaced,
}

/// Result of appending a key request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A pending request for the same resource and requester already exists.
    Existing(KeyRequest),
}

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait KeyStore: Send + Sync {
    // -- memberships --

    /// Authorize `principal` for `resource_id`. Returns false if already a member.
    async fn authorize(&self, resource_id: &str, principal: &Principal) -> Result<bool, StoreError>;

    /// Remove a member. Returns false if it was not a member.
    async fn revoke(&self, resource_id: &str, principal: &PublicId) -> Result<bool, StoreError>;

    async fn is_authorized(&self, resource_id: &str, principal: &PublicId) -> Result<bool, StoreError>;

    /// Members ordered by public id.
    async fn authorized_principals(&self, resource_id: &str) -> Result<Vec<Principal>, StoreError>;

    // -- key versions --

    async fn current_key_version(&self, resource_id: &str) -> Result<Option<u32>, StoreError>;

    /// Compare-and-set the resource's key version. `expected = None` means the
    /// resource has no key yet. Returns false if another writer got there first.
    async fn advance_key_version(
        &self,
        resource_id: &str,
        expected: Option<u32>,
        next: u32,
    ) -> Result<bool, StoreError>;

    // -- wrapped keys --

    /// Upsert the wrap for `(resource, recipient, key_version)`. Wraps of
    /// other versions are kept.
    async fn put_wrapped_key(&self, wrapped: &WrappedKey) -> Result<PutOutcome, StoreError>;

    /// The recipient's current (highest version) wrap.
    async fn load_wrapped_key(
        &self,
        resource_id: &str,
        recipient: &PublicId,
    ) -> Result<Option<WrappedKey>, StoreError>;

    async fn load_wrapped_key_version(
        &self,
        resource_id: &str,
        recipient: &PublicId,
        key_version: u32,
    ) -> Result<Option<WrappedKey>, StoreError>;

    /// Key versions wrapped for the recipient, ascending.
    async fn wrapped_key_versions(&self, resource_id: &str, recipient: &PublicId) -> Result<Vec<u32>, StoreError>;

    /// Each recipient's current wrap, ordered by recipient.
    async fn list_wrapped_keys(&self, resource_id: &str) -> Result<Vec<WrappedKey>, StoreError>;

    // -- key requests --

    async fn insert_key_request(&self, request: &KeyRequest) -> Result<InsertOutcome, StoreError>;

    async fn load_key_request(&self, id: &str) -> Result<Option<KeyRequest>, StoreError>;

    /// Pending requests, oldest first, optionally for one resource.
    async fn list_pending_requests(&self, resource_id: Option<&str>) -> Result<Vec<KeyRequest>, StoreError>;

    /// Guarded `pending -> fulfilled`. Returns false if the request was not pending.
    async fn mark_request_fulfilled(&self, id: &str, at: u64) -> Result<bool, StoreError>;
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// In-memory store for tests and single-process use.
#[derive(Default)]
pub struct InMemoryKeyStore {
    members: Arc<RwLock<HashMap<String, BTreeMap<PublicId, Principal>>>>,
    versions: Arc<RwLock<HashMap<String, u32>>>,
    wraps: Arc<RwLock<HashMap<(String, PublicId), BTreeMap<u32, WrappedKey>>>>,
    requests: Arc<RwLock<HashMap<String, KeyRequest>>>,
    wrap_writes: AtomicU64,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of wrap rows written (inserted or replaced) so far.
    pub fn wrap_writes(&self) -> u64 {
        self.wrap_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn authorize(&self, resource_id: &str, principal: &Principal) -> Result<bool, StoreError> {
        let mut members = self.members.write().await;
        let set = members.entry(resource_id.to_string()).or_default();
        if set.contains_key(&principal.public_id) {
            return Ok(false);
        }
        set.insert(principal.public_id, principal.clone());
        Ok(true)
    }

    async fn revoke(&self, resource_id: &str, principal: &PublicId) -> Result<bool, StoreError> {
        let mut members = self.members.write().await;
        Ok(members
            .get_mut(resource_id)
            .map(|set| set.remove(principal).is_some())
            .unwrap_or(false))
    }

    async fn is_authorized(&self, resource_id: &str, principal: &PublicId) -> Result<bool, StoreError> {
        let members = self.members.read().await;
        Ok(members
            .get(resource_id)
            .map(|set| set.contains_key(principal))
            .unwrap_or(false))
    }

    async fn authorized_principals(&self, resource_id: &str) -> Result<Vec<Principal>, StoreError> {
        let members = self.members.read().await;
        Ok(members
            .get(resource_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn current_key_version(&self, resource_id: &str) -> Result<Option<u32>, StoreError> {
        Ok(self.versions.read().await.get(resource_id).copied())
    }

    async fn advance_key_version(
        &self,
        resource_id: &str,
        expected: Option<u32>,
        next: u32,
    ) -> Result<bool, StoreError> {
        let mut versions = self.versions.write().await;
        let current = versions.get(resource_id).copied();
        if current != expected {
            return Ok(false);
        }
        if current.map_or(false, |v| next <= v) {
            return Err(StoreError::OperationFailed(format!(
                "key version must increase: {next} <= {}",
                current.unwrap_or_default()
            )));
        }
        versions.insert(resource_id.to_string(), next);
        Ok(true)
    }

    async fn put_wrapped_key(&self, wrapped: &WrappedKey) -> Result<PutOutcome, StoreError> {
        let mut wraps = self.wraps.write().await;
        let versions = wraps
            .entry((wrapped.resource_id.clone(), wrapped.recipient_public_id))
            .or_default();
        let outcome = match versions.insert(wrapped.key_version, wrapped.clone()) {
            None => PutOutcome::Inserted,
            Some(_) => PutOutcome::Replaced,
        };
        self.wrap_writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn load_wrapped_key(
        &self,
        resource_id: &str,
        recipient: &PublicId,
    ) -> Result<Option<WrappedKey>, StoreError> {
        let wraps = self.wraps.read().await;
        Ok(wraps
            .get(&(resource_id.to_string(), *recipient))
            .and_then(|versions| versions.values().next_back().cloned()))
    }

    async fn load_wrapped_key_version(
        &self,
        resource_id: &str,
        recipient: &PublicId,
        key_version: u32,
    ) -> Result<Option<WrappedKey>, StoreError> {
        let wraps = self.wraps.read().await;
        Ok(wraps
            .get(&(resource_id.to_string(), *recipient))
            .and_then(|versions| versions.get(&key_version).cloned()))
    }

    async fn wrapped_key_versions(&self, resource_id: &str, recipient: &PublicId) -> Result<Vec<u32>, StoreError> {
        let wraps = self.wraps.read().await;
        Ok(wraps
            .get(&(resource_id.to_string(), *recipient))
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn list_wrapped_keys(&self, resource_id: &str) -> Result<Vec<WrappedKey>, StoreError> {
        let wraps = self.wraps.read().await;
        let mut out: Vec<WrappedKey> = wraps
            .iter()
            .filter(|((rid, _), _)| rid == resource_id)
            .filter_map(|(_, versions)| versions.values().next_back().cloned())
            .collect();
        out.sort_by_key(|w| w.recipient_public_id);
        Ok(out)
    }

    async fn insert_key_request(&self, request: &KeyRequest) -> Result<InsertOutcome, StoreError> {
        let mut requests = self.requests.write().await;
        if let Some(existing) = requests.values().find(|r| {
            r.is_pending()
                && r.resource_id == request.resource_id
                && r.requester_public_id == request.requester_public_id
        }) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if requests.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists(request.id.clone()));
        }
        requests.insert(request.id.clone(), request.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn load_key_request(&self, id: &str) -> Result<Option<KeyRequest>, StoreError> {
        Ok(self.requests.read().await.get(id).cloned())
    }

    async fn list_pending_requests(&self, resource_id: Option<&str>) -> Result<Vec<KeyRequest>, StoreError> {
        let requests = self.requests.read().await;
        let mut out: Vec<KeyRequest> = requests
            .values()
            .filter(|r| r.is_pending() && resource_id.map_or(true, |rid| r.resource_id == rid))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn mark_request_fulfilled(&self, id: &str, at: u64) -> Result<bool, StoreError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("key request {id}")))?;
        if request.status != KeyRequestStatus::Pending {
            return Ok(false);
        }
        request.status = KeyRequestStatus::Fulfilled;
        request.fulfilled_at = Some(at);
        Ok(true)
    }
}
