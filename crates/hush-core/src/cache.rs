//! In-memory key caches owned by sessions and managers.
//!
//! - `ConversationKeyCache`: bounded, evicts the oldest entry first.
//! - `ResourceKeyCache`: per-resource keyrings with a fixed time-to-live.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use hush_crypto::conversation::{derive_key, ConversationKey};
use hush_crypto::{Identity, PublicId, ResourceKey};

/// Default number of conversation keys kept per owner.
pub const DEFAULT_CONVERSATION_CACHE_CAPACITY: usize = 256;

/// Default lifetime of a cached resource keyring.
pub const DEFAULT_RESOURCE_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type PairKey = (PublicId, PublicId);

struct ConversationEntries {
    keys: HashMap<PairKey, ConversationKey>,
    order: VecDeque<PairKey>,
}

/// Cache of derived conversation keys keyed by `(local, remote)`.
pub struct ConversationKeyCache {
    capacity: usize,
    inner: Mutex<ConversationEntries>,
}

impl ConversationKeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(ConversationEntries {
                keys: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Cached key for the pair, deriving and inserting it on a miss.
    pub fn get_or_derive(&self, local: &Identity, remote: &PublicId) -> ConversationKey {
        let pair = (local.public_id(), *remote);
        if let Some(key) = self.inner.lock().keys.get(&pair) {
            return key.clone();
        }

        let key = derive_key(local, remote);
        let mut inner = self.inner.lock();
        if !inner.keys.contains_key(&pair) {
            if inner.order.len() >= self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.keys.remove(&oldest);
                }
            }
            inner.order.push_back(pair);
            inner.keys.insert(pair, key.clone());
        }
        key
    }

    /// Drop every cached key involving `remote`.
    pub fn evict(&self, remote: &PublicId) {
        let mut inner = self.inner.lock();
        inner.keys.retain(|(_, r), _| r != remote);
        inner.order.retain(|(_, r)| r != remote);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.keys.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversationKeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERSATION_CACHE_CAPACITY)
    }
}

/// Every version of one resource's key this holder has unwrapped.
#[derive(Clone, Debug)]
pub struct ResourceKeyring {
    resource_id: String,
    keys: BTreeMap<u32, ResourceKey>,
}

impl ResourceKeyring {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            keys: BTreeMap::new(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn insert(&mut self, key: ResourceKey) {
        self.keys.insert(key.version(), key);
    }

    /// Highest version held.
    pub fn current(&self) -> Option<&ResourceKey> {
        self.keys.values().next_back()
    }

    pub fn get(&self, version: u32) -> Option<&ResourceKey> {
        self.keys.get(&version)
    }

    pub fn versions(&self) -> Vec<u32> {
        self.keys.keys().copied().collect()
    }
}

struct CachedKeyring {
    keyring: ResourceKeyring,
    expires_at: Instant,
}

/// Unwrapped resource keys keyed by resource id, with bounded expiry.
pub struct ResourceKeyCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedKeyring>>,
}

impl ResourceKeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live keyring for `resource_id`. Expired entries are dropped.
    pub fn get(&self, resource_id: &str) -> Option<ResourceKeyring> {
        let mut entries = self.entries.lock();
        match entries.get(resource_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.keyring.clone()),
            Some(_) => {
                entries.remove(resource_id);
                None
            }
            None => None,
        }
    }

    /// Add a key to its resource's keyring and restart the expiry clock.
    pub fn insert(&self, key: ResourceKey) {
        let mut entries = self.entries.lock();
        let expires_at = Instant::now() + self.ttl;
        let now = Instant::now();
        let entry = entries
            .entry(key.resource_id().to_string())
            .or_insert_with(|| CachedKeyring {
                keyring: ResourceKeyring::new(key.resource_id()),
                expires_at,
            });
        if entry.expires_at <= now {
            entry.keyring = ResourceKeyring::new(key.resource_id());
        }
        entry.keyring.insert(key);
        entry.expires_at = expires_at;
    }

    pub fn evict(&self, resource_id: &str) {
        self.entries.lock().remove(resource_id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for ResourceKeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_RESOURCE_KEY_TTL)
    }
}
