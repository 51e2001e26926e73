//! Per-resource symmetric keys: creation, wrapping, distribution, rotation.
//!
//! A `ChannelKeyManager` acts for one local identity. It only ever hands the
//! store wrapped keys; resource keys live in its `ResourceKeyCache`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use hush_crypto::identity::Principal;
use hush_crypto::resource_key::{message_key_version, MessageError};
use hush_crypto::wrap::{self, WrapError};
use hush_crypto::{Identity, PublicId, ResourceKey, WrappedKey};
use hush_transport::unix_now;

use crate::cache::{ConversationKeyCache, ResourceKeyCache, ResourceKeyring};
use crate::errors::KeyError;
use crate::store::KeyStore;

/// Outcome of one `distribute_to_pending` pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub resource_id: String,
    pub key_version: u32,
    /// Recipients that received a new wrap in this pass.
    pub wrapped: Vec<PublicId>,
    /// Authorized principals that already held the current version.
    pub already_current: usize,
    pub failed: Vec<(PublicId, String)>,
}

impl DistributionReport {
    pub fn writes(&self) -> usize {
        self.wrapped.len()
    }
}

/// How a message should be shown to a reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageView {
    Text(String),
    /// Labeled stand-in for a message that could not be decrypted.
    Placeholder(String),
}

impl MessageView {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }

    /// Placeholder labeled by why decryption failed.
    pub fn placeholder_for(error: &KeyError) -> Self {
        Self::Placeholder(placeholder_label(error).to_string())
    }
}

impl std::fmt::Display for MessageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Placeholder(label) => write!(f, "[{label}]"),
        }
    }
}

pub struct ChannelKeyManager {
    identity: Identity,
    store: Arc<dyn KeyStore>,
    conversation_keys: ConversationKeyCache,
    resource_keys: ResourceKeyCache,
}

impl ChannelKeyManager {
    pub fn new(identity: Identity, store: Arc<dyn KeyStore>) -> Self {
        Self {
            identity,
            store,
            conversation_keys: ConversationKeyCache::default(),
            resource_keys: ResourceKeyCache::default(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.resource_keys = ResourceKeyCache::new(ttl);
        self
    }

    pub fn public_id(&self) -> PublicId {
        self.identity.public_id()
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Fresh first-version key for `resource_id`.
    pub fn generate(resource_id: &str) -> ResourceKey {
        ResourceKey::generate(resource_id, 1)
    }

    /// Allocate version 1 for a new resource and wrap it for the creator.
    pub async fn create_channel_key(&self, resource_id: &str) -> Result<ResourceKey, KeyError> {
        if !self.store.advance_key_version(resource_id, None, 1).await? {
            return Err(KeyError::AlreadyExists {
                resource_id: resource_id.to_string(),
            });
        }
        self.store
            .authorize(resource_id, &Principal::new(self.public_id()))
            .await?;

        let key = Self::generate(resource_id);
        let wrapped = self.wrap_for(&key, &self.public_id())?;
        self.store.put_wrapped_key(&wrapped).await?;
        self.resource_keys.insert(key.clone());
        info!(resource = resource_id, "channel key created");
        Ok(key)
    }

    /// Wrap `key` for `recipient`, stamped with this manager's identity.
    pub fn wrap_for(&self, key: &ResourceKey, recipient: &PublicId) -> Result<WrappedKey, KeyError> {
        let conv = self.conversation_keys.get_or_derive(&self.identity, recipient);
        Ok(wrap::wrap_with(key, &conv, unix_now())?)
    }

    /// Unwrap a key addressed to this manager's identity.
    pub fn unwrap(&self, wrapped: &WrappedKey) -> Result<ResourceKey, KeyError> {
        if wrapped.recipient_public_id != self.public_id() {
            return Err(WrapError::NotRecipient {
                expected: wrapped.recipient_public_id,
            }
            .into());
        }
        let conv = self
            .conversation_keys
            .get_or_derive(&self.identity, &wrapped.wrapped_by_public_id);
        Ok(wrap::unwrap_with(wrapped, &conv)?)
    }

    /// Wrap the current key for every authorized principal that lacks a wrap
    /// at the current version. Safe to repeat and to run from several holders.
    pub async fn distribute_to_pending(&self, resource_id: &str) -> Result<DistributionReport, KeyError> {
        let key = self.current_key(resource_id).await?;
        let principals = self.store.authorized_principals(resource_id).await?;
        let holders: HashSet<PublicId> = self
            .store
            .list_wrapped_keys(resource_id)
            .await?
            .into_iter()
            .filter(|w| w.key_version >= key.version())
            .map(|w| w.recipient_public_id)
            .collect();

        let mut report = DistributionReport {
            resource_id: resource_id.to_string(),
            key_version: key.version(),
            ..Default::default()
        };

        for principal in principals {
            let recipient = principal.public_id;
            if holders.contains(&recipient) {
                report.already_current += 1;
                continue;
            }
            let wrapped = match self.wrap_for(&key, &recipient) {
                Ok(w) => w,
                Err(e) => {
                    warn!(resource = resource_id, recipient = %recipient.short(), error = %e, "wrap failed");
                    report.failed.push((recipient, e.to_string()));
                    continue;
                }
            };
            self.store.put_wrapped_key(&wrapped).await?;
            report.wrapped.push(recipient);
        }

        if report.writes() > 0 {
            info!(
                resource = resource_id,
                version = report.key_version,
                wrapped = report.writes(),
                "distributed channel key"
            );
        } else {
            debug!(resource = resource_id, "no principals awaiting a key");
        }
        Ok(report)
    }

    /// Replace the resource key and wrap the new version for every authorized
    /// principal. Fails with `RotationConflict` if the version moved past the
    /// one this holder knows.
    pub async fn rotate(&self, resource_id: &str) -> Result<u32, KeyError> {
        if !self.store.is_authorized(resource_id, &self.public_id()).await? {
            return Err(KeyError::NotAuthorized {
                resource_id: resource_id.to_string(),
                principal: self.public_id(),
            });
        }
        let known = self.resource_key(resource_id).await?.version();
        let next = known + 1;
        if !self.store.advance_key_version(resource_id, Some(known), next).await? {
            return Err(KeyError::RotationConflict {
                resource_id: resource_id.to_string(),
                expected: Some(known),
            });
        }

        let key = ResourceKey::generate(resource_id, next);
        self.resource_keys.insert(key.clone());

        let principals = self.store.authorized_principals(resource_id).await?;
        for principal in &principals {
            let wrapped = self.wrap_for(&key, &principal.public_id)?;
            self.store.put_wrapped_key(&wrapped).await?;
        }
        info!(
            resource = resource_id,
            version = next,
            recipients = principals.len(),
            "channel key rotated"
        );
        Ok(next)
    }

    /// Newest key this holder has, fetching and unwrapping its stored wrap on
    /// a cache miss.
    pub async fn resource_key(&self, resource_id: &str) -> Result<ResourceKey, KeyError> {
        let keyring = match self.resource_keys.get(resource_id) {
            Some(keyring) => keyring,
            None => self.refresh(resource_id).await?,
        };
        keyring.current().cloned().ok_or_else(|| KeyError::NoKeyAvailable {
            resource_id: resource_id.to_string(),
            version: None,
        })
    }

    /// A specific key version. A cold keyring is first refilled with the
    /// current wrap; a version still missing is fetched and unwrapped from the
    /// wrap stored for it.
    pub async fn key_for_version(&self, resource_id: &str, version: u32) -> Result<ResourceKey, KeyError> {
        let keyring = match self.resource_keys.get(resource_id) {
            Some(keyring) => Some(keyring),
            None => match self.refresh(resource_id).await {
                Ok(keyring) => Some(keyring),
                Err(KeyError::NoKeyAvailable { .. }) => None,
                Err(e) => return Err(e),
            },
        };
        if let Some(key) = keyring.and_then(|ring| ring.get(version).cloned()) {
            return Ok(key);
        }
        let wrapped = self
            .store
            .load_wrapped_key_version(resource_id, &self.public_id(), version)
            .await?
            .ok_or_else(|| KeyError::NoKeyAvailable {
                resource_id: resource_id.to_string(),
                version: Some(version),
            })?;
        let key = self.unwrap(&wrapped)?;
        debug!(resource = resource_id, version, "unwrapped channel key version");
        self.resource_keys.insert(key.clone());
        Ok(key)
    }

    /// Key at the store's current version.
    async fn current_key(&self, resource_id: &str) -> Result<ResourceKey, KeyError> {
        let version = self
            .store
            .current_key_version(resource_id)
            .await?
            .ok_or_else(|| KeyError::NoKeyAvailable {
                resource_id: resource_id.to_string(),
                version: None,
            })?;
        self.key_for_version(resource_id, version).await
    }

    /// Re-fetch this holder's stored wrap and add it to the keyring.
    pub async fn refresh(&self, resource_id: &str) -> Result<ResourceKeyring, KeyError> {
        let wrapped = self
            .store
            .load_wrapped_key(resource_id, &self.public_id())
            .await?
            .ok_or_else(|| KeyError::NoKeyAvailable {
                resource_id: resource_id.to_string(),
                version: None,
            })?;
        let key = self.unwrap(&wrapped)?;
        debug!(resource = resource_id, version = key.version(), "unwrapped channel key");
        self.resource_keys.insert(key.clone());

        Ok(self.resource_keys.get(resource_id).unwrap_or_else(|| {
            let mut ring = ResourceKeyring::new(resource_id);
            ring.insert(key);
            ring
        }))
    }

    pub fn evict(&self, resource_id: &str) {
        self.resource_keys.evict(resource_id);
    }

    /// Wrap the current key for an authorized `recipient` (ledger fulfillment).
    pub async fn wrap_current_for(&self, resource_id: &str, recipient: &PublicId) -> Result<WrappedKey, KeyError> {
        if !self.store.is_authorized(resource_id, recipient).await? {
            return Err(KeyError::NotAuthorized {
                resource_id: resource_id.to_string(),
                principal: *recipient,
            });
        }
        let key = self.current_key(resource_id).await?;
        self.wrap_for(&key, recipient)
    }

    pub async fn encrypt_message(&self, resource_id: &str, plaintext: &[u8]) -> Result<String, KeyError> {
        let key = self.current_key(resource_id).await?;
        Ok(key.seal_message(plaintext)?)
    }

    pub async fn decrypt_message(&self, resource_id: &str, ciphertext: &str) -> Result<Vec<u8>, KeyError> {
        let version = message_key_version(ciphertext)?;
        let key = self.key_for_version(resource_id, version).await?;
        Ok(key.open_message(ciphertext)?)
    }

    /// Decrypt for display; failures become a labeled placeholder.
    pub async fn display_message(&self, resource_id: &str, ciphertext: &str) -> MessageView {
        match self.decrypt_message(resource_id, ciphertext).await {
            Ok(plaintext) => MessageView::Text(String::from_utf8_lossy(&plaintext).into_owned()),
            Err(e) => {
                debug!(resource = resource_id, error = %e, "showing placeholder for message");
                MessageView::placeholder_for(&e)
            }
        }
    }
}

fn placeholder_label(error: &KeyError) -> &'static str {
    match error {
        KeyError::NoKeyAvailable { .. } => "encrypted message: no key for this channel yet",
        e if e.is_authentication() => "encrypted message: failed verification",
        KeyError::Message(MessageError::Malformed | MessageError::UnsupportedFormat) => {
            "encrypted message: unreadable format"
        }
        _ => "encrypted message: unavailable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKeyStore;

    fn setup() -> (Arc<InMemoryKeyStore>, ChannelKeyManager) {
        let store = Arc::new(InMemoryKeyStore::new());
        let manager = ChannelKeyManager::new(Identity::generate(), store.clone());
        (store, manager)
    }

    #[tokio::test]
    async fn test_create_wraps_for_creator() {
        let (store, manager) = setup();
        let key = manager.create_channel_key("general").await.unwrap();
        assert_eq!(key.version(), 1);

        let wrapped = store
            .load_wrapped_key("general", &manager.public_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wrapped.wrapped_by_public_id, manager.public_id());
        assert!(manager.unwrap(&wrapped).unwrap().same_key(&key));

        assert!(matches!(
            manager.create_channel_key("general").await,
            Err(KeyError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrap_for_other_principal() {
        let (_store, manager) = setup();
        let store2 = Arc::new(InMemoryKeyStore::new());
        let other = ChannelKeyManager::new(Identity::generate(), store2);

        let key = ChannelKeyManager::generate("general");
        let wrapped = manager.wrap_for(&key, &other.public_id()).unwrap();
        assert!(other.unwrap(&wrapped).unwrap().same_key(&key));
        assert!(matches!(
            manager.unwrap(&wrapped),
            Err(KeyError::Wrap(WrapError::NotRecipient { .. }))
        ));
    }

    #[tokio::test]
    async fn test_distribute_is_idempotent() {
        let (store, manager) = setup();
        manager.create_channel_key("general").await.unwrap();
        for _ in 0..3 {
            let p = Principal::new(Identity::generate().public_id());
            store.authorize("general", &p).await.unwrap();
        }

        let first = manager.distribute_to_pending("general").await.unwrap();
        assert_eq!(first.writes(), 3);
        assert_eq!(first.already_current, 1);

        let writes = store.wrap_writes();
        let second = manager.distribute_to_pending("general").await.unwrap();
        assert_eq!(second.writes(), 0);
        assert_eq!(second.already_current, 4);
        assert_eq!(store.wrap_writes(), writes);
    }

    #[tokio::test]
    async fn test_no_key_is_explicit() {
        let (_store, manager) = setup();
        let err = manager.encrypt_message("general", b"hi").await.unwrap_err();
        assert!(err.is_no_key());

        let view = manager.display_message("general", "aGMAAAAB").await;
        assert!(view.is_placeholder());
    }

    #[tokio::test]
    async fn test_message_round_trip_and_tamper_placeholder() {
        let (_store, manager) = setup();
        manager.create_channel_key("general").await.unwrap();
        let ct = manager.encrypt_message("general", b"hello team").await.unwrap();
        assert_eq!(
            manager.display_message("general", &ct).await,
            MessageView::Text("hello team".into())
        );

        let mut tampered = ct.into_bytes();
        let last = tampered.len() - 3;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(manager.display_message("general", &tampered).await.is_placeholder());
    }

    #[tokio::test]
    async fn test_stale_rotation_conflicts() {
        let store = Arc::new(InMemoryKeyStore::new());
        let a = ChannelKeyManager::new(Identity::generate(), store.clone());
        let b = ChannelKeyManager::new(Identity::generate(), store.clone());
        a.create_channel_key("general").await.unwrap();
        store
            .authorize("general", &Principal::new(b.public_id()))
            .await
            .unwrap();
        a.distribute_to_pending("general").await.unwrap();
        assert_eq!(b.resource_key("general").await.unwrap().version(), 1);

        assert_eq!(a.rotate("general").await.unwrap(), 2);
        let err = b.rotate("general").await.unwrap_err();
        assert_eq!(
            err,
            KeyError::RotationConflict {
                resource_id: "general".into(),
                expected: Some(1)
            }
        );

        b.evict("general");
        assert_eq!(b.rotate("general").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_old_messages_readable_after_eviction() {
        let store = Arc::new(InMemoryKeyStore::new());
        let p1 = ChannelKeyManager::new(Identity::generate(), store.clone());
        let p2 = ChannelKeyManager::new(Identity::generate(), store.clone());
        p1.create_channel_key("general").await.unwrap();
        let m1 = p1.encrypt_message("general", b"first").await.unwrap();

        store
            .authorize("general", &Principal::new(p2.public_id()))
            .await
            .unwrap();
        p1.distribute_to_pending("general").await.unwrap();
        p1.rotate("general").await.unwrap();
        let m2 = p1.encrypt_message("general", b"second").await.unwrap();

        for holder in [&p1, &p2] {
            holder.evict("general");
            assert_eq!(holder.decrypt_message("general", &m1).await.unwrap(), b"first");
            assert_eq!(holder.decrypt_message("general", &m2).await.unwrap(), b"second");
        }

        // a fresh manager for the same identity starts from the store alone
        let restarted = ChannelKeyManager::new(p1.identity.clone(), store.clone());
        assert_eq!(restarted.decrypt_message("general", &m1).await.unwrap(), b"first");
        assert_eq!(restarted.resource_key("general").await.unwrap().version(), 2);
    }

    #[tokio::test]
    async fn test_joiner_after_rotation_cannot_read_older_versions() {
        let store = Arc::new(InMemoryKeyStore::new());
        let p1 = ChannelKeyManager::new(Identity::generate(), store.clone());
        let late = ChannelKeyManager::new(Identity::generate(), store.clone());
        p1.create_channel_key("general").await.unwrap();
        let m1 = p1.encrypt_message("general", b"before").await.unwrap();
        p1.rotate("general").await.unwrap();

        store
            .authorize("general", &Principal::new(late.public_id()))
            .await
            .unwrap();
        p1.distribute_to_pending("general").await.unwrap();
        assert_eq!(
            late.decrypt_message("general", &m1).await.unwrap_err(),
            KeyError::NoKeyAvailable {
                resource_id: "general".into(),
                version: Some(1)
            }
        );
    }

    #[tokio::test]
    async fn test_wrap_current_requires_membership() {
        let (_store, manager) = setup();
        manager.create_channel_key("general").await.unwrap();
        let outsider = Identity::generate().public_id();
        assert!(matches!(
            manager.wrap_current_for("general", &outsider).await,
            Err(KeyError::NotAuthorized { .. })
        ));
    }
}
