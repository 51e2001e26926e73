//! Channel key administration against the local key database.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use hush_core::sqlite_store::SqliteKeyStore;
use hush_core::{ChannelKeyManager, DistributionReport, KeyError, KeyRequestLedger, KeyStore, MessageView};
use hush_crypto::identity::Principal;
use hush_crypto::{Identity, PublicId};

use crate::config::Config;
use crate::identity::{IdentityFile, IdentityInfo};

/// Local identity plus the key manager and ledger over one store.
pub struct KeyContext {
    pub identity: IdentityInfo,
    pub store: Arc<dyn KeyStore>,
    pub keys: Arc<ChannelKeyManager>,
    pub ledger: Arc<KeyRequestLedger>,
}

impl KeyContext {
    pub fn new(identity: Identity, info: IdentityInfo, store: Arc<dyn KeyStore>, cache_ttl: Duration) -> Self {
        let keys = Arc::new(ChannelKeyManager::new(identity, store.clone()).with_cache_ttl(cache_ttl));
        Self {
            identity: info,
            ledger: Arc::new(KeyRequestLedger::new(store.clone())),
            store,
            keys,
        }
    }

    /// Load the configured identity and open the key database.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let (identity, info) = IdentityFile::new(config.identity_path()).load_or_generate()?;

        let db_path = config.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let store = SqliteKeyStore::new(&db_path)?;
        tracing::debug!(db = %db_path.display(), "opened key database");

        Ok(Self::new(identity, info, Arc::new(store), config.cache.resource_key_ttl()))
    }

    pub fn public_id(&self) -> PublicId {
        self.identity.public_id
    }

    pub async fn create(&self, resource_id: &str) -> Result<u32, KeyError> {
        Ok(self.keys.create_channel_key(resource_id).await?.version())
    }

    /// Authorize `member`; true when newly added. Wraps follow on the next
    /// distribution pass.
    pub async fn grant(&self, resource_id: &str, member: PublicId, name: Option<String>) -> Result<bool, KeyError> {
        let mut principal = Principal::new(member);
        principal.display_name = name;
        Ok(self.store.authorize(resource_id, &principal).await?)
    }

    pub async fn distribute(&self, resource_id: &str) -> Result<DistributionReport, KeyError> {
        self.keys.distribute_to_pending(resource_id).await
    }

    pub async fn rotate(&self, resource_id: &str) -> Result<u32, KeyError> {
        self.keys.rotate(resource_id).await
    }

    pub async fn encrypt(&self, resource_id: &str, plaintext: &str) -> Result<String, KeyError> {
        self.keys.encrypt_message(resource_id, plaintext.as_bytes()).await
    }

    /// Decrypt for display. The error, if any, comes back alongside its
    /// placeholder so callers can pick an exit code.
    pub async fn decrypt(&self, resource_id: &str, ciphertext: &str) -> (MessageView, Option<KeyError>) {
        match self.keys.decrypt_message(resource_id, ciphertext.trim()).await {
            Ok(plaintext) => (MessageView::Text(String::from_utf8_lossy(&plaintext).into_owned()), None),
            Err(e) => (MessageView::placeholder_for(&e), Some(e)),
        }
    }

    pub async fn status(&self, resource_id: &str) -> Result<ChannelStatus, KeyError> {
        let current_version = self.store.current_key_version(resource_id).await?;
        let wraps = self.store.list_wrapped_keys(resource_id).await?;

        let members = self
            .store
            .authorized_principals(resource_id)
            .await?
            .into_iter()
            .map(|p| {
                let wrapped_version = wraps
                    .iter()
                    .find(|w| w.recipient_public_id == p.public_id)
                    .map(|w| w.key_version);
                MemberStatus {
                    state: MemberState::classify(wrapped_version, current_version),
                    public_id: p.public_id,
                    display_name: p.display_name,
                    wrapped_version,
                }
            })
            .collect();

        let held_versions = self
            .store
            .wrapped_key_versions(resource_id, &self.public_id())
            .await?;

        Ok(ChannelStatus {
            resource_id: resource_id.to_string(),
            current_version,
            held_versions,
            members,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub resource_id: String,
    pub current_version: Option<u32>,
    /// Versions this identity can unwrap right now
    pub held_versions: Vec<u32>,
    pub members: Vec<MemberStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberStatus {
    pub public_id: PublicId,
    pub display_name: Option<String>,
    pub wrapped_version: Option<u32>,
    pub state: MemberState,
}

impl MemberStatus {
    pub fn state(&self) -> MemberState {
        self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// Holds a wrap of the current version
    Current,
    /// Holds a wrap of an older version only
    Stale,
    /// Authorized, nothing wrapped yet
    Pending,
}

impl MemberState {
    fn classify(wrapped: Option<u32>, current: Option<u32>) -> Self {
        match (wrapped, current) {
            (None, _) => Self::Pending,
            (Some(w), Some(c)) if w < c => Self::Stale,
            _ => Self::Current,
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Current => "current",
            Self::Stale => "stale",
            Self::Pending => "pending",
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hush_core::InMemoryKeyStore;
    use std::path::PathBuf;
    use std::time::SystemTime;

    pub(crate) fn context_on(store: Arc<dyn KeyStore>) -> KeyContext {
        context_for(Identity::generate(), store)
    }

    fn context_for(identity: Identity, store: Arc<dyn KeyStore>) -> KeyContext {
        let info = IdentityInfo {
            public_id: identity.public_id(),
            fingerprint: String::new(),
            created_at: SystemTime::now(),
            path: PathBuf::from("identity.json"),
        };
        KeyContext::new(identity, info, store, Duration::from_secs(60))
    }

    #[test]
    fn test_member_state() {
        assert_eq!(MemberState::classify(None, Some(2)), MemberState::Pending);
        assert_eq!(MemberState::classify(Some(1), Some(2)), MemberState::Stale);
        assert_eq!(MemberState::classify(Some(2), Some(2)), MemberState::Current);
    }

    #[tokio::test]
    async fn test_grant_distribute_status() {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let owner = context_on(store.clone());
        let member = context_on(store.clone());

        assert_eq!(owner.create("general").await.unwrap(), 1);
        assert!(owner.grant("general", member.public_id(), Some("P2".into())).await.unwrap());
        assert!(!owner.grant("general", member.public_id(), None).await.unwrap());

        let status = owner.status("general").await.unwrap();
        assert_eq!(status.current_version, Some(1));
        assert_eq!(status.held_versions, vec![1]);
        let pending = status.members.iter().find(|m| m.public_id == member.public_id()).unwrap();
        assert_eq!(pending.state(), MemberState::Pending);
        assert_eq!(pending.display_name.as_deref(), Some("P2"));

        let report = owner.distribute("general").await.unwrap();
        assert_eq!(report.wrapped, vec![member.public_id()]);

        let status = member.status("general").await.unwrap();
        assert!(status.members.iter().all(|m| m.state() == MemberState::Current));
        assert_eq!(status.held_versions, vec![1]);
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_and_placeholder() {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let owner = context_on(store.clone());
        let outsider = context_on(store);

        owner.create("general").await.unwrap();
        let sealed = owner.encrypt("general", "hello channel").await.unwrap();

        let (view, err) = owner.decrypt("general", &format!("{sealed}\n")).await;
        assert_eq!(view, MessageView::Text("hello channel".into()));
        assert!(err.is_none());

        let (view, err) = outsider.decrypt("general", &sealed).await;
        assert!(view.is_placeholder());
        assert!(err.unwrap().is_no_key());
    }

    #[tokio::test]
    async fn test_rotation_marks_stale_until_rewrapped() {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let owner = context_on(store.clone());
        let member_identity = Identity::generate();
        let member = context_for(member_identity.clone(), store.clone());

        owner.create("general").await.unwrap();
        owner.grant("general", member.public_id(), None).await.unwrap();
        owner.distribute("general").await.unwrap();
        let first = owner.encrypt("general", "v1").await.unwrap();
        assert_eq!(owner.rotate("general").await.unwrap(), 2);

        let status = owner.status("general").await.unwrap();
        assert_eq!(status.current_version, Some(2));
        assert!(status.members.iter().all(|m| m.wrapped_version == Some(2)));
        assert_eq!(member.status("general").await.unwrap().held_versions, vec![1, 2]);

        // a later process for the member still reads the first version
        let later = context_for(member_identity, store);
        let (view, err) = later.decrypt("general", &first).await;
        assert!(err.is_none());
        assert_eq!(view, MessageView::Text("v1".into()));
    }

    #[tokio::test]
    async fn test_status_of_unknown_resource() {
        let owner = context_on(Arc::new(InMemoryKeyStore::new()));
        let status = owner.status("nowhere").await.unwrap();
        assert!(status.current_version.is_none());
        assert!(status.held_versions.is_empty());
        assert!(status.members.is_empty());
    }
}
