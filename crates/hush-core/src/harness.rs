//! Test harness for hush core.
//!
//! Builds connected signer sessions over the in-memory relay network and
//! small teams of key holders sharing one store.

use std::sync::Arc;
use std::time::Duration;

use hush_crypto::identity::Principal;
use hush_crypto::Identity;
use hush_transport::{MemoryRelayNetwork, ReconnectPolicy};

use crate::channel_keys::ChannelKeyManager;
use crate::custodian::{AckMode, Custodian, CustodianHandle};
use crate::errors::{CoreError, SignerError};
use crate::key_requests::{KeyRequestLedger, KeyRequestResponder};
use crate::signer::{RemoteSignerSession, SignerConfig};
use crate::store::{InMemoryKeyStore, KeyStore};

pub const TEST_RELAYS: [&str; 2] = ["wss://relay.one", "wss://relay.two"];

pub fn test_relays() -> Vec<String> {
    TEST_RELAYS.iter().map(|r| r.to_string()).collect()
}

/// Signer config with short timeouts and backoff for tests.
pub fn fast_signer_config() -> SignerConfig {
    SignerConfig::new(test_relays())
        .with_handshake_timeout(Duration::from_millis(500))
        .with_request_timeout(Duration::from_millis(500))
        .with_reconnect_policy(ReconnectPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            max_attempts: 3,
            jitter: 0.0,
        })
}

pub struct ConnectedSigner {
    pub session: RemoteSignerSession,
    pub custodian: Custodian,
    pub handle: CustodianHandle,
}

/// Start a custodian, hand it the session's descriptor and complete the
/// handshake.
pub async fn connect_signer(
    network: &MemoryRelayNetwork,
    config: SignerConfig,
    mode: AckMode,
) -> Result<ConnectedSigner, SignerError> {
    let relays = config.relays.clone();
    let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config)?;
    let custodian = Custodian::new(Identity::generate(), Arc::new(network.transport()), relays);
    let handle = custodian.serve().await?;

    custodian.accept(session.descriptor(), mode).await?;
    session.await_connect().await?;
    Ok(ConnectedSigner {
        session,
        custodian,
        handle,
    })
}

/// Wait until the network has `expected` live subscriptions.
pub async fn wait_for_subscriptions(network: &MemoryRelayNetwork, expected: usize, within: Duration) -> bool {
    let poll = async {
        while network.active_subscription_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(within, poll).await.is_ok()
}

/// Principals sharing one store and ledger.
pub struct Team {
    pub store: Arc<InMemoryKeyStore>,
    pub ledger: Arc<KeyRequestLedger>,
}

impl Team {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryKeyStore::new());
        Self {
            ledger: Arc::new(KeyRequestLedger::new(store.clone())),
            store,
        }
    }

    /// A fresh principal with its own key manager.
    pub fn member(&self) -> Arc<ChannelKeyManager> {
        Arc::new(ChannelKeyManager::new(Identity::generate(), self.store.clone()))
    }

    pub async fn authorize(&self, resource_id: &str, member: &ChannelKeyManager) -> Result<(), CoreError> {
        self.store
            .authorize(resource_id, &Principal::new(member.public_id()))
            .await?;
        Ok(())
    }

    pub fn responder(&self, holder: Arc<ChannelKeyManager>) -> KeyRequestResponder {
        KeyRequestResponder::new(self.ledger.clone(), holder)
    }
}

impl Default for Team {
    fn default() -> Self {
        Self::new()
    }
}

/// Authorize a newcomer, have it request the key and let `holder` fulfill
/// the request over the push path. Returns the newcomer's unwrapped key
/// version.
pub async fn run_ledger_flow(resource_id: &str) -> Result<u32, CoreError> {
    let team = Team::new();
    let holder = team.member();
    holder.create_channel_key(resource_id).await?;

    let newcomer = team.member();
    team.authorize(resource_id, &newcomer).await?;

    let responder = team.responder(holder.clone());
    let events = team.ledger.subscribe();
    let push = tokio::spawn(async move { responder.run_push(events).await });

    team.ledger
        .request_key(resource_id, &Principal::new(newcomer.public_id()))
        .await?;

    let mut fulfilled = team.ledger.subscribe();
    let pending = team.ledger.list_pending(Some(resource_id)).await?;
    if !pending.is_empty() {
        let _ = tokio::time::timeout(Duration::from_secs(5), fulfilled.recv()).await;
    }
    push.abort();

    let key = newcomer.resource_key(resource_id).await?;
    Ok(key.version())
}
