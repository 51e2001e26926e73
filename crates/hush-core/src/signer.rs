//! Remote signer session (client side).
//!
//! The client holds only an ephemeral identity. It shows the user a
//! connection descriptor, waits for the signer's connect response on the
//! relays, then issues correlated requests over the conversation cipher.
//!
//! ```text
//! Idle -> AwaitingConnect -> Connected --(per call)--> Connected
//!   \            \               \
//!    +------------+---------------+--> Cancelled | Expired
//! ```
//!
//! If the response stream ends while connected, the session resubscribes
//! with the configured [`ReconnectPolicy`]. Once the policy is exhausted
//! every call fails fast with [`TransportError::ReconnectExhausted`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hush_crypto::conversation::{self, ConversationKey};
use hush_crypto::identity::IdentitySecret;
use hush_crypto::utils::constant_time_compare;
use hush_crypto::{Identity, PublicId};
use hush_transport::{
    unix_now, Event, Filter, ReconnectPolicy, Subscription, Transport, TransportError, SIGNER_EVENT_KIND,
};

use crate::cache::ConversationKeyCache;
use crate::descriptor::{ConnectionDescriptor, SignerMetadata};
use crate::errors::SignerError;
use crate::protocol::{methods, SignedEvent, SignerMessage, UnsignedEvent, ACK, PONG};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct SignerConfig {
    pub relays: Vec<String>,
    pub metadata: SignerMetadata,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    /// Backoff for re-establishing the response stream.
    pub reconnect: ReconnectPolicy,
}

impl SignerConfig {
    pub fn new(relays: Vec<String>) -> Self {
        Self {
            relays,
            metadata: SignerMetadata::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: SignerMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Session lifecycle.
///
/// There is no session-wide state for a call awaiting its response: calls
/// are concurrent and each one is tracked by correlation id while the
/// session stays `Connected`. [`RemoteSignerSession::in_flight`] counts them.
/// A call that outlives the request timeout fails with
/// `SignerError::RequestTimeout` and leaves the session usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerState {
    Idle,
    AwaitingConnect,
    Connected,
    Cancelled,
    /// The handshake timed out. Request timeouts never expire a session.
    Expired,
}

impl SignerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

/// What survives a restart: enough to resume the request loop without a
/// new handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerSessionRecord {
    /// Hex export of the ephemeral identity.
    pub ephemeral_secret: String,
    pub remote_signer: PublicId,
    pub relays: Vec<String>,
    #[serde(default)]
    pub metadata: SignerMetadata,
    pub connected_at: u64,
}

impl std::fmt::Debug for SignerSessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerSessionRecord")
            .field("remote_signer", &self.remote_signer)
            .field("relays", &self.relays)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<SignerMessage>>>>;

/// Removes a pending entry however the request ends.
struct PendingGuard {
    pending: PendingMap,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Set once the response stream is lost for good.
type LinkError = Arc<Mutex<Option<TransportError>>>;

/// Resolves once the session is cancelled or dropped.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

pub struct RemoteSignerSession {
    transport: Arc<dyn Transport>,
    config: SignerConfig,
    ephemeral: Identity,
    secret: String,
    descriptor: ConnectionDescriptor,
    started_at: u64,
    state: Mutex<SignerState>,
    remote: Mutex<Option<PublicId>>,
    connected_at: Mutex<Option<u64>>,
    conversation_keys: ConversationKeyCache,
    pending: PendingMap,
    link_error: LinkError,
    response_task: Mutex<Option<JoinHandle<()>>>,
    cancel: watch::Sender<bool>,
}

impl RemoteSignerSession {
    /// Start a new session with a fresh ephemeral identity and secret.
    pub fn initiate(transport: Arc<dyn Transport>, config: SignerConfig) -> Result<Self, SignerError> {
        let session = Self::build(transport, config, Identity::generate(), SignerState::Idle);
        session.descriptor.validate()?;
        debug!(
            public_id = %session.ephemeral.public_id().short(),
            relays = session.config.relays.len(),
            "remote signer session initiated"
        );
        Ok(session)
    }

    /// Rebuild a connected session from a persisted record. Only the
    /// response loop is restarted; no handshake takes place.
    pub async fn resume(
        transport: Arc<dyn Transport>,
        record: &SignerSessionRecord,
        mut config: SignerConfig,
    ) -> Result<Self, SignerError> {
        let secret = IdentitySecret::from_hex(&record.ephemeral_secret)
            .map_err(|e| SignerError::Protocol(format!("invalid persisted secret: {e}")))?;
        config.relays = record.relays.clone();
        config.metadata = record.metadata.clone();

        let session = Self::build(transport, config, Identity::from_secret(&secret), SignerState::Idle);
        session.descriptor.validate()?;
        *session.remote.lock() = Some(record.remote_signer);
        *session.connected_at.lock() = Some(record.connected_at);
        session.start_response_loop(record.remote_signer).await?;
        *session.state.lock() = SignerState::Connected;
        info!(remote = %record.remote_signer.short(), "remote signer session resumed");
        Ok(session)
    }

    fn build(
        transport: Arc<dyn Transport>,
        config: SignerConfig,
        ephemeral: Identity,
        state: SignerState,
    ) -> Self {
        let secret = random_secret();
        let descriptor = ConnectionDescriptor {
            public_id: ephemeral.public_id(),
            relays: config.relays.clone(),
            secret: secret.clone(),
            metadata: config.metadata.clone(),
        };
        let (cancel, _) = watch::channel(false);
        Self {
            transport,
            config,
            ephemeral,
            secret,
            descriptor,
            started_at: unix_now(),
            state: Mutex::new(state),
            remote: Mutex::new(None),
            connected_at: Mutex::new(None),
            conversation_keys: ConversationKeyCache::default(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            link_error: Arc::new(Mutex::new(None)),
            response_task: Mutex::new(None),
            cancel,
        }
    }

    /// The artifact shown to the user (URI or QR code).
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SignerState {
        *self.state.lock()
    }

    /// The ephemeral public id the signer talks to.
    pub fn public_id(&self) -> PublicId {
        self.ephemeral.public_id()
    }

    pub fn remote_signer(&self) -> Option<PublicId> {
        *self.remote.lock()
    }

    /// Calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Why the response stream could not be re-established, if it could not.
    pub fn link_error(&self) -> Option<TransportError> {
        self.link_error.lock().clone()
    }

    fn transition(&self, from: SignerState, to: SignerState) -> Result<(), SignerError> {
        let mut state = self.state.lock();
        if *state == SignerState::Cancelled {
            return Err(SignerError::Cancelled);
        }
        if *state != from {
            return Err(SignerError::InvalidState {
                expected: from,
                actual: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Wait for the signer's connect response. Returns the signer's public id.
    pub async fn await_connect(&self) -> Result<PublicId, SignerError> {
        self.transition(SignerState::Idle, SignerState::AwaitingConnect)?;
        let mut cancel_rx = self.cancel.subscribe();

        let filter = Filter::new()
            .recipient(self.ephemeral.public_id())
            .kind(SIGNER_EVENT_KIND)
            .since(self.started_at);
        let mut sub = match self.transport.subscribe(&self.config.relays, filter).await {
            Ok(sub) => sub,
            Err(e) => {
                let _ = self.transition(SignerState::AwaitingConnect, SignerState::Idle);
                return Err(e.into());
            }
        };

        let deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(deadline);

        let remote = loop {
            tokio::select! {
                _ = &mut deadline => {
                    drop(sub);
                    let _ = self.transition(SignerState::AwaitingConnect, SignerState::Expired);
                    warn!(
                        timeout_secs = self.config.handshake_timeout.as_secs(),
                        "remote signer handshake timed out"
                    );
                    return Err(SignerError::HandshakeTimeout);
                }
                _ = cancelled(&mut cancel_rx) => {
                    return Err(SignerError::Cancelled);
                }
                event = sub.recv() => match event {
                    Some(event) => {
                        if let Some(remote) = self.match_connect(&event) {
                            break remote;
                        }
                    }
                    None => {
                        let _ = self.transition(SignerState::AwaitingConnect, SignerState::Idle);
                        return Err(TransportError::Closed.into());
                    }
                },
            }
        };
        drop(sub);

        *self.remote.lock() = Some(remote);
        *self.connected_at.lock() = Some(unix_now());
        self.start_response_loop(remote).await?;
        self.transition(SignerState::AwaitingConnect, SignerState::Connected)?;
        info!(remote = %remote.short(), "remote signer connected");
        Ok(remote)
    }

    fn match_connect(&self, event: &Event) -> Option<PublicId> {
        let key = self.conversation_keys.get_or_derive(&self.ephemeral, &event.sender);
        let decrypted = conversation::decrypt(&event.content, &key);
        if !decrypted.authenticated || decrypted.sender != Some(event.sender) {
            debug!(event = %event.id, reason = ?decrypted.failure, "discarding undecryptable connect candidate");
            return None;
        }
        let Some(message) = SignerMessage::from_json(&decrypted.plaintext) else {
            debug!(event = %event.id, "discarding unparseable connect candidate");
            return None;
        };
        let result = message.result.as_deref()?;
        if constant_time_compare(result.as_bytes(), self.secret.as_bytes()) || result == ACK {
            Some(event.sender)
        } else {
            debug!(event = %event.id, "connect response did not match secret");
            None
        }
    }

    async fn start_response_loop(&self, remote: PublicId) -> Result<(), SignerError> {
        let stream = ResponseStream {
            transport: self.transport.clone(),
            relays: self.config.relays.clone(),
            recipient: self.ephemeral.public_id(),
            policy: self.config.reconnect.clone(),
        };
        let mut sub = stream.open(unix_now()).await?;
        *self.link_error.lock() = None;

        let key = self.conversation_keys.get_or_derive(&self.ephemeral, &remote);
        let pending = self.pending.clone();
        let link_error = self.link_error.clone();
        let mut cancel_rx = self.cancel.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel_rx) => break,
                    event = sub.recv() => match event {
                        Some(event) => dispatch_response(&event, &remote, &key, &pending),
                        None => {
                            warn!("signer response stream closed, resubscribing");
                            match stream.reopen(unix_now(), &mut cancel_rx).await {
                                Ok(Some(next)) => sub = next,
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(error = %e, "signer response stream lost");
                                    *link_error.lock() = Some(e);
                                    // waiters fail now instead of at their timeout
                                    pending.lock().clear();
                                    break;
                                }
                            }
                        }
                    },
                }
            }
        });

        if let Some(previous) = self.response_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn connected_remote(&self) -> Result<PublicId, SignerError> {
        match self.state() {
            SignerState::Connected => {
                if let Some(e) = self.link_error() {
                    return Err(e.into());
                }
                self.remote_signer()
                    .ok_or_else(|| SignerError::Protocol("connected without a remote signer".into()))
            }
            SignerState::Cancelled => Err(SignerError::Cancelled),
            other => Err(SignerError::InvalidState {
                expected: SignerState::Connected,
                actual: other,
            }),
        }
    }

    /// Send one request and wait for its correlated response.
    pub async fn request(&self, method: &str, params: Vec<String>) -> Result<String, SignerError> {
        let remote = self.connected_remote()?;
        let key = self.conversation_keys.get_or_derive(&self.ephemeral, &remote);

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: correlation_id.clone(),
        };

        let payload = SignerMessage::request(correlation_id.as_str(), method, params).to_json();
        let content = conversation::encrypt(payload.as_bytes(), &key)?;
        let event = Event::now(self.ephemeral.public_id(), remote, SIGNER_EVENT_KIND, content);
        self.transport.publish(&self.config.relays, &event).await?;
        debug!(method, correlation_id = %correlation_id, "signer request published");

        let mut cancel_rx = self.cancel.subscribe();
        let response = tokio::select! {
            res = tokio::time::timeout(self.config.request_timeout, rx) => match res {
                Ok(Ok(message)) => message,
                // sender dropped: pending entries are cleared on cancel or link loss
                Ok(Err(_)) => {
                    return Err(match self.link_error() {
                        Some(e) => e.into(),
                        None => SignerError::Cancelled,
                    })
                }
                Err(_) => {
                    warn!(method, correlation_id = %correlation_id, "signer request timed out");
                    return Err(SignerError::RequestTimeout {
                        method: method.to_string(),
                        correlation_id,
                    });
                }
            },
            _ = cancelled(&mut cancel_rx) => return Err(SignerError::Cancelled),
        };

        match (response.result, response.error) {
            (_, Some(error)) => Err(SignerError::Remote(error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(SignerError::Protocol("response carries neither result nor error".into())),
        }
    }

    pub async fn ping(&self) -> Result<(), SignerError> {
        let result = self.request(methods::PING, Vec::new()).await?;
        if result == PONG {
            Ok(())
        } else {
            Err(SignerError::Protocol(format!("unexpected ping result {result:?}")))
        }
    }

    /// The custodian's long-lived public id.
    pub async fn get_public_key(&self) -> Result<PublicId, SignerError> {
        let result = self.request(methods::GET_PUBLIC_KEY, Vec::new()).await?;
        result
            .parse()
            .map_err(|e| SignerError::Protocol(format!("invalid public key in response: {e}")))
    }

    /// Have the custodian sign `event`. The returned signature is verified.
    pub async fn sign_event(&self, event: &UnsignedEvent) -> Result<SignedEvent, SignerError> {
        let param = serde_json::to_string(event).map_err(|e| SignerError::Protocol(e.to_string()))?;
        let result = self.request(methods::SIGN_EVENT, vec![param]).await?;
        let signed: SignedEvent = serde_json::from_str(&result)
            .map_err(|e| SignerError::Protocol(format!("invalid signed event: {e}")))?;
        if signed.event != *event {
            return Err(SignerError::Protocol("signer altered the event".into()));
        }
        signed
            .verify()
            .map_err(|e| SignerError::Protocol(format!("signature check failed: {e}")))?;
        Ok(signed)
    }

    /// Encrypt for `peer` under the custodian's conversation key.
    pub async fn conversation_encrypt(&self, peer: &PublicId, plaintext: &str) -> Result<String, SignerError> {
        self.request(methods::ENCRYPT, vec![peer.to_hex(), plaintext.to_string()])
            .await
    }

    pub async fn conversation_decrypt(&self, peer: &PublicId, ciphertext: &str) -> Result<String, SignerError> {
        self.request(methods::DECRYPT, vec![peer.to_hex(), ciphertext.to_string()])
            .await
    }

    /// Stop everything now. In-flight calls fail with `SignerError::Cancelled`.
    ///
    /// The transport is shared with other sessions and services, so it is
    /// left open. This session's subscriptions close when its response task
    /// is aborted and its handles drop.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = SignerState::Cancelled;
        }
        self.cancel.send_replace(true);
        if let Some(task) = self.response_task.lock().take() {
            task.abort();
        }
        self.pending.lock().clear();
        self.conversation_keys.clear();
        info!(public_id = %self.ephemeral.public_id().short(), "remote signer session cancelled");
    }

    /// Persistable form of a connected session.
    pub fn persistable(&self) -> Option<SignerSessionRecord> {
        if self.state() != SignerState::Connected {
            return None;
        }
        Some(SignerSessionRecord {
            ephemeral_secret: self.ephemeral.export_secret().to_hex(),
            remote_signer: self.remote_signer()?,
            relays: self.config.relays.clone(),
            metadata: self.config.metadata.clone(),
            connected_at: (*self.connected_at.lock()).unwrap_or(self.started_at),
        })
    }
}

impl Drop for RemoteSignerSession {
    fn drop(&mut self) {
        if let Some(task) = self.response_task.lock().take() {
            task.abort();
        }
    }
}

/// Everything needed to (re)open the response subscription.
struct ResponseStream {
    transport: Arc<dyn Transport>,
    relays: Vec<String>,
    recipient: PublicId,
    policy: ReconnectPolicy,
}

impl ResponseStream {
    async fn open(&self, since: u64) -> Result<Subscription, TransportError> {
        let filter = Filter::new()
            .recipient(self.recipient)
            .kind(SIGNER_EVENT_KIND)
            .since(since);
        self.transport.subscribe(&self.relays, filter).await
    }

    async fn try_open(&self, since: u64) -> Result<Subscription, TransportError> {
        if !self.transport.is_connected() {
            self.transport.connect().await?;
        }
        self.open(since).await
    }

    /// Resubscribe from `since` so responses sent during the gap are
    /// replayed. `Ok(None)` if the session was cancelled meanwhile.
    async fn reopen(
        &self,
        since: u64,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<Option<Subscription>, TransportError> {
        for attempt in 0..self.policy.max_attempts {
            match self.try_open(since).await {
                Ok(sub) => {
                    info!(attempt = attempt + 1, "signer response stream re-established");
                    return Ok(Some(sub));
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "signer resubscribe failed"
                    );
                    tokio::select! {
                        _ = cancelled(cancel_rx) => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        Err(TransportError::ReconnectExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}

fn dispatch_response(event: &Event, remote: &PublicId, key: &ConversationKey, pending: &PendingMap) {
    if event.sender != *remote {
        debug!(sender = %event.sender.short(), "ignoring event from unexpected sender");
        return;
    }
    let decrypted = conversation::decrypt(&event.content, key);
    if !decrypted.authenticated {
        debug!(event = %event.id, reason = ?decrypted.failure, "dropping undecryptable response");
        return;
    }
    let Some(message) = SignerMessage::from_json(&decrypted.plaintext) else {
        debug!(event = %event.id, "dropping unparseable response");
        return;
    };

    let waiter = pending.lock().remove(&message.id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(message);
        }
        None => debug!(correlation_id = %message.id, "duplicate or unsolicited response"),
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_transport::MemoryRelayNetwork;

    fn config() -> SignerConfig {
        SignerConfig::new(vec!["wss://relay.one".into()])
            .with_handshake_timeout(Duration::from_millis(200))
            .with_request_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_descriptor_embeds_ephemeral_identity() {
        let network = MemoryRelayNetwork::new();
        let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config()).unwrap();
        let d = session.descriptor();
        assert_eq!(d.public_id, session.public_id());
        assert_eq!(d.secret.len(), 32);
        assert_eq!(session.state(), SignerState::Idle);
        assert!(session.persistable().is_none());
    }

    #[test]
    fn test_initiate_requires_relays() {
        let network = MemoryRelayNetwork::new();
        let err = RemoteSignerSession::initiate(Arc::new(network.transport()), SignerConfig::new(vec![]))
            .err()
            .unwrap();
        assert!(matches!(err, SignerError::Descriptor(_)));
    }

    #[tokio::test]
    async fn test_request_before_connect_is_invalid() {
        let network = MemoryRelayNetwork::new();
        let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config()).unwrap();
        assert_eq!(
            session.ping().await,
            Err(SignerError::InvalidState {
                expected: SignerState::Connected,
                actual: SignerState::Idle
            })
        );
    }

    #[tokio::test]
    async fn test_cancel_before_connect() {
        let network = MemoryRelayNetwork::new();
        let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config()).unwrap();
        session.cancel();
        assert_eq!(session.state(), SignerState::Cancelled);
        let err = session.await_connect().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(network.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_ignored() {
        let network = MemoryRelayNetwork::new();
        let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config()).unwrap();
        let impostor = Identity::generate();

        let key = conversation::derive_key(&impostor, &session.public_id());
        let content = conversation::encrypt(SignerMessage::result("1", "guess").to_json().as_bytes(), &key).unwrap();
        network.inject(
            &session.config.relays,
            Event::now(impostor.public_id(), session.public_id(), SIGNER_EVENT_KIND, content),
        );

        assert_eq!(session.await_connect().await, Err(SignerError::HandshakeTimeout));
        assert_eq!(session.state(), SignerState::Expired);
        assert_eq!(network.active_subscription_count(), 0);
    }

    #[test]
    fn test_record_debug_redacts_secret() {
        let record = SignerSessionRecord {
            ephemeral_secret: "ff".repeat(64),
            remote_signer: PublicId::from_bytes([1; 32]),
            relays: vec![],
            metadata: SignerMetadata::default(),
            connected_at: 0,
        };
        assert!(!format!("{record:?}").contains("ffff"));
    }
}
