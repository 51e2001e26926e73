//! Custodian responder: the remote-signer side of the signer protocol.
//!
//! Holds a long-lived identity, accepts connection descriptors and answers
//! requests from accepted clients. Requests from anyone else are dropped.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hush_crypto::conversation;
use hush_crypto::{Identity, PublicId};
use hush_transport::{unix_now, Event, Filter, RelayUrl, Transport, SIGNER_EVENT_KIND};

use crate::cache::ConversationKeyCache;
use crate::descriptor::ConnectionDescriptor;
use crate::errors::SignerError;
use crate::protocol::{methods, SignedEvent, SignerMessage, UnsignedEvent, ACK, PONG};

/// What the connect response carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Echo the descriptor's secret.
    #[default]
    EchoSecret,
    /// Send the `"ack"` sentinel.
    Ack,
}

struct CustodianInner {
    identity: Identity,
    transport: Arc<dyn Transport>,
    relays: Vec<RelayUrl>,
    clients: Mutex<HashSet<PublicId>>,
    conversation_keys: ConversationKeyCache,
}

#[derive(Clone)]
pub struct Custodian {
    inner: Arc<CustodianInner>,
}

impl Custodian {
    pub fn new(identity: Identity, transport: Arc<dyn Transport>, relays: Vec<RelayUrl>) -> Self {
        Self {
            inner: Arc::new(CustodianInner {
                identity,
                transport,
                relays,
                clients: Mutex::new(HashSet::new()),
                conversation_keys: ConversationKeyCache::default(),
            }),
        }
    }

    pub fn public_id(&self) -> PublicId {
        self.inner.identity.public_id()
    }

    pub fn is_client(&self, id: &PublicId) -> bool {
        self.inner.clients.lock().contains(id)
    }

    /// Approve a client and publish the connect response on its relays.
    pub async fn accept(&self, descriptor: &ConnectionDescriptor, mode: AckMode) -> Result<(), SignerError> {
        descriptor.validate()?;
        let client = descriptor.public_id;
        let result = match mode {
            AckMode::EchoSecret => descriptor.secret.clone(),
            AckMode::Ack => ACK.to_string(),
        };

        let message = SignerMessage::result(uuid::Uuid::new_v4().to_string(), result);
        let key = self.inner.conversation_keys.get_or_derive(&self.inner.identity, &client);
        let content = conversation::encrypt(message.to_json().as_bytes(), &key)?;
        let event = Event::now(self.public_id(), client, SIGNER_EVENT_KIND, content);

        self.inner.clients.lock().insert(client);
        self.inner
            .transport
            .publish(&descriptor.relays, &event)
            .await?
            .into_result()?;
        info!(client = %client.short(), ?mode, "custodian accepted client");
        Ok(())
    }

    /// Answer requests until the returned handle is stopped or dropped.
    pub async fn serve(&self) -> Result<CustodianHandle, SignerError> {
        let filter = Filter::new()
            .recipient(self.public_id())
            .kind(SIGNER_EVENT_KIND)
            .since(unix_now());
        let mut sub = self.inner.transport.subscribe(&self.inner.relays, filter).await?;
        let inner = self.inner.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                let Some(response) = inner.respond(&event) else {
                    continue;
                };
                if let Err(e) = inner.transport.publish(&inner.relays, &response).await {
                    warn!(error = %e, "failed to publish signer response");
                }
            }
            debug!("custodian request stream closed");
        });

        Ok(CustodianHandle { task: Some(task) })
    }
}

impl CustodianInner {
    fn respond(&self, event: &Event) -> Option<Event> {
        if !self.clients.lock().contains(&event.sender) {
            debug!(sender = %event.sender.short(), "ignoring request from unknown client");
            return None;
        }
        let key = self.conversation_keys.get_or_derive(&self.identity, &event.sender);
        let decrypted = conversation::decrypt(&event.content, &key);
        if !decrypted.authenticated {
            debug!(event = %event.id, reason = ?decrypted.failure, "dropping undecryptable request");
            return None;
        }
        let request = SignerMessage::from_json(&decrypted.plaintext).filter(SignerMessage::is_request)?;
        let method = request.method.as_deref().unwrap_or_default();

        let reply = match self.dispatch(method, &request.params) {
            Ok(result) => SignerMessage::result(request.id.as_str(), result),
            Err(error) => {
                debug!(method, correlation_id = %request.id, %error, "signer request rejected");
                SignerMessage::error(request.id.as_str(), error)
            }
        };
        let content = match conversation::encrypt(reply.to_json().as_bytes(), &key) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "failed to seal signer response");
                return None;
            }
        };
        Some(Event::now(self.identity.public_id(), event.sender, SIGNER_EVENT_KIND, content))
    }

    fn dispatch(&self, method: &str, params: &[String]) -> Result<String, String> {
        match method {
            methods::PING => Ok(PONG.to_string()),
            methods::GET_PUBLIC_KEY => Ok(self.identity.public_id().to_hex()),
            methods::SIGN_EVENT => {
                let raw = params.first().ok_or("missing event")?;
                let event: UnsignedEvent = serde_json::from_str(raw).map_err(|e| format!("invalid event: {e}"))?;
                let sig = self.identity.sign(&event.signing_bytes());
                let signed = SignedEvent {
                    event,
                    signer: hex::encode(self.identity.sign_pub()),
                    sig: hex::encode(sig),
                };
                serde_json::to_string(&signed).map_err(|e| e.to_string())
            }
            methods::ENCRYPT => {
                let (peer, plaintext) = peer_and_payload(params)?;
                let key = self.conversation_keys.get_or_derive(&self.identity, &peer);
                conversation::encrypt(plaintext.as_bytes(), &key).map_err(|e| e.to_string())
            }
            methods::DECRYPT => {
                let (peer, ciphertext) = peer_and_payload(params)?;
                let key = self.conversation_keys.get_or_derive(&self.identity, &peer);
                let opened = conversation::open(ciphertext, &key).map_err(|e| e.to_string())?;
                String::from_utf8(opened.plaintext).map_err(|_| "plaintext is not utf-8".to_string())
            }
            other => Err(format!("unsupported method {other:?}")),
        }
    }
}

fn peer_and_payload(params: &[String]) -> Result<(PublicId, &str), String> {
    match params {
        [peer, payload, ..] => {
            let peer: PublicId = peer.parse().map_err(|_| format!("invalid peer {peer:?}"))?;
            Ok((peer, payload.as_str()))
        }
        _ => Err("expected [peer, payload]".to_string()),
    }
}

/// Running responder. Dropping it stops the loop.
pub struct CustodianHandle {
    task: Option<JoinHandle<()>>,
}

impl CustodianHandle {
    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CustodianHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
