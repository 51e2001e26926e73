//! Integration tests for remote signer sessions over the in-memory relay
//! network.

use std::sync::Arc;
use std::time::Duration;

use hush_core::custodian::{AckMode, Custodian};
use hush_core::harness::{connect_signer, fast_signer_config, test_relays, wait_for_subscriptions};
use hush_core::protocol::{SignerMessage, UnsignedEvent};
use hush_core::{RemoteSignerSession, SignerError, SignerState};
use hush_crypto::conversation;
use hush_crypto::{Identity, PublicId};
use hush_transport::{
    Event, Filter, MemoryRelayNetwork, MemoryTransport, Subscription, Transport, TransportError, SIGNER_EVENT_KIND,
};

/// A signer driven by hand, for ordering and silence scenarios.
struct ManualSigner {
    identity: Identity,
    transport: MemoryTransport,
    requests: Subscription,
}

impl ManualSigner {
    async fn start(network: &MemoryRelayNetwork) -> Self {
        let identity = Identity::generate();
        let transport = network.transport();
        let filter = Filter::new().recipient(identity.public_id()).kind(SIGNER_EVENT_KIND);
        let requests = transport.subscribe(&test_relays(), filter).await.unwrap();
        Self {
            identity,
            transport,
            requests,
        }
    }

    async fn send(&self, to: PublicId, message: &SignerMessage) {
        let key = conversation::derive_key(&self.identity, &to);
        let content = conversation::encrypt(message.to_json().as_bytes(), &key).unwrap();
        let event = Event::now(self.identity.public_id(), to, SIGNER_EVENT_KIND, content);
        self.transport.publish(&test_relays(), &event).await.unwrap();
    }

    async fn accept(&self, session: &RemoteSignerSession) {
        let secret = session.descriptor().secret.clone();
        self.send(session.public_id(), &SignerMessage::result("connect", secret))
            .await;
    }

    async fn next_request(&mut self) -> (PublicId, SignerMessage) {
        loop {
            let event = self.requests.recv().await.unwrap();
            let key = conversation::derive_key(&self.identity, &event.sender);
            let opened = conversation::open(&event.content, &key).unwrap();
            let message = SignerMessage::from_json(&opened.plaintext).unwrap();
            if message.is_request() {
                return (event.sender, message);
            }
        }
    }
}

async fn connected_manual(network: &MemoryRelayNetwork) -> (RemoteSignerSession, ManualSigner) {
    let signer = ManualSigner::start(network).await;
    let session = RemoteSignerSession::initiate(Arc::new(network.transport()), fast_signer_config()).unwrap();
    signer.accept(&session).await;
    assert_eq!(session.await_connect().await.unwrap(), signer.identity.public_id());
    (session, signer)
}

#[tokio::test]
async fn test_handshake_with_secret_and_ack() {
    for mode in [AckMode::EchoSecret, AckMode::Ack] {
        let network = MemoryRelayNetwork::new();
        let signer = connect_signer(&network, fast_signer_config(), mode).await.unwrap();
        assert_eq!(signer.session.state(), SignerState::Connected);
        assert_eq!(
            signer.session.get_public_key().await.unwrap(),
            signer.custodian.public_id()
        );
    }
}

#[tokio::test]
async fn test_handshake_timeout_leaves_no_subscriptions() {
    let network = MemoryRelayNetwork::new();
    let config = fast_signer_config().with_handshake_timeout(Duration::from_millis(100));
    let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config).unwrap();

    assert_eq!(session.await_connect().await, Err(SignerError::HandshakeTimeout));
    assert_eq!(session.state(), SignerState::Expired);
    assert_eq!(network.active_subscription_count(), 0);
}

#[tokio::test]
async fn test_handshake_survives_noise_and_duplicates() {
    let network = MemoryRelayNetwork::new();
    network.set_duplicate_delivery(true);
    let signer = ManualSigner::start(&network).await;
    let session = RemoteSignerSession::initiate(Arc::new(network.transport()), fast_signer_config()).unwrap();

    // garbage content, then a wrong secret, then the real response
    let junk = Event::now(signer.identity.public_id(), session.public_id(), SIGNER_EVENT_KIND, "%%%");
    network.inject(&test_relays(), junk);
    signer
        .send(session.public_id(), &SignerMessage::result("x", "not-the-secret"))
        .await;
    signer.accept(&session).await;

    assert_eq!(session.await_connect().await.unwrap(), signer.identity.public_id());
}

#[tokio::test]
async fn test_correlation_with_out_of_order_responses() {
    let network = MemoryRelayNetwork::new();
    let (session, mut signer) = connected_manual(&network).await;

    let respond = async {
        let (client, first) = signer.next_request().await;
        let (_, second) = signer.next_request().await;

        // answer in reverse order; a stranger answers first with a live id
        let stranger = ManualSigner::start(&network).await;
        stranger
            .send(client, &SignerMessage::result(first.id.as_str(), "forged"))
            .await;
        for request in [&second, &first] {
            let reply = SignerMessage::result(request.id.as_str(), request.params[0].as_str());
            signer.send(client, &reply).await;
            // re-encrypted duplicate: new event id, same correlation id
            signer.send(client, &reply).await;
        }
    };

    let (a, b, ()) = tokio::join!(
        session.request("echo", vec!["alpha".into()]),
        session.request("echo", vec!["beta".into()]),
        respond,
    );
    assert_eq!(a.unwrap(), "alpha");
    assert_eq!(b.unwrap(), "beta");
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test]
async fn test_request_timeout_fails_only_the_call() {
    let network = MemoryRelayNetwork::new();
    let (session, _signer) = connected_manual(&network).await;

    let err = session.ping().await.unwrap_err();
    assert!(matches!(err, SignerError::RequestTimeout { .. }));
    assert!(err.is_timeout());
    assert_eq!(session.state(), SignerState::Connected);
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test]
async fn test_cancel_rejects_in_flight_and_unsubscribes() {
    let network = MemoryRelayNetwork::new();
    let signer = ManualSigner::start(&network).await;
    let transport = Arc::new(network.transport());
    let session = RemoteSignerSession::initiate(transport.clone(), fast_signer_config()).unwrap();
    signer.accept(&session).await;
    session.await_connect().await.unwrap();

    let (result, ()) = tokio::join!(session.ping(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.in_flight(), 1);
        session.cancel();
    });

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(session.state(), SignerState::Cancelled);
    assert_eq!(session.in_flight(), 0);

    // only the manual signer's own subscription remains
    assert!(wait_for_subscriptions(&network, 1, Duration::from_secs(1)).await);
    assert_eq!(transport.subscription_count(), 0);
    // shared transport stays up for its other users
    assert!(transport.is_connected());
    assert!(session.ping().await.unwrap_err().is_cancelled());
}

/// Poll `check` every few milliseconds for up to a second.
async fn eventually(check: impl Fn() -> bool) -> bool {
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), poll).await.is_ok()
}

#[tokio::test]
async fn test_response_stream_resubscribes_after_link_loss() {
    let network = MemoryRelayNetwork::new();
    let custodian = Custodian::new(Identity::generate(), Arc::new(network.transport()), test_relays());
    let _handle = custodian.serve().await.unwrap();
    let transport = Arc::new(network.transport());
    let session = RemoteSignerSession::initiate(transport.clone(), fast_signer_config()).unwrap();
    custodian.accept(session.descriptor(), AckMode::EchoSecret).await.unwrap();
    session.await_connect().await.unwrap();
    session.ping().await.unwrap();

    // the first reconnect fails, the second restores the stream
    transport.fail_next_connects(1);
    transport.close().await.unwrap();
    assert_eq!(transport.subscription_count(), 0);

    assert!(eventually(|| transport.subscription_count() == 1).await);
    assert!(transport.is_connected());
    session.ping().await.unwrap();
    assert_eq!(session.state(), SignerState::Connected);
    assert_eq!(session.link_error(), None);
}

#[tokio::test]
async fn test_requests_fail_fast_once_link_is_lost() {
    let network = MemoryRelayNetwork::new();
    let signer = ManualSigner::start(&network).await;
    let transport = Arc::new(network.transport());
    let session = RemoteSignerSession::initiate(transport.clone(), fast_signer_config()).unwrap();
    signer.accept(&session).await;
    session.await_connect().await.unwrap();

    let exhausted = SignerError::Transport(TransportError::ReconnectExhausted { attempts: 3 });
    let started = tokio::time::Instant::now();
    let (result, ()) = tokio::join!(session.ping(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.in_flight(), 1);
        transport.fail_next_connects(10);
        transport.close().await.unwrap();
    });

    // the silent signer never answers; the waiter is released before its timeout
    assert_eq!(result, Err(exhausted.clone()));
    assert!(started.elapsed() < fast_signer_config().request_timeout);
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.link_error(), Some(TransportError::ReconnectExhausted { attempts: 3 }));
    assert_eq!(session.ping().await, Err(exhausted));
}

#[tokio::test]
async fn test_resume_skips_handshake() {
    let network = MemoryRelayNetwork::new();
    let signer = connect_signer(&network, fast_signer_config(), AckMode::EchoSecret)
        .await
        .unwrap();
    let record = signer.session.persistable().unwrap();
    assert_eq!(record.remote_signer, signer.custodian.public_id());
    drop(signer.session);

    let resumed = RemoteSignerSession::resume(Arc::new(network.transport()), &record, fast_signer_config())
        .await
        .unwrap();
    assert_eq!(resumed.state(), SignerState::Connected);
    assert_eq!(resumed.public_id(), record_public_id(&record));
    resumed.ping().await.unwrap();

    let json = serde_json::to_string(&record).unwrap();
    assert!(json.contains("remoteSigner"));
}

fn record_public_id(record: &hush_core::signer::SignerSessionRecord) -> PublicId {
    let secret = hush_crypto::identity::IdentitySecret::from_hex(&record.ephemeral_secret).unwrap();
    Identity::from_secret(&secret).public_id()
}

#[tokio::test]
async fn test_delegated_signing_and_conversation_crypto() {
    let network = MemoryRelayNetwork::new();
    let signer = connect_signer(&network, fast_signer_config(), AckMode::Ack)
        .await
        .unwrap();

    let event = UnsignedEvent {
        kind: 1,
        created_at: 1_700_000_000,
        tags: vec![vec!["resource".into(), "general".into()]],
        content: "hello".into(),
    };
    let signed = signer.session.sign_event(&event).await.unwrap();
    assert_eq!(signed.event, event);

    let peer = Identity::generate();
    let sealed = signer
        .session
        .conversation_encrypt(&peer.public_id(), "for your eyes")
        .await
        .unwrap();
    let key = conversation::derive_key(&peer, &signer.custodian.public_id());
    let opened = conversation::open(&sealed, &key).unwrap();
    assert_eq!(opened.plaintext, b"for your eyes");
    assert_eq!(opened.sender, signer.custodian.public_id());

    let reply = conversation::encrypt(b"ack from peer", &key).unwrap();
    assert_eq!(
        signer
            .session
            .conversation_decrypt(&peer.public_id(), &reply)
            .await
            .unwrap(),
        "ack from peer"
    );

    let err = signer.session.request("format_disk", vec![]).await.unwrap_err();
    assert!(matches!(err, SignerError::Remote(_)));
}
