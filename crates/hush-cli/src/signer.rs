//! Remote signer commands.
//!
//! Relay connectivity belongs to the embedding application. The CLI drives
//! sessions over an in-process relay network: `descriptor` shows what a
//! client would hand to its signer, and `check` runs a full loopback
//! handshake with the local identity acting as custodian.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use hush_core::custodian::{AckMode, Custodian};
use hush_core::descriptor::ConnectionDescriptor;
use hush_core::protocol::UnsignedEvent;
use hush_core::{RemoteSignerSession, SignerConfig, SignerError};
use hush_crypto::{Identity, PublicId};
use hush_transport::{unix_now, MemoryRelayNetwork};

/// A fresh session's connection descriptor.
pub fn new_descriptor(config: SignerConfig) -> Result<ConnectionDescriptor, SignerError> {
    let network = MemoryRelayNetwork::new();
    let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config)?;
    let descriptor = session.descriptor().clone();
    session.cancel();
    Ok(descriptor)
}

pub fn inspect(uri: &str) -> Result<ConnectionDescriptor, SignerError> {
    Ok(ConnectionDescriptor::parse(uri)?)
}

/// One step of a loopback check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckStep {
    pub step: &'static str,
    pub elapsed_ms: u128,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub client: PublicId,
    pub signer: PublicId,
    pub steps: Vec<CheckStep>,
}

/// Connect a session to a custodian holding `identity`, then exercise
/// ping, public key lookup and delegated signing.
pub async fn loopback_check(identity: Identity, config: SignerConfig, mode: AckMode) -> Result<CheckReport, SignerError> {
    let network = MemoryRelayNetwork::new();
    let relays = config.relays.clone();
    let session = RemoteSignerSession::initiate(Arc::new(network.transport()), config)?;
    let custodian = Custodian::new(identity, Arc::new(network.transport()), relays);
    let _handle = custodian.serve().await?;

    let mut steps = Vec::new();
    let started = Instant::now();
    custodian.accept(session.descriptor(), mode).await?;
    let signer = session.await_connect().await?;
    steps.push(step("connect", started, format!("{mode:?}")));

    let started = Instant::now();
    session.ping().await?;
    steps.push(step("ping", started, "pong".to_string()));

    let started = Instant::now();
    let reported = session.get_public_key().await?;
    if reported != signer {
        return Err(SignerError::Protocol(format!(
            "signer reported {} but answered as {}",
            reported.short(),
            signer.short()
        )));
    }
    steps.push(step("get_public_key", started, reported.short()));

    let started = Instant::now();
    let event = UnsignedEvent {
        kind: 1,
        created_at: unix_now(),
        tags: vec![vec!["client".to_string(), "hush-cli".to_string()]],
        content: "loopback check".to_string(),
    };
    let signed = session.sign_event(&event).await?;
    steps.push(step("sign_event", started, format!("sig {}…", &signed.sig[..16])));

    let report = CheckReport {
        client: session.public_id(),
        signer,
        steps,
    };
    session.cancel();
    Ok(report)
}

fn step(name: &'static str, started: Instant, detail: String) -> CheckStep {
    CheckStep {
        step: name,
        elapsed_ms: started.elapsed().as_millis(),
        detail,
    }
}

/// Render a descriptor URI as a terminal QR code.
#[cfg(feature = "qr")]
pub fn render_qr(data: &str) -> anyhow::Result<String> {
    use qrcode::render::unicode;
    use qrcode::QrCode;

    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

#[cfg(not(feature = "qr"))]
pub fn render_qr(_data: &str) -> anyhow::Result<String> {
    anyhow::bail!("QR code feature not enabled; rebuild with --features qr")
}

/// Timeouts short enough for an in-process round trip.
pub fn loopback_config(config: SignerConfig) -> SignerConfig {
    let cap = Duration::from_secs(5);
    let handshake = config.handshake_timeout.min(cap);
    let request = config.request_timeout.min(cap);
    config.with_handshake_timeout(handshake).with_request_timeout(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_core::descriptor::DescriptorError;

    fn config() -> SignerConfig {
        SignerConfig::new(vec!["wss://relay.one".to_string(), "wss://relay.two".to_string()])
    }

    #[test]
    fn test_descriptor_round_trips_through_inspect() {
        let descriptor = new_descriptor(config()).unwrap();
        let parsed = inspect(&descriptor.to_uri()).unwrap();
        assert_eq!(parsed, descriptor);
        assert_eq!(parsed.relays.len(), 2);
        assert!(!parsed.secret.is_empty());
    }

    #[test]
    fn test_descriptors_are_unique() {
        let a = new_descriptor(config()).unwrap();
        let b = new_descriptor(config()).unwrap();
        assert_ne!(a.public_id, b.public_id);
        assert_ne!(a.secret, b.secret);
    }

    #[test]
    fn test_inspect_rejects_bad_uris() {
        assert!(matches!(
            inspect("https://example.com"),
            Err(SignerError::Descriptor(DescriptorError::WrongScheme(_)))
        ));
        assert!(matches!(
            inspect("hushconnect://abcd?relay=wss://r&secret=x"),
            Err(SignerError::Descriptor(DescriptorError::InvalidPublicId))
        ));
    }

    #[tokio::test]
    async fn test_loopback_check() {
        for mode in [AckMode::EchoSecret, AckMode::Ack] {
            let identity = Identity::generate();
            let expected = identity.public_id();
            let report = loopback_check(identity, loopback_config(config()), mode).await.unwrap();

            assert_eq!(report.signer, expected);
            let names: Vec<_> = report.steps.iter().map(|s| s.step).collect();
            assert_eq!(names, ["connect", "ping", "get_public_key", "sign_event"]);
        }
    }

    #[test]
    fn test_loopback_config_caps_timeouts() {
        let capped = loopback_config(config());
        assert_eq!(capped.handshake_timeout, Duration::from_secs(5));
        assert_eq!(capped.request_timeout, Duration::from_secs(5));
    }

    #[cfg(not(feature = "qr"))]
    #[test]
    fn test_qr_requires_feature() {
        assert!(render_qr("hushconnect://x").is_err());
    }

    #[cfg(feature = "qr")]
    #[test]
    fn test_qr_renders() {
        let uri = new_descriptor(config()).unwrap().to_uri();
        assert!(!render_qr(&uri).unwrap().is_empty());
    }
}
