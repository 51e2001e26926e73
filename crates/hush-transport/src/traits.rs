//! Transport trait and subscription handle.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dedup::DedupWindow;
use crate::event::{Event, Filter};

/// Relay URL as configured by the user.
pub type RelayUrl = String;

/// Common transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,

    #[error("no relays configured")]
    NoRelays,

    #[error("no relay accepted the event: {0:?}")]
    NotAccepted(Vec<(RelayUrl, String)>),

    #[error("operation timed out")]
    Timeout,

    #[error("transport closed")]
    Closed,

    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Link-level failures that a reconnect may cure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Timeout)
    }
}

/// Per-relay outcome of a publish.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub accepted: Vec<RelayUrl>,
    pub failed: Vec<(RelayUrl, String)>,
}

impl PublishReport {
    /// At least one relay took the event; otherwise the publish failed.
    pub fn into_result(self) -> Result<Self, TransportError> {
        if self.accepted.is_empty() {
            Err(TransportError::NotAccepted(self.failed))
        } else {
            Ok(self)
        }
    }
}

/// Publish/subscribe over a multi-homed relay set.
///
/// Delivery is at-least-once and unordered across relays. Implementations
/// may hand the same event to a subscription once per relay; [`Subscription`]
/// collapses those duplicates.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `event` to every relay in `relays`.
    async fn publish(&self, relays: &[RelayUrl], event: &Event) -> Result<PublishReport, TransportError>;

    /// Open a merged subscription across `relays`.
    async fn subscribe(&self, relays: &[RelayUrl], filter: Filter) -> Result<Subscription, TransportError>;

    /// Close every handle this transport owns.
    async fn close(&self) -> Result<(), TransportError>;

    /// Re-establish relay links after a failure.
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

type Closer = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Event>,
    dedup: DedupWindow,
    closer: Option<Closer>,
}

impl Subscription {
    /// Build a subscription from a delivery channel and an unsubscribe hook.
    /// Transport implementations call this; consumers only receive.
    pub fn new(
        id: u64,
        rx: mpsc::UnboundedReceiver<Event>,
        closer: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            rx,
            dedup: DedupWindow::default(),
            closer: Some(Box::new(closer)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event not yet seen on this subscription. Events whose id does not
    /// match their content are dropped. `None` once the transport closes.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let event = self.rx.recv().await?;
            if !event.has_valid_id() {
                tracing::debug!(subscription = self.id, "dropping event with mismatched id");
                continue;
            }
            if self.dedup.first_sighting(&event.id) {
                return Some(event);
            }
            tracing::trace!(subscription = self.id, event = %event.id, "duplicate delivery");
        }
    }

    /// Unsubscribe now. Equivalent to dropping the handle.
    pub fn close(mut self) {
        self.unsubscribe();
    }

    fn unsubscribe(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
            self.rx.close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("open", &self.closer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_crypto::PublicId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(content: &str) -> Event {
        Event::new(
            PublicId::from_bytes([1; 32]),
            PublicId::from_bytes([2; 32]),
            1,
            10,
            content,
        )
    }

    #[tokio::test]
    async fn test_recv_collapses_duplicates() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(1, rx, || {});

        let e = event("a");
        tx.send(e.clone()).unwrap();
        tx.send(e.clone()).unwrap();
        tx.send(event("b")).unwrap();
        drop(tx);

        assert_eq!(sub.recv().await.unwrap().content, "a");
        assert_eq!(sub.recv().await.unwrap().content, "b");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_drops_forged_ids() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(1, rx, || {});

        let mut forged = event("a");
        forged.content = "b".into();
        tx.send(forged).unwrap();
        drop(tx);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_drop_runs_closer_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        let sub = Subscription::new(7, rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_report_requires_one_relay() {
        let report = PublishReport {
            accepted: vec![],
            failed: vec![("wss://a".into(), "offline".into())],
        };
        assert!(matches!(report.into_result(), Err(TransportError::NotAccepted(_))));
    }
}
