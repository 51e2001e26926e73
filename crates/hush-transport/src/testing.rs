//! In-memory relay network for tests and demos.
//!
//! Every relay keeps a backlog of accepted events so late subscribers can
//! catch up with `Filter::since`. Relays can be taken offline, and the
//! network can be told to deliver every event twice per relay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::event::{Event, Filter};
use crate::traits::{PublishReport, RelayUrl, Subscription, Transport, TransportError};

#[derive(Default)]
struct Relay {
    online: bool,
    backlog: Vec<Event>,
}

struct SubscriptionEntry {
    relays: Vec<RelayUrl>,
    filter: Filter,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct NetworkInner {
    relays: DashMap<RelayUrl, Relay>,
    subscriptions: DashMap<u64, SubscriptionEntry>,
    next_subscription: AtomicU64,
    duplicate_delivery: AtomicBool,
    published: Mutex<Vec<Event>>,
}

impl NetworkInner {
    fn relay_online(&self, url: &str) -> bool {
        self.relays
            .entry(url.to_string())
            .or_insert_with(|| Relay {
                online: true,
                backlog: Vec::new(),
            })
            .online
    }
}

/// Shared relay network. Cheap to clone; clones see the same relays.
#[derive(Clone, Default)]
pub struct MemoryRelayNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryRelayNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// New client handle onto this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.inner.clone(),
            connected: Arc::new(AtomicBool::new(true)),
            failing_connects: AtomicU32::new(0),
            owned: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn set_relay_online(&self, url: &str, online: bool) {
        self.inner
            .relays
            .entry(url.to_string())
            .or_default()
            .online = online;
    }

    /// Deliver every event twice per relay.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.inner.duplicate_delivery.store(enabled, Ordering::Relaxed);
    }

    /// Open subscriptions across all clients.
    pub fn active_subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Every event any relay accepted, in publish order.
    pub fn published_events(&self) -> Vec<Event> {
        self.inner.published.lock().clone()
    }

    /// Push an event straight onto relays, bypassing any client. Used to
    /// simulate hostile or replayed traffic.
    pub fn inject(&self, relays: &[RelayUrl], event: Event) {
        deliver(&self.inner, relays, &event);
    }
}

fn deliver(network: &NetworkInner, relays: &[RelayUrl], event: &Event) -> PublishReport {
    let mut report = PublishReport::default();
    let copies = if network.duplicate_delivery.load(Ordering::Relaxed) {
        2
    } else {
        1
    };

    for url in relays {
        if !network.relay_online(url) {
            report.failed.push((url.clone(), "relay offline".into()));
            continue;
        }
        if let Some(mut relay) = network.relays.get_mut(url) {
            relay.backlog.push(event.clone());
        }
        for sub in network.subscriptions.iter() {
            if sub.relays.contains(url) && sub.filter.matches(event) {
                for _ in 0..copies {
                    // receiver gone means the handle is being dropped
                    let _ = sub.tx.send(event.clone());
                }
            }
        }
        report.accepted.push(url.clone());
    }

    if !report.accepted.is_empty() {
        network.published.lock().push(event.clone());
    }
    report
}

/// One client's connection to a [`MemoryRelayNetwork`].
pub struct MemoryTransport {
    network: Arc<NetworkInner>,
    connected: Arc<AtomicBool>,
    failing_connects: AtomicU32,
    owned: Arc<Mutex<HashSet<u64>>>,
}

impl MemoryTransport {
    /// Simulate link loss.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Make the next `n` calls to `connect` fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::Relaxed);
    }

    /// Open subscriptions held by this client.
    pub fn subscription_count(&self) -> usize {
        self.owned.lock().len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, relays: &[RelayUrl], event: &Event) -> Result<PublishReport, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if relays.is_empty() {
            return Err(TransportError::NoRelays);
        }
        deliver(&self.network, relays, event).into_result()
    }

    async fn subscribe(&self, relays: &[RelayUrl], filter: Filter) -> Result<Subscription, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if relays.is_empty() {
            return Err(TransportError::NoRelays);
        }

        let id = self.network.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        // Replay stored events before going live.
        for url in relays {
            if let Some(relay) = self.network.relays.get(url) {
                if !relay.online {
                    continue;
                }
                for event in relay.backlog.iter().filter(|e| filter.matches(e)) {
                    let _ = tx.send(event.clone());
                }
            }
        }

        self.network.subscriptions.insert(
            id,
            SubscriptionEntry {
                relays: relays.to_vec(),
                filter,
                tx,
            },
        );
        self.owned.lock().insert(id);
        tracing::trace!(subscription = id, relays = relays.len(), "subscribed");

        let network = Arc::downgrade(&self.network);
        let owned = Arc::downgrade(&self.owned);
        Ok(Subscription::new(id, rx, move || {
            if let Some(network) = network.upgrade() {
                network.subscriptions.remove(&id);
            }
            if let Some(owned) = owned.upgrade() {
                owned.lock().remove(&id);
            }
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let ids: Vec<u64> = self.owned.lock().drain().collect();
        for id in ids {
            // dropping the sender ends the consumer's stream
            self.network.subscriptions.remove(&id);
        }
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let failing = self.failing_connects.load(Ordering::Relaxed);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::Relaxed);
            return Err(TransportError::Disconnected);
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
