//! Link recovery with exponential backoff.
//!
//! Reconnection restores the relay links only. A publish or subscribe that
//! fails is reported to its caller and never replayed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{watch, Mutex};

use crate::event::{Event, Filter};
use crate::traits::{PublishReport, RelayUrl, Subscription, Transport, TransportError};

/// Backoff parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Fraction of the delay randomized, 0.0 - 1.0.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the `attempt`-th failure (0-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(31) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        base.mul_f64(factor)
    }
}

/// Connectivity indicator published on a `watch` channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
    Closed,
}

/// Wraps a transport and re-establishes its links before use.
pub struct ReconnectingTransport<T> {
    inner: Arc<T>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectivityState>,
    reconnecting: Mutex<()>,
    closed: AtomicBool,
}

impl<T: Transport> ReconnectingTransport<T> {
    pub fn new(inner: T, policy: ReconnectPolicy) -> Self {
        Self::from_arc(Arc::new(inner), policy)
    }

    pub fn from_arc(inner: Arc<T>, policy: ReconnectPolicy) -> Self {
        let initial = if inner.is_connected() {
            ConnectivityState::Connected
        } else {
            ConnectivityState::Reconnecting { attempt: 0 }
        };
        let (state, _) = watch::channel(initial);
        Self {
            inner,
            policy,
            state,
            reconnecting: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &Arc<T> {
        &self.inner
    }

    /// Subscribe to connectivity changes.
    pub fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Reconnect if the inner transport is down, backing off between attempts.
    pub async fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.inner.is_connected() {
            self.set_state(ConnectivityState::Connected);
            return Ok(());
        }

        // One reconnect loop at a time; late arrivals reuse its result.
        let _guard = self.reconnecting.lock().await;
        if self.inner.is_connected() {
            return Ok(());
        }

        for attempt in 0..self.policy.max_attempts {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            self.set_state(ConnectivityState::Reconnecting {
                attempt: attempt + 1,
            });
            match self.inner.connect().await {
                Ok(()) => {
                    tracing::info!(attempt = attempt + 1, "transport reconnected");
                    self.set_state(ConnectivityState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    let delay = self.policy.jittered_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "reconnect attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.set_state(ConnectivityState::Failed);
        Err(TransportError::ReconnectExhausted {
            attempts: self.policy.max_attempts,
        })
    }

    fn set_state(&self, next: ConnectivityState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn note_failure(&self, err: &TransportError) {
        if err.is_connectivity() {
            self.set_state(ConnectivityState::Reconnecting { attempt: 0 });
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for ReconnectingTransport<T> {
    async fn publish(&self, relays: &[RelayUrl], event: &Event) -> Result<PublishReport, TransportError> {
        self.ensure_connected().await?;
        self.inner.publish(relays, event).await.map_err(|e| {
            self.note_failure(&e);
            e
        })
    }

    async fn subscribe(&self, relays: &[RelayUrl], filter: Filter) -> Result<Subscription, TransportError> {
        self.ensure_connected().await?;
        self.inner.subscribe(relays, filter).await.map_err(|e| {
            self.note_failure(&e);
            e
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        self.set_state(ConnectivityState::Closed);
        self.inner.close().await
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.ensure_connected().await
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.inner.is_connected()
    }
}
