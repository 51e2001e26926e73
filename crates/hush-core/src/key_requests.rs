//! Key request ledger.
//!
//! A principal that is authorized for a resource but holds no wrap appends a
//! request. Any online holder can fulfill it by rewrapping the current key for
//! the requester; the store's uniqueness constraints make concurrent
//! fulfillment converge on one wrap and one status transition.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use hush_crypto::identity::Principal;
use hush_crypto::{PublicId, WrappedKey};

use crate::channel_keys::ChannelKeyManager;
use crate::errors::{KeyError, LedgerError};
use crate::store::{InsertOutcome, KeyStore};
use crate::types::{unix_now, KeyRequest, KeyRequestView};

/// Buffered notifications per subscriber before it starts lagging.
pub const LEDGER_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    Requested(KeyRequest),
    Fulfilled {
        request_id: String,
        resource_id: String,
        recipient: PublicId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Created(KeyRequest),
    /// The requester already has a pending request for this resource.
    AlreadyPending(KeyRequest),
    /// The requester already holds a wrap at the current key version.
    AlreadyHolds,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FulfillOutcome {
    Fulfilled,
    AlreadyFulfilled,
}

pub struct KeyRequestLedger {
    store: Arc<dyn KeyStore>,
    events: broadcast::Sender<LedgerEvent>,
}

impl KeyRequestLedger {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        let (events, _) = broadcast::channel(LEDGER_EVENT_CAPACITY);
        Self { store, events }
    }

    /// Push notifications for online holders.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub async fn request_key(&self, resource_id: &str, requester: &Principal) -> Result<AppendOutcome, LedgerError> {
        if !self.store.is_authorized(resource_id, &requester.public_id).await? {
            return Err(LedgerError::NotAuthorized {
                resource_id: resource_id.to_string(),
                requester: requester.public_id,
            });
        }

        if let Some(current) = self.store.current_key_version(resource_id).await? {
            let held = self
                .store
                .load_wrapped_key(resource_id, &requester.public_id)
                .await?;
            if held.map_or(false, |w| w.key_version >= current) {
                return Ok(AppendOutcome::AlreadyHolds);
            }
        }

        let request = KeyRequest::new_pending(
            resource_id,
            requester.public_id,
            requester.display_name.clone(),
            unix_now(),
        );
        match self.store.insert_key_request(&request).await? {
            InsertOutcome::Inserted => {
                info!(
                    resource = resource_id,
                    requester = %requester.public_id.short(),
                    request_id = %request.id,
                    "key request created"
                );
                // no receivers just means no holder is online
                let _ = self.events.send(LedgerEvent::Requested(request.clone()));
                Ok(AppendOutcome::Created(request))
            }
            InsertOutcome::Existing(existing) => Ok(AppendOutcome::AlreadyPending(existing)),
        }
    }

    pub async fn list_pending(&self, resource_id: Option<&str>) -> Result<Vec<KeyRequestView>, LedgerError> {
        Ok(self
            .pending_requests(resource_id)
            .await?
            .iter()
            .map(KeyRequest::view)
            .collect())
    }

    pub async fn pending_requests(&self, resource_id: Option<&str>) -> Result<Vec<KeyRequest>, LedgerError> {
        Ok(self.store.list_pending_requests(resource_id).await?)
    }

    pub async fn get(&self, request_id: &str) -> Result<KeyRequest, LedgerError> {
        self.store
            .load_key_request(request_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(request_id.to_string()))
    }

    /// Store `wrapped` for the requester and close the request.
    pub async fn fulfill(&self, request_id: &str, wrapped: &WrappedKey) -> Result<FulfillOutcome, LedgerError> {
        let request = self.get(request_id).await?;
        if !request.is_pending() {
            return Ok(FulfillOutcome::AlreadyFulfilled);
        }
        if wrapped.resource_id != request.resource_id {
            return Err(LedgerError::InvalidFulfillment(format!(
                "wrap is for resource {}, request is for {}",
                wrapped.resource_id, request.resource_id
            )));
        }
        if wrapped.recipient_public_id != request.requester_public_id {
            return Err(LedgerError::InvalidFulfillment(format!(
                "wrap is addressed to {}, request is from {}",
                wrapped.recipient_public_id.short(),
                request.requester_public_id.short()
            )));
        }
        if !self
            .store
            .is_authorized(&request.resource_id, &wrapped.wrapped_by_public_id)
            .await?
        {
            return Err(LedgerError::InvalidFulfillment(format!(
                "wrapper {} is not a member of {}",
                wrapped.wrapped_by_public_id.short(),
                request.resource_id
            )));
        }

        self.store.put_wrapped_key(wrapped).await?;
        if !self.store.mark_request_fulfilled(request_id, unix_now()).await? {
            debug!(request_id, "request fulfilled concurrently");
            return Ok(FulfillOutcome::AlreadyFulfilled);
        }

        info!(
            resource = %request.resource_id,
            recipient = %request.requester_public_id.short(),
            request_id,
            version = wrapped.key_version,
            "key request fulfilled"
        );
        let _ = self.events.send(LedgerEvent::Fulfilled {
            request_id: request_id.to_string(),
            resource_id: request.resource_id,
            recipient: request.requester_public_id,
        });
        Ok(FulfillOutcome::Fulfilled)
    }
}

/// Summary of one pull pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub fulfilled: usize,
    pub already_fulfilled: usize,
    /// Requests for resources this holder has no key for.
    pub skipped: usize,
    pub failed: usize,
}

/// Holder side: answers key requests with `ChannelKeyManager`.
#[derive(Clone)]
pub struct KeyRequestResponder {
    ledger: Arc<KeyRequestLedger>,
    keys: Arc<ChannelKeyManager>,
}

impl KeyRequestResponder {
    pub fn new(ledger: Arc<KeyRequestLedger>, keys: Arc<ChannelKeyManager>) -> Self {
        Self { ledger, keys }
    }

    /// Rewrap the current key for the requester and fulfill.
    pub async fn handle(&self, request: &KeyRequest) -> Result<FulfillOutcome, LedgerError> {
        if !request.is_pending() {
            return Ok(FulfillOutcome::AlreadyFulfilled);
        }
        let wrapped = self
            .keys
            .wrap_current_for(&request.resource_id, &request.requester_public_id)
            .await?;
        self.ledger.fulfill(&request.id, &wrapped).await
    }

    /// Fulfill every pending request this holder can.
    pub async fn catch_up(&self, resource_id: Option<&str>) -> Result<CatchUpReport, LedgerError> {
        let mut report = CatchUpReport::default();
        for request in self.ledger.pending_requests(resource_id).await? {
            match self.handle(&request).await {
                Ok(FulfillOutcome::Fulfilled) => report.fulfilled += 1,
                Ok(FulfillOutcome::AlreadyFulfilled) => report.already_fulfilled += 1,
                Err(LedgerError::Key(KeyError::NoKeyAvailable { .. })) => report.skipped += 1,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "could not fulfill key request");
                    report.failed += 1;
                }
            }
        }
        if report.fulfilled > 0 {
            debug!(fulfilled = report.fulfilled, "catch-up pass fulfilled requests");
        }
        Ok(report)
    }

    /// Fulfill requests as they are announced. A lagging receiver falls back
    /// to a catch-up pass. Returns when the ledger is dropped.
    pub async fn run_push(&self, mut events: broadcast::Receiver<LedgerEvent>) {
        loop {
            match events.recv().await {
                Ok(LedgerEvent::Requested(request)) => {
                    if let Err(e) = self.handle(&request).await {
                        debug!(request_id = %request.id, error = %e, "push fulfillment skipped");
                    }
                }
                Ok(LedgerEvent::Fulfilled { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "ledger notifications lagged, catching up");
                    if let Err(e) = self.catch_up(None).await {
                        warn!(error = %e, "catch-up failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Periodic pull path. Runs until the task is aborted.
    pub async fn run_polling(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.catch_up(None).await {
                warn!(error = %e, "polling pass failed");
            }
        }
    }
}
