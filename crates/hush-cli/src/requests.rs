//! Key request ledger commands.

use std::time::Duration;

use hush_core::key_requests::{AppendOutcome, CatchUpReport, FulfillOutcome};
use hush_core::types::KeyRequestView;
use hush_core::{KeyRequestResponder, LedgerError};
use hush_crypto::identity::Principal;

use crate::channel::KeyContext;

/// Ask holders of `resource_id` to wrap its key for the local identity.
pub async fn create(ctx: &KeyContext, resource_id: &str, name: Option<String>) -> Result<AppendOutcome, LedgerError> {
    let mut principal = Principal::new(ctx.public_id());
    principal.display_name = name;
    ctx.ledger.request_key(resource_id, &principal).await
}

pub async fn list(ctx: &KeyContext, resource_id: Option<&str>) -> Result<Vec<KeyRequestView>, LedgerError> {
    ctx.ledger.list_pending(resource_id).await
}

fn responder(ctx: &KeyContext) -> KeyRequestResponder {
    KeyRequestResponder::new(ctx.ledger.clone(), ctx.keys.clone())
}

pub async fn fulfill_one(ctx: &KeyContext, request_id: &str) -> Result<FulfillOutcome, LedgerError> {
    let request = ctx.ledger.get(request_id).await?;
    responder(ctx).handle(&request).await
}

pub async fn fulfill_pending(ctx: &KeyContext, resource_id: Option<&str>) -> Result<CatchUpReport, LedgerError> {
    responder(ctx).catch_up(resource_id).await
}

/// Poll the ledger every `interval` until Ctrl-C.
pub async fn watch(ctx: &KeyContext, interval: Duration) -> anyhow::Result<()> {
    let responder = responder(ctx);
    tokio::select! {
        _ = responder.run_polling(interval) => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("stopping key request responder");
            Ok(signal?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hush_core::{InMemoryKeyStore, KeyStore};

    use crate::channel::tests::context_on;

    #[tokio::test]
    async fn test_request_list_fulfill() {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let holder = context_on(store.clone());
        let newcomer = context_on(store);

        holder.create("general").await.unwrap();
        holder.grant("general", newcomer.public_id(), None).await.unwrap();

        let AppendOutcome::Created(request) = create(&newcomer, "general", Some("P3".into())).await.unwrap() else {
            panic!("expected a new request");
        };
        assert!(matches!(
            create(&newcomer, "general", None).await.unwrap(),
            AppendOutcome::AlreadyPending(_)
        ));

        let pending = list(&holder, Some("general")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester_display_name.as_deref(), Some("P3"));

        assert_eq!(fulfill_one(&holder, &request.id).await.unwrap(), FulfillOutcome::Fulfilled);
        assert_eq!(
            fulfill_one(&holder, &request.id).await.unwrap(),
            FulfillOutcome::AlreadyFulfilled
        );
        assert!(list(&holder, None).await.unwrap().is_empty());
        assert_eq!(newcomer.status("general").await.unwrap().held_versions, vec![1]);
        assert_eq!(
            create(&newcomer, "general", None).await.unwrap(),
            AppendOutcome::AlreadyHolds
        );
    }

    #[tokio::test]
    async fn test_unauthorized_request_rejected() {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let holder = context_on(store.clone());
        let stranger = context_on(store);
        holder.create("general").await.unwrap();

        let err = create(&stranger, "general", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotAuthorized { .. }));
    }

    #[tokio::test]
    async fn test_fulfill_pending_skips_without_key() {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let holder = context_on(store.clone());
        let bystander = context_on(store.clone());
        let newcomer = context_on(store);

        holder.create("general").await.unwrap();
        holder.grant("general", bystander.public_id(), None).await.unwrap();
        holder.grant("general", newcomer.public_id(), None).await.unwrap();
        create(&newcomer, "general", None).await.unwrap();

        // authorized but holding nothing: cannot help
        let report = fulfill_pending(&bystander, None).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.fulfilled, 0);

        let report = fulfill_pending(&holder, Some("general")).await.unwrap();
        assert_eq!(report.fulfilled, 1);
        assert!(list(&holder, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_request_id() {
        let holder = context_on(Arc::new(InMemoryKeyStore::new()));
        let err = fulfill_one(&holder, "missing").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
