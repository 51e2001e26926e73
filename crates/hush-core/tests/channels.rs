//! Integration tests for channel key distribution and the key request ledger.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};

use hush_core::harness::{run_ledger_flow, Team};
use hush_core::key_requests::{AppendOutcome, FulfillOutcome};
use hush_core::{KeyError, KeyStore};
use hush_crypto::identity::Principal;

#[tokio::test]
async fn test_rotation_keeps_old_versions_for_existing_holders() {
    let team = Team::new();
    let p1 = team.member();
    p1.create_channel_key("general").await.unwrap();
    let m1 = p1.encrypt_message("general", b"before rotation").await.unwrap();

    let p2 = team.member();
    team.authorize("general", &p2).await.unwrap();
    assert_eq!(p1.rotate("general").await.unwrap(), 2);
    let m2 = p1.encrypt_message("general", b"after rotation").await.unwrap();

    assert_eq!(p1.decrypt_message("general", &m1).await.unwrap(), b"before rotation");
    assert_eq!(p1.decrypt_message("general", &m2).await.unwrap(), b"after rotation");

    assert_eq!(p2.decrypt_message("general", &m2).await.unwrap(), b"after rotation");
    let err = p2.decrypt_message("general", &m1).await.unwrap_err();
    assert_eq!(
        err,
        KeyError::NoKeyAvailable {
            resource_id: "general".into(),
            version: Some(1)
        }
    );
    assert!(p2.display_message("general", &m1).await.is_placeholder());
}

#[tokio::test]
async fn test_ledger_scenario_never_exposes_plaintext() {
    let team = Team::new();
    let p1 = team.member();
    let key = p1.create_channel_key("general").await.unwrap();

    let p3 = team.member();
    team.authorize("general", &p3).await.unwrap();
    assert!(p3.resource_key("general").await.unwrap_err().is_no_key());

    let outcome = team
        .ledger
        .request_key("general", &Principal::new(p3.public_id()).with_display_name("P3"))
        .await
        .unwrap();
    let AppendOutcome::Created(request) = outcome else {
        panic!("expected a new request");
    };

    let mut events = team.ledger.subscribe();
    let responder = team.responder(p1.clone());
    assert_eq!(responder.handle(&request).await.unwrap(), FulfillOutcome::Fulfilled);
    assert!(events.recv().await.is_ok());

    let unwrapped = p3.resource_key("general").await.unwrap();
    assert!(unwrapped.same_key(&key));

    let encoded = STANDARD.encode(key.as_bytes());
    for wrapped in team.store.list_wrapped_keys("general").await.unwrap() {
        assert!(!wrapped.ciphertext.contains(&encoded));
        let raw = STANDARD.decode(&wrapped.ciphertext).unwrap();
        assert!(!raw.windows(32).any(|w| w == key.as_bytes()));
    }
}

#[tokio::test]
async fn test_concurrent_fulfillment_converges() {
    let team = Team::new();
    let p1 = team.member();
    p1.create_channel_key("general").await.unwrap();
    let p2 = team.member();
    team.authorize("general", &p2).await.unwrap();
    p1.distribute_to_pending("general").await.unwrap();

    let p3 = team.member();
    team.authorize("general", &p3).await.unwrap();
    let AppendOutcome::Created(request) = team
        .ledger
        .request_key("general", &Principal::new(p3.public_id()))
        .await
        .unwrap()
    else {
        panic!("expected a new request");
    };

    let r1 = team.responder(p1.clone());
    let r2 = team.responder(p2.clone());
    let (a, b) = tokio::join!(r1.handle(&request), r2.handle(&request));
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(
        outcomes.iter().filter(|o| **o == FulfillOutcome::Fulfilled).count(),
        1
    );

    let wraps: Vec<_> = team
        .store
        .list_wrapped_keys("general")
        .await
        .unwrap()
        .into_iter()
        .filter(|w| w.recipient_public_id == p3.public_id())
        .collect();
    assert_eq!(wraps.len(), 1);
    assert_eq!(p3.resource_key("general").await.unwrap().version(), 1);
    assert!(team.ledger.list_pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_distribution_then_idle_pass() {
    let team = Team::new();
    let p1 = team.member();
    p1.create_channel_key("general").await.unwrap();
    let p2 = team.member();
    team.authorize("general", &p2).await.unwrap();
    p1.distribute_to_pending("general").await.unwrap();

    for _ in 0..5 {
        let newcomer = team.member();
        team.authorize("general", &newcomer).await.unwrap();
    }

    let (a, b) = tokio::join!(
        p1.distribute_to_pending("general"),
        p2.distribute_to_pending("general")
    );
    assert!(a.unwrap().failed.is_empty());
    assert!(b.unwrap().failed.is_empty());

    let writes = team.store.wrap_writes();
    let idle = p1.distribute_to_pending("general").await.unwrap();
    assert_eq!(idle.writes(), 0);
    assert_eq!(idle.already_current, 7);
    assert_eq!(team.store.wrap_writes(), writes);
}

#[tokio::test]
async fn test_requests_after_rotation_get_current_version() {
    let team = Team::new();
    let p1 = team.member();
    p1.create_channel_key("general").await.unwrap();

    let p3 = team.member();
    team.authorize("general", &p3).await.unwrap();
    let AppendOutcome::Created(request) = team
        .ledger
        .request_key("general", &Principal::new(p3.public_id()))
        .await
        .unwrap()
    else {
        panic!("expected a new request");
    };

    // rotation wraps the new version for every member, p3 included
    p1.rotate("general").await.unwrap();
    assert_eq!(
        team.ledger
            .request_key("general", &Principal::new(p3.public_id()))
            .await
            .unwrap(),
        AppendOutcome::AlreadyHolds
    );

    team.responder(p1.clone()).handle(&request).await.unwrap();
    assert_eq!(p3.resource_key("general").await.unwrap().version(), 2);
}

#[tokio::test]
async fn test_polling_responder_fulfills() {
    let team = Team::new();
    let p1 = team.member();
    p1.create_channel_key("general").await.unwrap();
    let p3 = team.member();
    team.authorize("general", &p3).await.unwrap();
    team.ledger
        .request_key("general", &Principal::new(p3.public_id()))
        .await
        .unwrap();

    let responder = team.responder(p1);
    let poller = tokio::spawn(async move { responder.run_polling(Duration::from_millis(10)).await });

    let ledger = team.ledger.clone();
    let drained = tokio::time::timeout(Duration::from_secs(2), async move {
        while !ledger.list_pending(None).await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    poller.abort();
    assert!(drained.is_ok());
    assert!(p3.resource_key("general").await.is_ok());
}

#[tokio::test]
async fn test_ledger_flow_over_push() {
    assert_eq!(run_ledger_flow("general").await.unwrap(), 1);
}
