//! End-to-end mailbox tests for tempbox.
//!
//! Mail flows through spam evaluation, storage, gated reads and retention
//! sweeps the way a front end would drive it.

mod common;

use chrono::Duration;

use common::{t0, TestEnv};
use tempbox::{
    AccessDecision, Actor, IncomingMail, IngestOutcome, Message, NewSpamRule, RetentionSweeper,
    RuleAction, SweepReport, TempboxError,
};

#[tokio::test]
async fn test_blocked_message_is_never_stored() {
    let env = TestEnv::new();
    let service = env.service().await;
    let address = service.generate_address_at(None, None, t0()).await.unwrap();
    service
        .spam_rules()
        .create(&NewSpamRule::both(
            "unsubscribe spam",
            "unsubscribe",
            "@spam.com",
            RuleAction::Block,
        ))
        .await
        .unwrap();
    let engine = service.load_spam_engine().await.unwrap();

    let outcome = service
        .ingest_at(
            IncomingMail::new("x@spam.com", &address.address, "Please unsubscribe now", "..."),
            &engine,
            t0(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Blocked);

    let all: Vec<Message> = service.stores().merger().get_all().await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn test_deferred_delete_runs_on_schedule() {
    let env = TestEnv::new();
    let service = env.service().await;
    let address = service.generate_address_at(None, None, t0()).await.unwrap();
    service
        .spam_rules()
        .create(&NewSpamRule::sender("ads", "@ads.com", RuleAction::DeferredDelete).with_delay(10))
        .await
        .unwrap();
    let engine = service.load_spam_engine().await.unwrap();

    let outcome = service
        .ingest_at(
            IncomingMail::new("deals@ads.com", &address.address, "Weekly deals", "..."),
            &engine,
            t0(),
        )
        .await
        .unwrap();
    let stored = outcome.message().unwrap().clone();
    assert!(matches!(outcome, IngestOutcome::Deferred { .. }));
    assert!(stored.spam_flag);
    assert_eq!(stored.deferred_delete_at, Some(t0() + Duration::minutes(10)));

    let sweeper = RetentionSweeper::new(service.stores().clone(), 7);

    let early = sweeper.run_once_at(t0() + Duration::minutes(5)).await;
    assert_eq!(early.deleted_messages, 0);
    assert!(service.get_message(&stored.id).await.unwrap().is_some());

    let late = sweeper.run_once_at(t0() + Duration::minutes(11)).await;
    assert_eq!(late.deleted_messages, 1);
    assert!(service.get_message(&stored.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_starred_message_survives_ttl_but_not_deferred_delete() {
    let env = TestEnv::new();
    let service = env.service().await;
    let address = service.generate_address_at(None, None, t0()).await.unwrap();
    service
        .spam_rules()
        .create(&NewSpamRule::subject("promo", "promo", RuleAction::DeferredDelete).with_delay(60))
        .await
        .unwrap();
    let engine = service.load_spam_engine().await.unwrap();

    let keep = service
        .ingest_at(
            IncomingMail::new("friend@example.com", &address.address, "Keep me", "..."),
            &engine,
            t0(),
        )
        .await
        .unwrap();
    let promo = service
        .ingest_at(
            IncomingMail::new("shop@example.com", &address.address, "PROMO inside", "..."),
            &engine,
            t0(),
        )
        .await
        .unwrap();
    let keep_id = keep.message().unwrap().id.clone();
    let promo_id = promo.message().unwrap().id.clone();
    assert!(service.set_starred(&keep_id, true).await.unwrap());
    assert!(service.set_starred(&promo_id, true).await.unwrap());

    let sweeper = RetentionSweeper::new(service.stores().clone(), 7);
    let report = sweeper.run_once_at(t0() + Duration::days(8)).await;
    assert_eq!(report.deleted_messages, 1);

    assert!(service.get_message(&keep_id).await.unwrap().is_some());
    assert!(service.get_message(&promo_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ttl_expires_unstarred_messages_and_addresses() {
    let env = TestEnv::new();
    let service = env.service().await;
    let address = service.generate_address_at(None, None, t0()).await.unwrap();
    let engine = service.load_spam_engine().await.unwrap();
    service
        .ingest_at(
            IncomingMail::new("a@example.com", &address.address, "Hello", "..."),
            &engine,
            t0(),
        )
        .await
        .unwrap();

    let sweeper = RetentionSweeper::new(service.stores().clone(), 7);
    assert!(sweeper.run_once_at(t0() + Duration::days(6)).await.is_empty());

    let report = sweeper.run_once_at(t0() + Duration::days(8)).await;
    assert_eq!(
        report,
        SweepReport {
            deleted_messages: 1,
            deleted_addresses: 0
        }
    );

    // Default address lifetime is 720 hours
    let report = sweeper.run_once_at(t0() + Duration::days(31)).await;
    assert_eq!(report.deleted_addresses, 1);
    assert!(service
        .ownership()
        .lookup(&address.address)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_second_sweep_reports_nothing() {
    let env = TestEnv::new();
    let service = env.service().await;
    let address = service.generate_address_at(None, None, t0()).await.unwrap();
    let engine = service.load_spam_engine().await.unwrap();
    for i in 0..3 {
        service
            .ingest_at(
                IncomingMail::new("a@example.com", &address.address, format!("#{i}"), "..."),
                &engine,
                t0(),
            )
            .await
            .unwrap();
    }

    let sweeper = RetentionSweeper::new(service.stores().clone(), 7);
    let now = t0() + Duration::days(10);
    assert_eq!(sweeper.run_once_at(now).await.deleted_messages, 3);
    assert_eq!(sweeper.run_once_at(now).await, SweepReport::default());
}

#[tokio::test]
async fn test_access_matrix_through_service() {
    let env = TestEnv::new();
    let service = env.service().await;
    let gate = service.access_gate();

    let unowned = service.generate_address_at(None, None, t0()).await.unwrap();
    let owned = service.generate_address_at(Some(1), None, t0()).await.unwrap();

    // Unowned
    assert_eq!(
        gate.decide(Actor::Anonymous, &unowned.address).await.unwrap(),
        AccessDecision::AllowRead
    );
    assert_eq!(
        gate.decide(Actor::Admin(99), &unowned.address).await.unwrap(),
        AccessDecision::AllowRead
    );
    assert_eq!(
        gate.decide(Actor::User(2), &unowned.address).await.unwrap(),
        AccessDecision::AllowClaimThenRead
    );

    // Owned by self / other
    assert_eq!(
        gate.decide(Actor::User(1), &owned.address).await.unwrap(),
        AccessDecision::AllowRead
    );
    assert_eq!(
        gate.decide(Actor::User(2), &owned.address).await.unwrap(),
        AccessDecision::Forbidden
    );
    assert_eq!(
        gate.decide(Actor::Anonymous, &owned.address).await.unwrap(),
        AccessDecision::Forbidden
    );
    assert_eq!(
        gate.decide(Actor::Admin(99), &owned.address).await.unwrap(),
        AccessDecision::AllowRead
    );

    // Absent
    for actor in [Actor::Anonymous, Actor::User(1), Actor::Admin(99)] {
        let decision = gate.decide(actor, "nobody@tempbox.local").await.unwrap();
        assert_eq!(decision, AccessDecision::NotFound);
        assert_eq!(decision.status_code(), 404);
    }

    // Claim-then-read happens before the read and sticks
    assert_eq!(
        gate.authorize_read(Actor::User(2), &unowned.address)
            .await
            .unwrap(),
        AccessDecision::AllowRead
    );
    assert_eq!(
        gate.authorize_read(Actor::User(3), &unowned.address)
            .await
            .unwrap()
            .status_code(),
        403
    );
}

#[tokio::test]
async fn test_transfer_then_access() {
    let env = TestEnv::new();
    let service = env.service().await;
    let owned = service.generate_address_at(Some(1), None, t0()).await.unwrap();

    assert!(!service
        .ownership()
        .transfer(2, 3, &owned.address)
        .await
        .unwrap());
    assert!(service
        .ownership()
        .transfer(1, 2, &owned.address)
        .await
        .unwrap());

    assert!(matches!(
        service.open_mailbox(Actor::User(1), &owned.address).await,
        Err(TempboxError::Forbidden(_))
    ));
    assert!(service
        .open_mailbox(Actor::User(2), &owned.address)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_account_deletion_removes_addresses_and_mail() {
    let env = TestEnv::new();
    let service = env.service().await;
    let first = service.generate_address_at(Some(7), None, t0()).await.unwrap();
    let second = service.generate_address_at(Some(7), None, t0()).await.unwrap();
    let engine = service.load_spam_engine().await.unwrap();
    for target in [&first.address, &second.address] {
        service
            .ingest_at(
                IncomingMail::new("a@example.com", target, "Hello", "..."),
                &engine,
                t0(),
            )
            .await
            .unwrap();
    }

    assert_eq!(service.delete_account(7).await.unwrap(), 2);
    let messages: Vec<Message> = service.stores().merger().get_all().await.unwrap();
    assert!(messages.is_empty());
    assert!(service.ownership().addresses_of(7).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rule_toggle_takes_effect_on_reload() {
    let env = TestEnv::new();
    let service = env.service().await;
    let address = service.generate_address_at(None, None, t0()).await.unwrap();
    let rule = service
        .spam_rules()
        .create(&NewSpamRule::subject("lottery", "lottery", RuleAction::Block))
        .await
        .unwrap();

    let mail = || IncomingMail::new("x@example.com", &address.address, "Lottery win", "...");

    let engine = service.load_spam_engine().await.unwrap();
    assert_eq!(
        service.ingest_at(mail(), &engine, t0()).await.unwrap(),
        IngestOutcome::Blocked
    );

    assert!(service.spam_rules().set_enabled(rule.id, false).await.unwrap());
    let engine = service.load_spam_engine().await.unwrap();
    assert!(matches!(
        service.ingest_at(mail(), &engine, t0()).await.unwrap(),
        IngestOutcome::Stored { .. }
    ));
}
