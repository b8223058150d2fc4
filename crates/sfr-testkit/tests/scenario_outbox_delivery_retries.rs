//! Scenario: Notification outbox delivery
//!
//! # Invariant under test
//! Notifications are queued inside the winning transaction and delivered
//! after commit. A send failure never undoes the reconciliation: the row is
//! re-queued with its attempt count bumped, and parked as `failed` once
//! `max_attempts` is reached. Each (order, template) is queued at most once.
//! The post-commit drain runs in the background; a slow relay never holds
//! up the reconciliation result.

use sfr_config::{EngineConfig, NotificationSettings};
use sfr_engine::{Actor, PaymentOutcome};
use sfr_schemas::{Initiator, NotificationTemplate, OutboxStatus, PaymentStatus};
use sfr_testkit::{seed_order, Harness, Line};
use std::time::Duration;

#[tokio::test]
async fn send_failure_requeues_and_later_drain_delivers() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-ob-1", &[Line::new(5, 1, 100)]).await;
    h.sender.fail_next(1);

    let r = h
        .coordinator
        .reconcile_payment(
            "order-ob-1",
            PaymentOutcome::succeeded("card"),
            Initiator::Webhook,
        )
        .await
        .unwrap();
    assert_eq!(r.state.payment_status, PaymentStatus::Paid);
    assert_eq!(h.ledger.outbox().await[0].attempts, 0);

    let report = h.dispatcher.drain_once().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.requeued, 1);
    assert!(h.sender.sent().is_empty());
    assert_eq!(
        h.ledger.order(seeded.order_id).await.unwrap().payment_status,
        PaymentStatus::Paid
    );

    let outbox = h.ledger.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].status, OutboxStatus::Pending);
    assert_eq!(outbox[0].attempts, 1);
    assert!(outbox[0].last_error.is_some());

    let report = h.dispatcher.drain_once().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.sent, 1);

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, NotificationTemplate::PaymentConfirmed);
    assert_eq!(sent[0].recipient, format!("{}@shop.test", seeded.user_id));
    assert_eq!(sent[0].data["payment_reference"], "order-ob-1");
    assert_eq!(sent[0].data["payment_method"], "card");
    assert_eq!(h.ledger.outbox().await[0].status, OutboxStatus::Sent);

    let idle = h.dispatcher.drain_all(10).await.unwrap();
    assert_eq!(idle.claimed, 0);
}

#[tokio::test]
async fn exhausted_rows_are_parked_failed() {
    let h = Harness::with_config(EngineConfig {
        gateway_timeout: Duration::from_millis(200),
        notifications: NotificationSettings {
            max_attempts: 2,
            ..NotificationSettings::default()
        },
        ..EngineConfig::default()
    });
    seed_order(&h.ledger, "order-ob-2", &[Line::new(5, 1, 100)]).await;
    h.sender.fail_next(10);

    h.coordinator
        .reconcile_payment(
            "order-ob-2",
            PaymentOutcome::failed("Declined"),
            Initiator::Webhook,
        )
        .await
        .unwrap();
    assert_eq!(h.dispatcher.drain_once().await.unwrap().requeued, 1);
    let report = h.dispatcher.drain_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let outbox = h.ledger.outbox().await;
    assert_eq!(outbox[0].status, OutboxStatus::Failed);
    assert_eq!(outbox[0].attempts, 2);
    assert_eq!(outbox[0].template, NotificationTemplate::PaymentFailed);

    assert_eq!(h.dispatcher.drain_once().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn orders_without_contact_queue_nothing() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-ob-anon", &[Line::new(5, 1, 100)]).await;
    let mut order = h.ledger.order(seeded.order_id).await.unwrap();
    order.customer_email = None;
    h.ledger.put_order(order).await;

    h.coordinator
        .reconcile_payment(
            "order-ob-anon",
            PaymentOutcome::succeeded("card"),
            Initiator::Webhook,
        )
        .await
        .unwrap();
    assert!(h.ledger.outbox().await.is_empty());
}

#[tokio::test]
async fn each_template_is_queued_once_per_order() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-ob-3", &[Line::new(5, 1, 100)]).await;
    h.coordinator
        .reconcile_payment(
            "order-ob-3",
            PaymentOutcome::succeeded("card"),
            Initiator::Webhook,
        )
        .await
        .unwrap();
    h.coordinator
        .cancel_order(seeded.order_id, Actor::customer(seeded.user_id), None)
        .await
        .unwrap();
    h.coordinator
        .reconcile_refund_outcome("order-ob-3", sfr_engine::RefundOutcome::Processed, None)
        .await
        .unwrap();
    h.coordinator
        .reconcile_refund_outcome("order-ob-3", sfr_engine::RefundOutcome::Processed, None)
        .await
        .unwrap();

    let mut templates: Vec<_> = h.ledger.outbox().await.into_iter().map(|r| r.template).collect();
    templates.sort_by_key(|t| t.as_str());
    assert_eq!(
        templates,
        vec![
            NotificationTemplate::OrderCancelled,
            NotificationTemplate::PaymentConfirmed,
            NotificationTemplate::RefundProcessed,
        ]
    );
    assert_eq!(h.drain().await.unwrap().sent, 3);
    assert_eq!(h.sender.sent().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_commit_drain_runs_in_background() {
    let h = Harness::with_post_commit_drain(EngineConfig {
        gateway_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    });
    seed_order(&h.ledger, "order-ob-bg", &[Line::new(5, 1, 100)]).await;
    h.sender.set_delay(Duration::from_secs(2));

    let r = tokio::time::timeout(
        Duration::from_secs(1),
        h.coordinator.reconcile_payment(
            "order-ob-bg",
            PaymentOutcome::succeeded("card"),
            Initiator::Webhook,
        ),
    )
    .await
    .expect("reconciliation waited on the relay")
    .unwrap();
    assert_eq!(r.state.payment_status, PaymentStatus::Paid);
    assert!(h.sender.sent().is_empty());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.sender.sent().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "background drain never delivered"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(
        h.sender.sent_templates(),
        vec![NotificationTemplate::PaymentConfirmed]
    );
}
