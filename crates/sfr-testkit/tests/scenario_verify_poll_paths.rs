//! Scenario: User poll and admin verification
//!
//! # Invariant under test
//! Verification asks the gateway only while the order is `pending`, and
//! only settles the order when the gateway reports a final charge status.
//! A slow gateway surfaces GATEWAY_TIMEOUT and an unsettled charge surfaces
//! INCONCLUSIVE; both leave the order untouched and retryable. Customers
//! cannot verify other customers' orders.

use sfr_engine::{Actor, GatewayError};
use sfr_schemas::{FulfillmentStatus, Initiator, PaymentStatus};
use sfr_testkit::{seed_order, Harness, Line};
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn gateway_timeout_leaves_order_pending() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-v-slow", &[Line::new(5, 1, 100)]).await;
    h.gateway.charge_success("order-v-slow", "card", 100);
    h.gateway.set_delay(Some(Duration::from_secs(2)));

    let err = h
        .coordinator
        .verify_and_reconcile("order-v-slow", Actor::customer(seeded.user_id))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "GATEWAY_TIMEOUT");
    assert!(err.retryable());

    let order = h.ledger.order(seeded.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(h.ledger.payment_logs("order-v-slow").await.is_empty());

    h.gateway.set_delay(None);
    let r = h
        .coordinator
        .verify_and_reconcile("order-v-slow", Actor::customer(seeded.user_id))
        .await
        .unwrap();
    assert_eq!(r.state.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn unsettled_charge_is_inconclusive() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-v-pending", &[Line::new(5, 1, 100)]).await;
    h.gateway.charge_status("order-v-pending", "ongoing", None);

    let err = h
        .coordinator
        .verify_and_reconcile("order-v-pending", Actor::customer(seeded.user_id))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INCONCLUSIVE");
    assert_eq!(
        h.ledger.order(seeded.order_id).await.unwrap().payment_status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn abandoned_charge_settles_as_failed_with_gateway_reason() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-v-abandon", &[Line::new(5, 1, 100)]).await;
    h.gateway
        .charge_status("order-v-abandon", "abandoned", Some("Customer left checkout"));

    let r = h
        .coordinator
        .verify_and_reconcile("order-v-abandon", Actor::admin(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(r.state.payment_status, PaymentStatus::Failed);
    assert_eq!(r.state.fulfillment_status, FulfillmentStatus::Pending);

    let logs = h.ledger.payment_logs("order-v-abandon").await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].processed_by, Initiator::Admin);
    assert_eq!(
        logs[0].failure_reason.as_deref(),
        Some("Customer left checkout")
    );
}

#[tokio::test]
async fn gateway_rejection_is_reported_not_applied() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-v-rej", &[Line::new(5, 1, 100)]).await;
    h.gateway.set_verify(
        "order-v-rej",
        Err(GatewayError::Rejected {
            code: "http_404".to_string(),
            message: "Transaction reference not found".to_string(),
        }),
    );

    let err = h
        .coordinator
        .verify_and_reconcile("order-v-rej", Actor::customer(seeded.user_id))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "GATEWAY_ERROR");
    assert_eq!(
        h.ledger.order(seeded.order_id).await.unwrap().payment_status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn customers_only_verify_their_own_orders() {
    let h = Harness::new();
    seed_order(&h.ledger, "order-v-mine", &[Line::new(5, 1, 100)]).await;
    h.gateway.charge_success("order-v-mine", "card", 100);

    let err = h
        .coordinator
        .verify_and_reconcile("order-v-mine", Actor::customer(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert!(h.gateway.verify_calls().is_empty());
}

#[tokio::test]
async fn payment_status_view_is_owner_scoped_and_newest_first() {
    let h = Harness::new();
    let seeded = seed_order(
        &h.ledger,
        "order-v-view",
        &[Line::new(5, 1, 100), Line::new(5, 2, 50)],
    )
    .await;
    h.gateway.charge_success("order-v-view", "card", 200);
    h.coordinator
        .verify_and_reconcile("order-v-view", Actor::customer(seeded.user_id))
        .await
        .unwrap();
    h.coordinator
        .cancel_order(seeded.order_id, Actor::customer(seeded.user_id), None)
        .await
        .unwrap();

    let view = h
        .coordinator
        .payment_status("order-v-view", Actor::customer(seeded.user_id))
        .await
        .unwrap();
    assert_eq!(view.item_count, 2);
    assert!(view.paid_at_utc.is_some());
    assert_eq!(view.state.total, 200);
    assert!(view.recent_logs.len() <= 5);
    assert_eq!(
        view.recent_logs.last().map(|l| l.status),
        Some(sfr_schemas::PaymentLogStatus::Paid),
        "oldest entry last"
    );

    let err = h
        .coordinator
        .payment_status("order-v-view", Actor::customer(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let history = h
        .coordinator
        .order_history(seeded.order_id, Actor::admin(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(
        history.history.first().map(|e| e.status),
        Some(sfr_schemas::HistoryStatus::Processing)
    );
}
