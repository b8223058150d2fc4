//! Scenario: Cancellation and fulfillment progression
//!
//! # Invariant under test
//! Only `pending` and `processing` orders can be cancelled. Shipped or
//! delivered orders are rejected with INVALID_STATE and nothing changes.
//! Customers can only cancel their own orders; fulfillment progression is
//! admin only and follows processing -> shipped -> delivered.

use sfr_engine::{Actor, EngineError, PaymentOutcome, RefundAttempt, RefundInitStatus};
use sfr_schemas::{
    FulfillmentStatus, HistoryStatus, Initiator, NotificationTemplate, PaymentStatus,
    RefundStatus,
};
use sfr_testkit::{seed_order, Harness, Line, SeededOrder};
use uuid::Uuid;

async fn paid(h: &Harness, reference: &str) -> SeededOrder {
    let seeded = seed_order(&h.ledger, reference, &[Line::new(10, 2, 750)]).await;
    h.coordinator
        .reconcile_payment(reference, PaymentOutcome::succeeded("card"), Initiator::Webhook)
        .await
        .unwrap();
    seeded
}

#[tokio::test]
async fn shipped_order_cannot_be_cancelled() {
    let h = Harness::new();
    let seeded = paid(&h, "order-shipped").await;
    let admin = Actor::admin(Uuid::new_v4());

    h.coordinator
        .advance_fulfillment(seeded.order_id, FulfillmentStatus::Shipped, None, admin)
        .await
        .unwrap();

    let err = h
        .coordinator
        .cancel_order(seeded.order_id, Actor::customer(seeded.user_id), None)
        .await
        .unwrap_err();
    match err {
        EngineError::InvalidState { fulfillment, .. } => {
            assert_eq!(fulfillment, FulfillmentStatus::Shipped)
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }

    let order = h.ledger.order(seeded.order_id).await.unwrap();
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Shipped);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert!(order.refund_status.is_none());
    assert!(h.gateway.refund_calls().is_empty());
    assert_eq!(
        h.ledger
            .product(seeded.products[0])
            .await
            .unwrap()
            .quantity_on_hand,
        8,
        "stock stays decremented"
    );
}

#[tokio::test]
async fn cancelling_a_paid_order_restores_stock_and_requests_refund() {
    let h = Harness::new();
    let seeded = paid(&h, "order-cancel-paid").await;
    h.gateway.push_refund_status(RefundInitStatus::Pending);

    let r = h
        .coordinator
        .cancel_order(
            seeded.order_id,
            Actor::customer(seeded.user_id),
            Some("changed my mind".to_string()),
        )
        .await
        .unwrap();

    assert!(r.inventory_restored);
    assert!(matches!(
        r.refund,
        Some(RefundAttempt::InProgress {
            gateway_status: RefundInitStatus::Pending,
            ticket: Some(_)
        })
    ));
    assert_eq!(r.state.fulfillment_status, FulfillmentStatus::Cancelled);
    assert_eq!(r.state.payment_status, PaymentStatus::Paid);
    assert_eq!(r.state.refund_status, Some(RefundStatus::InProgress));
    assert_eq!(
        h.gateway.refund_calls(),
        vec![("order-cancel-paid".to_string(), seeded.total)]
    );

    let history: Vec<_> = h
        .ledger
        .history(seeded.order_id)
        .await
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        history,
        vec![
            HistoryStatus::Processing,
            HistoryStatus::Cancelled,
            HistoryStatus::RefundPending
        ]
    );
    let cancelled_note = h
        .ledger
        .history(seeded.order_id)
        .await
        .into_iter()
        .find(|e| e.status == HistoryStatus::Cancelled)
        .unwrap()
        .notes;
    assert_eq!(cancelled_note, "changed my mind");
    h.drain().await.unwrap();
    assert!(h
        .sender
        .sent_templates()
        .contains(&NotificationTemplate::OrderCancelled));
}

#[tokio::test]
async fn cancelling_twice_is_invalid_state() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-cancel-twice", &[Line::new(3, 1, 100)]).await;
    let me = Actor::customer(seeded.user_id);

    h.coordinator
        .cancel_order(seeded.order_id, me, None)
        .await
        .unwrap();
    let err = h
        .coordinator
        .cancel_order(seeded.order_id, me, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
    assert_eq!(h.ledger.history(seeded.order_id).await.len(), 1);
}

#[tokio::test]
async fn strangers_cannot_cancel() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-stranger", &[Line::new(3, 1, 100)]).await;

    let err = h
        .coordinator
        .cancel_order(seeded.order_id, Actor::customer(Uuid::new_v4()), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let admin = h
        .coordinator
        .cancel_order(seeded.order_id, Actor::admin(Uuid::new_v4()), None)
        .await
        .unwrap();
    assert_eq!(admin.state.fulfillment_status, FulfillmentStatus::Cancelled);
}

#[tokio::test]
async fn fulfillment_progression_is_admin_only_and_ordered() {
    let h = Harness::new();
    let seeded = paid(&h, "order-progress").await;
    let admin = Actor::admin(Uuid::new_v4());

    let err = h
        .coordinator
        .advance_fulfillment(
            seeded.order_id,
            FulfillmentStatus::Shipped,
            None,
            Actor::customer(seeded.user_id),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let err = h
        .coordinator
        .advance_fulfillment(seeded.order_id, FulfillmentStatus::Delivered, None, admin)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE", "cannot skip shipped");

    let err = h
        .coordinator
        .advance_fulfillment(seeded.order_id, FulfillmentStatus::Pending, None, admin)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");

    let shipped = h
        .coordinator
        .advance_fulfillment(
            seeded.order_id,
            FulfillmentStatus::Shipped,
            Some("tracking 1Z999".to_string()),
            admin,
        )
        .await
        .unwrap();
    assert_eq!(shipped.fulfillment_status, FulfillmentStatus::Shipped);

    let delivered = h
        .coordinator
        .advance_fulfillment(seeded.order_id, FulfillmentStatus::Delivered, None, admin)
        .await
        .unwrap();
    assert_eq!(delivered.fulfillment_status, FulfillmentStatus::Delivered);

    let statuses: Vec<_> = h
        .ledger
        .history(seeded.order_id)
        .await
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            HistoryStatus::Processing,
            HistoryStatus::Shipped,
            HistoryStatus::Delivered
        ]
    );
}

#[tokio::test]
async fn admin_cancel_through_fulfillment_update() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-admin-cancel", &[Line::new(3, 1, 100)]).await;

    let state = h
        .coordinator
        .advance_fulfillment(
            seeded.order_id,
            FulfillmentStatus::Cancelled,
            None,
            Actor::admin(Uuid::new_v4()),
        )
        .await
        .unwrap();
    assert_eq!(state.fulfillment_status, FulfillmentStatus::Cancelled);
}
