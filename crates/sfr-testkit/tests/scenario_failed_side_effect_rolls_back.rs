//! Scenario: A failing side effect rolls back the whole reconciliation
//!
//! # Invariant under test
//! The payment transition and its side effects commit together. If any
//! step fails after the conditional update, the order stays `pending`, no
//! stock is taken and no audit rows exist, so a redelivery can still win.

use sfr_engine::{Actor, PaymentOutcome};
use sfr_schemas::{Initiator, PaymentStatus};
use sfr_testkit::{seed_order, FailPoint, Harness, Line};

async fn assert_untouched(h: &Harness, seeded: &sfr_testkit::SeededOrder, stock: i32) {
    let order = h.ledger.order(seeded.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(!order.inventory_applied);
    assert_eq!(
        h.ledger
            .product(seeded.products[0])
            .await
            .unwrap()
            .quantity_on_hand,
        stock
    );
    assert!(h.ledger.payment_logs(&seeded.reference).await.is_empty());
    assert!(h.ledger.history(seeded.order_id).await.is_empty());
    assert!(h.ledger.outbox().await.is_empty());
    assert_eq!(h.ledger.cart_lines(seeded.user_id).await, 2);
}

#[tokio::test]
async fn failure_at_each_step_leaves_order_pending() {
    for fp in [
        FailPoint::AppendStatusHistory,
        FailPoint::ClearCart,
        FailPoint::Commit,
    ] {
        let h = Harness::new();
        let seeded = seed_order(&h.ledger, "order-rb", &[Line::new(6, 2, 100)]).await;
        h.ledger.fail_once(fp);

        let err = h
            .coordinator
            .reconcile_payment(
                "order-rb",
                PaymentOutcome::succeeded("card"),
                Initiator::Webhook,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORAGE", "{fp:?}");
        assert_untouched(&h, &seeded, 6).await;

        // Redelivery after the fault wins normally.
        let r = h
            .coordinator
            .reconcile_payment(
                "order-rb",
                PaymentOutcome::succeeded("card"),
                Initiator::Webhook,
            )
            .await
            .unwrap();
        assert!(!r.already_processed, "{fp:?}");
        assert_eq!(
            h.ledger
                .product(seeded.products[0])
                .await
                .unwrap()
                .quantity_on_hand,
            4
        );
    }
}

#[tokio::test]
async fn failed_cancellation_restores_nothing() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-rb-cancel", &[Line::new(6, 2, 100)]).await;
    h.coordinator
        .reconcile_payment(
            "order-rb-cancel",
            PaymentOutcome::succeeded("card"),
            Initiator::Webhook,
        )
        .await
        .unwrap();

    h.ledger.fail_once(FailPoint::Commit);
    let err = h
        .coordinator
        .cancel_order(seeded.order_id, Actor::customer(seeded.user_id), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORAGE");

    let order = h.ledger.order(seeded.order_id).await.unwrap();
    assert_eq!(
        order.fulfillment_status,
        sfr_schemas::FulfillmentStatus::Processing
    );
    assert!(order.refund_status.is_none());
    assert!(h.gateway.refund_calls().is_empty());
    assert_eq!(
        h.ledger
            .product(seeded.products[0])
            .await
            .unwrap()
            .quantity_on_hand,
        4
    );
}
