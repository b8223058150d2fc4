//! Scenario: Webhook routing
//!
//! # Invariant under test
//! Authentic webhooks are routed by event type. Unknown references and
//! unhandled event types are acknowledged without touching any order, so
//! the gateway stops redelivering them.

use sfr_engine::webhook::parse_event;
use sfr_engine::{Ledger, WebhookDisposition};
use sfr_schemas::{PaymentStatus, RefundStatus};
use sfr_testkit::{seed_order, Harness, Line};

#[tokio::test]
async fn unknown_reference_is_dropped() {
    let h = Harness::new();
    let event = parse_event(br#"{"event":"charge.success","data":{"reference":"order-unknown"}}"#)
        .unwrap();
    let d = h.coordinator.handle_webhook_event(event).await.unwrap();
    assert_eq!(
        d,
        WebhookDisposition::Dropped {
            reference: "order-unknown".to_string()
        }
    );
}

#[tokio::test]
async fn unhandled_event_is_ignored() {
    let h = Harness::new();
    seed_order(&h.ledger, "order-wh-ign", &[Line::new(1, 1, 10)]).await;
    let event =
        parse_event(br#"{"event":"transfer.success","data":{"reference":"order-wh-ign"}}"#).unwrap();
    let d = h.coordinator.handle_webhook_event(event).await.unwrap();
    assert!(matches!(d, WebhookDisposition::Ignored { ref event } if event == "transfer.success"));
    let order = h
        .ledger
        .order_by_reference("order-wh-ign")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn charge_failed_then_refund_events_route_correctly() {
    let h = Harness::new();
    let seeded = seed_order(&h.ledger, "order-wh-1", &[Line::new(3, 1, 10)]).await;

    let d = h
        .coordinator
        .handle_webhook_event(
            parse_event(
                br#"{"event":"charge.failed","data":{"reference":"order-wh-1","gateway_response":"Insufficient funds"}}"#,
            )
            .unwrap(),
        )
        .await
        .unwrap();
    match d {
        WebhookDisposition::Reconciled(r) => {
            assert_eq!(r.state.payment_status, PaymentStatus::Failed)
        }
        other => panic!("unexpected {other:?}"),
    }

    // A refund event for a never-paid order has nothing to apply.
    let d = h
        .coordinator
        .handle_webhook_event(
            parse_event(
                br#"{"event":"refund.processed","data":{"transaction_reference":"order-wh-1"}}"#,
            )
            .unwrap(),
        )
        .await
        .unwrap();
    assert!(matches!(d, WebhookDisposition::Reconciled(ref r) if r.already_processed));
    let order = h.ledger.order(seeded.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.refund_status, None::<RefundStatus>);
}
