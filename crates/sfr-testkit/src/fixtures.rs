//! Order fixtures and a fully wired engine over the in-memory doubles.

use chrono::Utc;
use sfr_config::EngineConfig;
use sfr_engine::{
    Coordinator, DrainReport, Ledger, LedgerError, NotificationDispatcher, PaymentGateway,
};
use sfr_schemas::{FulfillmentStatus, Minor, Order, OrderItem, PaymentStatus};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{InMemoryLedger, RecordingSender, ScriptedGateway};

/// A fresh order awaiting payment.
pub fn pending_order(user_id: Uuid, reference: &str, total: Minor) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        user_id,
        payment_reference: reference.to_string(),
        payment_status: PaymentStatus::Pending,
        fulfillment_status: FulfillmentStatus::Pending,
        total,
        payment_method: None,
        paid_at_utc: None,
        customer_email: Some(format!("{user_id}@shop.test")),
        inventory_applied: false,
        refund_status: None,
        refund_ticket: None,
        created_at_utc: now,
        updated_at_utc: now,
    }
}

/// One order line to seed: a new product with `stock` on hand.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub stock: i32,
    pub quantity: i32,
    pub unit_price: Minor,
}

impl Line {
    pub fn new(stock: i32, quantity: i32, unit_price: Minor) -> Self {
        Self {
            stock,
            quantity,
            unit_price,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeededOrder {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub total: Minor,
    /// Same order as the `lines` passed to `seed_order`.
    pub products: Vec<Uuid>,
}

/// Seed products, an order over them, and two cart lines for its owner.
pub async fn seed_order(ledger: &InMemoryLedger, reference: &str, lines: &[Line]) -> SeededOrder {
    let user_id = Uuid::new_v4();
    let mut products = Vec::new();
    for (i, l) in lines.iter().enumerate() {
        products.push(ledger.insert_product(&format!("P{}", i + 1), l.stock).await);
    }
    let total = lines
        .iter()
        .map(|l| l.unit_price * Minor::from(l.quantity))
        .sum();
    let order = pending_order(user_id, reference, total);
    let items = lines
        .iter()
        .zip(&products)
        .map(|(l, p)| OrderItem {
            order_id: order.id,
            product_id: *p,
            quantity: l.quantity,
            unit_price: l.unit_price,
            applied_qty: 0,
        })
        .collect();
    let order_id = order.id;
    ledger.insert_order(order, items).await;
    ledger.add_cart_lines(user_id, 2).await;
    SeededOrder {
        order_id,
        user_id,
        reference: reference.to_string(),
        total,
        products,
    }
}

/// Engine wired over the in-memory ledger, the scripted gateway and a
/// recording sender. Gateway calls time out after 200ms.
///
/// Notifications stay queued until the test calls [`Harness::drain`];
/// [`Harness::with_post_commit_drain`] wires the background drain instead.
pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub gateway: Arc<ScriptedGateway>,
    pub sender: Arc<RecordingSender>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub coordinator: Arc<Coordinator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            gateway_timeout: Duration::from_millis(200),
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, false)
    }

    pub fn with_post_commit_drain(config: EngineConfig) -> Self {
        Self::build(config, true)
    }

    /// Deliver everything queued so far.
    pub async fn drain(&self) -> Result<DrainReport, LedgerError> {
        self.dispatcher.drain_all(10).await
    }

    fn build(config: EngineConfig, post_commit_drain: bool) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let sender = Arc::new(RecordingSender::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            ledger.clone() as Arc<dyn Ledger>,
            sender.clone(),
            config.notifications.clone(),
            "test-dispatcher",
        ));
        let mut coordinator = Coordinator::new(
            ledger.clone() as Arc<dyn Ledger>,
            gateway.clone() as Arc<dyn PaymentGateway>,
            config,
        );
        if post_commit_drain {
            coordinator = coordinator.with_dispatcher(dispatcher.clone());
        }
        let coordinator = Arc::new(coordinator);
        Self {
            ledger,
            gateway,
            sender,
            dispatcher,
            coordinator,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
