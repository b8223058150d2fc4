//! In-memory ledger with the same conditional-update semantics as Postgres.
//!
//! A transaction takes the single state lock for its whole lifetime and works
//! on a copy. `commit` writes the copy back; dropping the transaction throws
//! it away. Transactions are therefore fully serialized, which is stronger
//! than the row locks the database gives, but every conditional transition
//! still decides its winner by re-checking the `from` state under the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sfr_engine::{Ledger, LedgerError, LedgerTx};
use sfr_schemas::{
    ClaimedNotification, FulfillmentTransition, InventoryStatus, NewNotification,
    NewPaymentLogEntry, NewStatusHistoryEntry, NotificationTemplate, Order, OrderItem,
    OutboxStatus, PaymentLogEntry, PaymentTransition, Product, RefundTransition,
    StatusHistoryEntry,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub template: NotificationTemplate,
    pub recipient: String,
    pub data: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub claimed_by: Option<String>,
    pub claimed_at_utc: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemState {
    products: BTreeMap<Uuid, Product>,
    orders: BTreeMap<Uuid, Order>,
    items: Vec<OrderItem>,
    cart_lines: BTreeMap<Uuid, u64>,
    cart_clears: BTreeMap<Uuid, u32>,
    payment_logs: Vec<PaymentLogEntry>,
    history: Vec<StatusHistoryEntry>,
    outbox: Vec<OutboxRow>,
}

impl MemState {
    fn order_by_reference(&self, reference: &str) -> Option<&Order> {
        self.orders
            .values()
            .find(|o| o.payment_reference == reference)
    }
}

/// Where an injected storage failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    AppendStatusHistory,
    ClearCart,
    Commit,
}

// ---------------------------------------------------------------------------
// InMemoryLedger
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<MemState>>,
    fail_points: Arc<StdMutex<Vec<FailPoint>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next transaction reaching `fp` fails with a storage error.
    pub fn fail_once(&self, fp: FailPoint) {
        if let Ok(mut g) = self.fail_points.lock() {
            g.push(fp);
        }
    }

    // -- seeding ------------------------------------------------------------

    pub async fn insert_product(&self, name: &str, quantity_on_hand: i32) -> Uuid {
        let id = Uuid::new_v4();
        let status = if quantity_on_hand > 0 {
            InventoryStatus::Active
        } else {
            InventoryStatus::OutOfStock
        };
        self.state.lock().await.products.insert(
            id,
            Product {
                id,
                name: name.to_string(),
                quantity_on_hand,
                status,
            },
        );
        id
    }

    pub async fn insert_order(&self, order: Order, items: Vec<OrderItem>) {
        let mut s = self.state.lock().await;
        s.items.extend(items);
        s.orders.insert(order.id, order);
    }

    pub async fn add_cart_lines(&self, user_id: Uuid, lines: u64) {
        *self
            .state
            .lock()
            .await
            .cart_lines
            .entry(user_id)
            .or_default() += lines;
    }

    /// Overwrite an order as stored. For setting up states that no public
    /// operation produces directly.
    pub async fn put_order(&self, order: Order) {
        self.state.lock().await.orders.insert(order.id, order);
    }

    // -- inspection ---------------------------------------------------------

    pub async fn product(&self, id: Uuid) -> Option<Product> {
        self.state.lock().await.products.get(&id).cloned()
    }

    pub async fn order(&self, id: Uuid) -> Option<Order> {
        self.state.lock().await.orders.get(&id).cloned()
    }

    pub async fn items(&self, order_id: Uuid) -> Vec<OrderItem> {
        self.state
            .lock()
            .await
            .items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Oldest first.
    pub async fn payment_logs(&self, reference: &str) -> Vec<PaymentLogEntry> {
        self.state
            .lock()
            .await
            .payment_logs
            .iter()
            .filter(|l| l.payment_reference == reference)
            .cloned()
            .collect()
    }

    pub async fn history(&self, order_id: Uuid) -> Vec<StatusHistoryEntry> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect()
    }

    /// How many winning transactions cleared this user's cart.
    pub async fn cart_clears(&self, user_id: Uuid) -> u32 {
        self.state
            .lock()
            .await
            .cart_clears
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn cart_lines(&self, user_id: Uuid) -> u64 {
        self.state
            .lock()
            .await
            .cart_lines
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn outbox(&self) -> Vec<OutboxRow> {
        self.state.lock().await.outbox.clone()
    }
}

fn take_fail_point(points: &StdMutex<Vec<FailPoint>>, fp: FailPoint) -> Result<(), LedgerError> {
    let Ok(mut g) = points.lock() else {
        return Ok(());
    };
    if let Some(pos) = g.iter().position(|p| *p == fp) {
        g.remove(pos);
        return Err(LedgerError::Storage(anyhow::anyhow!(
            "injected failure at {fp:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        let work = (*guard).clone();
        Ok(Box::new(InMemoryTx {
            guard,
            work,
            fail_points: self.fail_points.clone(),
        }))
    }

    async fn order_by_reference(&self, reference: &str) -> Result<Option<Order>, LedgerError> {
        Ok(self.state.lock().await.order_by_reference(reference).cloned())
    }

    async fn order_by_id(&self, order_id: Uuid) -> Result<Option<Order>, LedgerError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, LedgerError> {
        Ok(self.items(order_id).await)
    }

    async fn recent_payment_logs(
        &self,
        reference: &str,
        limit: i64,
    ) -> Result<Vec<PaymentLogEntry>, LedgerError> {
        let mut logs = self.payment_logs(reference).await;
        logs.reverse();
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LedgerError> {
        Ok(self.history(order_id).await)
    }

    async fn claim_notifications(
        &self,
        limit: i64,
        dispatcher: &str,
        stale_after: Duration,
    ) -> Result<Vec<ClaimedNotification>, LedgerError> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(stale_after)
                .map_err(|e| LedgerError::Storage(anyhow::anyhow!("stale_after: {e}")))?;
        let mut s = self.state.lock().await;
        let mut out = Vec::new();
        for row in s.outbox.iter_mut() {
            if out.len() as i64 >= limit {
                break;
            }
            let claimable = match row.status {
                OutboxStatus::Pending => true,
                OutboxStatus::Claimed => row.claimed_at_utc.map_or(true, |t| t < stale_before),
                OutboxStatus::Sent | OutboxStatus::Failed => false,
            };
            if !claimable {
                continue;
            }
            row.status = OutboxStatus::Claimed;
            row.claimed_by = Some(dispatcher.to_string());
            row.claimed_at_utc = Some(now);
            out.push(ClaimedNotification {
                id: row.id,
                order_id: row.order_id,
                template: row.template,
                recipient: row.recipient.clone(),
                data: row.data.clone(),
                attempts: row.attempts,
                claimed_by: dispatcher.to_string(),
            });
        }
        Ok(out)
    }

    async fn mark_notification_sent(
        &self,
        id: Uuid,
        dispatcher: &str,
    ) -> Result<bool, LedgerError> {
        let mut s = self.state.lock().await;
        match s.outbox.iter_mut().find(|r| {
            r.id == id
                && r.status == OutboxStatus::Claimed
                && r.claimed_by.as_deref() == Some(dispatcher)
        }) {
            Some(row) => {
                row.status = OutboxStatus::Sent;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_notification(
        &self,
        id: Uuid,
        dispatcher: &str,
        error: &str,
        max_attempts: i32,
    ) -> Result<OutboxStatus, LedgerError> {
        let mut s = self.state.lock().await;
        let row = s
            .outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| LedgerError::NotFound(format!("notification {id}")))?;
        if row.status != OutboxStatus::Claimed || row.claimed_by.as_deref() != Some(dispatcher) {
            return Ok(row.status);
        }
        row.attempts += 1;
        row.last_error = Some(error.to_string());
        row.claimed_by = None;
        row.claimed_at_utc = None;
        row.status = if row.attempts >= max_attempts {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        Ok(row.status)
    }
}

// ---------------------------------------------------------------------------
// InMemoryTx
// ---------------------------------------------------------------------------

struct InMemoryTx {
    guard: OwnedMutexGuard<MemState>,
    work: MemState,
    fail_points: Arc<StdMutex<Vec<FailPoint>>>,
}

impl InMemoryTx {
    fn order_mut(&mut self, order_id: Uuid) -> Result<&mut Order, LedgerError> {
        self.work
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| LedgerError::NotFound(format!("order {order_id}")))
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn order_by_reference(&mut self, reference: &str) -> Result<Option<Order>, LedgerError> {
        Ok(self.work.order_by_reference(reference).cloned())
    }

    async fn order_by_id(&mut self, order_id: Uuid) -> Result<Option<Order>, LedgerError> {
        Ok(self.work.orders.get(&order_id).cloned())
    }

    async fn transition_payment(&mut self, t: &PaymentTransition) -> Result<u64, LedgerError> {
        let Some(order) = self
            .work
            .orders
            .values_mut()
            .find(|o| o.payment_reference == t.reference && o.payment_status == t.from)
        else {
            return Ok(0);
        };
        order.payment_status = t.to;
        if order.payment_method.is_none() {
            order.payment_method = t.method.clone();
        }
        if t.to == sfr_schemas::PaymentStatus::Paid {
            order.paid_at_utc = Some(t.at_utc);
        }
        order.updated_at_utc = t.at_utc;
        Ok(1)
    }

    async fn transition_fulfillment(
        &mut self,
        t: &FulfillmentTransition,
    ) -> Result<u64, LedgerError> {
        match self.work.orders.get_mut(&t.order_id) {
            Some(o) if t.from.contains(&o.fulfillment_status) => {
                o.fulfillment_status = t.to;
                o.updated_at_utc = t.at_utc;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn transition_refund(&mut self, t: &RefundTransition) -> Result<u64, LedgerError> {
        match self.work.orders.get_mut(&t.order_id) {
            Some(o) if t.from.contains(&o.refund_status) => {
                o.refund_status = Some(t.to);
                if t.ticket.is_some() {
                    o.refund_ticket = t.ticket.clone();
                }
                o.updated_at_utc = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn apply_order_decrement(&mut self, order_id: Uuid) -> Result<bool, LedgerError> {
        if self.order_mut(order_id)?.inventory_applied {
            return Ok(false);
        }
        let MemState {
            products, items, ..
        } = &mut self.work;
        let mut lines: Vec<&mut OrderItem> =
            items.iter_mut().filter(|i| i.order_id == order_id).collect();
        lines.sort_by_key(|i| i.product_id);
        for item in lines {
            let Some(p) = products.get_mut(&item.product_id) else {
                item.applied_qty = 0;
                continue;
            };
            let take = item.quantity.min(p.quantity_on_hand).max(0);
            p.quantity_on_hand -= take;
            if p.quantity_on_hand == 0 {
                p.status = InventoryStatus::OutOfStock;
            }
            item.applied_qty = take;
        }
        self.order_mut(order_id)?.inventory_applied = true;
        Ok(true)
    }

    async fn restore_order_decrement(&mut self, order_id: Uuid) -> Result<bool, LedgerError> {
        if !self.order_mut(order_id)?.inventory_applied {
            return Ok(false);
        }
        let MemState {
            products, items, ..
        } = &mut self.work;
        for item in items.iter_mut().filter(|i| i.order_id == order_id) {
            if let Some(p) = products.get_mut(&item.product_id) {
                p.quantity_on_hand += item.applied_qty;
                if p.quantity_on_hand > 0 {
                    p.status = InventoryStatus::Active;
                }
            }
            item.applied_qty = 0;
        }
        self.order_mut(order_id)?.inventory_applied = false;
        Ok(true)
    }

    async fn append_payment_log(&mut self, e: &NewPaymentLogEntry) -> Result<bool, LedgerError> {
        if self
            .work
            .payment_logs
            .iter()
            .any(|l| l.payment_reference == e.payment_reference && l.status == e.status)
        {
            return Ok(false);
        }
        self.work.payment_logs.push(PaymentLogEntry {
            id: Uuid::new_v4(),
            order_id: e.order_id,
            payment_reference: e.payment_reference.clone(),
            status: e.status,
            amount: e.amount,
            method: e.method.clone(),
            processed_by: e.processed_by,
            failure_reason: e.failure_reason.clone(),
            gateway_response: e.gateway_response.clone(),
            created_at_utc: Utc::now(),
        });
        Ok(true)
    }

    async fn append_status_history(
        &mut self,
        e: &NewStatusHistoryEntry,
    ) -> Result<(), LedgerError> {
        take_fail_point(&self.fail_points, FailPoint::AppendStatusHistory)?;
        self.work.history.push(StatusHistoryEntry {
            id: Uuid::new_v4(),
            order_id: e.order_id,
            status: e.status,
            notes: e.notes.clone(),
            created_at_utc: Utc::now(),
        });
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<u64, LedgerError> {
        take_fail_point(&self.fail_points, FailPoint::ClearCart)?;
        let removed = self.work.cart_lines.remove(&user_id).unwrap_or(0);
        *self.work.cart_clears.entry(user_id).or_default() += 1;
        Ok(removed)
    }

    async fn enqueue_notification(&mut self, n: &NewNotification) -> Result<bool, LedgerError> {
        if self
            .work
            .outbox
            .iter()
            .any(|r| r.order_id == n.order_id && r.template == n.template)
        {
            return Ok(false);
        }
        self.work.outbox.push(OutboxRow {
            id: Uuid::new_v4(),
            order_id: n.order_id,
            template: n.template,
            recipient: n.recipient.clone(),
            data: n.data.clone(),
            status: OutboxStatus::Pending,
            attempts: 0,
            claimed_by: None,
            claimed_at_utc: None,
            last_error: None,
            created_at_utc: Utc::now(),
        });
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        take_fail_point(&self.fail_points, FailPoint::Commit)?;
        let InMemoryTx {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }
}
