//! Postgres implementation of the ledger ports.
//!
//! Every conditional transition is a single `UPDATE .. WHERE <from-state>`;
//! the row lock it takes holds until the surrounding transaction ends, which
//! is what serializes racing triggers. Append-only rows dedup through
//! `ON CONFLICT DO NOTHING` against their unique keys.

use async_trait::async_trait;
use chrono::Utc;
use sfr_engine::{Ledger, LedgerError, LedgerTx};
use sfr_schemas::{
    ClaimedNotification, FulfillmentStatus, FulfillmentTransition, HistoryStatus, Initiator,
    InventoryStatus, NewNotification, NewPaymentLogEntry, NewStatusHistoryEntry,
    NotificationTemplate, Order, OrderItem, OutboxStatus, PaymentLogEntry, PaymentLogStatus,
    PaymentStatus, PaymentTransition, RefundStatus, RefundTransition, StatusHistoryEntry,
    UnknownStatus,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

const ORDER_COLUMNS: &str = r#"
    id, user_id, payment_reference, payment_status, fulfillment_status,
    total_minor, payment_method, paid_at_utc, customer_email, inventory_applied,
    refund_status, refund_ticket, created_at_utc, updated_at_utc
"#;

fn storage(what: &'static str) -> impl FnOnce(sqlx::Error) -> LedgerError {
    move |e| LedgerError::Storage(anyhow::Error::new(e).context(what))
}

fn order_from_row(row: &PgRow) -> Result<Order, LedgerError> {
    let get = |e: sqlx::Error| LedgerError::Storage(anyhow::Error::new(e).context("decode order"));
    let refund_status: Option<String> = row.try_get("refund_status").map_err(get)?;
    Ok(Order {
        id: row.try_get("id").map_err(get)?,
        user_id: row.try_get("user_id").map_err(get)?,
        payment_reference: row.try_get("payment_reference").map_err(get)?,
        payment_status: PaymentStatus::parse(
            row.try_get::<&str, _>("payment_status").map_err(get)?,
        )?,
        fulfillment_status: FulfillmentStatus::parse(
            row.try_get::<&str, _>("fulfillment_status").map_err(get)?,
        )?,
        total: row.try_get("total_minor").map_err(get)?,
        payment_method: row.try_get("payment_method").map_err(get)?,
        paid_at_utc: row.try_get("paid_at_utc").map_err(get)?,
        customer_email: row.try_get("customer_email").map_err(get)?,
        inventory_applied: row.try_get("inventory_applied").map_err(get)?,
        refund_status: refund_status
            .as_deref()
            .map(RefundStatus::parse)
            .transpose()?,
        refund_ticket: row.try_get("refund_ticket").map_err(get)?,
        created_at_utc: row.try_get("created_at_utc").map_err(get)?,
        updated_at_utc: row.try_get("updated_at_utc").map_err(get)?,
    })
}

fn payment_log_from_row(row: &PgRow) -> Result<PaymentLogEntry, LedgerError> {
    let get = |e: sqlx::Error| {
        LedgerError::Storage(anyhow::Error::new(e).context("decode payment log"))
    };
    Ok(PaymentLogEntry {
        id: row.try_get("id").map_err(get)?,
        order_id: row.try_get("order_id").map_err(get)?,
        payment_reference: row.try_get("payment_reference").map_err(get)?,
        status: PaymentLogStatus::parse(row.try_get::<&str, _>("status").map_err(get)?)?,
        amount: row.try_get("amount_minor").map_err(get)?,
        method: row.try_get("method").map_err(get)?,
        processed_by: Initiator::parse(row.try_get::<&str, _>("processed_by").map_err(get)?)?,
        failure_reason: row.try_get("failure_reason").map_err(get)?,
        gateway_response: row.try_get("gateway_response").map_err(get)?,
        created_at_utc: row.try_get("created_at_utc").map_err(get)?,
    })
}

fn history_from_row(row: &PgRow) -> Result<StatusHistoryEntry, LedgerError> {
    let get =
        |e: sqlx::Error| LedgerError::Storage(anyhow::Error::new(e).context("decode history"));
    Ok(StatusHistoryEntry {
        id: row.try_get("id").map_err(get)?,
        order_id: row.try_get("order_id").map_err(get)?,
        status: HistoryStatus::parse(row.try_get::<&str, _>("status").map_err(get)?)?,
        notes: row.try_get("notes").map_err(get)?,
        created_at_utc: row.try_get("created_at_utc").map_err(get)?,
    })
}

// ---------------------------------------------------------------------------
// PgLedger
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let tx = self.pool.begin().await.map_err(storage("begin tx"))?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn order_by_reference(&self, reference: &str) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where payment_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("order_by_reference"))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_by_id(&self, order_id: Uuid) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!("select {ORDER_COLUMNS} from orders where id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("order_by_id"))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, LedgerError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, i32, i64, i32)>(
            r#"
            select order_id, product_id, quantity, unit_price, applied_qty
            from order_items
            where order_id = $1
            order by product_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("order_items"))?;

        Ok(rows
            .into_iter()
            .map(
                |(order_id, product_id, quantity, unit_price, applied_qty)| OrderItem {
                    order_id,
                    product_id,
                    quantity,
                    unit_price,
                    applied_qty,
                },
            )
            .collect())
    }

    async fn recent_payment_logs(
        &self,
        reference: &str,
        limit: i64,
    ) -> Result<Vec<PaymentLogEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            select id, order_id, payment_reference, status, amount_minor, method,
                   processed_by, failure_reason, gateway_response, created_at_utc
            from payment_logs
            where payment_reference = $1
            order by created_at_utc desc, id desc
            limit $2
            "#,
        )
        .bind(reference)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(storage("recent_payment_logs"))?;
        rows.iter().map(payment_log_from_row).collect()
    }

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            select id, order_id, status, notes, created_at_utc
            from order_status_history
            where order_id = $1
            order by created_at_utc asc, id asc
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("status_history"))?;
        rows.iter().map(history_from_row).collect()
    }

    async fn claim_notifications(
        &self,
        limit: i64,
        dispatcher: &str,
        stale_after: Duration,
    ) -> Result<Vec<ClaimedNotification>, LedgerError> {
        // SKIP LOCKED keeps two dispatchers from claiming the same row.
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, String, serde_json::Value, i32)>(
            r#"
            with picked as (
                select id
                from notification_outbox
                where status = 'pending'
                   or (status = 'claimed'
                       and claimed_at_utc < now() - make_interval(secs => $3))
                order by created_at_utc, id
                limit $1
                for update skip locked
            )
            update notification_outbox o
               set status = 'claimed',
                   claimed_by = $2,
                   claimed_at_utc = now()
              from picked
             where o.id = picked.id
            returning o.id, o.order_id, o.template, o.recipient, o.data, o.attempts
            "#,
        )
        .bind(limit.max(0))
        .bind(dispatcher)
        .bind(stale_after.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("claim_notifications"))?;

        rows.into_iter()
            .map(|(id, order_id, template, recipient, data, attempts)| {
                Ok(ClaimedNotification {
                    id,
                    order_id,
                    template: NotificationTemplate::parse(&template)?,
                    recipient,
                    data,
                    attempts,
                    claimed_by: dispatcher.to_string(),
                })
            })
            .collect::<Result<Vec<_>, UnknownStatus>>()
            .map_err(LedgerError::from)
    }

    async fn mark_notification_sent(
        &self,
        id: Uuid,
        dispatcher: &str,
    ) -> Result<bool, LedgerError> {
        let res = sqlx::query(
            r#"
            update notification_outbox
               set status = 'sent', sent_at_utc = now()
             where id = $1 and status = 'claimed' and claimed_by = $2
            "#,
        )
        .bind(id)
        .bind(dispatcher)
        .execute(&self.pool)
        .await
        .map_err(storage("mark_notification_sent"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn release_notification(
        &self,
        id: Uuid,
        dispatcher: &str,
        error: &str,
        max_attempts: i32,
    ) -> Result<OutboxStatus, LedgerError> {
        let released = sqlx::query_as::<_, (String,)>(
            r#"
            update notification_outbox
               set attempts = attempts + 1,
                   last_error = $3,
                   claimed_by = null,
                   claimed_at_utc = null,
                   status = case when attempts + 1 >= $4 then 'failed' else 'pending' end
             where id = $1 and status = 'claimed' and claimed_by = $2
            returning status
            "#,
        )
        .bind(id)
        .bind(dispatcher)
        .bind(error)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("release_notification"))?;

        let status = match released {
            Some((s,)) => s,
            // Not ours any more: report where the row stands.
            None => {
                sqlx::query_as::<_, (String,)>(
                    "select status from notification_outbox where id = $1",
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("release_notification lookup"))?
                .ok_or_else(|| LedgerError::NotFound(format!("notification {id}")))?
                .0
            }
        };
        Ok(OutboxStatus::parse(&status)?)
    }
}

// ---------------------------------------------------------------------------
// PgLedgerTx
// ---------------------------------------------------------------------------

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn order_by_reference(&mut self, reference: &str) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where payment_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage("tx order_by_reference"))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_by_id(&mut self, order_id: Uuid) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!("select {ORDER_COLUMNS} from orders where id = $1"))
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage("tx order_by_id"))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn transition_payment(&mut self, t: &PaymentTransition) -> Result<u64, LedgerError> {
        let res = sqlx::query(
            r#"
            update orders
               set payment_status = $3,
                   payment_method = coalesce(payment_method, $4),
                   paid_at_utc = case when $3 = 'paid' then $5 else paid_at_utc end,
                   updated_at_utc = $5
             where payment_reference = $1 and payment_status = $2
            "#,
        )
        .bind(&t.reference)
        .bind(t.from.as_str())
        .bind(t.to.as_str())
        .bind(t.method.as_deref())
        .bind(t.at_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("transition_payment"))?;
        Ok(res.rows_affected())
    }

    async fn transition_fulfillment(
        &mut self,
        t: &FulfillmentTransition,
    ) -> Result<u64, LedgerError> {
        let from: Vec<String> = t.from.iter().map(|s| s.as_str().to_string()).collect();
        let res = sqlx::query(
            r#"
            update orders
               set fulfillment_status = $3, updated_at_utc = $4
             where id = $1 and fulfillment_status = any($2)
            "#,
        )
        .bind(t.order_id)
        .bind(from)
        .bind(t.to.as_str())
        .bind(t.at_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("transition_fulfillment"))?;
        Ok(res.rows_affected())
    }

    async fn transition_refund(&mut self, t: &RefundTransition) -> Result<u64, LedgerError> {
        let from_none = t.from.iter().any(Option::is_none);
        let from: Vec<String> = t
            .from
            .iter()
            .flatten()
            .map(|s| s.as_str().to_string())
            .collect();
        let res = sqlx::query(
            r#"
            update orders
               set refund_status = $4,
                   refund_ticket = coalesce($5, refund_ticket),
                   updated_at_utc = now()
             where id = $1
               and (refund_status = any($2) or ($3 and refund_status is null))
            "#,
        )
        .bind(t.order_id)
        .bind(from)
        .bind(from_none)
        .bind(t.to.as_str())
        .bind(t.ticket.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(storage("transition_refund"))?;
        Ok(res.rows_affected())
    }

    async fn apply_order_decrement(&mut self, order_id: Uuid) -> Result<bool, LedgerError> {
        let marked = sqlx::query(
            "update orders set inventory_applied = true where id = $1 and inventory_applied = false",
        )
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("apply_order_decrement mark"))?;
        if marked.rows_affected() == 0 {
            return Ok(false);
        }

        // Product rows locked in id order so concurrent orders cannot deadlock.
        // Lines whose product is gone keep applied_qty = 0.
        let lines = sqlx::query_as::<_, (Uuid, i32, i32)>(
            r#"
            select oi.product_id, oi.quantity, p.quantity_on_hand
            from order_items oi
            join products p on p.id = oi.product_id
            where oi.order_id = $1
            order by oi.product_id
            for update of p
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage("apply_order_decrement lock"))?;

        for (product_id, quantity, on_hand) in lines {
            let take = quantity.min(on_hand).max(0);
            if take > 0 {
                sqlx::query(
                    r#"
                    update products
                       set quantity_on_hand = quantity_on_hand - $2,
                           status = case when quantity_on_hand - $2 <= 0 then $3 else status end,
                           updated_at_utc = now()
                     where id = $1
                    "#,
                )
                .bind(product_id)
                .bind(take)
                .bind(InventoryStatus::OutOfStock.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(storage("apply_order_decrement product"))?;
            }
            sqlx::query(
                "update order_items set applied_qty = $3 where order_id = $1 and product_id = $2",
            )
            .bind(order_id)
            .bind(product_id)
            .bind(take)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("apply_order_decrement item"))?;
            if take < quantity {
                tracing::warn!(
                    order_id = %order_id,
                    product_id = %product_id,
                    ordered = quantity,
                    taken = take,
                    "stock short; decrement floored at zero"
                );
            }
        }
        Ok(true)
    }

    async fn restore_order_decrement(&mut self, order_id: Uuid) -> Result<bool, LedgerError> {
        let marked = sqlx::query(
            "update orders set inventory_applied = false where id = $1 and inventory_applied = true",
        )
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("restore_order_decrement mark"))?;
        if marked.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            update products p
               set quantity_on_hand = p.quantity_on_hand + oi.applied_qty,
                   status = case when p.quantity_on_hand + oi.applied_qty > 0 then $2 else p.status end,
                   updated_at_utc = now()
              from order_items oi
             where oi.order_id = $1 and oi.product_id = p.id and oi.applied_qty > 0
            "#,
        )
        .bind(order_id)
        .bind(InventoryStatus::Active.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(storage("restore_order_decrement products"))?;

        sqlx::query("update order_items set applied_qty = 0 where order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("restore_order_decrement items"))?;
        Ok(true)
    }

    async fn append_payment_log(&mut self, e: &NewPaymentLogEntry) -> Result<bool, LedgerError> {
        let res = sqlx::query(
            r#"
            insert into payment_logs (
              id, order_id, payment_reference, status, amount_minor, method,
              processed_by, failure_reason, gateway_response, created_at_utc
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            on conflict (payment_reference, status) do nothing
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(e.order_id)
        .bind(&e.payment_reference)
        .bind(e.status.as_str())
        .bind(e.amount)
        .bind(e.method.as_deref())
        .bind(e.processed_by.as_str())
        .bind(e.failure_reason.as_deref())
        .bind(e.gateway_response.as_ref())
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(storage("append_payment_log"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn append_status_history(
        &mut self,
        e: &NewStatusHistoryEntry,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            insert into order_status_history (id, order_id, status, notes, created_at_utc)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(e.order_id)
        .bind(e.status.as_str())
        .bind(&e.notes)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(storage("append_status_history"))?;
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<u64, LedgerError> {
        let res = sqlx::query(
            r#"
            delete from cart_items ci
             using carts c
             where c.id = ci.cart_id and c.user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("clear_cart"))?;
        Ok(res.rows_affected())
    }

    async fn enqueue_notification(&mut self, n: &NewNotification) -> Result<bool, LedgerError> {
        let res = sqlx::query(
            r#"
            insert into notification_outbox (id, order_id, template, recipient, data)
            values ($1, $2, $3, $4, $5)
            on conflict (order_id, template) do nothing
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(n.order_id)
        .bind(n.template.as_str())
        .bind(&n.recipient)
        .bind(&n.data)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("enqueue_notification"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await.map_err(storage("commit"))
    }
}
