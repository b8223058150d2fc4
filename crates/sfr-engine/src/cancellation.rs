//! Cancellation, refund retry and admin fulfillment progression.

use chrono::Utc;
use sfr_schemas::{
    FulfillmentStatus, FulfillmentTransition, HistoryStatus, NewStatusHistoryEntry,
    NotificationTemplate, Order, OrderState, PaymentStatus, RefundStatus, RefundTransition,
};
use uuid::Uuid;

use crate::coordinator::{enqueue, Coordinator};
use crate::error::EngineError;
use crate::refund::load;
use crate::types::{Actor, CancellationResult, RefundAttempt};

impl Coordinator {
    /// Cancel an order from `pending` or `processing`.
    ///
    /// The cancellation, inventory restore and (for paid orders) the refund
    /// claim commit together. The gateway refund runs afterwards, so the order
    /// is `cancelled` whatever the gateway answers.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: Actor,
        notes: Option<String>,
    ) -> Result<CancellationResult, EngineError> {
        let mut tx = self.ledger.begin().await?;

        let before = tx
            .order_by_id(order_id)
            .await?
            .filter(|o| actor.may_see(o.user_id))
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;

        let rows = tx
            .transition_fulfillment(&FulfillmentTransition {
                order_id,
                from: FulfillmentStatus::CANCELLABLE.to_vec(),
                to: FulfillmentStatus::Cancelled,
                at_utc: Utc::now(),
            })
            .await?;
        if rows == 0 {
            let current = load(tx.as_mut(), order_id).await.unwrap_or(before);
            return Err(invalid_state(
                &current,
                format!(
                    "cannot cancel an order that is {}",
                    current.fulfillment_status.as_str()
                ),
            ));
        }

        // Row is ours now; payment status read here cannot change under us.
        let order = load(tx.as_mut(), order_id).await?;

        let inventory_restored = tx.restore_order_decrement(order_id).await?;
        tx.append_status_history(&NewStatusHistoryEntry {
            order_id,
            status: HistoryStatus::Cancelled,
            notes: notes.unwrap_or_else(|| format!("cancelled by {}", actor.initiator().as_str())),
        })
        .await?;
        enqueue(tx.as_mut(), &order, NotificationTemplate::OrderCancelled, &None).await?;

        let refund_claimed = if order.payment_status == PaymentStatus::Paid {
            self.claim_refund(tx.as_mut(), &order, actor.initiator())
                .await?;
            true
        } else {
            false
        };

        let state = load(tx.as_mut(), order_id).await?.state();
        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            initiator = actor.initiator().as_str(),
            inventory_restored,
            refund_claimed,
            "order cancelled"
        );
        self.drain_best_effort();

        let (state, refund) = self
            .refund_after_commit(state, refund_claimed, actor)
            .await;
        Ok(CancellationResult {
            state,
            inventory_restored,
            refund,
        })
    }

    /// Re-submit a refund that ended `failed`. Admin only.
    pub async fn retry_refund(
        &self,
        order_id: Uuid,
        actor: Actor,
    ) -> Result<CancellationResult, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden("refund retry requires admin".to_string()));
        }

        let mut tx = self.ledger.begin().await?;
        let order = load(tx.as_mut(), order_id).await?;

        if order.payment_status != PaymentStatus::Paid {
            return Err(invalid_state(&order, "only paid orders can be refunded".to_string()));
        }

        let rows = tx
            .transition_refund(&RefundTransition {
                order_id,
                from: vec![Some(RefundStatus::Failed)],
                to: RefundStatus::Requested,
                ticket: None,
            })
            .await?;
        if rows == 0 {
            return Err(match order.refund_status {
                Some(refund) if refund.is_in_flight() => {
                    EngineError::RefundInFlight { order_id, refund }
                }
                _ => invalid_state(&order, "no failed refund to retry".to_string()),
            });
        }
        tx.append_status_history(&NewStatusHistoryEntry {
            order_id,
            status: HistoryStatus::RefundPending,
            notes: "refund retry requested by admin".to_string(),
        })
        .await?;
        let state = load(tx.as_mut(), order_id).await?.state();
        tx.commit().await?;

        tracing::info!(order_id = %order_id, "refund retry claimed");

        let (state, refund) = self.refund_after_commit(state, true, actor).await;
        Ok(CancellationResult {
            state,
            inventory_restored: false,
            refund,
        })
    }

    /// Admin fulfillment progression: `processing -> shipped`,
    /// `shipped -> delivered`. Cancellation goes through [`Self::cancel_order`].
    pub async fn advance_fulfillment(
        &self,
        order_id: Uuid,
        to: FulfillmentStatus,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<OrderState, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden(
                "fulfillment updates require admin".to_string(),
            ));
        }
        if to == FulfillmentStatus::Cancelled {
            return self
                .cancel_order(order_id, actor, notes)
                .await
                .map(|r| r.state);
        }

        let from = match to {
            FulfillmentStatus::Shipped => FulfillmentStatus::Processing,
            FulfillmentStatus::Delivered => FulfillmentStatus::Shipped,
            _ => {
                let order = self
                    .ledger
                    .order_by_id(order_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;
                return Err(invalid_state(
                    &order,
                    format!("fulfillment cannot be set to {} manually", to.as_str()),
                ));
            }
        };
        debug_assert!(from.can_transition_to(to));

        let mut tx = self.ledger.begin().await?;
        let before = load(tx.as_mut(), order_id).await?;
        let rows = tx
            .transition_fulfillment(&FulfillmentTransition {
                order_id,
                from: vec![from],
                to,
                at_utc: Utc::now(),
            })
            .await?;
        if rows == 0 {
            return Err(invalid_state(
                &before,
                format!(
                    "cannot move fulfillment from {} to {}",
                    before.fulfillment_status.as_str(),
                    to.as_str()
                ),
            ));
        }

        let history: Option<HistoryStatus> = to.into();
        if let Some(status) = history {
            tx.append_status_history(&NewStatusHistoryEntry {
                order_id,
                status,
                notes: notes.unwrap_or_else(|| format!("marked {} by admin", to.as_str())),
            })
            .await?;
        }
        let state = load(tx.as_mut(), order_id).await?.state();
        tx.commit().await?;

        tracing::info!(order_id = %order_id, fulfillment = to.as_str(), "fulfillment advanced");
        Ok(state)
    }

    async fn refund_after_commit(
        &self,
        state: OrderState,
        claimed: bool,
        actor: Actor,
    ) -> (OrderState, Option<RefundAttempt>) {
        if !claimed {
            return (state, None);
        }
        let attempt = self
            .submit_refund(
                state.order_id,
                &state.payment_reference,
                state.total,
                actor.initiator(),
            )
            .await;
        (self.current_state_or(state).await, Some(attempt))
    }
}

fn invalid_state(order: &Order, reason: String) -> EngineError {
    EngineError::InvalidState {
        order_id: order.id,
        payment: order.payment_status,
        fulfillment: order.fulfillment_status,
        reason,
    }
}
