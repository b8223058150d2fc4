//! Reconciliation Coordinator.
//!
//! # Design
//!
//! Payment confirmation reaches an order from three triggers that do not
//! cooperate: the customer polling after the gateway redirect, an admin
//! override, and the gateway webhook (possibly redelivered, reordered or
//! late). All three end in [`Coordinator::reconcile_payment`].
//!
//! Mutual exclusion comes from a single conditional update:
//!
//! ```text
//! UPDATE orders SET payment_status = <to> ...
//!  WHERE payment_reference = <ref> AND payment_status = 'pending'
//! ```
//!
//! The row lock taken by that update orders concurrent callers. Exactly one
//! sees `rows = 1`; it runs every side effect (inventory, fulfillment, audit,
//! cart, notification intent) in the same transaction. Everyone else sees
//! `rows = 0`, reads the settled order, and returns `already_processed`.
//! Any failure after the update drops the transaction, rolling back the
//! update with it.

use chrono::Utc;
use serde_json::json;
use sfr_config::EngineConfig;
use sfr_schemas::{
    FulfillmentStatus, FulfillmentTransition, HistoryStatus, Initiator, NewNotification,
    NewPaymentLogEntry, NewStatusHistoryEntry, NotificationTemplate, Order, PaymentLogStatus,
    PaymentStatus, PaymentTransition,
};
use std::future::Future;
use std::sync::Arc;

use crate::error::{EngineError, GatewayError};
use crate::notify::NotificationDispatcher;
use crate::ports::{Ledger, LedgerTx, PaymentGateway};
use crate::types::{Actor, PaymentOutcome, ReconciliationResult};

pub struct Coordinator {
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) config: EngineConfig,
    pub(crate) dispatcher: Option<Arc<NotificationDispatcher>>,
}

impl Coordinator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            config,
            dispatcher: None,
        }
    }

    /// Start an outbox drain after every committed reconciliation.
    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // reconcile_payment
    // -----------------------------------------------------------------------

    pub async fn reconcile_payment(
        &self,
        reference: &str,
        outcome: PaymentOutcome,
        initiator: Initiator,
    ) -> Result<ReconciliationResult, EngineError> {
        let to = if outcome.succeeded {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        };

        let mut tx = self.ledger.begin().await?;

        let rows = tx
            .transition_payment(&PaymentTransition {
                reference: reference.to_string(),
                from: PaymentStatus::Pending,
                to,
                method: outcome.method.clone(),
                at_utc: Utc::now(),
            })
            .await?;

        if rows == 0 {
            let order = tx
                .order_by_reference(reference)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("payment reference {reference}")))?;
            drop(tx);
            tracing::info!(
                reference,
                initiator = initiator.as_str(),
                payment_status = order.payment_status.as_str(),
                "payment already settled; no-op"
            );
            return Ok(ReconciliationResult {
                already_processed: true,
                state: order.state(),
                refund: None,
            });
        }

        // We hold the row lock from here until commit.
        let order = tx.order_by_reference(reference).await?.ok_or_else(|| {
            EngineError::Storage(anyhow::anyhow!(
                "order {reference} vanished after winning its payment transition"
            ))
        })?;

        if let (Some(charged), true) = (outcome.amount, outcome.succeeded) {
            if charged != order.total {
                tracing::warn!(
                    reference,
                    order_id = %order.id,
                    charged,
                    total = order.total,
                    "gateway amount differs from order total"
                );
            }
        }

        let mut refund_claimed = false;
        if outcome.succeeded {
            if order.fulfillment_status == FulfillmentStatus::Cancelled {
                self.apply_paid_after_cancel(tx.as_mut(), &order, &outcome, initiator)
                    .await?;
                refund_claimed = true;
            } else {
                self.apply_paid(tx.as_mut(), &order, &outcome, initiator).await?;
            }
        } else {
            self.apply_failed(tx.as_mut(), &order, &outcome, initiator).await?;
        }

        let settled = tx
            .order_by_id(order.id)
            .await?
            .unwrap_or(order)
            .state();
        tx.commit().await?;

        tracing::info!(
            reference,
            order_id = %settled.order_id,
            initiator = initiator.as_str(),
            outcome = settled.payment_status.as_str(),
            fulfillment = settled.fulfillment_status.as_str(),
            "payment reconciled"
        );

        self.drain_best_effort();

        let mut result = ReconciliationResult {
            already_processed: false,
            state: settled,
            refund: None,
        };
        if refund_claimed {
            let attempt = self
                .submit_refund(
                    result.state.order_id,
                    &result.state.payment_reference,
                    result.state.total,
                    initiator,
                )
                .await;
            result.refund = Some(attempt);
            result.state = self.current_state_or(result.state).await;
        }
        Ok(result)
    }

    async fn apply_paid(
        &self,
        tx: &mut dyn LedgerTx,
        order: &Order,
        outcome: &PaymentOutcome,
        initiator: Initiator,
    ) -> Result<(), EngineError> {
        if !tx.apply_order_decrement(order.id).await? {
            tracing::warn!(order_id = %order.id, "inventory already applied for order; skipped");
        }

        let moved = tx
            .transition_fulfillment(&FulfillmentTransition {
                order_id: order.id,
                from: vec![FulfillmentStatus::Pending],
                to: FulfillmentStatus::Processing,
                at_utc: Utc::now(),
            })
            .await?;
        if moved == 0 {
            tracing::warn!(
                order_id = %order.id,
                fulfillment = order.fulfillment_status.as_str(),
                "paid order was not pending fulfillment; left as is"
            );
        }

        tx.append_payment_log(&payment_log(
            order,
            PaymentLogStatus::Paid,
            outcome.method.clone(),
            initiator,
            None,
            outcome.gateway_payload.clone(),
        ))
        .await?;

        if moved == 1 {
            tx.append_status_history(&NewStatusHistoryEntry {
                order_id: order.id,
                status: HistoryStatus::Processing,
                notes: format!("payment confirmed by {}", initiator.as_str()),
            })
            .await?;
        }

        let cleared = tx.clear_cart(order.user_id).await?;
        tracing::debug!(order_id = %order.id, cleared, "cart cleared");

        enqueue(tx, order, NotificationTemplate::PaymentConfirmed, &outcome.method).await
    }

    async fn apply_paid_after_cancel(
        &self,
        tx: &mut dyn LedgerTx,
        order: &Order,
        outcome: &PaymentOutcome,
        initiator: Initiator,
    ) -> Result<(), EngineError> {
        tracing::warn!(
            order_id = %order.id,
            reference = %order.payment_reference,
            "payment succeeded on a cancelled order; refunding"
        );
        tx.append_payment_log(&payment_log(
            order,
            PaymentLogStatus::Paid,
            outcome.method.clone(),
            initiator,
            None,
            outcome.gateway_payload.clone(),
        ))
        .await?;
        tx.append_status_history(&NewStatusHistoryEntry {
            order_id: order.id,
            status: HistoryStatus::PaymentAfterCancel,
            notes: "payment arrived after cancellation; refund requested".to_string(),
        })
        .await?;
        self.claim_refund(tx, order, initiator).await
    }

    async fn apply_failed(
        &self,
        tx: &mut dyn LedgerTx,
        order: &Order,
        outcome: &PaymentOutcome,
        initiator: Initiator,
    ) -> Result<(), EngineError> {
        let reason = outcome
            .failure_reason
            .clone()
            .unwrap_or_else(|| "payment failed".to_string());
        tx.append_payment_log(&payment_log(
            order,
            PaymentLogStatus::Failed,
            outcome.method.clone(),
            initiator,
            Some(reason.clone()),
            outcome.gateway_payload.clone(),
        ))
        .await?;
        tx.append_status_history(&NewStatusHistoryEntry {
            order_id: order.id,
            status: HistoryStatus::PaymentFailed,
            notes: reason,
        })
        .await?;
        enqueue(tx, order, NotificationTemplate::PaymentFailed, &outcome.method).await
    }

    // -----------------------------------------------------------------------
    // verify_and_reconcile
    // -----------------------------------------------------------------------

    /// User poll or admin override: ask the gateway, then reconcile.
    ///
    /// Customers may only verify their own orders. An order that is no longer
    /// `pending` is answered from the ledger without calling the gateway.
    pub async fn verify_and_reconcile(
        &self,
        reference: &str,
        actor: Actor,
    ) -> Result<ReconciliationResult, EngineError> {
        let order = self
            .ledger
            .order_by_reference(reference)
            .await?
            .filter(|o| actor.may_see(o.user_id))
            .ok_or_else(|| EngineError::NotFound(format!("payment reference {reference}")))?;

        if order.payment_status != PaymentStatus::Pending {
            return Ok(ReconciliationResult {
                already_processed: true,
                state: order.state(),
                refund: None,
            });
        }

        let verification = self
            .bounded(self.gateway.verify(reference))
            .await
            .map_err(|e| {
                tracing::warn!(reference, error = %e, "gateway verify did not settle");
                EngineError::from(e)
            })?;

        let Some(succeeded) = verification.status.settled_outcome() else {
            tracing::warn!(
                reference,
                gateway_status = verification.status.as_str(),
                "charge not settled at gateway"
            );
            return Err(EngineError::Inconclusive {
                gateway_status: verification.status.as_str().to_string(),
            });
        };

        let outcome = PaymentOutcome {
            succeeded,
            method: verification.method,
            amount: verification.amount,
            failure_reason: if succeeded {
                None
            } else {
                Some(
                    verification
                        .gateway_response
                        .unwrap_or_else(|| format!("charge {}", verification.status.as_str())),
                )
            },
            gateway_payload: Some(verification.raw),
        };

        self.reconcile_payment(reference, outcome, actor.initiator())
            .await
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Run a gateway call under the configured bound. Elapsed maps to
    /// `GatewayError::Timeout`, same as a timeout reported by the adapter.
    pub(crate) async fn bounded<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    /// Kick one outbox batch on a background task. The caller never waits
    /// on the relay; rows left behind go out with the periodic drain.
    pub(crate) fn drain_best_effort(&self) {
        let Some(dispatcher) = self.dispatcher.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime; post-commit drain skipped");
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = dispatcher.drain_once().await {
                tracing::warn!(error = %e, "post-commit notification drain failed");
            }
        });
    }

    /// Re-read the order after a post-commit step, keeping `fallback` when
    /// the read fails. The reconciliation is already committed either way.
    pub(crate) async fn current_state_or(
        &self,
        fallback: sfr_schemas::OrderState,
    ) -> sfr_schemas::OrderState {
        match self.ledger.order_by_id(fallback.order_id).await {
            Ok(Some(o)) => o.state(),
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!(order_id = %fallback.order_id, error = %e, "state re-read failed");
                fallback
            }
        }
    }
}

pub(crate) fn payment_log(
    order: &Order,
    status: PaymentLogStatus,
    method: Option<String>,
    processed_by: Initiator,
    failure_reason: Option<String>,
    gateway_response: Option<serde_json::Value>,
) -> NewPaymentLogEntry {
    NewPaymentLogEntry {
        order_id: order.id,
        payment_reference: order.payment_reference.clone(),
        status,
        amount: order.total,
        method: method.or_else(|| order.payment_method.clone()),
        processed_by,
        failure_reason,
        gateway_response,
    }
}

/// Queue a notification for the order's customer. Orders without a contact
/// address are skipped.
pub(crate) async fn enqueue(
    tx: &mut dyn LedgerTx,
    order: &Order,
    template: NotificationTemplate,
    method: &Option<String>,
) -> Result<(), EngineError> {
    let Some(recipient) = order.customer_email.clone() else {
        tracing::debug!(
            order_id = %order.id,
            template = template.as_str(),
            "no recipient; notification skipped"
        );
        return Ok(());
    };
    tx.enqueue_notification(&NewNotification {
        order_id: order.id,
        template,
        recipient,
        data: json!({
            "order_id": order.id,
            "payment_reference": order.payment_reference,
            "total": order.total,
            "payment_method": method.clone().or_else(|| order.payment_method.clone()),
        }),
    })
    .await?;
    Ok(())
}
