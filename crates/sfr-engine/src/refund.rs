//! Refund submission and asynchronous refund reconciliation.
//!
//! An order carries at most one outstanding refund attempt:
//!
//! ```text
//!  none | failed ──claim──────────────────────────────► requested
//!  requested ──gateway accepted / webhook pending─────► in_progress
//!  requested ──rejected / unreachable─────────────────► failed
//!  requested | in_progress ──webhook failed───────────► failed
//!  in_progress ──webhook processed────────────────────► completed
//!  requested ──"already reversed"─────────────────────► completed
//! ```
//!
//! Claiming is a conditional update from `none|failed`, so two cancellations
//! (or a cancellation racing a retry) can never both submit to the gateway.
//! The gateway call itself happens after the claiming transaction commits;
//! its result is recorded in a second transaction guarded on `requested`.

use chrono::Utc;
use sfr_config::RefundErrorClass;
use sfr_schemas::{
    HistoryStatus, Initiator, NewStatusHistoryEntry, NotificationTemplate, Order,
    PaymentLogStatus, PaymentStatus, PaymentTransition, RefundStatus, RefundTransition,
};
use uuid::Uuid;

use crate::coordinator::{enqueue, payment_log, Coordinator};
use crate::error::{EngineError, GatewayError};
use crate::ports::{LedgerTx, RefundInitStatus};
use crate::types::{RefundAttempt, RefundOutcome, ReconciliationResult};

impl Coordinator {
    /// Move the order's refund to `requested` inside the caller's transaction.
    pub(crate) async fn claim_refund(
        &self,
        tx: &mut dyn LedgerTx,
        order: &Order,
        initiator: Initiator,
    ) -> Result<(), EngineError> {
        let rows = tx
            .transition_refund(&RefundTransition {
                order_id: order.id,
                from: vec![None, Some(RefundStatus::Failed)],
                to: RefundStatus::Requested,
                ticket: None,
            })
            .await?;

        if rows == 0 {
            return Err(match order.refund_status {
                Some(refund) if refund.is_in_flight() => EngineError::RefundInFlight {
                    order_id: order.id,
                    refund,
                },
                _ => EngineError::InvalidState {
                    order_id: order.id,
                    payment: order.payment_status,
                    fulfillment: order.fulfillment_status,
                    reason: "refund cannot be requested".to_string(),
                },
            });
        }

        tx.append_payment_log(&payment_log(
            order,
            PaymentLogStatus::RefundRequested,
            None,
            initiator,
            None,
            None,
        ))
        .await?;
        Ok(())
    }

    /// Submit a claimed refund and record what the gateway said.
    ///
    /// Never fails: the claim is already committed, so every outcome,
    /// including a storage failure while recording it, is reported as a
    /// [`RefundAttempt`].
    pub(crate) async fn submit_refund(
        &self,
        order_id: Uuid,
        reference: &str,
        amount: i64,
        initiator: Initiator,
    ) -> RefundAttempt {
        let call = self
            .bounded(self.gateway.initiate_refund(reference, amount))
            .await;

        let recorded = match call {
            Ok(ticket) => match ticket.status {
                RefundInitStatus::Processed | RefundInitStatus::Pending => {
                    self.record_refund_accepted(
                        order_id,
                        ticket.status,
                        ticket.ticket_id,
                        initiator,
                    )
                    .await
                }
                RefundInitStatus::Failed => {
                    self.record_refund_failed(
                        order_id,
                        "gateway reported refund failure".to_string(),
                        initiator,
                    )
                    .await
                }
            },
            Err(GatewayError::Timeout) => Ok(RefundAttempt::Inconclusive {
                reason: "gateway timed out; awaiting refund webhook".to_string(),
            }),
            Err(GatewayError::Protocol(m)) => Ok(RefundAttempt::Inconclusive {
                reason: format!("unreadable gateway response: {m}"),
            }),
            Err(GatewayError::Unavailable(m)) => {
                self.record_refund_failed(order_id, format!("gateway unreachable: {m}"), initiator)
                    .await
            }
            Err(GatewayError::Rejected { code, message }) => {
                match self.config.refund_errors.classify(&code) {
                    RefundErrorClass::AlreadyRefunded => {
                        self.record_already_refunded(order_id, &code, initiator).await
                    }
                    RefundErrorClass::ManualReview => {
                        self.record_refund_failed(
                            order_id,
                            format!("gateway rejected refund ({code}): {message}"),
                            initiator,
                        )
                        .await
                    }
                }
            }
        };

        let attempt = match recorded {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(
                    order_id = %order_id,
                    reference,
                    error = %e,
                    "refund outcome could not be recorded; refund left requested"
                );
                RefundAttempt::Inconclusive {
                    reason: format!("outcome not recorded: {e}"),
                }
            }
        };

        match &attempt {
            RefundAttempt::Inconclusive { reason } => {
                tracing::warn!(
                    order_id = %order_id,
                    reference,
                    reason = %reason,
                    "refund inconclusive"
                )
            }
            other => tracing::info!(
                order_id = %order_id,
                reference,
                attempt = ?other,
                "refund submitted"
            ),
        }

        self.drain_best_effort();
        attempt
    }

    async fn record_refund_accepted(
        &self,
        order_id: Uuid,
        gateway_status: RefundInitStatus,
        ticket: Option<String>,
        initiator: Initiator,
    ) -> Result<RefundAttempt, EngineError> {
        let mut tx = self.ledger.begin().await?;
        let rows = tx
            .transition_refund(&RefundTransition {
                order_id,
                from: vec![Some(RefundStatus::Requested)],
                to: RefundStatus::InProgress,
                ticket: ticket.clone(),
            })
            .await?;
        if rows == 1 {
            let order = load(tx.as_mut(), order_id).await?;
            tx.append_payment_log(&payment_log(
                &order,
                PaymentLogStatus::RefundPending,
                None,
                initiator,
                None,
                None,
            ))
            .await?;
            tx.append_status_history(&NewStatusHistoryEntry {
                order_id,
                status: HistoryStatus::RefundPending,
                notes: format!("refund submitted ({})", gateway_status.as_str()),
            })
            .await?;
            tx.commit().await?;
        }
        // rows == 0: a refund webhook already settled it; nothing to record.
        Ok(RefundAttempt::InProgress {
            gateway_status,
            ticket,
        })
    }

    async fn record_refund_failed(
        &self,
        order_id: Uuid,
        reason: String,
        initiator: Initiator,
    ) -> Result<RefundAttempt, EngineError> {
        let mut tx = self.ledger.begin().await?;
        let rows = tx
            .transition_refund(&RefundTransition {
                order_id,
                from: vec![Some(RefundStatus::Requested)],
                to: RefundStatus::Failed,
                ticket: None,
            })
            .await?;
        if rows == 1 {
            let order = load(tx.as_mut(), order_id).await?;
            tx.append_payment_log(&payment_log(
                &order,
                PaymentLogStatus::RefundFailed,
                None,
                initiator,
                Some(reason.clone()),
                None,
            ))
            .await?;
            tx.append_status_history(&NewStatusHistoryEntry {
                order_id,
                status: HistoryStatus::RefundFailed,
                notes: reason.clone(),
            })
            .await?;
            tx.commit().await?;
        }
        Ok(RefundAttempt::Failed { reason })
    }

    async fn record_already_refunded(
        &self,
        order_id: Uuid,
        code: &str,
        initiator: Initiator,
    ) -> Result<RefundAttempt, EngineError> {
        let mut tx = self.ledger.begin().await?;
        let order = load(tx.as_mut(), order_id).await?;
        self.finalize_refund(
            tx.as_mut(),
            &order,
            initiator,
            format!("gateway reports charge already reversed ({code})"),
        )
        .await?;
        tx.commit().await?;
        Ok(RefundAttempt::AlreadyRefunded)
    }

    /// `paid -> refunded` plus its audit trail. `false` when the payment was
    /// no longer `paid`.
    async fn finalize_refund(
        &self,
        tx: &mut dyn LedgerTx,
        order: &Order,
        initiator: Initiator,
        notes: String,
    ) -> Result<bool, EngineError> {
        let rows = tx
            .transition_payment(&PaymentTransition {
                reference: order.payment_reference.clone(),
                from: PaymentStatus::Paid,
                to: PaymentStatus::Refunded,
                method: None,
                at_utc: Utc::now(),
            })
            .await?;
        if rows == 0 {
            return Ok(false);
        }
        tx.transition_refund(&RefundTransition {
            order_id: order.id,
            from: vec![
                None,
                Some(RefundStatus::Requested),
                Some(RefundStatus::InProgress),
                Some(RefundStatus::Failed),
            ],
            to: RefundStatus::Completed,
            ticket: None,
        })
        .await?;
        tx.append_payment_log(&payment_log(
            order,
            PaymentLogStatus::Refunded,
            None,
            initiator,
            None,
            None,
        ))
        .await?;
        tx.append_status_history(&NewStatusHistoryEntry {
            order_id: order.id,
            status: HistoryStatus::Refunded,
            notes,
        })
        .await?;
        enqueue(tx, order, NotificationTemplate::RefundProcessed, &None).await?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // reconcile_refund_outcome
    // -----------------------------------------------------------------------

    /// Apply an asynchronous refund result. Replays are no-ops reported as
    /// `already_processed`.
    pub async fn reconcile_refund_outcome(
        &self,
        reference: &str,
        outcome: RefundOutcome,
        gateway_payload: Option<serde_json::Value>,
    ) -> Result<ReconciliationResult, EngineError> {
        let mut tx = self.ledger.begin().await?;
        let order = tx
            .order_by_reference(reference)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("payment reference {reference}")))?;

        let applied = match outcome {
            RefundOutcome::Processed => {
                if order.fulfillment_status != sfr_schemas::FulfillmentStatus::Cancelled {
                    tracing::warn!(
                        reference,
                        order_id = %order.id,
                        fulfillment = order.fulfillment_status.as_str(),
                        "refund processed for an order that was not cancelled"
                    );
                }
                self.finalize_refund(
                    tx.as_mut(),
                    &order,
                    Initiator::Webhook,
                    "refund processed by gateway".to_string(),
                )
                .await?
            }
            RefundOutcome::Pending => {
                let rows = tx
                    .transition_refund(&RefundTransition {
                        order_id: order.id,
                        from: vec![Some(RefundStatus::Requested)],
                        to: RefundStatus::InProgress,
                        ticket: None,
                    })
                    .await?;
                if rows == 1 {
                    // The (reference, status) key keeps one row per status; a
                    // retried refund reaching in_progress again records history only.
                    tx.append_payment_log(&payment_log(
                        &order,
                        PaymentLogStatus::RefundPending,
                        None,
                        Initiator::Webhook,
                        None,
                        gateway_payload,
                    ))
                    .await?;
                    tx.append_status_history(&NewStatusHistoryEntry {
                        order_id: order.id,
                        status: HistoryStatus::RefundPending,
                        notes: "refund accepted by gateway; awaiting settlement".to_string(),
                    })
                    .await?;
                }
                rows == 1
            }
            RefundOutcome::Failed => {
                let rows = tx
                    .transition_refund(&RefundTransition {
                        order_id: order.id,
                        from: vec![Some(RefundStatus::Requested), Some(RefundStatus::InProgress)],
                        to: RefundStatus::Failed,
                        ticket: None,
                    })
                    .await?;
                if rows == 1 {
                    tx.append_payment_log(&payment_log(
                        &order,
                        PaymentLogStatus::RefundFailed,
                        None,
                        Initiator::Webhook,
                        Some("gateway reported refund failure".to_string()),
                        gateway_payload,
                    ))
                    .await?;
                    tx.append_status_history(&NewStatusHistoryEntry {
                        order_id: order.id,
                        status: HistoryStatus::RefundFailed,
                        notes: "refund failed at gateway; needs operator retry".to_string(),
                    })
                    .await?;
                }
                rows == 1
            }
        };

        if !applied {
            drop(tx);
            tracing::info!(
                reference,
                outcome = outcome.as_str(),
                "refund outcome already recorded; no-op"
            );
            return Ok(ReconciliationResult {
                already_processed: true,
                state: order.state(),
                refund: None,
            });
        }

        let state = load(tx.as_mut(), order.id).await?.state();
        tx.commit().await?;
        tracing::info!(
            reference,
            order_id = %order.id,
            outcome = outcome.as_str(),
            payment = state.payment_status.as_str(),
            "refund outcome reconciled"
        );
        self.drain_best_effort();

        Ok(ReconciliationResult {
            already_processed: false,
            state,
            refund: None,
        })
    }
}

pub(crate) async fn load(tx: &mut dyn LedgerTx, order_id: Uuid) -> Result<Order, EngineError> {
    tx.order_by_id(order_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
}
