//! Post-commit notification outbox consumer.
//!
//! Winning transitions only *enqueue* notification intents inside their
//! transaction. This dispatcher is the sole caller of the
//! [`NotificationSender`]; a send failure re-queues the row and can never
//! undo the reconciliation that produced it.

use async_trait::async_trait;
use serde::Serialize;
use sfr_config::NotificationSettings;
use sfr_schemas::{NotificationTemplate, OutboxStatus};
use std::sync::Arc;

use crate::error::LedgerError;
use crate::ports::{Ledger, NotificationSender};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub sent: usize,
    pub requeued: usize,
    pub failed: usize,
}

pub struct NotificationDispatcher {
    ledger: Arc<dyn Ledger>,
    sender: Arc<dyn NotificationSender>,
    settings: NotificationSettings,
    dispatcher_id: String,
}

impl NotificationDispatcher {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        sender: Arc<dyn NotificationSender>,
        settings: NotificationSettings,
        dispatcher_id: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            sender,
            settings,
            dispatcher_id: dispatcher_id.into(),
        }
    }

    pub fn dispatcher_id(&self) -> &str {
        &self.dispatcher_id
    }

    /// Claim one batch and try each row once.
    pub async fn drain_once(&self) -> Result<DrainReport, LedgerError> {
        let claimed = self
            .ledger
            .claim_notifications(
                self.settings.batch_size,
                &self.dispatcher_id,
                self.settings.stale_claim,
            )
            .await?;

        let mut report = DrainReport {
            claimed: claimed.len(),
            ..DrainReport::default()
        };

        for row in claimed {
            match self
                .sender
                .send(&row.recipient, row.template, &row.data)
                .await
            {
                Ok(()) => {
                    if self
                        .ledger
                        .mark_notification_sent(row.id, &self.dispatcher_id)
                        .await?
                    {
                        report.sent += 1;
                    } else {
                        // Claim expired and someone else owns the row now.
                        tracing::warn!(
                            notification_id = %row.id,
                            "notification sent but claim was lost; it may be delivered twice"
                        );
                    }
                }
                Err(e) => {
                    let status = self
                        .ledger
                        .release_notification(
                            row.id,
                            &self.dispatcher_id,
                            &format!("{e:#}"),
                            self.settings.max_attempts,
                        )
                        .await?;
                    tracing::warn!(
                        notification_id = %row.id,
                        order_id = %row.order_id,
                        template = row.template.as_str(),
                        attempts = row.attempts + 1,
                        status = status.as_str(),
                        error = %format!("{e:#}"),
                        "notification send failed"
                    );
                    if status == OutboxStatus::Failed {
                        report.failed += 1;
                    } else {
                        report.requeued += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Drain until a batch comes back empty or `max_batches` is hit.
    pub async fn drain_all(&self, max_batches: usize) -> Result<DrainReport, LedgerError> {
        let mut total = DrainReport::default();
        for _ in 0..max_batches {
            let r = self.drain_once().await?;
            total.claimed += r.claimed;
            total.sent += r.sent;
            total.requeued += r.requeued;
            total.failed += r.failed;
            // Re-queued rows would be claimed again immediately.
            if r.claimed == 0 || r.sent == 0 {
                break;
            }
        }
        Ok(total)
    }
}

/// Sender that only logs. Used when no relay is configured.
#[derive(Debug, Default, Clone)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(
        &self,
        recipient: &str,
        template: NotificationTemplate,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        tracing::info!(
            recipient,
            template = template.as_str(),
            data = %data,
            "notification (log only)"
        );
        Ok(())
    }
}
