use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::EngineError;
use crate::types::{Actor, OrderHistoryView, PaymentStatusView};

const RECENT_LOG_LIMIT: i64 = 5;

impl Coordinator {
    pub async fn payment_status(
        &self,
        reference: &str,
        actor: Actor,
    ) -> Result<PaymentStatusView, EngineError> {
        let order = self
            .ledger
            .order_by_reference(reference)
            .await?
            .filter(|o| actor.may_see(o.user_id))
            .ok_or_else(|| EngineError::NotFound(format!("payment reference {reference}")))?;

        let items = self.ledger.order_items(order.id).await?;
        let recent_logs = self
            .ledger
            .recent_payment_logs(reference, RECENT_LOG_LIMIT)
            .await?;

        Ok(PaymentStatusView {
            paid_at_utc: order.paid_at_utc,
            item_count: items.len(),
            state: order.state(),
            recent_logs,
        })
    }

    pub async fn order_history(
        &self,
        order_id: Uuid,
        actor: Actor,
    ) -> Result<OrderHistoryView, EngineError> {
        let order = self
            .ledger
            .order_by_id(order_id)
            .await?
            .filter(|o| actor.may_see(o.user_id))
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;
        let history = self.ledger.status_history(order_id).await?;
        Ok(OrderHistoryView {
            state: order.state(),
            history,
        })
    }
}
