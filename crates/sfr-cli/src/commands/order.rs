//! `sfr order show` and `sfr refund retry`.

use anyhow::{Context, Result};
use serde_json::json;
use sfr_db::PgLedger;
use sfr_engine::{Actor, Ledger, RefundAttempt};
use uuid::Uuid;

use super::engine_over_db;

const LOG_LIMIT: i64 = 5;

/// Read-only; needs the database but no config or gateway.
pub async fn show(reference: &str, as_json: bool) -> Result<()> {
    let pool = sfr_db::connect_from_env().await?;
    let ledger = PgLedger::new(pool);

    let order = ledger
        .order_by_reference(reference)
        .await?
        .with_context(|| format!("no order with payment reference {reference}"))?;
    let items = ledger.order_items(order.id).await?;
    let logs = ledger.recent_payment_logs(reference, LOG_LIMIT).await?;
    let history = ledger.status_history(order.id).await?;

    if as_json {
        let doc = json!({
            "order": order,
            "items": items,
            "recent_logs": logs,
            "history": history,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("order_id={}", order.id);
    println!("payment_reference={}", order.payment_reference);
    println!("payment_status={}", order.payment_status.as_str());
    println!("fulfillment_status={}", order.fulfillment_status.as_str());
    println!(
        "refund_status={}",
        order.refund_status.map(|s| s.as_str()).unwrap_or("NONE")
    );
    println!(
        "refund_ticket={}",
        order.refund_ticket.as_deref().unwrap_or("NONE")
    );
    println!("total={}", order.total);
    println!(
        "payment_method={}",
        order.payment_method.as_deref().unwrap_or("NONE")
    );
    println!("inventory_applied={}", order.inventory_applied);
    println!("items={}", items.len());
    for l in &logs {
        println!(
            "log status={} amount={} by={} at={}",
            l.status.as_str(),
            l.amount,
            l.processed_by.as_str(),
            l.created_at_utc.to_rfc3339()
        );
    }
    for h in &history {
        println!(
            "history status={} at={} notes={}",
            h.status.as_str(),
            h.created_at_utc.to_rfc3339(),
            h.notes
        );
    }
    Ok(())
}

pub async fn refund_retry(
    config_paths: &[String],
    order_id: Uuid,
    admin_id: Uuid,
) -> Result<()> {
    let services = engine_over_db(config_paths, "sfr-cli").await?;
    let r = services
        .coordinator
        .retry_refund(order_id, Actor::admin(admin_id))
        .await
        .with_context(|| format!("refund retry failed for order {order_id}"))?;

    println!("order_id={}", r.state.order_id);
    println!("payment_status={}", r.state.payment_status.as_str());
    println!(
        "refund_status={}",
        r.state.refund_status.map(|s| s.as_str()).unwrap_or("NONE")
    );
    match r.refund {
        Some(RefundAttempt::InProgress { gateway_status, ticket }) => println!(
            "refund=in_progress gateway_status={} ticket={}",
            gateway_status.as_str(),
            ticket.as_deref().unwrap_or("NONE")
        ),
        Some(RefundAttempt::AlreadyRefunded) => println!("refund=already_refunded"),
        Some(RefundAttempt::Failed { reason }) => println!("refund=failed reason={reason}"),
        Some(RefundAttempt::Inconclusive { reason }) => {
            println!("refund=inconclusive reason={reason}")
        }
        None => println!("refund=NONE"),
    }
    Ok(())
}
