use anyhow::Result;

use super::engine_over_db;

pub async fn drain(config_paths: &[String], max_batches: usize) -> Result<()> {
    let services = engine_over_db(config_paths, "sfr-cli").await?;
    let report = services.dispatcher.drain_all(max_batches).await?;
    if report.failed > 0 {
        tracing::warn!(
            failed = report.failed,
            "notifications parked as failed after exhausting their attempts"
        );
    }
    println!(
        "claimed={} sent={} requeued={} failed={}",
        report.claimed, report.sent, report.requeued, report.failed
    );
    Ok(())
}
