//! HTTP notification relay.
//!
//! Rendering and delivery belong to a separate notification service; this
//! sender only hands it `{recipient, template, data}` as JSON. Any non-2xx
//! answer is a send failure and the outbox row is re-queued.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sfr_engine::NotificationSender;
use sfr_schemas::NotificationTemplate;

#[derive(Serialize)]
struct RelayRequest<'a> {
    recipient: &'a str,
    template: &'a str,
    data: &'a serde_json::Value,
}

pub struct RelaySender {
    http: reqwest::Client,
    url: String,
}

impl std::fmt::Debug for RelaySender {
    // The URL usually carries a token.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySender")
            .field("url", &"<REDACTED>")
            .finish()
    }
}

impl RelaySender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            bail!("notification relay url is empty");
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build relay http client")?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl NotificationSender for RelaySender {
    async fn send(
        &self,
        recipient: &str,
        template: NotificationTemplate,
        data: &serde_json::Value,
    ) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .json(&RelayRequest {
                recipient,
                template: template.as_str(),
                data,
            })
            .send()
            .await
            .context("notification relay request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("notification relay answered http {}", status.as_u16());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_url_is_refused() {
        assert!(RelaySender::new("  ", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn debug_never_prints_the_url() {
        let s = RelaySender::new("https://relay.test/hook?token=abc", Duration::from_secs(1))
            .unwrap();
        assert!(!format!("{s:?}").contains("token"));
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_send_error() {
        let s = RelaySender::new("http://127.0.0.1:9/notify", Duration::from_millis(500)).unwrap();
        let r = s
            .send("a@shop.test", NotificationTemplate::PaymentConfirmed, &json!({}))
            .await;
        assert!(r.is_err());
    }
}
