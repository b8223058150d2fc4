use async_trait::async_trait;
use sfr_engine::NotificationSender;
use sfr_schemas::NotificationTemplate;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub recipient: String,
    pub template: NotificationTemplate,
    pub data: serde_json::Value,
}

/// Records every delivered notification. Can be told to fail the next N
/// sends, or to take a while over each one.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentNotification>>,
    failures_left: Mutex<u32>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        if let Ok(mut g) = self.failures_left.lock() {
            *g = n;
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut g) = self.delay.lock() {
            *g = Some(delay);
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn sent_templates(&self) -> Vec<NotificationTemplate> {
        self.sent().into_iter().map(|s| s.template).collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        recipient: &str,
        template: NotificationTemplate,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let delay = self.delay.lock().ok().and_then(|g| *g);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let fail = self
            .failures_left
            .lock()
            .map(|mut g| {
                if *g > 0 {
                    *g -= 1;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if fail {
            anyhow::bail!("relay refused {} for {recipient}", template.as_str());
        }
        if let Ok(mut g) = self.sent.lock() {
            g.push(SentNotification {
                recipient: recipient.to_string(),
                template,
                data: data.clone(),
            });
        }
        Ok(())
    }
}
