use std::time::Duration;

use async_trait::async_trait;

use super::{DeploymentEvent, NotificationChannel, SendResult};

/// POSTs the JSON event to a fixed URL
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String, timeout: Duration) -> Result<Self, String> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("Invalid webhook URL: {}", url));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, event: &DeploymentEvent) -> SendResult {
        let payload = serde_json::json!({
            "event": format!("deployment.{}", event.outcome),
            "title": event.title(),
            "message": event.body(),
            "deployment": event,
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    SendResult::ok()
                } else {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_default();
                    SendResult::failed(format!("Webhook returned {}: {}", status, error_text))
                }
            }
            Err(e) => SendResult::failed(format!("Failed to call webhook: {}", e)),
        }
    }
}
