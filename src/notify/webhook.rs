//! Generic JSON webhook sender
//!
//! Posts the rendered message as JSON to the recipient URL. Any non-2xx
//! answer counts as a failed delivery.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use super::{ChannelSender, NotifyError, RenderedMessage};
use crate::model::ChannelKind;

#[derive(Debug, Clone, Default)]
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    #[instrument(skip(self, message))]
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), NotifyError> {
        let payload = json!({
            "subject": message.subject,
            "message": message.body,
            "severity": message.severity,
            "indicator": message.indicator_name,
            "current_value": message.current_value,
            "historical_value": message.historical_value,
            "deviation_percent": message.deviation_percent,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(recipient).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Successfully sent webhook alert");
        Ok(())
    }
}
