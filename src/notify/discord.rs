//! Discord chat sender
//!
//! The recipient of a chat target is a Discord webhook URL. Alerts are posted
//! as a single embed coloured by severity.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, instrument};

use super::{ChannelSender, NotifyError, RenderedMessage};
use crate::model::{ChannelKind, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

fn severity_style(severity: Severity) -> (&'static str, u32) {
    match severity {
        Severity::Critical => ("🔴", 15158332), // Red
        Severity::High => ("🟠", 15105570),     // Orange
        Severity::Medium => ("🟡", 16776960),   // Yellow
        Severity::Low => ("🔵", 5793266),       // Light blue
    }
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value,
        inline,
    }
}

pub fn build_alert_embed(message: &RenderedMessage) -> Embed {
    let (emoji, color) = severity_style(message.severity);

    let mut fields = vec![field("Severity", message.severity.to_string(), true)];

    if let Some(current) = message.current_value {
        fields.push(field("📈 Current", format!("{current:.2}"), true));
    }
    if let Some(historical) = message.historical_value {
        fields.push(field("📊 Baseline", format!("{historical:.2}"), true));
    }
    if let Some(deviation) = message.deviation_percent {
        fields.push(field("Δ Deviation", format!("{deviation:+.1}%"), true));
    }

    Embed {
        title: Some(format!("{emoji} {}", message.subject)),
        description: Some(message.body.clone()),
        color: Some(color),
        fields,
        footer: Some(EmbedFooter {
            text: format!("Indicator: {}", message.indicator_name),
        }),
        timestamp: Some(Utc::now().to_rfc3339()),
    }
}

#[derive(Debug, Clone)]
pub struct DiscordSender {
    client: Client,
}

impl DiscordSender {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for DiscordSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for DiscordSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Chat
    }

    #[instrument(skip(self, recipient, message), fields(subject = %message.subject))]
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), NotifyError> {
        let payload = MessageBuilder::new()
            .add_embed(build_alert_embed(message))
            .build();

        let response = self.client.post(recipient).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            error!("Discord message failed with status: {status}");
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Successfully sent Discord message");
        Ok(())
    }
}
