//! Notification router
//!
//! Dispatches a raised alert to every requested channel at once and collects
//! one [`NotificationOutcome`] per channel.
//!
//! ```text
//! dispatch(alert, channels)
//!     │ render once
//!     ├──► sender(chat).send(recipient)    ─┐  each bounded by `timeout`
//!     ├──► sender(webhook).send(recipient) ─┤  failures stay per channel
//!     └──► sender(email)  (none registered) ┘
//!                         │ join
//!                         ▼
//!               NotificationResult { total_sent, total_failed, .. }
//! ```
//!
//! There is no retry: every channel gets at most one attempt per dispatch.

pub mod discord;
pub mod webhook;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::model::{
    Alert, ChannelKind, ChannelTarget, NotificationOutcome, NotificationResult, Severity,
};

#[derive(Debug, Clone, PartialEq)]
pub enum NotifyError {
    /// No sender is registered for the channel kind
    NoSender(ChannelKind),

    Timeout(Duration),

    /// The transport could not deliver the message
    Transport(String),

    /// The receiving side answered with a non-success status
    Rejected { status: u16, body: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::NoSender(kind) => write!(f, "no sender registered for {kind}"),
            NotifyError::Timeout(after) => write!(f, "channel timed out after {after:?}"),
            NotifyError::Transport(msg) => write!(f, "transport error: {msg}"),
            NotifyError::Rejected { status, body } if body.is_empty() => {
                write!(f, "rejected with status {status}")
            }
            NotifyError::Rejected { status, body } => {
                write!(f, "rejected with status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.to_string())
    }
}

/// Channel-independent message content, rendered once per dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
    pub severity: Severity,
    pub indicator_name: String,
    pub current_value: Option<f64>,
    pub historical_value: Option<f64>,
    pub deviation_percent: Option<f64>,
}

impl RenderedMessage {
    pub fn render(alert: &Alert, indicator_name: &str) -> Self {
        Self {
            subject: format!(
                "[{}] {indicator_name}",
                alert.severity.as_str().to_uppercase()
            ),
            body: alert.message.clone(),
            severity: alert.severity,
            indicator_name: indicator_name.to_string(),
            current_value: Some(alert.current_value),
            historical_value: alert.historical_value,
            deviation_percent: alert.deviation_percent,
        }
    }

    /// A message without alert values, used to verify a channel
    pub fn test(body: impl Into<String>) -> Self {
        Self {
            subject: "Test notification".to_string(),
            body: body.into(),
            severity: Severity::Low,
            indicator_name: "test".to_string(),
            current_value: None,
            historical_value: None,
            deviation_percent: None,
        }
    }
}

/// A transport for one channel kind
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct NotificationRouter {
    senders: HashMap<ChannelKind, Arc<dyn ChannelSender>>,
    timeout: Duration,
}

impl NotificationRouter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            senders: HashMap::new(),
            timeout,
        }
    }

    /// Register `sender` for its channel kind, replacing any previous one
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.kind(), sender);
        self
    }

    pub fn has_sender(&self, kind: ChannelKind) -> bool {
        self.senders.contains_key(&kind)
    }

    /// Send `alert` to all `channels` concurrently
    #[instrument(skip(self, alert, channels), fields(alert_id = alert.id, channels = channels.len()))]
    pub async fn dispatch(
        &self,
        alert: &Alert,
        indicator_name: &str,
        channels: &[ChannelTarget],
    ) -> NotificationResult {
        let message = RenderedMessage::render(alert, indicator_name);

        let outcomes = join_all(
            channels
                .iter()
                .map(|target| self.send_one(target, &message)),
        )
        .await;

        let result = NotificationResult::from_outcomes(outcomes);
        debug!(
            "dispatched alert {}: {} sent, {} failed",
            alert.id, result.total_sent, result.total_failed
        );
        result
    }

    /// Send one message to one channel, bypassing alert persistence
    #[instrument(skip(self, message))]
    pub async fn test_dispatch(
        &self,
        target: &ChannelTarget,
        message: &RenderedMessage,
    ) -> NotificationOutcome {
        self.send_one(target, message).await
    }

    async fn send_one(&self, target: &ChannelTarget, message: &RenderedMessage) -> NotificationOutcome {
        let result = match self.senders.get(&target.kind) {
            Some(sender) => tokio::time::timeout(self.timeout, sender.send(&target.recipient, message))
                .await
                .unwrap_or(Err(NotifyError::Timeout(self.timeout))),
            None => Err(NotifyError::NoSender(target.kind)),
        };

        if let Err(e) = &result {
            warn!("{} notification to {} failed: {e}", target.kind, target.recipient);
        }

        NotificationOutcome {
            channel: target.kind,
            success: result.is_ok(),
            recipient: target.recipient.clone(),
            error: result.err().map(|e| e.to_string()),
            sent_at: Utc::now(),
        }
    }
}
