//! Domain types shared by the scheduling, execution and alerting pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type IndicatorId = i64;
pub type ScheduleId = i64;
pub type AlertId = i64;

/// A monitored metric/check definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub id: IndicatorId,
    pub name: String,

    /// Owner reference (team or person responsible for the indicator)
    pub owner: String,

    /// Collector that produces the raw rows for this indicator
    pub collector_id: String,

    /// Only rows for this item are considered (all rows if unset)
    #[serde(default)]
    pub item_name: Option<String>,

    /// Size of the query window handed to the collector
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u32,

    #[serde(default)]
    pub aggregation: Aggregation,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Minimum absolute deviation (in percent) that counts as an alert
    pub deviation_threshold: f64,

    /// The current value must reach this for a deviation alert
    #[serde(default)]
    pub minimum_threshold: Option<f64>,

    /// Fixed threshold, evaluated instead of the deviation when present
    #[serde(default)]
    pub fixed_threshold: Option<FixedThreshold>,

    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,

    /// How far back the comparable historical baseline is taken
    #[serde(default = "default_baseline_offset_days")]
    pub baseline_offset_days: u32,

    #[serde(default)]
    pub schedule_id: Option<ScheduleId>,

    #[serde(default)]
    pub channels: Vec<ChannelTarget>,

    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_value: Option<f64>,
}

fn default_lookback_minutes() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_cooldown_minutes() -> u32 {
    60
}

fn default_baseline_offset_days() -> u32 {
    7
}

impl Indicator {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes as i64)
    }
}

/// How the rows returned by a collector are reduced to a single value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Last,
    Count,
}

impl Aggregation {
    /// Reduce `values` to one number.
    ///
    /// Returns `None` when the aggregation is undefined for an empty input.
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        match self {
            Aggregation::Sum => Some(values.iter().sum()),
            Aggregation::Count => Some(values.len() as f64),
            Aggregation::Avg if values.is_empty() => None,
            Aggregation::Avg => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Min => values.iter().copied().reduce(f64::min),
            Aggregation::Max => values.iter().copied().reduce(f64::max),
            Aggregation::Last => values.last().copied(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedThreshold {
    pub operator: ComparisonOperator,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    pub fn matches(&self, current: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => current > threshold,
            ComparisonOperator::GreaterOrEqual => current >= threshold,
            ComparisonOperator::LessThan => current < threshold,
            ComparisonOperator::LessOrEqual => current <= threshold,
            ComparisonOperator::Equal => (current - threshold).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (current - threshold).abs() >= f64::EPSILON,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
        };
        f.write_str(symbol)
    }
}

/// Why an execution was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionContext {
    Manual,
    Scheduled,
    /// Same computation, but nothing is persisted and no alert is evaluated
    Test,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Manual => f.write_str("Manual"),
            ExecutionContext::Scheduled => f.write_str("Scheduled"),
            ExecutionContext::Test => f.write_str("Test"),
        }
    }
}

/// Outcome of a single indicator execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub indicator_id: IndicatorId,
    pub success: bool,
    pub current_value: Option<f64>,
    pub historical_value: Option<f64>,
    pub deviation_percent: Option<f64>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub context: ExecutionContext,

    /// Alert raised by this execution, if any
    #[serde(default)]
    pub alert_id: Option<AlertId>,
}

impl ExecutionResult {
    pub fn failure(
        indicator_id: IndicatorId,
        context: ExecutionContext,
        started_at: DateTime<Utc>,
        error: impl ToString,
    ) -> Self {
        Self {
            indicator_id,
            success: false,
            current_value: None,
            historical_value: None,
            deviation_percent: None,
            error_message: Some(error.to_string()),
            started_at,
            finished_at: Utc::now(),
            context,
            alert_id: None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Percentage difference between `current` and `historical`.
///
/// A zero baseline maps to `0` when the current value is zero as well and to
/// `±100` otherwise.
pub fn deviation_percent(current: f64, historical: f64) -> f64 {
    if historical == 0.0 {
        return if current > 0.0 {
            100.0
        } else if current < 0.0 {
            -100.0
        } else {
            0.0
        };
    }

    (current - historical) / historical * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map an absolute deviation (in percent) to a severity band
    pub fn from_deviation(deviation: f64) -> Self {
        let deviation = deviation.abs();
        if deviation >= 50.0 {
            Severity::Critical
        } else if deviation >= 25.0 {
            Severity::High
        } else if deviation >= 10.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// An alert as produced by the decision step, before it has an id
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub indicator_id: IndicatorId,
    pub triggered_at: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
    pub current_value: f64,
    pub historical_value: Option<f64>,
    pub deviation_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub indicator_id: IndicatorId,
    pub triggered_at: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
    pub current_value: f64,
    pub historical_value: Option<f64>,
    pub deviation_percent: Option<f64>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    #[serde(default)]
    pub notifications: Vec<NotificationOutcome>,
}

impl Alert {
    pub fn from_candidate(id: AlertId, candidate: AlertCandidate) -> Self {
        Self {
            id,
            indicator_id: candidate.indicator_id,
            triggered_at: candidate.triggered_at,
            message: candidate.message,
            severity: candidate.severity,
            current_value: candidate.current_value,
            historical_value: candidate.historical_value,
            deviation_percent: candidate.deviation_percent,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            notes: None,
            notifications: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Chat,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Chat => "chat",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            "chat" => Ok(ChannelKind::Chat),
            "webhook" => Ok(ChannelKind::Webhook),
            other => Err(format!("unknown channel kind: {other}")),
        }
    }
}

/// Where a notification goes: a channel kind plus a channel-specific recipient
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub kind: ChannelKind,
    pub recipient: String,
}

impl ChannelTarget {
    pub fn new(kind: ChannelKind, recipient: impl Into<String>) -> Self {
        Self {
            kind,
            recipient: recipient.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub channel: ChannelKind,
    pub success: bool,
    pub recipient: String,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Aggregated outcome of one dispatch across all requested channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub is_success: bool,
    pub total_sent: usize,
    pub total_failed: usize,
    pub results: Vec<NotificationOutcome>,
}

impl NotificationResult {
    pub fn from_outcomes(results: Vec<NotificationOutcome>) -> Self {
        let total_sent = results.iter().filter(|r| r.success).count();
        let total_failed = results.len() - total_sent;

        Self {
            is_success: total_failed == 0,
            total_sent,
            total_failed,
            results,
        }
    }
}
