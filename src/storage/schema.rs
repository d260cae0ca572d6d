//! Database row definitions
//!
//! Rows keep timestamps as Unix milliseconds and enums as lowercase strings, so
//! they map onto plain SQL columns. Notification outcomes of an alert are kept
//! as a JSON array in a single column: they are only ever appended and read
//! together with the alert.

use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use crate::model::{Alert, ExecutionContext, ExecutionResult, NotificationOutcome, Severity};

/// A single alert as stored in the `alerts` table
#[derive(Debug, Clone)]
#[cfg_attr(feature = "storage-sqlite", derive(sqlx::FromRow))]
pub struct AlertRow {
    pub id: i64,
    pub indicator_id: i64,
    pub triggered_at: i64,
    pub message: String,
    pub severity: String,
    pub current_value: f64,
    pub historical_value: Option<f64>,
    pub deviation_percent: Option<f64>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<i64>,
    pub notes: Option<String>,

    /// JSON array of notification outcomes
    pub notifications: String,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StorageError;

    fn try_from(row: AlertRow) -> StorageResult<Self> {
        let severity = row
            .severity
            .parse::<Severity>()
            .map_err(StorageError::SerializationError)?;
        let notifications: Vec<NotificationOutcome> = serde_json::from_str(&row.notifications)?;

        Ok(Alert {
            id: row.id,
            indicator_id: row.indicator_id,
            triggered_at: millis_to_timestamp(row.triggered_at),
            message: row.message,
            severity,
            current_value: row.current_value,
            historical_value: row.historical_value,
            deviation_percent: row.deviation_percent,
            resolved: row.resolved,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at.map(millis_to_timestamp),
            notes: row.notes,
            notifications,
        })
    }
}

/// A single execution result as stored in the `executions` table
#[derive(Debug, Clone)]
#[cfg_attr(feature = "storage-sqlite", derive(sqlx::FromRow))]
pub struct ExecutionRow {
    pub indicator_id: i64,
    pub success: bool,
    pub current_value: Option<f64>,
    pub historical_value: Option<f64>,
    pub deviation_percent: Option<f64>,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
    pub context: String,
    pub alert_id: Option<i64>,
}

impl From<&ExecutionResult> for ExecutionRow {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            indicator_id: result.indicator_id,
            success: result.success,
            current_value: result.current_value,
            historical_value: result.historical_value,
            deviation_percent: result.deviation_percent,
            error_message: result.error_message.clone(),
            started_at: timestamp_to_millis(&result.started_at),
            finished_at: timestamp_to_millis(&result.finished_at),
            context: context_to_str(result.context).to_string(),
            alert_id: result.alert_id,
        }
    }
}

impl TryFrom<ExecutionRow> for ExecutionResult {
    type Error = StorageError;

    fn try_from(row: ExecutionRow) -> StorageResult<Self> {
        Ok(ExecutionResult {
            indicator_id: row.indicator_id,
            success: row.success,
            current_value: row.current_value,
            historical_value: row.historical_value,
            deviation_percent: row.deviation_percent,
            error_message: row.error_message,
            started_at: millis_to_timestamp(row.started_at),
            finished_at: millis_to_timestamp(row.finished_at),
            context: context_from_str(&row.context)?,
            alert_id: row.alert_id,
        })
    }
}

fn context_to_str(context: ExecutionContext) -> &'static str {
    match context {
        ExecutionContext::Manual => "manual",
        ExecutionContext::Scheduled => "scheduled",
        ExecutionContext::Test => "test",
    }
}

fn context_from_str(value: &str) -> StorageResult<ExecutionContext> {
    match value {
        "manual" => Ok(ExecutionContext::Manual),
        "scheduled" => Ok(ExecutionContext::Scheduled),
        "test" => Ok(ExecutionContext::Test),
        other => Err(StorageError::SerializationError(format!(
            "unknown execution context: {other}"
        ))),
    }
}

pub fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
