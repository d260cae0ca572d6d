//! Repository trait definitions
//!
//! This module defines the storage contracts the monitoring core consumes.
//! Implementations must be `Send + Sync` as they are shared between the
//! scheduler sweep and concurrently running executions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::model::{
    Alert, AlertCandidate, AlertId, ExecutionResult, Indicator, IndicatorId,
    NotificationOutcome, ScheduleId,
};
use crate::schedule::Schedule;

/// Read access to indicator definitions plus the run bookkeeping the engine writes
#[async_trait]
pub trait IndicatorRepository: Send + Sync {
    /// All known indicators, active or not
    async fn list_indicators(&self) -> StorageResult<Vec<Indicator>>;

    async fn get_indicator(&self, id: IndicatorId) -> StorageResult<Option<Indicator>>;

    /// Record the last run of an indicator.
    ///
    /// `value` is `None` for failed executions; the previous last value is kept
    /// in that case.
    async fn record_run(
        &self,
        id: IndicatorId,
        ran_at: DateTime<Utc>,
        value: Option<f64>,
    ) -> StorageResult<()>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_schedule(&self, id: ScheduleId) -> StorageResult<Option<Schedule>>;

    /// Write last/next fire bookkeeping after a scheduled execution
    async fn record_fire(
        &self,
        id: ScheduleId,
        fired_at: DateTime<Utc>,
        next_due: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;
}

/// Persistence for alerts
///
/// Alerts are append-only. The only mutations after creation are the
/// resolution fields (set once) and appended notification outcomes.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Persist a new alert and assign its id
    async fn insert_alert(&self, candidate: AlertCandidate) -> StorageResult<Alert>;

    async fn get_alert(&self, id: AlertId) -> StorageResult<Option<Alert>>;

    /// Resolve an alert if it exists and is still unresolved.
    ///
    /// Must be a single conditional update: returns `false` (and changes
    /// nothing) when the alert is missing or already resolved.
    async fn resolve_alert(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Trigger time of the most recent alert for an indicator
    async fn last_alert_time(
        &self,
        indicator_id: IndicatorId,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    async fn append_notifications(
        &self,
        id: AlertId,
        outcomes: &[NotificationOutcome],
    ) -> StorageResult<()>;

    /// Unresolved alerts, optionally restricted to one indicator, oldest first
    async fn unresolved_alerts(
        &self,
        indicator_id: Option<IndicatorId>,
    ) -> StorageResult<Vec<Alert>>;
}

/// History of execution results
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn record_execution(&self, result: &ExecutionResult) -> StorageResult<()>;

    /// The N most recent results for an indicator, newest first
    async fn recent_executions(
        &self,
        indicator_id: IndicatorId,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionResult>>;

    /// Delete results that started before `before`, returning how many were removed
    async fn cleanup_executions(&self, before: DateTime<Utc>) -> StorageResult<usize>;
}
