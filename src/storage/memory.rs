//! In-memory storage backend (no persistence)
//!
//! Implements every repository trait on plain maps behind async locks. It's
//! useful for:
//! - Testing without database dependencies
//! - Holding the indicators and schedules loaded from the configuration file
//! - Running the hub without a database
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited history**: execution results are kept in a ring buffer per indicator

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::{AlertRepository, ExecutionLog, IndicatorRepository, ScheduleRepository};
use super::error::StorageResult;
use crate::model::{
    Alert, AlertCandidate, AlertId, ExecutionResult, Indicator, IndicatorId,
    NotificationOutcome, ScheduleId,
};
use crate::schedule::Schedule;

/// Maximum execution results to keep in memory per indicator
const MAX_EXECUTIONS_PER_INDICATOR: usize = 1000;

pub struct MemoryStore {
    indicators: RwLock<HashMap<IndicatorId, Indicator>>,
    schedules: RwLock<HashMap<ScheduleId, Schedule>>,
    alerts: RwLock<BTreeMap<AlertId, Alert>>,
    executions: RwLock<HashMap<IndicatorId, VecDeque<ExecutionResult>>>,
    next_alert_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            indicators: RwLock::new(HashMap::new()),
            schedules: RwLock::new(HashMap::new()),
            alerts: RwLock::new(BTreeMap::new()),
            executions: RwLock::new(HashMap::new()),
            next_alert_id: AtomicI64::new(1),
        }
    }

    /// Create a store seeded with indicator and schedule definitions
    pub fn with_definitions(indicators: Vec<Indicator>, schedules: Vec<Schedule>) -> Self {
        Self {
            indicators: RwLock::new(indicators.into_iter().map(|i| (i.id, i)).collect()),
            schedules: RwLock::new(schedules.into_iter().map(|s| (s.id, s)).collect()),
            ..Self::new()
        }
    }

    pub async fn upsert_indicator(&self, indicator: Indicator) {
        self.indicators.write().await.insert(indicator.id, indicator);
    }

    pub async fn remove_indicator(&self, id: IndicatorId) -> Option<Indicator> {
        self.indicators.write().await.remove(&id)
    }

    pub async fn upsert_schedule(&self, schedule: Schedule) {
        self.schedules.write().await.insert(schedule.id, schedule);
    }

    pub async fn alert_count(&self) -> usize {
        self.alerts.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndicatorRepository for MemoryStore {
    async fn list_indicators(&self) -> StorageResult<Vec<Indicator>> {
        let mut indicators: Vec<_> = self.indicators.read().await.values().cloned().collect();
        indicators.sort_by_key(|i| i.id);
        Ok(indicators)
    }

    async fn get_indicator(&self, id: IndicatorId) -> StorageResult<Option<Indicator>> {
        Ok(self.indicators.read().await.get(&id).cloned())
    }

    async fn record_run(
        &self,
        id: IndicatorId,
        ran_at: DateTime<Utc>,
        value: Option<f64>,
    ) -> StorageResult<()> {
        if let Some(indicator) = self.indicators.write().await.get_mut(&id) {
            indicator.last_run = Some(ran_at);
            if value.is_some() {
                indicator.last_value = value;
            }
        } else {
            trace!("record_run for unknown indicator {id}, ignoring");
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for MemoryStore {
    async fn get_schedule(&self, id: ScheduleId) -> StorageResult<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn record_fire(
        &self,
        id: ScheduleId,
        fired_at: DateTime<Utc>,
        next_due: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        if let Some(schedule) = self.schedules.write().await.get_mut(&id) {
            schedule.last_fired_at = Some(fired_at);
            schedule.next_due_at = next_due;
        }
        Ok(())
    }
}

#[async_trait]
impl AlertRepository for MemoryStore {
    async fn insert_alert(&self, candidate: AlertCandidate) -> StorageResult<Alert> {
        let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst);
        let alert = Alert::from_candidate(id, candidate);

        debug!("in-memory backend: storing alert {id}");
        self.alerts.write().await.insert(id, alert.clone());
        Ok(alert)
    }

    async fn get_alert(&self, id: AlertId) -> StorageResult<Option<Alert>> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn resolve_alert(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut alerts = self.alerts.write().await;
        let Some(alert) = alerts.get_mut(&id) else {
            return Ok(false);
        };

        if alert.resolved {
            return Ok(false);
        }

        alert.resolved = true;
        alert.resolved_by = Some(resolved_by.to_string());
        alert.resolved_at = Some(resolved_at);
        alert.notes = notes.map(str::to_string);
        Ok(true)
    }

    async fn last_alert_time(
        &self,
        indicator_id: IndicatorId,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.indicator_id == indicator_id)
            .map(|a| a.triggered_at)
            .max())
    }

    async fn append_notifications(
        &self,
        id: AlertId,
        outcomes: &[NotificationOutcome],
    ) -> StorageResult<()> {
        if let Some(alert) = self.alerts.write().await.get_mut(&id) {
            alert.notifications.extend_from_slice(outcomes);
        }
        Ok(())
    }

    async fn unresolved_alerts(
        &self,
        indicator_id: Option<IndicatorId>,
    ) -> StorageResult<Vec<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| !a.resolved)
            .filter(|a| indicator_id.is_none_or(|id| a.indicator_id == id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExecutionLog for MemoryStore {
    async fn record_execution(&self, result: &ExecutionResult) -> StorageResult<()> {
        let mut executions = self.executions.write().await;
        let history = executions.entry(result.indicator_id).or_default();

        if history.len() >= MAX_EXECUTIONS_PER_INDICATOR {
            history.pop_front();
        }
        history.push_back(result.clone());
        Ok(())
    }

    async fn recent_executions(
        &self,
        indicator_id: IndicatorId,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionResult>> {
        Ok(self
            .executions
            .read()
            .await
            .get(&indicator_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn cleanup_executions(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut executions = self.executions.write().await;
        let mut removed = 0;

        for history in executions.values_mut() {
            let len = history.len();
            history.retain(|r| r.started_at >= before);
            removed += len - history.len();
        }

        Ok(removed)
    }
}
