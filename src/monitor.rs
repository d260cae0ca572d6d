//! Indicator monitor
//!
//! The facade tying the pipeline together. One [`IndicatorMonitor`] owns the
//! due-set tracker, the execution engine, the alert evaluator and the
//! notification router, and is shared (behind an `Arc`) by the scheduler actor
//! and anything issuing manual requests.
//!
//! ## Execution pipeline
//!
//! ```text
//! claim running flag ─► engine.execute ─► failure counter ─► evaluator.raise ─► persist
//!        │                                                         │
//!        └─ AlreadyRunning                                         └─► router.dispatch ─► attach outcomes
//! ```
//!
//! The running flag is held until the run bookkeeping is written, so a sweep
//! never sees an indicator as idle with a stale last run.
//!
//! `Test` executions stop right after the engine: nothing is persisted, no
//! alert is evaluated and no event is published.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::actors::messages::MonitorEvent;
use crate::alerts::AlertStore;
use crate::collector::{BaselineSource, CollectorGateway};
use crate::engine::ExecutionEngine;
use crate::evaluator::{AlertEvaluator, RaiseOutcome};
use crate::model::{
    Alert, AlertId, ChannelTarget, ExecutionContext, ExecutionResult, Indicator, IndicatorId,
    NotificationOutcome, NotificationResult,
};
use crate::notify::{NotificationRouter, RenderedMessage};
use crate::schedule::compute_next_due;
use crate::storage::{
    AlertRepository, ExecutionLog, IndicatorRepository, MemoryStore, ScheduleRepository,
    StorageError, StorageResult,
};
use crate::tracker::{DueSetTracker, RunningEntry};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum MonitorError {
    /// The indicator already has an execution in flight
    AlreadyRunning(IndicatorId),

    NotFound(IndicatorId),

    Storage(StorageError),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::AlreadyRunning(id) => write!(f, "indicator {id} is already running"),
            MonitorError::NotFound(id) => write!(f, "indicator {id} not found"),
            MonitorError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for MonitorError {
    fn from(e: StorageError) -> Self {
        MonitorError::Storage(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Idle,
    Running,
    /// The last execution failed
    Failing,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStatus {
    pub indicator_id: IndicatorId,
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub context: Option<ExecutionContext>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub status: ExecutionState,
    pub consecutive_failures: u32,
}

/// The repositories the monitor reads from and writes to
#[derive(Clone)]
pub struct Repositories {
    pub indicators: Arc<dyn IndicatorRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub alerts: Arc<dyn AlertRepository>,
    pub executions: Arc<dyn ExecutionLog>,
}

impl Repositories {
    /// Use one in-memory store for everything
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            indicators: store.clone(),
            schedules: store.clone(),
            alerts: store.clone(),
            executions: store,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Sweep interval of the scheduler
    pub tick: Duration,

    /// Maximum number of concurrent executions per sweep
    pub workers: usize,

    pub collector_timeout: Duration,

    /// Executions running longer than this are reported as stuck
    pub stuck_after: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            workers: 4,
            collector_timeout: Duration::from_secs(30),
            stuck_after: Duration::from_secs(900),
        }
    }
}

pub struct IndicatorMonitor {
    repos: Repositories,
    tracker: DueSetTracker,
    engine: ExecutionEngine,
    evaluator: AlertEvaluator,
    alerts: AlertStore,
    router: NotificationRouter,
    failures: DashMap<IndicatorId, u32>,
    events: broadcast::Sender<MonitorEvent>,
    settings: MonitorSettings,
}

impl IndicatorMonitor {
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn CollectorGateway>,
        baselines: Arc<dyn BaselineSource>,
        router: NotificationRouter,
        settings: MonitorSettings,
    ) -> Self {
        let alerts = AlertStore::new(repos.alerts.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            tracker: DueSetTracker::new(
                repos.indicators.clone(),
                repos.schedules.clone(),
                settings.tick,
            ),
            engine: ExecutionEngine::new(gateway, baselines, settings.collector_timeout),
            evaluator: AlertEvaluator::new(alerts.clone()),
            alerts,
            router,
            failures: DashMap::new(),
            events,
            repos,
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: MonitorEvent) {
        // no subscribers is fine
        if let Ok(receivers) = self.events.send(event) {
            trace!("published monitor event to {receivers} receivers");
        }
    }

    /// Execute one indicator now.
    ///
    /// Fails with [`MonitorError::AlreadyRunning`] if it is already in flight.
    /// With `save_results == false` the execution history and run bookkeeping
    /// are left untouched.
    pub async fn execute_indicator(
        &self,
        id: IndicatorId,
        context: ExecutionContext,
        save_results: bool,
    ) -> Result<ExecutionResult, MonitorError> {
        let indicator = self
            .repos
            .indicators
            .get_indicator(id)
            .await?
            .ok_or(MonitorError::NotFound(id))?;

        self.run(indicator, context, save_results).await
    }

    #[instrument(skip(self, indicator), fields(indicator = %indicator.name, %context))]
    async fn run(
        &self,
        indicator: Indicator,
        context: ExecutionContext,
        save_results: bool,
    ) -> Result<ExecutionResult, MonitorError> {
        let guard = self
            .tracker
            .try_acquire(indicator.id, context)
            .ok_or(MonitorError::AlreadyRunning(indicator.id))?;

        let mut result = self
            .engine
            .execute(&indicator, context, guard.cancel_token())
            .await;

        if context == ExecutionContext::Test {
            return Ok(result);
        }

        self.track_failures(&result);

        let mut raised = None;
        if result.success {
            match self.evaluator.raise(&indicator, &result, Utc::now()).await {
                Ok(RaiseOutcome::Raised(alert)) => {
                    result.alert_id = Some(alert.id);
                    raised = Some(alert);
                }
                Ok(RaiseOutcome::Suppressed { last_alert_at }) => {
                    debug!("alert suppressed by cooldown (last alert {last_alert_at})");
                }
                Ok(RaiseOutcome::NoCandidate) => {}
                Err(e) => error!("failed to evaluate alert: {e}"),
            }
        }

        // a stored alert is dispatched even when the bookkeeping cannot be written
        if save_results && let Err(e) = self.persist(&indicator, &result).await {
            error!("failed to record execution of indicator {}: {e}", indicator.id);
        }

        drop(guard);

        if let Some(alert) = raised {
            let notifications = if indicator.channels.is_empty() {
                None
            } else {
                Some(
                    self.notify(&alert, &indicator.name, &indicator.channels)
                        .await,
                )
            };
            self.publish(MonitorEvent::AlertRaised {
                alert,
                notifications,
            });
        }

        self.publish(MonitorEvent::Executed(result.clone()));
        Ok(result)
    }

    fn track_failures(&self, result: &ExecutionResult) {
        if result.success {
            self.failures.remove(&result.indicator_id);
            return;
        }

        let consecutive_failures = {
            let mut count = self.failures.entry(result.indicator_id).or_insert(0);
            *count += 1;
            *count
        };

        self.publish(MonitorEvent::ExecutionFailed {
            indicator_id: result.indicator_id,
            error: result.error_message.clone().unwrap_or_default(),
            consecutive_failures,
        });
    }

    async fn persist(&self, indicator: &Indicator, result: &ExecutionResult) -> StorageResult<()> {
        self.repos.executions.record_execution(result).await?;
        self.repos
            .indicators
            .record_run(indicator.id, result.started_at, result.current_value)
            .await?;

        let Some(schedule_id) = indicator.schedule_id else {
            return Ok(());
        };

        if let Some(schedule) = self.repos.schedules.get_schedule(schedule_id).await? {
            let next_due = compute_next_due(&schedule, Some(result.started_at), result.started_at);
            self.repos
                .schedules
                .record_fire(schedule_id, result.started_at, next_due)
                .await?;
        }

        Ok(())
    }

    /// Execute every due indicator, at most `workers` at a time
    #[instrument(skip(self))]
    pub async fn execute_due_indicators(&self, context: ExecutionContext) -> Vec<ExecutionResult> {
        if let Err(e) = self.prune().await {
            warn!("failed to prune inactive indicators: {e}");
        }

        let due = match self.tracker.get_due_indicators(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                error!("failed to determine due indicators: {e}");
                return vec![];
            }
        };

        if due.is_empty() {
            return vec![];
        }

        debug!("executing {} due indicators", due.len());

        futures::stream::iter(due)
            .map(|indicator| self.run(indicator, context, true))
            .buffer_unordered(self.settings.workers.max(1))
            .filter_map(|result| async move {
                match result {
                    Ok(result) => Some(result),
                    Err(MonitorError::AlreadyRunning(id)) => {
                        debug!("indicator {id} started elsewhere, skipping");
                        None
                    }
                    Err(e) => {
                        error!("execution failed: {e}");
                        None
                    }
                }
            })
            .collect()
            .await
    }

    /// Drop running, cooldown and failure state of indicators that are no longer active
    pub async fn prune(&self) -> StorageResult<()> {
        let active: Vec<IndicatorId> = self
            .repos
            .indicators
            .list_indicators()
            .await?
            .into_iter()
            .filter(|indicator| indicator.active)
            .map(|indicator| indicator.id)
            .collect();

        self.tracker.prune(&active);
        self.evaluator.cooldowns().prune(&active);
        self.failures.retain(|id, _| active.contains(id));
        Ok(())
    }

    pub async fn get_execution_status(
        &self,
        id: IndicatorId,
    ) -> Result<ExecutionStatus, MonitorError> {
        let indicator = self
            .repos
            .indicators
            .get_indicator(id)
            .await?
            .ok_or(MonitorError::NotFound(id))?;

        let running = self.tracker.running(id);
        let consecutive_failures = self.failures.get(&id).map(|count| *count).unwrap_or(0);
        let next_run = if indicator.active {
            self.tracker.next_due(&indicator, Utc::now()).await?
        } else {
            None
        };

        let status = if running.is_some() {
            ExecutionState::Running
        } else if !indicator.active {
            ExecutionState::Inactive
        } else if consecutive_failures > 0 {
            ExecutionState::Failing
        } else {
            ExecutionState::Idle
        };

        Ok(ExecutionStatus {
            indicator_id: id,
            is_running: running.is_some(),
            started_at: running.as_ref().map(|entry| entry.started_at),
            context: running.as_ref().map(|entry| entry.context),
            last_run: indicator.last_run,
            next_run,
            status,
            consecutive_failures,
        })
    }

    pub fn cancel_execution(&self, id: IndicatorId) -> bool {
        self.tracker.cancel(id)
    }

    pub fn stuck_executions(&self) -> Vec<(IndicatorId, RunningEntry)> {
        self.tracker.stuck(self.settings.stuck_after, Utc::now())
    }

    /// Publish a [`MonitorEvent::Stuck`] for every stuck execution and return how many there are
    pub fn report_stuck(&self) -> usize {
        let stuck = self.stuck_executions();

        for (indicator_id, entry) in &stuck {
            warn!(
                "indicator {indicator_id} has been running since {}",
                entry.started_at
            );
            self.publish(MonitorEvent::Stuck {
                indicator_id: *indicator_id,
                started_at: entry.started_at,
                context: entry.context,
            });
        }

        stuck.len()
    }

    pub async fn resolve_alert(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<bool, MonitorError> {
        Ok(self.alerts.resolve(id, resolved_by, notes).await?)
    }

    pub async fn bulk_resolve_alerts(
        &self,
        ids: &[AlertId],
        resolved_by: &str,
        notes: Option<&str>,
    ) -> usize {
        self.alerts.bulk_resolve(ids, resolved_by, notes).await
    }

    pub async fn unresolved_alerts(
        &self,
        indicator_id: Option<IndicatorId>,
    ) -> Result<Vec<Alert>, MonitorError> {
        Ok(self.alerts.unresolved(indicator_id).await?)
    }

    /// Send `alert` to `channels` and attach the outcomes to the stored alert
    pub async fn dispatch_notification(
        &self,
        alert: &Alert,
        channels: &[ChannelTarget],
    ) -> NotificationResult {
        let indicator_name = match self.repos.indicators.get_indicator(alert.indicator_id).await {
            Ok(Some(indicator)) => indicator.name,
            _ => format!("indicator {}", alert.indicator_id),
        };

        self.notify(alert, &indicator_name, channels).await
    }

    async fn notify(
        &self,
        alert: &Alert,
        indicator_name: &str,
        channels: &[ChannelTarget],
    ) -> NotificationResult {
        let result = self.router.dispatch(alert, indicator_name, channels).await;

        if let Err(e) = self
            .alerts
            .attach_notifications(alert.id, &result.results)
            .await
        {
            error!("failed to attach notification outcomes to alert {}: {e}", alert.id);
        }

        result
    }

    /// Send a test message to a single channel
    pub async fn test_notification(&self, target: &ChannelTarget) -> NotificationOutcome {
        let message = RenderedMessage::test(format!(
            "Test notification for {} channel {}",
            target.kind, target.recipient
        ));
        self.router.test_dispatch(target, &message).await
    }

    pub async fn recent_executions(
        &self,
        id: IndicatorId,
        limit: usize,
    ) -> Result<Vec<ExecutionResult>, MonitorError> {
        Ok(self.repos.executions.recent_executions(id, limit).await?)
    }

    /// Delete execution history older than `retention`
    pub async fn cleanup_executions(&self, retention: chrono::Duration) -> StorageResult<usize> {
        let deleted = self
            .repos
            .executions
            .cleanup_executions(Utc::now() - retention)
            .await?;

        if deleted > 0 {
            info!("removed {deleted} execution results older than {} days", retention.num_days());
        }

        Ok(deleted)
    }
}
