//! Alert decision and cooldown
//!
//! Turns a completed [`ExecutionResult`] into an alert, or into nothing.
//!
//! The decision itself ([`candidate`]) is pure. The cooldown check and the
//! alert creation run under a per-indicator async lock held by the
//! [`CooldownManager`], so two executions of the same indicator finishing at
//! the same moment cannot both raise an alert.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::alerts::AlertStore;
use crate::model::{
    Alert, AlertCandidate, ExecutionResult, Indicator, IndicatorId, Severity, deviation_percent,
};
use crate::storage::{AlertRepository, StorageResult};

/// Result of [`AlertEvaluator::evaluate`]
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDecision {
    pub should_alert: bool,
    pub message: Option<String>,
    pub severity: Option<Severity>,

    /// Set when a candidate existed but the cooldown window swallowed it
    pub suppressed_until: Option<DateTime<Utc>>,
}

impl AlertDecision {
    fn none() -> Self {
        Self {
            should_alert: false,
            message: None,
            severity: None,
            suppressed_until: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RaiseOutcome {
    /// The result does not satisfy any alert condition
    NoCandidate,

    /// An alert condition holds, but the indicator is still cooling down
    Suppressed { last_alert_at: DateTime<Utc> },

    Raised(Alert),
}

/// Build the alert candidate for a result, ignoring cooldown.
///
/// Failed executions never produce a candidate. A configured fixed threshold
/// takes precedence over the deviation check.
pub fn candidate(
    indicator: &Indicator,
    result: &ExecutionResult,
    now: DateTime<Utc>,
) -> Option<AlertCandidate> {
    if !result.success {
        return None;
    }

    let current = result.current_value?;

    let (message, severity) = match &indicator.fixed_threshold {
        Some(threshold) => {
            if !threshold.operator.matches(current, threshold.value) {
                return None;
            }

            let severity_input = result
                .deviation_percent
                .unwrap_or_else(|| deviation_percent(current, threshold.value));

            (
                format!(
                    "{}: current value {current:.2} {} threshold {}",
                    indicator.name, threshold.operator, threshold.value
                ),
                Severity::from_deviation(severity_input),
            )
        }
        None => {
            let deviation = result.deviation_percent?;

            if deviation.abs() < indicator.deviation_threshold {
                return None;
            }

            if indicator
                .minimum_threshold
                .is_some_and(|minimum| current < minimum)
            {
                return None;
            }

            let baseline = result.historical_value.unwrap_or_default();
            (
                format!(
                    "{}: current value {current:.2} deviates {deviation:+.1}% from baseline {baseline:.2} (threshold {}%)",
                    indicator.name, indicator.deviation_threshold
                ),
                Severity::from_deviation(deviation),
            )
        }
    };

    Some(AlertCandidate {
        indicator_id: indicator.id,
        triggered_at: now,
        message,
        severity,
        current_value: current,
        historical_value: result.historical_value,
        deviation_percent: result.deviation_percent,
    })
}

#[derive(Debug, Default)]
struct CooldownSlot {
    seeded: bool,
    last_alert_at: Option<DateTime<Utc>>,
}

/// Per-indicator last-alert times, each behind its own lock
pub struct CooldownManager {
    repo: Arc<dyn AlertRepository>,
    slots: DashMap<IndicatorId, Arc<Mutex<CooldownSlot>>>,
}

impl CooldownManager {
    pub fn new(repo: Arc<dyn AlertRepository>) -> Self {
        Self {
            repo,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, id: IndicatorId) -> Arc<Mutex<CooldownSlot>> {
        self.slots.entry(id).or_default().clone()
    }

    /// Run `f` with exclusive access to the indicator's last-alert time.
    ///
    /// The time is seeded from the repository on first use.
    async fn with_slot<T, F, Fut>(&self, id: IndicatorId, f: F) -> StorageResult<T>
    where
        F: FnOnce(Option<DateTime<Utc>>) -> Fut,
        Fut: Future<Output = StorageResult<(T, Option<DateTime<Utc>>)>>,
    {
        let slot = self.slot(id);
        let mut slot = slot.lock().await;

        if !slot.seeded {
            slot.last_alert_at = self.repo.last_alert_time(id).await?;
            slot.seeded = true;
        }

        let (value, last_alert_at) = f(slot.last_alert_at).await?;
        slot.last_alert_at = last_alert_at;
        Ok(value)
    }

    pub async fn last_alert_at(&self, id: IndicatorId) -> StorageResult<Option<DateTime<Utc>>> {
        self.with_slot(id, |last| async move { Ok((last, last)) })
            .await
    }

    /// Drop slots of inactive indicators unless an evaluation is using them
    pub fn prune(&self, active: &[IndicatorId]) {
        self.slots
            .retain(|id, slot| active.contains(id) || Arc::strong_count(slot) > 1);
    }
}

fn cooling_down(
    indicator: &Indicator,
    last_alert_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let last = last_alert_at?;
    (now - last < indicator.cooldown()).then_some(last)
}

pub struct AlertEvaluator {
    cooldowns: CooldownManager,
    alerts: AlertStore,
}

impl AlertEvaluator {
    pub fn new(alerts: AlertStore) -> Self {
        Self {
            cooldowns: CooldownManager::new(alerts.repository().clone()),
            alerts,
        }
    }

    pub fn cooldowns(&self) -> &CooldownManager {
        &self.cooldowns
    }

    /// Decide whether `result` warrants an alert right now, without raising it
    pub async fn evaluate(
        &self,
        indicator: &Indicator,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> StorageResult<AlertDecision> {
        let Some(candidate) = candidate(indicator, result, now) else {
            return Ok(AlertDecision::none());
        };

        let last_alert_at = self.cooldowns.last_alert_at(indicator.id).await?;
        let suppressed_until =
            cooling_down(indicator, last_alert_at, now).map(|last| last + indicator.cooldown());

        Ok(AlertDecision {
            should_alert: suppressed_until.is_none(),
            message: Some(candidate.message),
            severity: Some(candidate.severity),
            suppressed_until,
        })
    }

    /// Evaluate `result` and, outside the cooldown window, create the alert.
    ///
    /// Check and creation happen under the indicator's cooldown lock.
    #[instrument(skip(self, indicator, result), fields(indicator = %indicator.name))]
    pub async fn raise(
        &self,
        indicator: &Indicator,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> StorageResult<RaiseOutcome> {
        let Some(candidate) = candidate(indicator, result, now) else {
            return Ok(RaiseOutcome::NoCandidate);
        };

        self.cooldowns
            .with_slot(indicator.id, |last_alert_at| async move {
                if let Some(last) = cooling_down(indicator, last_alert_at, now) {
                    debug!("alert suppressed, last alert at {last}");
                    return Ok((RaiseOutcome::Suppressed { last_alert_at: last }, last_alert_at));
                }

                let alert = self.alerts.create(candidate).await?;
                let raised_at = alert.triggered_at;
                Ok((RaiseOutcome::Raised(alert), Some(raised_at)))
            })
            .await
    }
}
