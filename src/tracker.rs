//! Due-set tracker
//!
//! Decides which indicators are due and guards against re-entrant execution.
//!
//! ## Running map
//!
//! Running executions live in a concurrent map keyed by indicator id. Marking
//! an indicator as running is a compare-and-set on its map entry, so two
//! callers racing for the same indicator cannot both win, while callers for
//! different indicators never block each other.
//!
//! ```text
//! try_mark_running(id) ──► entry(id) vacant?  ──yes──► insert RunningEntry → true
//!                                      │
//!                                      └──no───► false (already running)
//! mark_completed(id)   ──► remove(id)
//! ```
//!
//! Each entry carries its start time, context and a cancellation token, which
//! is what stuck-execution detection and best-effort cancellation work on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::model::{ExecutionContext, Indicator, IndicatorId};
use crate::schedule::compute_next_due;
use crate::storage::{IndicatorRepository, ScheduleRepository, StorageResult};

/// An execution currently in flight
#[derive(Debug, Clone)]
pub struct RunningEntry {
    pub started_at: DateTime<Utc>,
    pub context: ExecutionContext,
    pub cancel: CancellationToken,

    /// Distinguishes successive executions of the same indicator
    generation: u64,
}

impl RunningEntry {
    pub fn running_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.started_at
    }
}

pub struct DueSetTracker {
    indicators: Arc<dyn IndicatorRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    running: DashMap<IndicatorId, RunningEntry>,
    generations: AtomicU64,

    /// Sweep interval, used to anchor cron schedules of never-run indicators
    tick: Duration,
}

impl DueSetTracker {
    pub fn new(
        indicators: Arc<dyn IndicatorRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        tick: Duration,
    ) -> Self {
        Self {
            indicators,
            schedules,
            running: DashMap::new(),
            generations: AtomicU64::new(0),
            tick,
        }
    }

    /// Active, scheduled, not running indicators whose next due time is at or before `as_of`
    #[instrument(skip(self))]
    pub async fn get_due_indicators(&self, as_of: DateTime<Utc>) -> StorageResult<Vec<Indicator>> {
        let mut due = vec![];

        for indicator in self.indicators.list_indicators().await? {
            if !indicator.active || self.is_running(indicator.id) {
                continue;
            }

            let Some(next_due) = self.next_due(&indicator, as_of).await? else {
                continue;
            };

            if next_due <= as_of {
                trace!("indicator {} due since {next_due}", indicator.id);
                due.push(indicator);
            }
        }

        debug!("{} indicators due", due.len());
        Ok(due)
    }

    /// Next due time of `indicator` as seen at `as_of`.
    ///
    /// `None` for indicators without a (known, enabled, in-window) schedule.
    pub async fn next_due(
        &self,
        indicator: &Indicator,
        as_of: DateTime<Utc>,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let Some(schedule_id) = indicator.schedule_id else {
            return Ok(None);
        };

        let Some(schedule) = self.schedules.get_schedule(schedule_id).await? else {
            warn!(
                "indicator {} references unknown schedule {schedule_id}",
                indicator.id
            );
            return Ok(None);
        };

        let last_fire = match (indicator.last_run, &schedule.kind) {
            (Some(last_run), _) => Some(last_run),
            (None, crate::schedule::ScheduleKind::Interval { .. }) => None,
            (None, crate::schedule::ScheduleKind::Cron { .. }) => {
                let tick = chrono::Duration::from_std(self.tick).unwrap_or_default();
                Some(as_of - tick)
            }
        };

        Ok(compute_next_due(&schedule, last_fire, as_of))
    }

    /// Atomically claim `id` for execution. Returns `false` if it is already running.
    pub fn try_mark_running(&self, id: IndicatorId, context: ExecutionContext) -> bool {
        self.claim(id, context).is_some()
    }

    fn claim(&self, id: IndicatorId, context: ExecutionContext) -> Option<RunningEntry> {
        match self.running.entry(id) {
            Entry::Occupied(_) => {
                trace!("indicator {id} already running");
                None
            }
            Entry::Vacant(entry) => {
                let running = RunningEntry {
                    started_at: Utc::now(),
                    context,
                    cancel: CancellationToken::new(),
                    generation: self.generations.fetch_add(1, Ordering::Relaxed),
                };
                entry.insert(running.clone());
                Some(running)
            }
        }
    }

    pub fn mark_completed(&self, id: IndicatorId) {
        self.running.remove(&id);
    }

    /// Claim `id` and release it again when the returned guard is dropped.
    ///
    /// The guard only ever removes its own entry.
    pub fn try_acquire(&self, id: IndicatorId, context: ExecutionContext) -> Option<RunGuard<'_>> {
        let entry = self.claim(id, context)?;

        Some(RunGuard {
            tracker: self,
            id,
            cancel: entry.cancel,
            generation: entry.generation,
        })
    }

    pub fn is_running(&self, id: IndicatorId) -> bool {
        self.running.contains_key(&id)
    }

    pub fn running(&self, id: IndicatorId) -> Option<RunningEntry> {
        self.running.get(&id).map(|entry| entry.clone())
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Executions that have been running for longer than `ceiling`
    pub fn stuck(
        &self,
        ceiling: Duration,
        now: DateTime<Utc>,
    ) -> Vec<(IndicatorId, RunningEntry)> {
        let ceiling = chrono::Duration::from_std(ceiling).unwrap_or(chrono::Duration::MAX);

        self.running
            .iter()
            .filter(|entry| entry.running_for(now) > ceiling)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Signal a running execution to stop. Returns `false` if nothing is running.
    pub fn cancel(&self, id: IndicatorId) -> bool {
        match self.running.get(&id) {
            Some(entry) => {
                debug!("cancelling execution of indicator {id}");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal executions of indicators that are no longer active to stop.
    ///
    /// Entries stay until their execution finishes, so the indicator cannot be
    /// claimed again while the old execution is still in flight.
    pub fn prune(&self, active: &[IndicatorId]) {
        for entry in self.running.iter() {
            if !active.contains(entry.key()) && !entry.cancel.is_cancelled() {
                debug!("cancelling execution of inactive indicator {}", entry.key());
                entry.cancel.cancel();
            }
        }
    }
}

/// Keeps an indicator marked as running for as long as it lives
pub struct RunGuard<'a> {
    tracker: &'a DueSetTracker,
    id: IndicatorId,
    cancel: CancellationToken,
    generation: u64,
}

impl RunGuard<'_> {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.tracker
            .running
            .remove_if(&self.id, |_, entry| entry.generation == generation);
    }
}
