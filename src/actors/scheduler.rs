//! SchedulerActor - Sweeps for due indicators at a fixed tick
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → report stuck executions → sweep (spawned) → IndicatorMonitor::execute_due_indicators
//!     ↑
//!     └─── Commands (SweepNow, ExecuteNow, GetStatus, Cancel, UpdateTick, Shutdown)
//! ```
//!
//! Sweeps run on their own task so the actor keeps answering commands while
//! executions are in flight. A tick that fires while the previous sweep is
//! still running is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use super::messages::SchedulerCommand;
use crate::model::{ExecutionContext, ExecutionResult, IndicatorId};
use crate::monitor::{ExecutionStatus, IndicatorMonitor};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Actor driving the recurring sweep over all indicators
pub struct SchedulerActor {
    monitor: Arc<IndicatorMonitor>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// Current sweep interval
    tick: Duration,

    /// Execution history older than this is deleted once a day
    retention: Option<chrono::Duration>,

    /// Set while a sweep is in flight
    sweeping: Arc<AtomicBool>,
}

impl SchedulerActor {
    pub fn new(
        monitor: Arc<IndicatorMonitor>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        retention: Option<chrono::Duration>,
    ) -> Self {
        let tick = monitor.settings().tick;

        Self {
            monitor,
            command_rx,
            tick,
            retention,
            sweeping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or the command channel is closed.
    #[instrument(skip(self), fields(tick = ?self.tick))]
    pub async fn run(mut self) {
        info!("starting scheduler");

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cleanup = interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.monitor.report_stuck();
                    self.start_sweep(None);
                }

                _ = cleanup.tick(), if self.retention.is_some() => {
                    self.cleanup_history();
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::SweepNow { respond_to } => {
                            debug!("received SweepNow command");
                            self.start_sweep(Some(respond_to));
                        }

                        SchedulerCommand::ExecuteNow { indicator_id, respond_to } => {
                            debug!("received ExecuteNow command for indicator {indicator_id}");
                            let monitor = self.monitor.clone();
                            tokio::spawn(async move {
                                let result = monitor
                                    .execute_indicator(indicator_id, ExecutionContext::Manual, true)
                                    .await;
                                let _ = respond_to.send(result);
                            });
                        }

                        SchedulerCommand::GetStatus { indicator_id, respond_to } => {
                            let monitor = self.monitor.clone();
                            tokio::spawn(async move {
                                let _ = respond_to.send(monitor.get_execution_status(indicator_id).await);
                            });
                        }

                        SchedulerCommand::Cancel { indicator_id, respond_to } => {
                            let _ = respond_to.send(self.monitor.cancel_execution(indicator_id));
                        }

                        SchedulerCommand::UpdateTick { tick_secs } => {
                            debug!("updating tick to {tick_secs}s");
                            self.tick = Duration::from_secs(tick_secs.max(1));
                            ticker = interval(self.tick);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                // Command channel closed - exit
                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        info!("scheduler stopped");
    }

    /// Start a sweep unless one is in flight. `respond_to` receives the results.
    fn start_sweep(&self, respond_to: Option<oneshot::Sender<Vec<ExecutionResult>>>) {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            debug!("previous sweep still running, skipping");
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(vec![]);
            }
            return;
        }

        let monitor = self.monitor.clone();
        let sweeping = self.sweeping.clone();
        tokio::spawn(async move {
            let results = monitor
                .execute_due_indicators(ExecutionContext::Scheduled)
                .await;
            sweeping.store(false, Ordering::SeqCst);

            if !results.is_empty() {
                debug!("sweep executed {} indicators", results.len());
            }
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(results);
            }
        });
    }

    fn cleanup_history(&self) {
        let Some(retention) = self.retention else {
            return;
        };

        let monitor = self.monitor.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.cleanup_executions(retention).await {
                error!("failed to clean up execution history: {e}");
            }
        });
    }
}

/// Handle for controlling a SchedulerActor
///
/// It can be cloned and shared across tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    pub fn spawn(monitor: Arc<IndicatorMonitor>, retention: Option<chrono::Duration>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(monitor, cmd_rx, retention);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a sweep now and wait for its results
    pub async fn sweep_now(&self) -> Result<Vec<ExecutionResult>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Execute one indicator manually
    pub async fn execute_now(&self, indicator_id: IndicatorId) -> Result<ExecutionResult> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::ExecuteNow {
                indicator_id,
                respond_to: tx,
            })
            .await
            .context("failed to send ExecuteNow command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    pub async fn status(&self, indicator_id: IndicatorId) -> Result<ExecutionStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStatus {
                indicator_id,
                respond_to: tx,
            })
            .await
            .context("failed to send GetStatus command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    pub async fn cancel(&self, indicator_id: IndicatorId) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Cancel {
                indicator_id,
                respond_to: tx,
            })
            .await
            .context("failed to send Cancel command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn update_tick(&self, tick_secs: u64) -> Result<()> {
        self.sender
            .send(SchedulerCommand::UpdateTick { tick_secs })
            .await
            .context("failed to send UpdateTick command")?;
        Ok(())
    }

    /// Gracefully shut down the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
