//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to the scheduler via mpsc
//! 2. **Events**: Broadcast notifications published to any number of subscribers
//! 3. **Immutability**: Events are cloneable for multi-subscriber patterns

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::model::{Alert, ExecutionContext, ExecutionResult, IndicatorId, NotificationResult};
use crate::monitor::{ExecutionStatus, MonitorError};

/// Health and alert events published by the monitor
///
/// The broadcast channel may lag or drop events for slow subscribers. Events
/// are informational; the repositories stay the source of truth.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A non-test execution finished (successfully or not)
    Executed(ExecutionResult),

    /// An execution failed. Never turned into an alert.
    ExecutionFailed {
        indicator_id: IndicatorId,
        error: String,
        consecutive_failures: u32,
    },

    AlertRaised {
        alert: Alert,

        /// Dispatch outcome, `None` when the indicator has no channels
        notifications: Option<NotificationResult>,
    },

    /// An execution has been running for longer than the configured ceiling
    Stuck {
        indicator_id: IndicatorId,
        started_at: DateTime<Utc>,
        context: ExecutionContext,
    },
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a sweep immediately (bypassing the tick timer)
    ///
    /// Answers with the results of the sweep. If a sweep is already in
    /// flight, answers with an empty list.
    SweepNow {
        respond_to: oneshot::Sender<Vec<ExecutionResult>>,
    },

    /// Execute a single indicator manually
    ///
    /// Goes through the same running gate as scheduled executions.
    ExecuteNow {
        indicator_id: IndicatorId,
        respond_to: oneshot::Sender<Result<ExecutionResult, MonitorError>>,
    },

    GetStatus {
        indicator_id: IndicatorId,
        respond_to: oneshot::Sender<Result<ExecutionStatus, MonitorError>>,
    },

    /// Signal a running execution to stop
    Cancel {
        indicator_id: IndicatorId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Update the sweep interval
    ///
    /// The new interval takes effect after the current tick.
    UpdateTick { tick_secs: u64 },

    /// Gracefully shut down the scheduler
    ///
    /// In-flight executions keep running to completion.
    Shutdown,
}
