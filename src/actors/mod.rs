//! Actor-based scheduling
//!
//! The recurring sweep runs as an independent async task communicating via
//! Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌─────────────────┐
//!                 │   Hub (main)    │
//!                 └────────┬────────┘
//!                          │ spawns
//!                 ┌────────▼────────┐   commands (mpsc)
//!                 │ SchedulerActor  │◄──────────────── SchedulerHandle
//!                 └────────┬────────┘
//!                          │ sweeps
//!                 ┌────────▼────────┐
//!                 │IndicatorMonitor │
//!                 └────────┬────────┘
//!                          │ MonitorEvent
//!                 ┌────────▼────────┐
//!                 │Broadcast Channel│
//!                 └────────┬────────┘
//!                          │ subscribe
//!                   logging, tests, ...
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the scheduler has an mpsc command channel for control messages
//! 2. **Events**: the monitor publishes events to a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod messages;
pub mod scheduler;
