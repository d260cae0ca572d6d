pub mod actors;
pub mod alerts;
pub mod collector;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod schedule;
pub mod storage;
pub mod tracker;
pub mod util;

pub use model::{
    Alert, ChannelKind, ChannelTarget, ExecutionContext, ExecutionResult, Indicator, Severity,
};
pub use monitor::{ExecutionStatus, IndicatorMonitor, MonitorError, MonitorSettings, Repositories};
