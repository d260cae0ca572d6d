//! Collector gateway
//!
//! The data sources behind indicators are opaque "collectors": named queries
//! that return rows for a time window. The core only knows the two traits in
//! this module; [`http::HttpCollectorGateway`] is the reference implementation
//! talking to a collector service over HTTP.

pub mod http;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One data point returned by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRow {
    /// Item the value belongs to (e.g. a product or a queue name)
    #[serde(default)]
    pub item: Option<String>,

    pub value: f64,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl CollectorRow {
    pub fn new(item: Option<&str>, value: f64) -> Self {
        Self {
            item: item.map(str::to_string),
            value,
            timestamp: None,
        }
    }
}

/// Errors a collector call can end with
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorError {
    /// The call did not finish within the configured timeout
    Timeout(Duration),

    /// The collector service could not be reached
    Connection(String),

    /// The collector rejected or failed the query
    Query { status: Option<u16>, message: String },

    /// The response could not be decoded
    Decode(String),

    /// The execution was cancelled before the collector answered
    Cancelled,
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::Timeout(after) => write!(f, "collector timed out after {after:?}"),
            CollectorError::Connection(msg) => write!(f, "collector unreachable: {msg}"),
            CollectorError::Query {
                status: Some(status),
                message,
            } => write!(f, "collector query failed ({status}): {message}"),
            CollectorError::Query {
                status: None,
                message,
            } => write!(f, "collector query failed: {message}"),
            CollectorError::Decode(msg) => write!(f, "invalid collector response: {msg}"),
            CollectorError::Cancelled => write!(f, "execution cancelled"),
        }
    }
}

impl std::error::Error for CollectorError {}

/// Executes a collector query for a time window
#[async_trait]
pub trait CollectorGateway: Send + Sync {
    async fn run_query(
        &self,
        collector_id: &str,
        lookback_minutes: u32,
    ) -> Result<Vec<CollectorRow>, CollectorError>;
}

/// Provides the comparable historical value for a collector item
#[async_trait]
pub trait BaselineSource: Send + Sync {
    /// Value of `item_name` for the same window `period_offset_days` ago.
    ///
    /// `None` when no history exists.
    async fn get_baseline(
        &self,
        collector_id: &str,
        item_name: Option<&str>,
        period_offset_days: u32,
    ) -> Result<Option<f64>, CollectorError>;
}
