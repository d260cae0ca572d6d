//! Execution engine
//!
//! Runs one indicator: query the collector, reduce the rows to a single value,
//! fetch the historical baseline and derive the deviation.
//!
//! ## Failure handling
//!
//! Collector failures never escape as errors. Timeouts, query errors,
//! connectivity problems and cancellation all end up as an
//! [`ExecutionResult`] with `success == false`, so a sweep over many indicators
//! keeps going. A missing or failing baseline is not a failure: the result
//! simply carries no historical value and no deviation.
//!
//! ## Cancellation
//!
//! Every collector call is raced against the execution's cancellation token
//! and the configured timeout. Whichever finishes first wins; the engine stops
//! waiting but the underlying request is only dropped, not forcibly stopped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::collector::{BaselineSource, CollectorError, CollectorGateway, CollectorRow};
use crate::model::{ExecutionContext, ExecutionResult, Indicator, deviation_percent};

pub struct ExecutionEngine {
    gateway: Arc<dyn CollectorGateway>,
    baselines: Arc<dyn BaselineSource>,
    timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        gateway: Arc<dyn CollectorGateway>,
        baselines: Arc<dyn BaselineSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            baselines,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `indicator` once.
    ///
    /// Never fails: every problem is reported inside the returned result.
    #[instrument(skip(self, indicator, cancel), fields(indicator = %indicator.name, %context))]
    pub async fn execute(
        &self,
        indicator: &Indicator,
        context: ExecutionContext,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();

        let rows = match self
            .bounded(
                cancel,
                self.gateway
                    .run_query(&indicator.collector_id, indicator.lookback_minutes),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("collector query failed: {e}");
                return ExecutionResult::failure(indicator.id, context, started_at, e);
            }
        };

        trace!("collector returned {} rows", rows.len());

        let Some(current) = reduce_rows(indicator, &rows) else {
            warn!("collector returned no rows");
            return ExecutionResult::failure(
                indicator.id,
                context,
                started_at,
                "collector returned no rows",
            );
        };

        let historical = match self
            .bounded(
                cancel,
                self.baselines.get_baseline(
                    &indicator.collector_id,
                    indicator.item_name.as_deref(),
                    indicator.baseline_offset_days,
                ),
            )
            .await
        {
            Ok(value) => value,
            Err(CollectorError::Cancelled) => {
                return ExecutionResult::failure(
                    indicator.id,
                    context,
                    started_at,
                    CollectorError::Cancelled,
                );
            }
            Err(e) => {
                warn!("baseline unavailable: {e}");
                None
            }
        };

        let deviation = historical.map(|historical| deviation_percent(current, historical));

        debug!("current={current} historical={historical:?} deviation={deviation:?}");

        ExecutionResult {
            indicator_id: indicator.id,
            success: true,
            current_value: Some(current),
            historical_value: historical,
            deviation_percent: deviation,
            error_message: None,
            started_at,
            finished_at: Utc::now(),
            context,
            alert_id: None,
        }
    }

    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, CollectorError>>,
    ) -> Result<T, CollectorError> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(CollectorError::Cancelled),

            result = tokio::time::timeout(self.timeout, call) => {
                result.unwrap_or(Err(CollectorError::Timeout(self.timeout)))
            }
        }
    }
}

/// Reduce collector rows to the indicator's current value.
///
/// Rows for other items are ignored when the indicator names an item.
pub fn reduce_rows(indicator: &Indicator, rows: &[CollectorRow]) -> Option<f64> {
    let values: Vec<f64> = rows
        .iter()
        .filter(|row| match &indicator.item_name {
            Some(item) => row.item.as_deref() == Some(item.as_str()),
            None => true,
        })
        .map(|row| row.value)
        .collect();

    indicator.aggregation.reduce(&values)
}
