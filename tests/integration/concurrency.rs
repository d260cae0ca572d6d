//! Concurrency tests
//!
//! These tests verify that:
//! - an indicator is never executed twice at the same time
//! - different indicators run in parallel, never more than `workers` at a time
//! - a running execution can be cancelled

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::future::join_all;
use indicator_monitoring::collector::{
    BaselineSource, CollectorError, CollectorGateway, CollectorRow,
};
use indicator_monitoring::model::ExecutionContext;
use indicator_monitoring::schedule::Schedule;
use indicator_monitoring::storage::MemoryStore;
use indicator_monitoring::tracker::DueSetTracker;
use indicator_monitoring::{IndicatorMonitor, MonitorError, Repositories};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn mount_slow_collector(mock_server: &MockServer, collector_id: &str, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("/collectors/{collector_id}/query")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(create_mock_rows_json(&[10.0]))
                .set_delay(delay),
        )
        .mount(mock_server)
        .await;
    mount_baseline(mock_server, collector_id, Some(10.0)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_try_mark_running_has_single_winner() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Arc::new(DueSetTracker::new(
        store.clone(),
        store,
        Duration::from_secs(60),
    ));

    let attempts = (0..32).map(|_| {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.try_mark_running(7, ExecutionContext::Scheduled) })
    });

    let winners = join_all(attempts)
        .await
        .into_iter()
        .filter(|won| *won.as_ref().unwrap())
        .count();

    assert_eq!(winners, 1);
    assert!(tracker.is_running(7));

    tracker.mark_completed(7);
    assert!(!tracker.is_running(7));
    assert!(tracker.try_mark_running(7, ExecutionContext::Manual));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_manual_runs_are_rejected() {
    let mock_server = MockServer::start().await;
    mount_slow_collector(&mock_server, "orders", Duration::from_millis(300)).await;

    let (monitor, _store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );

    let runs = (0..8).map(|_| {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            monitor
                .execute_indicator(1, ExecutionContext::Manual, true)
                .await
        })
    });

    let results: Vec<_> = join_all(runs)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);

    for rejected in results.iter().filter(|r| r.is_err()) {
        assert_matches!(rejected, Err(MonitorError::AlreadyRunning(1)));
    }

    assert_eq!(monitor.recent_executions(1, 10).await.unwrap().len(), 1);
    assert!(!monitor.get_execution_status(1).await.unwrap().is_running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_runs_indicators_in_parallel() {
    let mock_server = MockServer::start().await;
    let delay = Duration::from_millis(400);

    let indicators: Vec<_> = (1..=4)
        .map(|id| create_test_indicator(id, &format!("c{id}")))
        .collect();
    for indicator in &indicators {
        mount_slow_collector(&mock_server, &indicator.collector_id, delay).await;
    }

    let (monitor, _store) = create_test_monitor(&mock_server, indicators, test_settings());

    let started = std::time::Instant::now();
    let results = monitor
        .execute_due_indicators(ExecutionContext::Scheduled)
        .await;

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.success));
    // four workers: one round of delays, not four
    assert!(started.elapsed() < delay * 3, "took {:?}", started.elapsed());

    // everything just ran, so nothing is due
    let again = monitor
        .execute_due_indicators(ExecutionContext::Scheduled)
        .await;
    assert!(again.is_empty());
}

/// Collector that records how many queries are in flight at once
#[derive(Default)]
struct CountingCollector {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl CollectorGateway for CountingCollector {
    async fn run_query(&self, _: &str, _: u32) -> Result<Vec<CollectorRow>, CollectorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(100)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![CollectorRow::new(None, 1.0)])
    }
}

#[async_trait]
impl BaselineSource for CountingCollector {
    async fn get_baseline(
        &self,
        _: &str,
        _: Option<&str>,
        _: u32,
    ) -> Result<Option<f64>, CollectorError> {
        Ok(Some(1.0))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_respects_worker_limit() {
    let indicators: Vec<_> = (1..=6)
        .map(|id| create_test_indicator(id, &format!("c{id}")))
        .collect();
    let store = Arc::new(MemoryStore::with_definitions(
        indicators,
        vec![Schedule::interval(SCHEDULE_ID, 5)],
    ));
    let collector = Arc::new(CountingCollector::default());

    let mut settings = test_settings();
    settings.workers = 2;

    let monitor = IndicatorMonitor::new(
        Repositories::in_memory(store),
        collector.clone(),
        collector.clone(),
        test_router(),
        settings,
    );

    let results = monitor
        .execute_due_indicators(ExecutionContext::Scheduled)
        .await;

    assert_eq!(results.len(), 6);
    assert_eq!(collector.calls.load(Ordering::SeqCst), 6);
    assert_eq!(collector.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_running_execution() {
    let mock_server = MockServer::start().await;
    mount_slow_collector(&mock_server, "orders", Duration::from_secs(1)).await;

    let (monitor, _store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );

    let running = {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            monitor
                .execute_indicator(1, ExecutionContext::Manual, true)
                .await
        })
    };

    let mut cancelled = false;
    for _ in 0..50 {
        if monitor.cancel_execution(1) {
            cancelled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cancelled);

    let result = running.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("execution cancelled"));

    assert!(!monitor.cancel_execution(1));
}
