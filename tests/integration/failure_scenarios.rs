//! Failure scenario tests
//!
//! These tests verify that:
//! - collector errors end up in the execution result instead of aborting the pipeline
//! - timeouts are enforced per collector call
//! - a missing baseline degrades to a deviation-less result
//! - failing notification channels never prevent alert creation

use std::time::Duration;

use indicator_monitoring::actors::messages::MonitorEvent;
use indicator_monitoring::model::{ChannelKind, ChannelTarget, ExecutionContext};
use indicator_monitoring::monitor::ExecutionState;
use indicator_monitoring::storage::AlertRepository;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_collector_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collectors/orders/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&mock_server)
        .await;

    let (monitor, store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );
    let mut events = monitor.subscribe();

    for expected in 1..=2u32 {
        let result = monitor
            .execute_indicator(1, ExecutionContext::Scheduled, true)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.current_value, None);
        let error = result.error_message.unwrap();
        assert!(error.contains("500"), "unexpected error: {error}");
        assert!(error.contains("database unavailable"));

        match events.recv().await.unwrap() {
            MonitorEvent::ExecutionFailed {
                indicator_id,
                consecutive_failures,
                ..
            } => {
                assert_eq!(indicator_id, 1);
                assert_eq!(consecutive_failures, expected);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // the Executed event of this run
        events.recv().await.unwrap();
    }

    assert_eq!(store.alert_count().await, 0);

    let status = monitor.get_execution_status(1).await.unwrap();
    assert_eq!(status.status, ExecutionState::Failing);
    assert_eq!(status.consecutive_failures, 2);

    // failed executions are part of the history as well
    let history = monitor.recent_executions(1, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|result| !result.success));
}

#[tokio::test]
async fn test_recovery_resets_failure_counter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collectors/orders/query"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_collector(&mock_server, "orders", 100.0, Some(100.0)).await;

    let (monitor, _store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );

    let failed = monitor
        .execute_indicator(1, ExecutionContext::Manual, true)
        .await
        .unwrap();
    assert!(!failed.success);
    assert_eq!(
        monitor.get_execution_status(1).await.unwrap().consecutive_failures,
        1
    );

    let recovered = monitor
        .execute_indicator(1, ExecutionContext::Manual, true)
        .await
        .unwrap();
    assert!(recovered.success);

    let status = monitor.get_execution_status(1).await.unwrap();
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.status, ExecutionState::Idle);
}

#[tokio::test]
async fn test_collector_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collectors/slow/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(create_mock_rows_json(&[1.0]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let mut settings = test_settings();
    settings.collector_timeout = Duration::from_millis(200);

    let (monitor, _store) =
        create_test_monitor(&mock_server, vec![create_test_indicator(1, "slow")], settings);

    let started = std::time::Instant::now();
    let result = monitor
        .execute_indicator(1, ExecutionContext::Manual, true)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!result.success);
    let error = result.error_message.unwrap();
    assert!(error.contains("timed out"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_baseline_failure_keeps_current_value() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collectors/orders/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_mock_rows_json(&[42.0])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collectors/orders/baseline"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let (monitor, store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );

    let result = monitor
        .execute_indicator(1, ExecutionContext::Manual, true)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.current_value, Some(42.0));
    assert_eq!(result.historical_value, None);
    assert_eq!(result.deviation_percent, None);
    // no baseline, no deviation alert
    assert_eq!(store.alert_count().await, 0);
}

#[tokio::test]
async fn test_empty_rows_is_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collectors/orders/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_mock_rows_json(&[])))
        .mount(&mock_server)
        .await;

    let (monitor, _store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );

    let result = monitor
        .execute_indicator(1, ExecutionContext::Manual, true)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("collector returned no rows")
    );
}

#[tokio::test]
async fn test_unreachable_collector() {
    // the server is gone before the first request
    let gateway_server = MockServer::start().await;
    let (monitor, _store) = create_test_monitor(
        &gateway_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );
    drop(gateway_server);

    let result = monitor
        .execute_indicator(1, ExecutionContext::Manual, true)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error_message.is_some());
}

#[tokio::test]
async fn test_failing_channel_does_not_block_alert() {
    let mock_server = MockServer::start().await;
    mount_collector(&mock_server, "orders", 300.0, Some(100.0)).await;

    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let indicator = with_channels(
        create_test_indicator(1, "orders"),
        vec![
            ChannelTarget::new(ChannelKind::Webhook, endpoint(&mock_server, "/broken")),
            ChannelTarget::new(ChannelKind::Webhook, endpoint(&mock_server, "/slow")),
            ChannelTarget::new(ChannelKind::Sms, "+15550100"),
        ],
    );

    let (monitor, store) = create_test_monitor(&mock_server, vec![indicator], test_settings());

    let result = monitor
        .execute_indicator(1, ExecutionContext::Scheduled, true)
        .await
        .unwrap();

    let alert = store
        .get_alert(result.alert_id.expect("alert should be raised"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(alert.notifications.len(), 3);
    assert!(alert.notifications.iter().all(|n| !n.success));
    assert!(alert.notifications.iter().all(|n| n.error.is_some()));
    assert!(!alert.resolved);
}
