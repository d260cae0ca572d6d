//! End-to-end tests of the execution pipeline
//!
//! Collector → engine → alert decision → alert store → notification router,
//! with the collector and the notification endpoints mocked over HTTP.

use indicator_monitoring::actors::messages::MonitorEvent;
use indicator_monitoring::actors::scheduler::SchedulerHandle;
use indicator_monitoring::model::{ChannelKind, ChannelTarget, ExecutionContext, Severity};
use indicator_monitoring::storage::{AlertRepository, IndicatorRepository};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_alert_then_cooldown() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collectors/orders/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_mock_rows_json(&[130.0])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collectors/orders/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_mock_rows_json(&[135.0])))
        .mount(&mock_server)
        .await;
    mount_baseline(&mock_server, "orders", Some(100.0)).await;

    let (monitor, store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );

    let first = monitor
        .execute_indicator(1, ExecutionContext::Scheduled, true)
        .await
        .unwrap();

    assert!(first.success);
    assert_eq!(first.current_value, Some(130.0));
    let deviation = first.deviation_percent.unwrap();
    assert!((deviation - 30.0).abs() < 1e-9, "deviation was {deviation}");
    let alert_id = first.alert_id.expect("first execution should raise an alert");

    let alert = store.get_alert(alert_id).await.unwrap().unwrap();
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.current_value, 130.0);
    assert_eq!(alert.historical_value, Some(100.0));

    let second = monitor
        .execute_indicator(1, ExecutionContext::Manual, true)
        .await
        .unwrap();

    assert!(second.success);
    assert_eq!(second.current_value, Some(135.0));
    assert_eq!(second.alert_id, None, "cooldown should suppress the second alert");
    assert_eq!(store.alert_count().await, 1);

    let history = monitor.recent_executions(1, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].current_value, Some(135.0));

    let indicator = store.get_indicator(1).await.unwrap().unwrap();
    assert_eq!(indicator.last_value, Some(135.0));
}

#[tokio::test]
async fn test_alert_is_dispatched_to_channels() {
    let mock_server = MockServer::start().await;
    mount_collector(&mock_server, "orders", 200.0, Some(100.0)).await;

    Mock::given(method("POST"))
        .and(path("/discord/hook"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let indicator = with_channels(
        create_test_indicator(1, "orders"),
        vec![
            ChannelTarget::new(ChannelKind::Chat, endpoint(&mock_server, "/discord/hook")),
            ChannelTarget::new(ChannelKind::Webhook, endpoint(&mock_server, "/webhook")),
            ChannelTarget::new(ChannelKind::Email, "ops@example.com"),
        ],
    );

    let (monitor, store) = create_test_monitor(&mock_server, vec![indicator], test_settings());
    let mut events = monitor.subscribe();

    let result = monitor
        .execute_indicator(1, ExecutionContext::Scheduled, true)
        .await
        .unwrap();

    let alert = store
        .get_alert(result.alert_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.notifications.len(), 3);

    // no email transport is registered
    let failed: Vec<_> = alert.notifications.iter().filter(|n| !n.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].channel, ChannelKind::Email);

    match events.recv().await.unwrap() {
        MonitorEvent::AlertRaised {
            notifications: Some(notifications),
            ..
        } => {
            assert_eq!(notifications.total_sent, 2);
            assert_eq!(notifications.total_failed, 1);
            assert!(!notifications.is_success);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_resolve_and_redispatch() {
    let mock_server = MockServer::start().await;
    mount_collector(&mock_server, "orders", 200.0, Some(100.0)).await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200))
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
    let alert = store
        .get_alert(result.alert_id.unwrap())
        .await
        .unwrap()
        .unwrap();

    let webhook = ChannelTarget::new(ChannelKind::Webhook, endpoint(&mock_server, "/webhook"));
    let dispatched = monitor.dispatch_notification(&alert, &[webhook.clone()]).await;
    assert!(dispatched.is_success);

    let test = monitor.test_notification(&webhook).await;
    assert!(test.success);

    assert!(monitor.resolve_alert(alert.id, "alice", Some("known spike")).await.unwrap());
    assert!(!monitor.resolve_alert(alert.id, "bob", None).await.unwrap());

    let resolved = store.get_alert(alert.id).await.unwrap().unwrap();
    assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
    assert_eq!(resolved.notifications.len(), 1);
    assert!(monitor.unresolved_alerts(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduler_sweep_runs_due_indicators() {
    let mock_server = MockServer::start().await;
    mount_collector(&mock_server, "orders", 10.0, Some(10.0)).await;
    mount_collector(&mock_server, "queue", 3.0, None).await;

    let (monitor, _store) = create_test_monitor(
        &mock_server,
        vec![
            create_test_indicator(1, "orders"),
            create_test_indicator(2, "queue"),
        ],
        test_settings(),
    );

    let handle = SchedulerHandle::spawn(monitor.clone(), None);

    // the first tick sweeps right away; wait until both indicators ran
    let mut ran = false;
    for _ in 0..100 {
        let first = handle.status(1).await.unwrap();
        let second = handle.status(2).await.unwrap();
        if first.last_run.is_some() && second.last_run.is_some() {
            ran = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(ran, "both indicators should have run on the first tick");

    // nothing is due anymore
    let results = handle.sweep_now().await.unwrap();
    assert!(results.is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_test_execution_leaves_no_trace() {
    let mock_server = MockServer::start().await;
    mount_collector(&mock_server, "orders", 500.0, Some(100.0)).await;

    let (monitor, store) = create_test_monitor(
        &mock_server,
        vec![create_test_indicator(1, "orders")],
        test_settings(),
    );

    let result = monitor
        .execute_indicator(1, ExecutionContext::Test, true)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.deviation_percent, Some(400.0));
    assert_eq!(store.alert_count().await, 0);
    assert!(monitor.recent_executions(1, 10).await.unwrap().is_empty());
}
