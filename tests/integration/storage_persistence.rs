//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Alerts survive reopening the database
//! - Resolution happens at most once
//! - Notification outcomes are appended, not replaced
//! - Execution history is returned newest first and cleaned up by age
//! - The monitor works end to end on top of SQLite
//! - Missing directories are created, unusable paths are reported as I/O errors

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use indicator_monitoring::collector::http::HttpCollectorGateway;
use indicator_monitoring::model::{
    AlertCandidate, ChannelKind, ExecutionContext, ExecutionResult, NotificationOutcome, Severity,
};
use indicator_monitoring::schedule::Schedule;
use indicator_monitoring::storage::sqlite::SqliteStore;
use indicator_monitoring::storage::{AlertRepository, ExecutionLog, MemoryStore, StorageError};
use indicator_monitoring::{IndicatorMonitor, Repositories};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use wiremock::MockServer;

use crate::helpers::*;

fn candidate(indicator_id: i64, minutes_ago: i64) -> AlertCandidate {
    AlertCandidate {
        indicator_id,
        triggered_at: Utc::now() - Duration::minutes(minutes_ago),
        message: format!("Indicator {indicator_id}: current value 130.00 deviates +30.0%"),
        severity: Severity::High,
        current_value: 130.0,
        historical_value: Some(100.0),
        deviation_percent: Some(30.0),
    }
}

fn outcome(channel: ChannelKind, success: bool) -> NotificationOutcome {
    NotificationOutcome {
        channel,
        success,
        recipient: "ops".to_string(),
        error: (!success).then(|| "rejected".to_string()),
        sent_at: Utc::now(),
    }
}

fn execution(indicator_id: i64, minutes_ago: i64, value: f64) -> ExecutionResult {
    let started_at = Utc::now() - Duration::minutes(minutes_ago);
    ExecutionResult {
        indicator_id,
        success: true,
        current_value: Some(value),
        historical_value: None,
        deviation_percent: None,
        error_message: None,
        started_at,
        finished_at: started_at + Duration::seconds(1),
        context: ExecutionContext::Scheduled,
        alert_id: None,
    }
}

#[tokio::test]
async fn test_alerts_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("alerts.db");

    let store = SqliteStore::new(&db_path).await.unwrap();
    let first = store.insert_alert(candidate(1, 30)).await.unwrap();
    let second = store.insert_alert(candidate(1, 5)).await.unwrap();
    store.insert_alert(candidate(2, 10)).await.unwrap();
    assert!(second.id > first.id);
    store.close().await;

    let store = SqliteStore::new(&db_path).await.unwrap();

    let alert = store.get_alert(first.id).await.unwrap().unwrap();
    assert_eq!(alert.indicator_id, 1);
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.historical_value, Some(100.0));
    assert!(!alert.resolved);
    assert!(alert.notifications.is_empty());

    let last = store.last_alert_time(1).await.unwrap().unwrap();
    assert_eq!(
        last.timestamp_millis(),
        second.triggered_at.timestamp_millis()
    );
    assert_eq!(store.last_alert_time(3).await.unwrap(), None);

    let unresolved = store.unresolved_alerts(Some(1)).await.unwrap();
    assert_eq!(
        unresolved.iter().map(|a| a.id).collect::<Vec<_>>(),
        vec![first.id, second.id]
    );
    assert_eq!(store.unresolved_alerts(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_resolve_is_monotonic() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("alerts.db"))
        .await
        .unwrap();

    let alert = store.insert_alert(candidate(1, 0)).await.unwrap();

    assert!(
        store
            .resolve_alert(alert.id, "alice", Some("expected"), Utc::now())
            .await
            .unwrap()
    );
    assert!(
        !store
            .resolve_alert(alert.id, "bob", None, Utc::now())
            .await
            .unwrap()
    );
    assert!(
        !store
            .resolve_alert(alert.id + 100, "bob", None, Utc::now())
            .await
            .unwrap()
    );

    let resolved = store.get_alert(alert.id).await.unwrap().unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
    assert_eq!(resolved.notes.as_deref(), Some("expected"));
    assert!(resolved.resolved_at.is_some());
    assert!(store.unresolved_alerts(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_notifications_are_appended() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("alerts.db"))
        .await
        .unwrap();

    let alert = store.insert_alert(candidate(1, 0)).await.unwrap();

    store
        .append_notifications(
            alert.id,
            &[
                outcome(ChannelKind::Email, true),
                outcome(ChannelKind::Sms, false),
            ],
        )
        .await
        .unwrap();
    store
        .append_notifications(alert.id, &[outcome(ChannelKind::Webhook, true)])
        .await
        .unwrap();

    let stored = store.get_alert(alert.id).await.unwrap().unwrap();
    let channels: Vec<_> = stored.notifications.iter().map(|n| n.channel).collect();
    assert_eq!(
        channels,
        vec![ChannelKind::Email, ChannelKind::Sms, ChannelKind::Webhook]
    );
    assert_eq!(stored.notifications[1].error.as_deref(), Some("rejected"));
}

#[tokio::test]
async fn test_execution_history_and_cleanup() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("alerts.db"))
        .await
        .unwrap();

    store.record_execution(&execution(1, 60 * 24 * 40, 1.0)).await.unwrap();
    store.record_execution(&execution(1, 30, 2.0)).await.unwrap();
    store.record_execution(&execution(1, 10, 3.0)).await.unwrap();
    store.record_execution(&execution(2, 5, 4.0)).await.unwrap();

    let recent = store.recent_executions(1, 2).await.unwrap();
    assert_eq!(
        recent.iter().map(|r| r.current_value).collect::<Vec<_>>(),
        vec![Some(3.0), Some(2.0)]
    );
    assert_eq!(recent[0].context, ExecutionContext::Scheduled);

    let deleted = store
        .cleanup_executions(Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(store.recent_executions(1, 10).await.unwrap().len(), 2);
    assert_eq!(store.recent_executions(2, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_monitor_on_sqlite() {
    let mock_server = MockServer::start().await;
    mount_collector(&mock_server, "orders", 160.0, Some(100.0)).await;

    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitor.db");
    let sqlite = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let definitions = Arc::new(MemoryStore::with_definitions(
        vec![create_test_indicator(1, "orders")],
        vec![Schedule::interval(SCHEDULE_ID, 5)],
    ));
    let gateway = Arc::new(HttpCollectorGateway::new(mock_server.uri(), None));

    let repos = Repositories {
        indicators: definitions.clone(),
        schedules: definitions,
        alerts: sqlite.clone(),
        executions: sqlite.clone(),
    };
    let monitor = IndicatorMonitor::new(repos, gateway.clone(), gateway, test_router(), test_settings());

    let result = monitor
        .execute_indicator(1, ExecutionContext::Scheduled, true)
        .await
        .unwrap();
    let alert_id = result.alert_id.unwrap();

    let alert = sqlite.get_alert(alert_id).await.unwrap().unwrap();
    assert_eq!(alert.severity, Severity::Critical);

    let history = sqlite.recent_executions(1, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].alert_id, Some(alert_id));
}

#[tokio::test]
async fn test_open_creates_missing_directories() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("state").join("alerts.db");

    let store = SqliteStore::new(&db_path).await.unwrap();
    let alert = store.insert_alert(candidate(1, 0)).await.unwrap();

    assert!(db_path.exists());
    assert!(store.get_alert(alert.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_open_under_regular_file_is_io_error() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let error = match SqliteStore::new(blocker.join("alerts.db")).await {
        Ok(_) => panic!("opening below a regular file should fail"),
        Err(e) => e,
    };

    assert_matches!(error, StorageError::IoError(_));
}
