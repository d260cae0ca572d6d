//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use indicator_monitoring::collector::http::HttpCollectorGateway;
use indicator_monitoring::model::{ChannelTarget, Indicator, IndicatorId};
use indicator_monitoring::notify::NotificationRouter;
use indicator_monitoring::notify::discord::DiscordSender;
use indicator_monitoring::notify::webhook::WebhookSender;
use indicator_monitoring::schedule::Schedule;
use indicator_monitoring::storage::MemoryStore;
use indicator_monitoring::{IndicatorMonitor, MonitorSettings, Repositories};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SCHEDULE_ID: i64 = 1;

pub fn create_test_indicator(id: IndicatorId, collector_id: &str) -> Indicator {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": format!("Indicator {id}"),
        "owner": "test-team",
        "collector_id": collector_id,
        "deviation_threshold": 20.0,
        "minimum_threshold": 5.0,
        "cooldown_minutes": 60,
        "schedule_id": SCHEDULE_ID
    }))
    .unwrap()
}

pub fn with_channels(mut indicator: Indicator, channels: Vec<ChannelTarget>) -> Indicator {
    indicator.channels = channels;
    indicator
}

pub fn create_mock_rows_json(values: &[f64]) -> serde_json::Value {
    let rows: Vec<_> = values
        .iter()
        .map(|value| serde_json::json!({ "item": "total", "value": value }))
        .collect();
    serde_json::json!({ "rows": rows })
}

/// Mount query and baseline endpoints for `collector_id` answering with fixed values
pub async fn mount_collector(
    mock_server: &MockServer,
    collector_id: &str,
    current: f64,
    baseline: Option<f64>,
) {
    Mock::given(method("GET"))
        .and(path(format!("/collectors/{collector_id}/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_mock_rows_json(&[current])))
        .mount(mock_server)
        .await;

    mount_baseline(mock_server, collector_id, baseline).await;
}

pub async fn mount_baseline(mock_server: &MockServer, collector_id: &str, baseline: Option<f64>) {
    Mock::given(method("GET"))
        .and(path(format!("/collectors/{collector_id}/baseline")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": baseline })),
        )
        .mount(mock_server)
        .await;
}

/// Absolute URL of `route` on the mock server
pub fn endpoint(mock_server: &MockServer, route: &str) -> String {
    url::Url::parse(&mock_server.uri())
        .and_then(|base| base.join(route))
        .unwrap()
        .to_string()
}

pub fn test_settings() -> MonitorSettings {
    MonitorSettings {
        tick: Duration::from_secs(3600),
        workers: 4,
        collector_timeout: Duration::from_secs(2),
        stuck_after: Duration::from_secs(60),
    }
}

pub fn test_router() -> NotificationRouter {
    NotificationRouter::new(Duration::from_secs(2))
        .with_sender(Arc::new(DiscordSender::new()))
        .with_sender(Arc::new(WebhookSender::new()))
}

/// Monitor talking to `mock_server` as its collector, backed by an in-memory store
pub fn create_test_monitor(
    mock_server: &MockServer,
    indicators: Vec<Indicator>,
    settings: MonitorSettings,
) -> (Arc<IndicatorMonitor>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_definitions(
        indicators,
        vec![Schedule::interval(SCHEDULE_ID, 5)],
    ));
    let gateway = Arc::new(HttpCollectorGateway::new(mock_server.uri(), None));

    let monitor = IndicatorMonitor::new(
        Repositories::in_memory(store.clone()),
        gateway.clone(),
        gateway,
        test_router(),
        settings,
    );

    (Arc::new(monitor), store)
}
