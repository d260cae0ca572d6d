//! HTTP collector gateway
//!
//! Talks to a collector service exposing two JSON endpoints:
//!
//! ```text
//! GET {base}/collectors/{id}/query?lookback_minutes=N      → {"rows": [{"item": "..", "value": 1.0}]}
//! GET {base}/collectors/{id}/baseline?item=..&offset_days=N → {"value": 1.0 | null}
//! ```
//!
//! The optional token is sent as `X-COLLECTOR-SECRET`. The HTTP client is built
//! once and reused across requests. Timeouts are enforced by the execution
//! engine, the client only carries a generous safety net.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{instrument, trace};

use super::{BaselineSource, CollectorError, CollectorGateway, CollectorRow};

const SECRET_HEADER: &str = "X-COLLECTOR-SECRET";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct QueryResponse {
    rows: Vec<CollectorRow>,
}

#[derive(Debug, Deserialize)]
struct BaselineResponse {
    value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HttpCollectorGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCollectorGateway {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Self {
            client: reqwest::Client::builder()
                .timeout(CLIENT_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            token,
        }
    }

    /// `{base}/collectors/{id}/{action}` with the id encoded as a single path segment
    fn collector_url(&self, collector_id: &str, action: &str) -> Result<Url, CollectorError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| CollectorError::Connection(format!("invalid collector url: {e}")))?;

        url.path_segments_mut()
            .map_err(|_| {
                CollectorError::Connection(format!("invalid collector url: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(["collectors", collector_id, action]);

        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, CollectorError> {
        trace!("requesting {url}");

        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.header(SECRET_HEADER, token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CollectorError::Timeout(CLIENT_TIMEOUT)
            } else {
                CollectorError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollectorError::Query {
                status: Some(status.as_u16()),
                message,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::Connection(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| CollectorError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CollectorGateway for HttpCollectorGateway {
    #[instrument(skip(self))]
    async fn run_query(
        &self,
        collector_id: &str,
        lookback_minutes: u32,
    ) -> Result<Vec<CollectorRow>, CollectorError> {
        let url = self.collector_url(collector_id, "query")?;
        let response: QueryResponse = self
            .get_json(url, &[("lookback_minutes", lookback_minutes.to_string())])
            .await?;

        trace!("collector returned {} rows", response.rows.len());
        Ok(response.rows)
    }
}

#[async_trait]
impl BaselineSource for HttpCollectorGateway {
    #[instrument(skip(self))]
    async fn get_baseline(
        &self,
        collector_id: &str,
        item_name: Option<&str>,
        period_offset_days: u32,
    ) -> Result<Option<f64>, CollectorError> {
        let url = self.collector_url(collector_id, "baseline")?;

        let mut query = vec![("offset_days", period_offset_days.to_string())];
        if let Some(item) = item_name {
            query.push(("item", item.to_string()));
        }

        let response: BaselineResponse = self.get_json(url, &query).await?;
        Ok(response.value)
    }
}
