#![forbid(unsafe_code)]

// Tempo HTTP API client

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::types::{TraceError, TraceResult, TraceSummary};

/// Search parameters for one correlation pass. Times are epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub service_name: String,
    pub start: i64,
    pub end: i64,
    pub limit: usize,
}

/// Read access to a trace backend.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> TraceResult<Vec<TraceSummary>>;

    /// Full span tree of one trace, as returned by the backend.
    async fn fetch(&self, trace_id: &str) -> TraceResult<serde_json::Value>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    traces: Vec<TraceSummary>,
}

pub struct TempoClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl TempoClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(endpoint: &str, timeout: Duration) -> TraceResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> TraceResult<T> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TraceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TraceStore for TempoClient {
    async fn search(&self, query: &SearchQuery) -> TraceResult<Vec<TraceSummary>> {
        let url = format!("{}/api/search", self.endpoint);
        info!("Searching Tempo: {} (service={})", url, query.service_name);

        let params = [
            ("tags", format!("service.name={}", query.service_name)),
            ("start", query.start.to_string()),
            ("end", query.end.to_string()),
            ("limit", query.limit.to_string()),
        ];
        let response: SearchResponse = self.get_json(&url, &params).await?;
        info!("  Found {} traces", response.traces.len());
        Ok(response.traces)
    }

    async fn fetch(&self, trace_id: &str) -> TraceResult<serde_json::Value> {
        let url = format!("{}/api/traces/{}", self.endpoint, trace_id);
        debug!("Fetching trace {}", trace_id);
        self.get_json(&url, &[]).await
    }
}
