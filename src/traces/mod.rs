#![forbid(unsafe_code)]

// Trace correlation - after a run, pull the traces that fall inside the test
// window from the trace store and derive per-request latency breakdowns.

pub mod analysis;
pub mod tempo;
pub mod types;

pub use tempo::{SearchQuery, TempoClient, TraceStore};
pub use types::{
    Component, PerRequestMetric, RawTrace, Span, TraceError, TraceMetrics, TraceRecord,
    TraceResult, TraceSummary,
};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::handoff::{self, TestWindow};

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub service_name: String,
    /// Widens the search window on both sides to absorb clock skew and queueing.
    pub search_window_buffer: Duration,
    pub max_traces: usize,
    /// Wait before querying so the tracing pipeline can flush.
    pub flush_wait: Duration,
    /// Upper bound on each individual trace fetch.
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            service_name: "llamastack".to_string(),
            search_window_buffer: Duration::from_secs(120),
            max_traces: 1000,
            flush_wait: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(30),
            fetch_concurrency: 8,
        }
    }
}

/// Result of one correlation pass.
#[derive(Debug, Clone, Default)]
pub struct TraceReport {
    pub metrics: TraceMetrics,
    pub records: Vec<TraceRecord>,
    pub raw: Vec<RawTrace>,
}

pub struct TraceCorrelator {
    store: Arc<dyn TraceStore>,
    config: CorrelatorConfig,
}

impl TraceCorrelator {
    pub fn new(store: Arc<dyn TraceStore>, config: CorrelatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Runs one pass over `window`. Never fails: a missing window, an
    /// unreachable store or an empty search all yield an empty report.
    pub async fn correlate(&self, window: Option<TestWindow>) -> TraceReport {
        let Some(window) = window else {
            warn!("Cannot determine test window, trace metrics will be empty");
            return TraceReport::default();
        };
        info!(
            "Test window: {} -> {} ({}s)",
            format_epoch(window.start),
            format_epoch(window.end),
            window.duration_secs()
        );

        if !self.config.flush_wait.is_zero() {
            info!("Waiting {}s for trace pipeline flush...", self.config.flush_wait.as_secs());
            tokio::time::sleep(self.config.flush_wait).await;
        }

        let buffer = self.config.search_window_buffer.as_secs() as i64;
        let query = SearchQuery {
            service_name: self.config.service_name.clone(),
            start: window.start - buffer,
            end: window.end + buffer,
            limit: self.config.max_traces,
        };

        let summaries = match self.search(&query).await {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!("Trace search failed: {}", e);
                return TraceReport::default();
            }
        };
        if summaries.is_empty() {
            info!("No traces found");
            return TraceReport::default();
        }

        self.analyze(summaries).await
    }

    async fn search(&self, query: &SearchQuery) -> TraceResult<Vec<TraceSummary>> {
        let timeout = self.config.fetch_timeout;
        tokio::time::timeout(timeout, self.store.search(query))
            .await
            .map_err(|_| TraceError::Timeout(timeout.as_secs()))?
    }

    async fn analyze(&self, summaries: Vec<TraceSummary>) -> TraceReport {
        let total = summaries.len();
        info!("Fetching and analyzing {} traces...", total);

        let timeout = self.config.fetch_timeout;
        let store = &self.store;
        let mut fetched = stream::iter(summaries.into_iter().enumerate())
            .map(move |(step, summary)| async move {
                if summary.trace_id.is_empty() {
                    return (step, summary, None);
                }
                let detail = match tokio::time::timeout(timeout, store.fetch(&summary.trace_id)).await {
                    Ok(Ok(detail)) => Some(detail),
                    Ok(Err(e)) => {
                        warn!("Failed to fetch trace {}: {}", summary.trace_id, e);
                        None
                    }
                    Err(_) => {
                        warn!("Timed out fetching trace {} after {}s", summary.trace_id, timeout.as_secs());
                        None
                    }
                };
                (step, summary, detail)
            })
            .buffered(self.config.fetch_concurrency.max(1));

        let mut report = TraceReport::default();
        while let Some((step, summary, detail)) = fetched.next().await {
            if let Some(detail) = detail {
                let spans = analysis::extract_spans(&detail);
                if let Some(record) = analysis::analyze_spans(&summary.trace_id, step as u64, &spans) {
                    report.records.push(record);
                }
                report.raw.push(RawTrace {
                    trace_id: summary.trace_id.clone(),
                    summary,
                    detail,
                });
            }
            if (step + 1) % 25 == 0 {
                info!("  Processed {}/{} traces...", step + 1, total);
            }
        }

        info!("Analyzed {} traces with span data", report.records.len());

        report.metrics = TraceMetrics {
            trace_count: report.records.len(),
            aggregate_metrics: analysis::aggregate(&report.records),
            per_request_metrics: report.records.iter().map(PerRequestMetric::from).collect(),
        };
        for (name, value) in &report.metrics.aggregate_metrics {
            info!("  {}: {:.1}", name, value);
        }
        report
    }

    /// Reads the window from `results_dir`, correlates, and writes
    /// `trace_metrics.json` (always) and `traces_raw.json` (when anything was fetched).
    pub async fn run(&self, results_dir: &Path) -> anyhow::Result<TraceReport> {
        let window = TestWindow::read_from(results_dir);
        let report = self.correlate(window).await;

        if !report.raw.is_empty() {
            handoff::write_json(&results_dir.join(handoff::TRACES_RAW_FILE), &report.raw)?;
        }
        handoff::write_json(&results_dir.join(handoff::TRACE_METRICS_FILE), &report.metrics)?;
        info!(
            "Wrote {} ({} aggregate, {} per-request)",
            handoff::TRACE_METRICS_FILE,
            report.metrics.aggregate_metrics.len(),
            report.metrics.per_request_metrics.len()
        );
        Ok(report)
    }
}

fn format_epoch(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStore {
        summaries: Vec<&'static str>,
        details: HashMap<&'static str, Value>,
        slow: Vec<&'static str>,
        fail_search: bool,
        stall_search: bool,
        queries: Mutex<Vec<SearchQuery>>,
        searched_at: Mutex<Option<tokio::time::Instant>>,
    }

    #[async_trait]
    impl TraceStore for MockStore {
        async fn search(&self, query: &SearchQuery) -> TraceResult<Vec<TraceSummary>> {
            self.queries.lock().unwrap().push(query.clone());
            *self.searched_at.lock().unwrap() = Some(tokio::time::Instant::now());
            if self.stall_search {
                std::future::pending::<()>().await;
            }
            if self.fail_search {
                return Err(TraceError::Status {
                    status: 503,
                    url: "mock".into(),
                });
            }
            Ok(self
                .summaries
                .iter()
                .map(|id| TraceSummary {
                    trace_id: id.to_string(),
                    metadata: Default::default(),
                })
                .collect())
        }

        async fn fetch(&self, trace_id: &str) -> TraceResult<Value> {
            if self.slow.iter().any(|id| *id == trace_id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.details.get(trace_id).cloned().ok_or(TraceError::Status {
                status: 404,
                url: trace_id.to_string(),
            })
        }
    }

    fn trace(request_ms: u64, tools: usize) -> Value {
        let mut spans = vec![json!({
            "name": "/v1/responses",
            "startTimeUnixNano": "1000000000",
            "endTimeUnixNano": (1_000_000_000 + request_ms * 1_000_000).to_string(),
        })];
        for _ in 0..tools {
            spans.push(json!({
                "name": "invoke_mcp_tool",
                "startTimeUnixNano": "1000000000",
                "endTimeUnixNano": "1005000000",
            }));
        }
        json!({"batches": [{"scopeSpans": [{"spans": spans}]}]})
    }

    fn quick_config() -> CorrelatorConfig {
        CorrelatorConfig {
            flush_wait: Duration::ZERO,
            fetch_timeout: Duration::from_secs(5),
            ..CorrelatorConfig::default()
        }
    }

    const WINDOW: TestWindow = TestWindow {
        start: 1_000,
        end: 1_300,
    };

    #[tokio::test]
    async fn test_missing_window_yields_empty_report() {
        let correlator = TraceCorrelator::new(Arc::new(MockStore::default()), quick_config());
        let report = correlator.correlate(None).await;
        assert!(report.metrics.is_empty());
        assert_eq!(report.metrics.trace_count, 0);
    }

    #[tokio::test]
    async fn test_search_window_is_buffered() {
        let store = Arc::new(MockStore::default());
        let correlator = TraceCorrelator::new(store.clone(), quick_config());
        let report = correlator.correlate(Some(WINDOW)).await;
        assert!(report.metrics.is_empty());

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries[0].start, 880);
        assert_eq!(queries[0].end, 1_420);
        assert_eq!(queries[0].limit, 1000);
        assert_eq!(queries[0].service_name, "llamastack");
    }

    #[tokio::test]
    async fn test_failed_search_yields_empty_report() {
        let store = MockStore {
            fail_search: true,
            ..MockStore::default()
        };
        let correlator = TraceCorrelator::new(Arc::new(store), quick_config());
        assert!(correlator.correlate(Some(WINDOW)).await.metrics.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_waits_for_pipeline_flush() {
        let store = Arc::new(MockStore {
            summaries: vec!["a"],
            details: HashMap::from([("a", trace(50, 1))]),
            ..MockStore::default()
        });
        let config = CorrelatorConfig {
            flush_wait: Duration::from_secs(15),
            ..quick_config()
        };
        let correlator = TraceCorrelator::new(store.clone(), config);

        let started = tokio::time::Instant::now();
        let report = correlator.correlate(Some(WINDOW)).await;
        assert_eq!(report.metrics.trace_count, 1);

        let searched_at = (*store.searched_at.lock().unwrap()).expect("search ran");
        assert!(searched_at.duration_since(started) >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_search_times_out_to_empty_report() {
        let store = Arc::new(MockStore {
            summaries: vec!["a"],
            details: HashMap::from([("a", trace(50, 1))]),
            stall_search: true,
            ..MockStore::default()
        });
        let correlator = TraceCorrelator::new(store.clone(), quick_config());

        let started = tokio::time::Instant::now();
        let report = correlator.correlate(Some(WINDOW)).await;

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(store.queries.lock().unwrap().len(), 1);
        assert!(report.metrics.is_empty());
        assert_eq!(report.metrics.trace_count, 0);
        assert!(report.records.is_empty());
        assert!(report.raw.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_traces_are_dropped_not_fatal() {
        let store = MockStore {
            summaries: vec!["a", "missing", "", "slow", "noise", "b"],
            details: HashMap::from([
                ("a", trace(100, 2)),
                ("b", trace(300, 0)),
                ("slow", trace(999, 9)),
                ("noise", json!({"batches": [{"scopeSpans": [{"spans": [{"name": "db"}]}]}]})),
            ]),
            slow: vec!["slow"],
            ..MockStore::default()
        };
        let correlator = TraceCorrelator::new(Arc::new(store), quick_config());
        let report = correlator.correlate(Some(WINDOW)).await;

        let ids: Vec<&str> = report.records.iter().map(|r| r.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        let steps: Vec<i64> = report.metrics.per_request_metrics.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![0, 5]);
        assert_eq!(report.metrics.trace_count, 2);
        // "noise" was fetched, so it is kept raw even though no span matched
        assert_eq!(report.raw.len(), 3);

        let agg = &report.metrics.aggregate_metrics;
        assert_eq!(agg["trace/avg_total_request_duration_ms"], 200.0);
        assert_eq!(agg["trace/total_tool_calls"], 2.0);
        assert_eq!(report.metrics.per_request_metrics[0].tool_calls, 2);
    }

    #[tokio::test]
    async fn test_run_writes_handoff_files() {
        let dir = tempfile::tempdir().unwrap();
        WINDOW.write_to(dir.path()).unwrap();

        let store = MockStore {
            summaries: vec!["a"],
            details: HashMap::from([("a", trace(50, 1))]),
            ..MockStore::default()
        };
        let correlator = TraceCorrelator::new(Arc::new(store), quick_config());
        correlator.run(dir.path()).await.unwrap();

        let written: TraceMetrics =
            handoff::read_json_opt(&dir.path().join(handoff::TRACE_METRICS_FILE)).unwrap();
        assert_eq!(written.trace_count, 1);
        assert_eq!(written.per_request_metrics[0].trace_id, "a");
        assert!(dir.path().join(handoff::TRACES_RAW_FILE).exists());
    }

    #[tokio::test]
    async fn test_run_without_window_writes_empty_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let correlator = TraceCorrelator::new(Arc::new(MockStore::default()), quick_config());
        correlator.run(dir.path()).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join(handoff::TRACE_METRICS_FILE)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["trace_count"], 0);
        assert_eq!(value["aggregate_metrics"], json!({}));
        assert_eq!(value["per_request_metrics"], json!([]));
        assert!(!dir.path().join(handoff::TRACES_RAW_FILE).exists());
    }
}
