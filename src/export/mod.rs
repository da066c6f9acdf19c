#![forbid(unsafe_code)]

// Metrics export - merges every result source into one ordered point sequence
// and submits it to the telemetry backend in bounded chunks.

pub mod mlflow;
pub mod sources;
pub mod types;

pub use mlflow::{MlflowClient, TelemetryBackend};
pub use sources::{HpaSample, HpaStatus, ResultSources, Scalars};
pub use types::{
    ExportError, ExportReport, ExportResult, MetricPoint, Param, RunStatus, Tag, MAX_BATCH_SIZE,
};

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub experiment: String,
    pub run_name_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            experiment: "llamastack-benchmarks".to_string(),
            run_name_prefix: "tekton".to_string(),
        }
    }
}

/// Run parameters from `key=value` strings. `test_type` is always present and
/// later duplicates override earlier ones; entries without `=` are ignored.
pub fn parse_params<S: AsRef<str>>(raw: &[S]) -> Vec<Param> {
    let mut params = vec![Param {
        key: "test_type".to_string(),
        value: "locust_load_test".to_string(),
    }];
    for entry in raw {
        let Some((key, value)) = entry.as_ref().split_once('=') else {
            warn!("Ignoring parameter without '=': {}", entry.as_ref());
            continue;
        };
        match params.iter_mut().find(|p| p.key == key) {
            Some(existing) => existing.value = value.to_string(),
            None => params.push(Param {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
    params
}

pub fn default_tags() -> Vec<Tag> {
    vec![Tag::new("pipeline", "tekton"), Tag::new("run_source", "tekton-pipeline")]
}

/// `{prefix}-{model_short}-{users}u-{YYYYmmdd-HHMMSS}`
pub fn run_name(prefix: &str, params: &[Param], now: DateTime<Local>) -> String {
    let lookup = |key: &str| params.iter().find(|p| p.key == key).map(|p| p.value.as_str());
    let model = lookup("model").unwrap_or("unknown");
    let model_short = model.rsplit('/').next().unwrap_or(model);
    let users = lookup("users").unwrap_or("?");
    format!("{}-{}-{}u-{}", prefix, model_short, users, now.format("%Y%m%d-%H%M%S"))
}

/// Flattens all sources into the export sequence. Scalars land at step 0;
/// per-second and per-trace samples keep their own step. Every point carries
/// the same `now_ms`.
pub fn build_points(sources: &ResultSources, now_ms: i64) -> Vec<MetricPoint> {
    let mut points = Vec::new();

    for scalars in [&sources.locust, &sources.summary, &sources.mcp] {
        points.extend(
            scalars
                .iter()
                .map(|(key, value)| MetricPoint::new(key.as_str(), *value, now_ms, 0)),
        );
    }
    points.extend(
        sources
            .traces
            .aggregate_metrics
            .iter()
            .map(|(key, value)| MetricPoint::new(key.as_str(), *value, now_ms, 0)),
    );

    for sample in &sources.timeseries {
        let step = sample.step as i64;
        let mut push = |key: &str, value: f64| points.push(MetricPoint::new(key, value, now_ms, step));
        push("active_users", sample.active_concurrency as f64);
        push("target_users", sample.target_concurrency as f64);
        push("rps_10s_window", sample.requests_per_sec);
        push("failures_per_sec_10s_window", sample.failures_per_sec);
        push("avg_response_time_cumulative_ms", sample.avg_latency_ms);
        push("total_requests_cumulative", sample.total_requests as f64);
        push("total_failures_cumulative", sample.total_failures as f64);
        push("fail_ratio_cumulative_pct", sample.fail_ratio * 100.0);
    }

    for sample in &sources.hpa {
        let step = sample.sample;
        let mut push = |key: &str, value: f64| points.push(MetricPoint::new(key, value, now_ms, step));
        push("cluster/pod_count", sample.pod_count);
        push("memory/avg_ki", sample.avg_memory_ki);
        push("cpu/avg_nanocores", sample.avg_cpu_n);
        if let Some(hpa) = sample.hpa.as_ref().filter(|h| !h.is_empty()) {
            push("hpa/current_replicas", hpa.current_replicas.unwrap_or_default());
            push("hpa/desired_replicas", hpa.desired_replicas.unwrap_or_default());
            push("cpu/hpa_percent", hpa.current_cpu_pct.unwrap_or_default());
            push("memory/hpa_percent", hpa.current_memory_pct.unwrap_or_default());
        }
    }

    for request in &sources.traces.per_request_metrics {
        if request.request_duration_ms > 0.0 {
            points.push(MetricPoint::new(
                "trace/request_duration_ms",
                request.request_duration_ms,
                now_ms,
                request.step,
            ));
        }
        if request.tool_calls > 0 {
            points.push(MetricPoint::new(
                "trace/tool_calls_per_request",
                request.tool_calls as f64,
                now_ms,
                request.step,
            ));
        }
    }

    points
}

pub struct MetricsExporter {
    backend: Arc<dyn TelemetryBackend>,
    config: ExportConfig,
}

impl MetricsExporter {
    pub fn new(backend: Arc<dyn TelemetryBackend>, config: ExportConfig) -> Self {
        Self { backend, config }
    }

    /// Reads `results_dir` and exports everything found there.
    pub async fn run(&self, results_dir: &Path, params: Vec<Param>) -> ExportResult<ExportReport> {
        info!("Results dir: {}", results_dir.display());
        let sources = ResultSources::load(results_dir);
        self.export(&sources, params, Local::now()).await
    }

    /// Creates a run, submits params and tags in one batch, then the points in
    /// chunks of at most [`MAX_BATCH_SIZE`]. A failed chunk is logged and the
    /// remaining chunks are still sent; the run is then closed as `FAILED`.
    pub async fn export(
        &self,
        sources: &ResultSources,
        params: Vec<Param>,
        now: DateTime<Local>,
    ) -> ExportResult<ExportReport> {
        let tags = default_tags();
        let points = build_points(sources, now.timestamp_millis());
        info!(
            params = params.len(),
            tags = tags.len(),
            metrics = points.len(),
            "Batch summary"
        );

        let run_name = run_name(&self.config.run_name_prefix, &params, now);
        let run_id = self.backend.start_run(&self.config.experiment, &run_name).await?;
        info!("MLflow run: {} (id: {})", run_name, run_id);

        let mut report = ExportReport {
            run_id,
            run_name,
            points: points.len(),
            chunks_sent: 0,
            chunks_failed: 0,
        };

        if !params.is_empty() || !tags.is_empty() {
            let params = &params[..params.len().min(MAX_BATCH_SIZE)];
            let tags = &tags[..tags.len().min(MAX_BATCH_SIZE)];
            match self.backend.log_batch(&report.run_id, &[], params, tags).await {
                Ok(()) => info!("Logged {} params and {} tags", params.len(), tags.len()),
                Err(e) => warn!("Failed to log params and tags: {}", e),
            }
        }

        for (index, chunk) in points.chunks(MAX_BATCH_SIZE).enumerate() {
            match self.backend.log_batch(&report.run_id, chunk, &[], &[]).await {
                Ok(()) => {
                    report.chunks_sent += 1;
                    info!("Logged metrics chunk {}: {} metrics", index + 1, chunk.len());
                }
                Err(e) => {
                    report.chunks_failed += 1;
                    error!("Failed to log metrics chunk {}: {}", index + 1, e);
                }
            }
        }
        if !points.is_empty() {
            info!(
                "Total: {} metrics in {} batch(es)",
                points.len(),
                report.chunks_sent + report.chunks_failed
            );
        }

        if let Err(e) = self.backend.finish_run(&report.run_id, report.status()).await {
            warn!("Failed to close run {}: {}", report.run_id, e);
        }
        Ok(report)
    }
}
