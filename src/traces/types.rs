#![forbid(unsafe_code)]

// Common types and error handling for trace correlation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("trace store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("trace store returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("trace store request timed out after {0}s")]
    Timeout(u64),
}

/// Result type alias for trace operations
pub type TraceResult<T> = Result<T, TraceError>;

/// One entry of a trace search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    #[serde(rename = "traceID", default)]
    pub trace_id: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A span reduced to what the analysis needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub name: String,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl Span {
    /// Duration in milliseconds; zero when either timestamp is missing or the
    /// span ends before it starts.
    pub fn duration_ms(&self) -> f64 {
        if self.start_ns == 0 || self.end_ns == 0 || self.end_ns < self.start_ns {
            return 0.0;
        }
        (self.end_ns - self.start_ns) as f64 / 1_000_000.0
    }
}

/// Recognized span categories below the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Inference,
    ListTools,
    InvokeTool,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Inference, Component::ListTools, Component::InvokeTool];

    /// Substrings that identify spans of this component.
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            Component::Inference => &["openai_chat_completion", "InferenceRouter", "chat_completion"],
            Component::ListTools => &["list_mcp_tools", "list_tools"],
            Component::InvokeTool => &["invoke_mcp_tool", "invoke_tool"],
        }
    }

    pub fn matches(self, span_name: &str) -> bool {
        self.patterns().iter().any(|p| span_name.contains(p))
    }
}

/// Span names that mark the whole request.
pub const REQUEST_SPAN_NAMES: [&str; 2] = ["/v1/responses", "create_response"];

/// Latency breakdown of one traced request.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub trace_id: String,
    /// Position of the trace in the search result
    pub step: u64,
    pub request_duration_ms: f64,
    pub tool_call_count: u64,
    pub component_durations: BTreeMap<Component, Vec<f64>>,
}

impl TraceRecord {
    pub fn durations(&self, component: Component) -> &[f64] {
        self.component_durations
            .get(&component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Per-request line of `trace_metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerRequestMetric {
    #[serde(default)]
    pub step: i64,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub request_duration_ms: f64,
    #[serde(default)]
    pub tool_calls: u64,
}

impl From<&TraceRecord> for PerRequestMetric {
    fn from(record: &TraceRecord) -> Self {
        Self {
            step: record.step as i64,
            trace_id: record.trace_id.clone(),
            request_duration_ms: record.request_duration_ms,
            tool_calls: record.tool_call_count,
        }
    }
}

/// Contents of `trace_metrics.json`. Always structurally valid, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMetrics {
    #[serde(default)]
    pub trace_count: usize,
    #[serde(default)]
    pub aggregate_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub per_request_metrics: Vec<PerRequestMetric>,
}

impl TraceMetrics {
    pub fn is_empty(&self) -> bool {
        self.aggregate_metrics.is_empty() && self.per_request_metrics.is_empty()
    }
}

/// A fetched trace kept verbatim for `traces_raw.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RawTrace {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub summary: TraceSummary,
    pub detail: serde_json::Value,
}
