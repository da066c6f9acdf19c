#![forbid(unsafe_code)]

// Common types and error handling for metrics export

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number of metric points submitted in one backend call.
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("telemetry backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry backend returned HTTP {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("telemetry backend error: {0}")]
    Backend(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for export operations
pub type ExportResult<T> = Result<T, ExportError>;

/// The unit of export. Every source is normalized into a sequence of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub key: String,
    pub value: f64,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub step: i64,
}

impl MetricPoint {
    pub fn new(key: impl Into<String>, value: f64, timestamp_ms: i64, step: i64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp_ms,
            step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Terminal state of an exported run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Finished,
    Failed,
}

/// Outcome of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub run_id: String,
    pub run_name: String,
    pub points: usize,
    pub chunks_sent: usize,
    pub chunks_failed: usize,
}

impl ExportReport {
    pub fn status(&self) -> RunStatus {
        if self.chunks_failed == 0 {
            RunStatus::Finished
        } else {
            RunStatus::Failed
        }
    }
}
