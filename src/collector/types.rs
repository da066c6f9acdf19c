#![forbid(unsafe_code)]

// Common types and error handling for live sampling

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::round_to;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("live counters are not ready yet")]
    NotReady,

    #[error("sampling task failed: {0}")]
    TaskFailed(String),
}

/// Result type alias for collector operations
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Point-in-time read of the load generator's live counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterSnapshot {
    pub active_users: u64,
    pub target_users: u64,
    pub requests_per_sec: f64,
    pub failures_per_sec: f64,
    pub avg_latency_ms: f64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub fail_ratio: f64,
}

/// Anything the sampler can poll for a counter snapshot.
///
/// Implementations are read concurrently with the load generator's writes and
/// must tolerate partially updated state rather than panic.
pub trait LiveStats: Send + Sync {
    fn snapshot(&self) -> CollectorResult<CounterSnapshot>;
}

/// One per-second sample. `step` counts sampler invocations, not wall-clock seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sample {
    #[serde(rename = "second")]
    pub step: u64,
    #[serde(rename = "active_users")]
    pub active_concurrency: u64,
    #[serde(rename = "target_users")]
    pub target_concurrency: u64,
    pub requests_per_sec: f64,
    pub failures_per_sec: f64,
    #[serde(rename = "avg_response_time_ms")]
    pub avg_latency_ms: f64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub fail_ratio: f64,
}

impl Sample {
    pub fn from_snapshot(step: u64, snapshot: &CounterSnapshot) -> Self {
        Self {
            step,
            active_concurrency: snapshot.active_users,
            target_concurrency: snapshot.target_users,
            requests_per_sec: round_to(non_negative(snapshot.requests_per_sec), 2),
            failures_per_sec: round_to(non_negative(snapshot.failures_per_sec), 2),
            avg_latency_ms: round_to(non_negative(snapshot.avg_latency_ms), 2),
            total_requests: snapshot.total_requests,
            total_failures: snapshot.total_failures,
            fail_ratio: round_to(clamp_ratio(snapshot.fail_ratio), 4),
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

pub(crate) fn clamp_ratio(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
