#![forbid(unsafe_code)]

// Result-directory files shared between the runner, the trace correlator and
// the exporter. Missing optional files read as `None`, never as errors.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

pub const TIMESERIES_FILE: &str = "timeseries_metrics.json";
pub const SUMMARY_FILE: &str = "summary_metrics.json";
pub const TRACE_METRICS_FILE: &str = "trace_metrics.json";
pub const TRACES_RAW_FILE: &str = "traces_raw.json";
pub const HPA_FILE: &str = "hpa-metrics.jsonl";
pub const LOCUST_STATS_FILE: &str = "locust-results_stats.csv";
pub const MCP_METRICS_FILE: &str = "mcp_metrics.csv";
pub const START_EPOCH_FILE: &str = "test_start_epoch";
pub const END_EPOCH_FILE: &str = "test_end_epoch";

/// Test window in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestWindow {
    pub start: i64,
    pub end: i64,
}

impl TestWindow {
    pub fn duration_secs(&self) -> i64 {
        self.end - self.start
    }

    /// Reads the start/end epoch files; `None` if either is missing or unreadable.
    pub fn read_from(dir: &Path) -> Option<Self> {
        let start = read_epoch(&dir.join(START_EPOCH_FILE))?;
        let end = read_epoch(&dir.join(END_EPOCH_FILE))?;
        Some(Self { start, end })
    }

    pub fn write_to(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::write(dir.join(START_EPOCH_FILE), self.start.to_string())?;
        std::fs::write(dir.join(END_EPOCH_FILE), self.end.to_string())
    }
}

pub fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

pub fn epoch_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn read_epoch(path: &Path) -> Option<i64> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("Test timestamp file {} unavailable: {}", path.display(), e);
            return None;
        }
    };
    match text.trim().parse() {
        Ok(epoch) => Some(epoch),
        Err(e) => {
            warn!("Test timestamp file {} is not an integer: {}", path.display(), e);
            None
        }
    }
}

/// Serializes `value` as pretty JSON into `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Reads an optional JSON file. Absent files are `None`; unparseable ones are
/// logged and also `None`.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("{} not found", path.display());
            return None;
        }
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}
