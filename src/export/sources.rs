#![forbid(unsafe_code)]

// Readers for the result-directory files the exporter merges. Each reader
// degrades to an empty contribution when its file is absent or unreadable.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::types::ExportResult;
use crate::collector::Sample;
use crate::handoff;
use crate::stats::AggregateStats;
use crate::traces::TraceMetrics;

/// Named scalars, kept in source order.
pub type Scalars = Vec<(String, f64)>;

/// Columns of the Locust aggregate row and the keys they export as.
const LOCUST_FIELDS: [(&str, &str); 8] = [
    ("Request Count", "locust/total_requests"),
    ("Failure Count", "locust/failure_count"),
    ("Average Response Time", "locust/avg_response_time_ms"),
    ("Min Response Time", "locust/min_response_time_ms"),
    ("Max Response Time", "locust/max_response_time_ms"),
    ("Median Response Time", "locust/median_response_time_ms"),
    ("Requests/s", "locust/requests_per_sec"),
    ("Failures/s", "locust/failures_per_sec"),
];

/// One row of `mcp_metrics.csv`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McpRow {
    pub response_time: f64,
    pub mcp_call_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Replica and utilization snapshot reported by the autoscaler.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HpaStatus {
    #[serde(rename = "currentReplicas")]
    pub current_replicas: Option<f64>,
    #[serde(rename = "desiredReplicas")]
    pub desired_replicas: Option<f64>,
    #[serde(rename = "currentCPUPct")]
    pub current_cpu_pct: Option<f64>,
    #[serde(rename = "currentMemoryPct")]
    pub current_memory_pct: Option<f64>,
    /// Fields the exporter does not read; they still make the status non-empty.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl HpaStatus {
    /// True for `{}`. Any key at all, known or not, yields the four hpa points.
    pub fn is_empty(&self) -> bool {
        self.current_replicas.is_none()
            && self.desired_replicas.is_none()
            && self.current_cpu_pct.is_none()
            && self.current_memory_pct.is_none()
            && self.extra.is_empty()
    }
}

/// One line of `hpa-metrics.jsonl`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HpaSample {
    pub sample: i64,
    pub pod_count: f64,
    pub avg_memory_ki: f64,
    pub avg_cpu_n: f64,
    pub hpa: Option<HpaStatus>,
}

/// Everything the exporter found in one results directory.
#[derive(Debug, Clone, Default)]
pub struct ResultSources {
    pub locust: Scalars,
    pub summary: Scalars,
    pub mcp: Scalars,
    pub traces: TraceMetrics,
    pub timeseries: Vec<Sample>,
    pub hpa: Vec<HpaSample>,
}

impl ResultSources {
    pub fn load(dir: &Path) -> Self {
        Self {
            locust: read_locust_stats(&dir.join(handoff::LOCUST_STATS_FILE)),
            summary: read_summary(&dir.join(handoff::SUMMARY_FILE)),
            mcp: read_mcp_metrics(&dir.join(handoff::MCP_METRICS_FILE)),
            traces: read_trace_metrics(&dir.join(handoff::TRACE_METRICS_FILE)),
            timeseries: read_timeseries(&dir.join(handoff::TIMESERIES_FILE)),
            hpa: read_hpa_metrics(&dir.join(handoff::HPA_FILE)),
        }
    }
}

/// Opens an optional source file, logging and returning `None` when it is unavailable.
fn open_optional(path: &Path, what: &str) -> Option<File> {
    match File::open(path) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("{} not found ({} not captured)", path.display(), what);
            None
        }
        Err(e) => {
            warn!("Failed to open {}: {}", path.display(), e);
            None
        }
    }
}

/// Maps the `Aggregated` row of the Locust stats CSV.
pub fn read_locust_stats(path: &Path) -> Scalars {
    let Some(file) = open_optional(path, "Locust stats") else {
        return Vec::new();
    };
    match parse_locust_stats(file) {
        Ok(metrics) => {
            info!("Parsed {} Locust aggregate metrics", metrics.len());
            metrics
        }
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn parse_locust_stats<R: std::io::Read>(reader: R) -> ExportResult<Scalars> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    for record in reader.records() {
        let Ok(record) = record else {
            continue;
        };
        let is_aggregate = column("Name")
            .and_then(|i| record.get(i))
            .is_some_and(|name| name.trim() == "Aggregated");
        if !is_aggregate {
            continue;
        }
        return Ok(LOCUST_FIELDS
            .iter()
            .filter_map(|(col, key)| {
                let value = column(col).and_then(|i| record.get(i))?;
                let value: f64 = value.trim().parse().ok().filter(|v: &f64| v.is_finite())?;
                Some((key.to_string(), value))
            })
            .collect());
    }
    Ok(Vec::new())
}

/// Numeric entries of `summary_metrics.json`, prefixed `summary/`.
pub fn read_summary(path: &Path) -> Scalars {
    let Some(data) = handoff::read_json_opt::<serde_json::Map<String, Value>>(path) else {
        return Vec::new();
    };
    let metrics: Scalars = data
        .iter()
        .filter_map(|(k, v)| Some((format!("summary/{k}"), v.as_f64()?)))
        .collect();
    info!("Parsed {} summary metrics", metrics.len());
    metrics
}

/// Averages over `mcp_metrics.csv`; rows that fail to parse are skipped.
pub fn read_mcp_metrics(path: &Path) -> Scalars {
    let Some(file) = open_optional(path, "MCP metrics") else {
        return Vec::new();
    };
    let rows: Vec<McpRow> = csv::Reader::from_reader(file)
        .deserialize()
        .filter_map(Result::ok)
        .collect();
    let metrics = mcp_aggregates(&rows);
    if !metrics.is_empty() {
        info!("Parsed {} MCP aggregate metrics from {} requests", metrics.len(), rows.len());
    }
    metrics
}

pub fn mcp_aggregates(rows: &[McpRow]) -> Scalars {
    let column = |f: fn(&McpRow) -> f64| {
        let values: Vec<f64> = rows.iter().map(f).collect();
        AggregateStats::from_values(&values)
    };
    let (Some(response), Some(calls), Some(input), Some(output), Some(total)) = (
        column(|r| r.response_time),
        column(|r| r.mcp_call_count as f64),
        column(|r| r.input_tokens as f64),
        column(|r| r.output_tokens as f64),
        column(|r| r.total_tokens as f64),
    ) else {
        return Vec::new();
    };

    vec![
        ("mcp/avg_response_time_ms".to_string(), response.mean),
        ("mcp/avg_tool_calls_per_request".to_string(), calls.mean),
        ("mcp/total_tool_calls".to_string(), calls.sum),
        ("mcp/avg_input_tokens".to_string(), input.mean),
        ("mcp/avg_output_tokens".to_string(), output.mean),
        ("mcp/avg_total_tokens".to_string(), total.mean),
    ]
}

pub fn read_timeseries(path: &Path) -> Vec<Sample> {
    let samples: Vec<Sample> = handoff::read_json_opt(path).unwrap_or_default();
    info!("Parsed {} time-series samples", samples.len());
    samples
}

/// Parses `hpa-metrics.jsonl`, skipping blank and malformed lines.
pub fn read_hpa_metrics(path: &Path) -> Vec<HpaSample> {
    let Some(file) = open_optional(path, "HPA metrics") else {
        return Vec::new();
    };
    let samples: Vec<HpaSample> = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line.trim()).ok())
        .collect();
    info!("Parsed {} HPA metric samples", samples.len());
    samples
}

pub fn read_trace_metrics(path: &Path) -> TraceMetrics {
    let metrics: TraceMetrics = handoff::read_json_opt(path).unwrap_or_default();
    info!(
        "Parsed trace metrics: {} aggregate, {} per-request",
        metrics.aggregate_metrics.len(),
        metrics.per_request_metrics.len()
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportError;

    const LOCUST_CSV: &str = "\
Type,Name,Request Count,Failure Count,Median Response Time,Average Response Time,Min Response Time,Max Response Time,Average Content Size,Requests/s,Failures/s
POST,/v1/responses,40,2,310,350.5,120,900,812,1.33,0.07
,Aggregated,40,2,310,350.5,120,900,812,1.33,0.07
";

    #[test]
    fn test_locust_aggregate_row() {
        let metrics = parse_locust_stats(LOCUST_CSV.as_bytes()).unwrap();
        assert_eq!(metrics.len(), 8);
        assert_eq!(metrics[0], ("locust/total_requests".to_string(), 40.0));
        assert_eq!(metrics[2], ("locust/avg_response_time_ms".to_string(), 350.5));
        assert_eq!(metrics[5], ("locust/median_response_time_ms".to_string(), 310.0));
        assert_eq!(metrics[7], ("locust/failures_per_sec".to_string(), 0.07));
    }

    #[test]
    fn test_locust_without_aggregate_row() {
        let csv = "Type,Name,Request Count\nPOST,/v1/responses,4\n";
        assert!(parse_locust_stats(csv.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_locust_skips_unparseable_columns() {
        let csv = "Name,Request Count,Failure Count\nAggregated,N/A,3\n";
        let metrics = parse_locust_stats(csv.as_bytes()).unwrap();
        assert_eq!(metrics, vec![("locust/failure_count".to_string(), 3.0)]);
    }

    #[test]
    fn test_locust_drops_non_finite_values() {
        let csv = "Name,Request Count,Failures/s,Requests/s\nAggregated,40,nan,inf\n";
        let metrics = parse_locust_stats(csv.as_bytes()).unwrap();
        assert_eq!(metrics, vec![("locust/total_requests".to_string(), 40.0)]);
    }

    #[test]
    fn test_locust_unreadable_header_is_a_csv_error() {
        let err = parse_locust_stats(&b"Type,\xff\xfe\n,Aggregated\n"[..]).unwrap_err();
        assert!(matches!(err, ExportError::Csv(_)), "{err}");
    }

    #[test]
    fn test_mcp_rows_skip_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(handoff::MCP_METRICS_FILE);
        std::fs::write(
            &path,
            "response_time,mcp_call_count,input_tokens,output_tokens,total_tokens\n\
             100,2,10,20,30\n\
             oops,1,1,1,1\n\
             300,0,30,40,70\n",
        )
        .unwrap();

        let metrics = read_mcp_metrics(&path);
        let get = |k: &str| metrics.iter().find(|(key, _)| key == k).map(|(_, v)| *v);
        assert_eq!(get("mcp/avg_response_time_ms"), Some(200.0));
        assert_eq!(get("mcp/avg_tool_calls_per_request"), Some(1.0));
        assert_eq!(get("mcp/total_tool_calls"), Some(2.0));
        assert_eq!(get("mcp/avg_total_tokens"), Some(50.0));
    }

    #[test]
    fn test_mcp_empty_is_empty() {
        assert!(mcp_aggregates(&[]).is_empty());
    }

    #[test]
    fn test_summary_keeps_numbers_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(handoff::SUMMARY_FILE);
        std::fs::write(&path, r#"{"total_requests": 12, "failure_rate_pct": 8.5, "note": "x"}"#).unwrap();

        let mut metrics = read_summary(&path);
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            metrics,
            vec![
                ("summary/failure_rate_pct".to_string(), 8.5),
                ("summary/total_requests".to_string(), 12.0),
            ]
        );
    }

    #[test]
    fn test_hpa_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(handoff::HPA_FILE);
        std::fs::write(
            &path,
            concat!(
                r#"{"sample": 0, "pod_count": 1, "avg_memory_ki": 2048, "avg_cpu_n": 5000}"#,
                "\n\n",
                "{broken\n",
                r#"{"sample": 1, "pod_count": 2, "hpa": {"currentReplicas": 2, "desiredReplicas": 3, "currentCPUPct": 85}}"#,
                "\n",
            ),
        )
        .unwrap();

        let samples = read_hpa_metrics(&path);
        assert_eq!(samples.len(), 2);
        assert!(samples[0].hpa.is_none());
        let hpa = samples[1].hpa.as_ref().unwrap();
        assert_eq!(hpa.desired_replicas, Some(3.0));
        assert_eq!(hpa.current_memory_pct, None);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sources = ResultSources::load(&dir.path().join("absent"));
        assert!(sources.locust.is_empty());
        assert!(sources.summary.is_empty());
        assert!(sources.mcp.is_empty());
        assert!(sources.traces.is_empty());
        assert!(sources.timeseries.is_empty());
        assert!(sources.hpa.is_empty());
    }
}
