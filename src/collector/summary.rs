#![forbid(unsafe_code)]

// End-of-run summary built from the buffered request log

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stats::{round_to, AggregateStats};

/// Buffered detail for one request name.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    pub response_times_ms: Vec<f64>,
    pub response_lengths: Vec<u64>,
    pub successes: u64,
    pub failures: u64,
}

impl RequestLog {
    pub fn record(&mut self, response_time_ms: f64, response_length: u64, failed: bool) {
        self.response_times_ms.push(response_time_ms);
        self.response_lengths.push(response_length);
        if failed {
            self.failures += 1;
        } else {
            self.successes += 1;
        }
    }
}

/// Flat summary written as `summary_metrics.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_requests: u64,
    pub total_failures: u64,
    pub failure_rate_pct: f64,
    pub requests_per_second: f64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_p50_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_p95_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_p99_ms: Option<f64>,
}

impl RunSummary {
    pub fn from_logs(
        total_requests: u64,
        total_failures: u64,
        elapsed: Duration,
        logs: &[RequestLog],
    ) -> Self {
        let all_times: Vec<f64> = logs
            .iter()
            .flat_map(|log| log.response_times_ms.iter().copied())
            .collect();
        let stats = AggregateStats::from_values(&all_times);

        let fail_ratio = if total_requests > 0 {
            total_failures.min(total_requests) as f64 / total_requests as f64
        } else {
            0.0
        };
        let elapsed_secs = elapsed.as_secs_f64();
        let requests_per_second = if elapsed_secs > 0.0 {
            total_requests as f64 / elapsed_secs
        } else {
            0.0
        };

        let mut summary = Self {
            total_requests,
            total_failures,
            failure_rate_pct: round_to(fail_ratio * 100.0, 4),
            requests_per_second: round_to(requests_per_second, 2),
            ..Self::default()
        };

        if let Some(stats) = stats {
            summary.avg_response_time_ms = round_to(stats.mean, 2);
            summary.min_response_time_ms = round_to(stats.min, 2);
            summary.max_response_time_ms = round_to(stats.max, 2);
            summary.response_time_p50_ms = Some(round_to(stats.p50, 2));
            summary.response_time_p95_ms = Some(round_to(stats.p95, 2));
            summary.response_time_p99_ms = Some(round_to(stats.p99, 2));
        }

        summary
    }

    pub fn print_summary(&self) {
        println!("\n============================================================");
        println!("TEST SUMMARY");
        println!("============================================================");
        println!("Total Requests: {}", self.total_requests);
        println!("Total Failures: {}", self.total_failures);
        println!("Failure Rate: {:.2}%", self.failure_rate_pct);
        println!("Avg Response Time: {:.2} ms", self.avg_response_time_ms);
        println!("Min Response Time: {:.2} ms", self.min_response_time_ms);
        println!("Max Response Time: {:.2} ms", self.max_response_time_ms);
        if let (Some(p50), Some(p95), Some(p99)) = (
            self.response_time_p50_ms,
            self.response_time_p95_ms,
            self.response_time_p99_ms,
        ) {
            println!("Response Time P50/P95/P99: {p50:.2} / {p95:.2} / {p99:.2} ms");
        }
        println!("Requests/sec: {:.2}", self.requests_per_second);
        println!("============================================================\n");
    }
}
