#![forbid(unsafe_code)]

// Live load-generator counters: lock-free atomics for the hot totals, a
// mutex-guarded request log for per-name response times.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::summary::{RequestLog, RunSummary};
use super::types::{clamp_ratio, CollectorError, CollectorResult, CounterSnapshot, LiveStats};

/// Width of the sliding window behind `requests_per_sec` / `failures_per_sec`.
pub const RATE_WINDOW: Duration = Duration::from_secs(10);

/// Counters shared between the load generator (sole writer) and the sampler.
#[derive(Clone)]
pub struct LiveCounters {
    inner: Arc<Inner>,
}

struct Inner {
    ready: AtomicBool,
    started_at: Mutex<Option<Instant>>,

    // Gauges
    active_users: AtomicU64,
    target_users: AtomicU64,

    // Monotonic counters
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    response_time_sum_us: AtomicU64,

    // Per-request detail
    window: Mutex<VecDeque<(Instant, bool)>>,
    requests: Mutex<HashMap<String, RequestLog>>,
}

impl Default for LiveCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveCounters {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                ready: AtomicBool::new(false),
                started_at: Mutex::new(None),
                active_users: AtomicU64::new(0),
                target_users: AtomicU64::new(0),
                total_requests: AtomicU64::new(0),
                total_failures: AtomicU64::new(0),
                response_time_sum_us: AtomicU64::new(0),
                window: Mutex::new(VecDeque::new()),
                requests: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Marks the run as started. Snapshots fail with `NotReady` until then.
    pub fn mark_started(&self) {
        if let Ok(mut started) = self.inner.started_at.lock() {
            started.get_or_insert_with(Instant::now);
        }
        self.inner.ready.store(true, Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Relaxed)
    }

    // --- Gauges ---

    pub fn set_active_users(&self, users: u64) {
        self.inner.active_users.store(users, Relaxed);
    }

    pub fn set_target_users(&self, users: u64) {
        self.inner.target_users.store(users, Relaxed);
    }

    // --- Request events ---

    /// Records one completed request, successful or not.
    pub fn record_request(
        &self,
        name: &str,
        response_time_ms: f64,
        response_length: u64,
        failed: bool,
    ) {
        let response_time_ms = if response_time_ms.is_finite() {
            response_time_ms.max(0.0)
        } else {
            0.0
        };

        self.inner.total_requests.fetch_add(1, Relaxed);
        if failed {
            self.inner.total_failures.fetch_add(1, Relaxed);
        }
        self.inner
            .response_time_sum_us
            .fetch_add((response_time_ms * 1000.0) as u64, Relaxed);

        let now = Instant::now();
        if let Ok(mut window) = self.inner.window.lock() {
            window.push_back((now, failed));
            prune_window(&mut window, now);
        }

        if let Ok(mut requests) = self.inner.requests.lock() {
            requests
                .entry(name.to_string())
                .or_default()
                .record(response_time_ms, response_length, failed);
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.inner.total_requests.load(Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.inner.total_failures.load(Relaxed)
    }

    /// Time since `mark_started`, zero if the run never started.
    pub fn elapsed(&self) -> Duration {
        self.inner
            .started_at
            .lock()
            .ok()
            .and_then(|started| started.map(|at| at.elapsed()))
            .unwrap_or_default()
    }

    /// Builds the end-of-run summary from the buffered request log.
    pub fn summary(&self) -> RunSummary {
        let logs: Vec<RequestLog> = self
            .inner
            .requests
            .lock()
            .map(|requests| requests.values().cloned().collect())
            .unwrap_or_default();

        RunSummary::from_logs(
            self.total_requests(),
            self.total_failures(),
            self.elapsed(),
            &logs,
        )
    }

    fn window_rates(&self) -> (f64, f64) {
        let Ok(mut window) = self.inner.window.lock() else {
            return (0.0, 0.0);
        };
        let now = Instant::now();
        prune_window(&mut window, now);

        let secs = RATE_WINDOW
            .min(self.elapsed())
            .as_secs_f64()
            .max(1.0);
        let requests = window.len() as f64;
        let failures = window.iter().filter(|(_, failed)| *failed).count() as f64;
        (requests / secs, failures / secs)
    }
}

impl LiveStats for LiveCounters {
    fn snapshot(&self) -> CollectorResult<CounterSnapshot> {
        if !self.is_ready() {
            return Err(CollectorError::NotReady);
        }

        let inner = &self.inner;
        let total_requests = inner.total_requests.load(Relaxed);
        // A concurrent writer may have bumped failures but not yet requests.
        let total_failures = inner.total_failures.load(Relaxed).min(total_requests);
        let sum_us = inner.response_time_sum_us.load(Relaxed);

        let avg_latency_ms = if total_requests > 0 {
            sum_us as f64 / 1000.0 / total_requests as f64
        } else {
            0.0
        };
        let fail_ratio = if total_requests > 0 {
            clamp_ratio(total_failures as f64 / total_requests as f64)
        } else {
            0.0
        };
        let (requests_per_sec, failures_per_sec) = self.window_rates();

        Ok(CounterSnapshot {
            active_users: inner.active_users.load(Relaxed),
            target_users: inner.target_users.load(Relaxed),
            requests_per_sec,
            failures_per_sec,
            avg_latency_ms,
            total_requests,
            total_failures,
            fail_ratio,
        })
    }
}

fn prune_window(window: &mut VecDeque<(Instant, bool)>, now: Instant) {
    while let Some((at, _)) = window.front() {
        if now.duration_since(*at) > RATE_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
