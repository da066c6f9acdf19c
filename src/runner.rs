#![forbid(unsafe_code)]

// Load test orchestration: drives a load generator from a shape once per
// second, samples its live counters, and leaves the hand-off files behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::collector::{LiveCounters, RunSummary, Sample, SampleCollector, SAMPLE_INTERVAL};
use crate::handoff::{self, TestWindow};
use crate::shape::{LoadShape, Target, Tick};

/// The component that actually issues requests. It reports what it does
/// through the runner's [`LiveCounters`].
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Moves toward `target.users` concurrent users at `target.spawn_rate` per second.
    async fn apply(&self, target: Target) -> Result<()>;

    /// Stops all users.
    async fn stop(&self) -> Result<()>;
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub window: TestWindow,
    pub samples: Vec<Sample>,
    pub summary: RunSummary,
}

pub struct LoadRunner {
    counters: LiveCounters,
    results_dir: PathBuf,
    tick_interval: Duration,
    sample_interval: Duration,
}

impl LoadRunner {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            counters: LiveCounters::new(),
            results_dir: results_dir.into(),
            tick_interval: Duration::from_secs(1),
            sample_interval: SAMPLE_INTERVAL,
        }
    }

    pub fn with_sample_interval(mut self, period: Duration) -> Self {
        self.sample_interval = period;
        self
    }

    /// Counters the load generator records into.
    pub fn counters(&self) -> &LiveCounters {
        &self.counters
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Runs `shape` to completion. Generator failures are logged and the run
    /// continues; only an unusable results directory is an error.
    pub async fn run(&self, shape: &LoadShape, generator: &dyn LoadGenerator) -> Result<RunOutcome> {
        if let Some(problem) = shape.configuration_warning() {
            warn!("{} shape is misconfigured ({}); the run will stop immediately", shape.name(), problem);
        }
        shape.log_plan();

        std::fs::create_dir_all(&self.results_dir)
            .with_context(|| format!("creating results directory {}", self.results_dir.display()))?;

        let start = handoff::epoch_now();
        write_or_warn(&self.results_dir.join(handoff::START_EPOCH_FILE), &start.to_string());
        info!("Test started at epoch {}", start);

        self.counters.mark_started();
        let collector = SampleCollector::start(Arc::new(self.counters.clone()), self.sample_interval);

        self.drive(shape, generator).await;

        let samples = match collector.stop().await {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Time-series sampling failed: {}", e);
                Vec::new()
            }
        };

        let end = handoff::epoch_now();
        write_or_warn(&self.results_dir.join(handoff::END_EPOCH_FILE), &end.to_string());
        let window = TestWindow { start, end };
        info!("Test stopped at epoch {} ({}s)", end, window.duration_secs());

        let summary = self.counters.summary();
        summary.print_summary();

        write_json_or_warn(&self.results_dir.join(handoff::SUMMARY_FILE), &summary);
        write_json_or_warn(&self.results_dir.join(handoff::TIMESERIES_FILE), &samples);
        info!(samples = samples.len(), dir = %self.results_dir.display(), "Hand-off files written");

        Ok(RunOutcome {
            window,
            samples,
            summary,
        })
    }

    /// Ticks the shape until it says stop. Only changed decisions reach the generator.
    async fn drive(&self, shape: &LoadShape, generator: &dyn LoadGenerator) {
        let started = Instant::now();
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current: Option<Target> = None;

        loop {
            ticker.tick().await;
            match shape.tick(started.elapsed()) {
                Tick::Run(target) => {
                    if current == Some(target) {
                        continue;
                    }
                    info!(users = target.users, spawn_rate = target.spawn_rate, "Adjusting load");
                    self.counters.set_target_users(u64::from(target.users));
                    if let Err(e) = generator.apply(target).await {
                        warn!("Load generator rejected target {:?}: {:#}", target, e);
                    }
                    current = Some(target);
                }
                Tick::Stop => {
                    info!("Load shape finished after {}s", started.elapsed().as_secs());
                    self.counters.set_target_users(0);
                    if let Err(e) = generator.stop().await {
                        warn!("Load generator failed to stop cleanly: {:#}", e);
                    }
                    break;
                }
            }
        }
    }
}

fn write_or_warn(path: &Path, contents: &str) {
    if let Err(e) = std::fs::write(path, contents) {
        warn!("Failed to write {}: {}", path.display(), e);
    }
}

fn write_json_or_warn<T: Serialize + ?Sized>(path: &Path, value: &T) {
    if let Err(e) = handoff::write_json(path, value) {
        warn!("Failed to write {}: {:#}", path.display(), e);
    }
}
