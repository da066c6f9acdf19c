#![forbid(unsafe_code)]

// Live sampling - a cancellable periodic task that snapshots the load
// generator's counters once per interval into an append-only buffer.

pub mod live;
pub mod summary;
pub mod types;

pub use live::LiveCounters;
pub use summary::{RequestLog, RunSummary};
pub use types::{CollectorError, CollectorResult, CounterSnapshot, LiveStats, Sample};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default sampling period.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running sampler. The task owns the buffer until [`stop`](Self::stop)
/// hands it back.
pub struct SampleCollector {
    cancel: CancellationToken,
    handle: JoinHandle<Vec<Sample>>,
}

impl SampleCollector {
    /// Spawns the sampling task. The first sample is taken one interval after start.
    pub fn start<S>(source: Arc<S>, period: Duration) -> Self
    where
        S: LiveStats + ?Sized + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sample_loop(source, period, cancel.clone()));
        info!("Time-series sampling started (every {}ms)", period.as_millis());
        Self { cancel, handle }
    }

    /// Signals stop and waits for the task. A tick already in progress finishes
    /// and appends; no new tick starts after the signal.
    pub async fn stop(self) -> CollectorResult<Vec<Sample>> {
        self.cancel.cancel();
        let samples = self
            .handle
            .await
            .map_err(|e| CollectorError::TaskFailed(e.to_string()))?;
        info!("Time-series sampling stopped. Collected {} samples.", samples.len());
        Ok(samples)
    }
}

async fn sample_loop<S>(source: Arc<S>, period: Duration, cancel: CancellationToken) -> Vec<Sample>
where
    S: LiveStats + ?Sized,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut samples = Vec::new();
    let mut step: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match source.snapshot() {
            Ok(snapshot) => samples.push(Sample::from_snapshot(step, &snapshot)),
            Err(e) => debug!(step, "Skipping sample: {}", e),
        }
        step += 1;
    }

    samples
}
