#![forbid(unsafe_code)]

// Load shapes - decide every tick how many users should be active
// Each strategy is a pure function of elapsed run time.

pub mod custom;
pub mod realistic;
pub mod spike;
pub mod steady;
pub mod types;

pub use custom::CustomShape;
pub use realistic::RealisticShape;
pub use spike::{SpikeConfig, SpikeShape};
pub use steady::SteadyShape;
pub use types::{Phase, ShapeError, ShapeResult, Target, Tick};

use std::time::Duration;
use tracing::info;

/// A load schedule, selected once at test start.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadShape {
    Steady(SteadyShape),
    Spike(SpikeShape),
    Realistic(RealisticShape),
    Custom(CustomShape),
}

impl LoadShape {
    pub fn name(&self) -> &'static str {
        match self {
            LoadShape::Steady(_) => "steady",
            LoadShape::Spike(_) => "spike",
            LoadShape::Realistic(_) => "realistic",
            LoadShape::Custom(_) => "custom",
        }
    }

    /// Evaluates the schedule at `elapsed`, quantized down to whole seconds.
    ///
    /// Decisions depend only on the elapsed time, never on how often or how
    /// regularly this is called.
    pub fn tick(&self, elapsed: Duration) -> Tick {
        self.tick_secs(elapsed.as_secs())
    }

    pub fn tick_secs(&self, elapsed_secs: u64) -> Tick {
        match self {
            LoadShape::Steady(shape) => shape.tick(elapsed_secs),
            LoadShape::Spike(shape) => shape.tick(elapsed_secs),
            LoadShape::Realistic(shape) => shape.tick(elapsed_secs),
            LoadShape::Custom(shape) => shape.tick(elapsed_secs),
        }
    }

    /// The schedule as an ordered list of cumulative phases.
    pub fn phases(&self) -> Vec<Phase> {
        match self {
            LoadShape::Steady(shape) => shape.phases(),
            LoadShape::Spike(shape) => shape.phases(),
            LoadShape::Realistic(shape) => shape.phases(),
            LoadShape::Custom(shape) => shape.stages().to_vec(),
        }
    }

    /// Elapsed seconds at which the schedule first returns `Stop`.
    pub fn stop_at_secs(&self) -> u64 {
        self.phases()
            .iter()
            .map(|phase| phase.threshold_secs)
            .max()
            .unwrap_or(0)
    }

    /// Every elapsed second at which the decision changes, ending with the
    /// first `Stop`. Decisions only change on phase boundaries, so this is
    /// evaluated there and never second by second.
    pub fn plan(&self) -> Vec<(u64, Tick)> {
        let mut boundaries: Vec<u64> = self.phases().iter().map(|p| p.threshold_secs).collect();
        boundaries.push(0);
        boundaries.sort_unstable();
        boundaries.dedup();

        let mut plan: Vec<(u64, Tick)> = Vec::new();
        for second in boundaries {
            let tick = self.tick_secs(second);
            if plan.last().is_some_and(|(_, previous)| *previous == tick) {
                continue;
            }
            plan.push((second, tick));
            if tick.is_stop() {
                break;
            }
        }
        plan
    }

    /// Configuration problem that turned this shape into a zero-duration run.
    pub fn configuration_warning(&self) -> Option<&ShapeError> {
        match self {
            LoadShape::Custom(shape) => shape.warning(),
            _ => None,
        }
    }

    pub fn log_plan(&self) {
        match self {
            LoadShape::Spike(shape) => shape.log_plan(),
            other => {
                info!(
                    shape = other.name(),
                    phases = other.phases().len(),
                    total_secs = other.stop_at_secs(),
                    "Load shape plan"
                );
            }
        }
    }
}
