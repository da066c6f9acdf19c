#![forbid(unsafe_code)]

// Common types and error handling for load shapes

use serde::Serialize;
use thiserror::Error;

/// Configuration problems found while building a load shape.
///
/// None of these are fatal: a shape that hits one degrades to a
/// zero-duration schedule and reports the error as a warning.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("stage list is empty")]
    EmptyStages,

    #[error("stage list could not be parsed: {0}")]
    InvalidStages(String),

    #[error("stage {index} has an invalid duration {duration}")]
    InvalidDuration { index: usize, duration: f64 },

    #[error("stage {index} ends at {threshold}s, not after the previous stage ({previous}s)")]
    NonIncreasingThreshold {
        index: usize,
        threshold: u64,
        previous: u64,
    },

    #[error("unknown load shape '{0}'")]
    UnknownShape(String),
}

/// Result type alias for shape construction
pub type ShapeResult<T> = Result<T, ShapeError>;

/// Concurrency target handed to the load generator for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Target {
    pub users: u32,
    pub spawn_rate: u32,
}

impl Target {
    pub fn new(users: u32, spawn_rate: u32) -> Self {
        Self { users, spawn_rate }
    }
}

/// Outcome of evaluating a shape at some elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Run(Target),
    Stop,
}

impl Tick {
    pub fn target(&self) -> Option<Target> {
        match self {
            Tick::Run(target) => Some(*target),
            Tick::Stop => None,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Tick::Stop)
    }
}

/// A time-bounded segment of a schedule.
///
/// `threshold_secs` is the cumulative elapsed time at which the phase ends;
/// the phase is active while `elapsed < threshold_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub threshold_secs: u64,
    pub users: u32,
    pub spawn_rate: u32,
}

impl Phase {
    pub fn new(threshold_secs: u64, users: u32, spawn_rate: u32) -> Self {
        Self {
            threshold_secs,
            users,
            spawn_rate,
        }
    }

    pub fn target(&self) -> Target {
        Target::new(self.users, self.spawn_rate)
    }
}

/// Returns the first phase still running at `elapsed_secs`, or `Stop` once every
/// boundary has been reached.
pub fn lookup(phases: &[Phase], elapsed_secs: u64) -> Tick {
    phases
        .iter()
        .find(|phase| elapsed_secs < phase.threshold_secs)
        .map_or(Tick::Stop, |phase| Tick::Run(phase.target()))
}
