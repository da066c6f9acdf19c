#![forbid(unsafe_code)]

// Custom load shape - an arbitrary list of cumulative stages, usually from the
// CUSTOM_STAGES environment variable.

use serde::Deserialize;
use tracing::{info, warn};

use super::types::{lookup, Phase, ShapeError, ShapeResult, Tick};

/// One stage as written in the stage list JSON.
#[derive(Debug, Clone, Deserialize)]
struct StageSpec {
    /// Cumulative seconds from test start when this stage ends
    duration: f64,
    users: u32,
    spawn_rate: u32,
}

/// Stage-list schedule. A list that fails validation becomes an empty schedule
/// that stops on the first tick; the validation error is kept as a warning.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomShape {
    stages: Vec<Phase>,
    warning: Option<ShapeError>,
}

impl CustomShape {
    /// Builds a schedule from already validated phases.
    pub fn from_phases(phases: Vec<Phase>) -> ShapeResult<Self> {
        validate(&phases)?;
        Ok(Self {
            stages: phases,
            warning: None,
        })
    }

    /// Parses a JSON stage list. Never fails; see [`CustomShape::warning`].
    pub fn from_json(json: &str) -> Self {
        match parse_stages(json) {
            Ok(stages) => {
                info!("Custom shape loaded {} stages", stages.len());
                for (i, stage) in stages.iter().enumerate() {
                    info!(
                        "  Stage {}: until {}s -> {} users @ {}/s",
                        i + 1,
                        stage.threshold_secs,
                        stage.users,
                        stage.spawn_rate
                    );
                }
                Self {
                    stages,
                    warning: None,
                }
            }
            Err(e) => {
                warn!("Custom stage list rejected ({}), test will stop immediately", e);
                Self {
                    stages: Vec::new(),
                    warning: Some(e),
                }
            }
        }
    }

    pub fn stages(&self) -> &[Phase] {
        &self.stages
    }

    pub fn warning(&self) -> Option<&ShapeError> {
        self.warning.as_ref()
    }

    pub fn tick(&self, elapsed_secs: u64) -> Tick {
        lookup(&self.stages, elapsed_secs)
    }
}

fn parse_stages(json: &str) -> ShapeResult<Vec<Phase>> {
    let specs: Vec<StageSpec> =
        serde_json::from_str(json).map_err(|e| ShapeError::InvalidStages(e.to_string()))?;

    let mut phases = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        if !spec.duration.is_finite() || spec.duration < 0.0 {
            return Err(ShapeError::InvalidDuration {
                index,
                duration: spec.duration,
            });
        }
        // Whole-second ticks: elapsed < 60.5 holds exactly when elapsed < 61.
        let threshold_secs = spec.duration.ceil() as u64;
        phases.push(Phase::new(threshold_secs, spec.users, spec.spawn_rate));
    }

    validate(&phases)?;
    Ok(phases)
}

fn validate(phases: &[Phase]) -> ShapeResult<()> {
    if phases.is_empty() {
        return Err(ShapeError::EmptyStages);
    }
    for (index, pair) in phases.windows(2).enumerate() {
        if pair[1].threshold_secs <= pair[0].threshold_secs {
            return Err(ShapeError::NonIncreasingThreshold {
                index: index + 1,
                threshold: pair[1].threshold_secs,
                previous: pair[0].threshold_secs,
            });
        }
    }
    Ok(())
}
