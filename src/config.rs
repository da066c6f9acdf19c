#![forbid(unsafe_code)]

// Environment-driven configuration for load shapes and result output.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::shape::{
    CustomShape, LoadShape, RealisticShape, ShapeError, SpikeConfig, SpikeShape, SteadyShape,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Steady,
    Spike,
    Realistic,
    Custom,
}

impl FromStr for ShapeKind {
    type Err = ShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steady" => Ok(ShapeKind::Steady),
            "spike" => Ok(ShapeKind::Spike),
            "realistic" => Ok(ShapeKind::Realistic),
            "custom" => Ok(ShapeKind::Custom),
            _ => Err(ShapeError::UnknownShape(s.to_string())),
        }
    }
}

/// Shape selection plus the raw values each strategy reads. Unset values take
/// the selected strategy's defaults when the shape is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeConfig {
    pub kind: ShapeKind,
    pub users: Option<u32>,
    pub spawn_rate: Option<u32>,
    pub run_time_secs: Option<u64>,
    pub spike: SpikeConfig,
    pub custom_stages: String,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            kind: ShapeKind::Steady,
            users: None,
            spawn_rate: None,
            run_time_secs: None,
            spike: SpikeConfig::default(),
            custom_stages: "[]".to_string(),
        }
    }
}

impl ShapeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup. Unparseable numbers fall back
    /// to their defaults; an unknown shape name falls back to steady.
    pub fn from_vars<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| -> Option<u64> {
            let raw = get(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring {}={:?}: not a non-negative integer", key, raw);
                    None
                }
            }
        };
        let small = |key: &str| number(key).map(|v| u32::try_from(v).unwrap_or(u32::MAX));

        let kind = match get("LOAD_SHAPE") {
            None => ShapeKind::Steady,
            Some(name) => name.parse().unwrap_or_else(|e| {
                warn!("{}, using steady", e);
                ShapeKind::Steady
            }),
        };

        let defaults = SpikeConfig::default();
        let spike = SpikeConfig {
            baseline_users: small("SPIKE_BASELINE_USERS").unwrap_or(defaults.baseline_users),
            peak_users: small("SPIKE_PEAK_USERS").unwrap_or(defaults.peak_users),
            spawn_rate: small("SPAWN_RATE").unwrap_or(defaults.spawn_rate),
            baseline_secs: number("SPIKE_BASELINE_DURATION").unwrap_or(defaults.baseline_secs),
            ramp_secs: number("SPIKE_RAMP_DURATION").unwrap_or(defaults.ramp_secs),
            hold_secs: number("SPIKE_HOLD_DURATION").unwrap_or(defaults.hold_secs),
            cooldown_secs: number("SPIKE_COOLDOWN_DURATION").unwrap_or(defaults.cooldown_secs),
        };

        Self {
            kind,
            users: small("USERS"),
            spawn_rate: small("SPAWN_RATE"),
            run_time_secs: number("RUN_TIME_SECONDS"),
            spike,
            custom_stages: get("CUSTOM_STAGES").unwrap_or_else(|| "[]".to_string()),
        }
    }

    pub fn build(&self) -> LoadShape {
        match self.kind {
            ShapeKind::Steady => LoadShape::Steady(SteadyShape::new(
                self.users.unwrap_or(10),
                self.run_time_secs.unwrap_or(60),
            )),
            ShapeKind::Spike => LoadShape::Spike(SpikeShape::new(self.spike.clone())),
            ShapeKind::Realistic => LoadShape::Realistic(RealisticShape::new(
                self.users.unwrap_or(50),
                self.spawn_rate.unwrap_or(5),
                self.run_time_secs.unwrap_or(300),
            )),
            ShapeKind::Custom => LoadShape::Custom(CustomShape::from_json(&self.custom_stages)),
        }
    }

    /// `key=value` run parameters describing this configuration.
    pub fn as_params(&self) -> Vec<String> {
        let shape = self.build();
        let mut params = vec![format!("load_shape={}", shape.name())];
        match &shape {
            LoadShape::Steady(s) => {
                params.push(format!("users={}", s.users()));
                params.push(format!("run_time_seconds={}", s.run_time_secs()));
            }
            LoadShape::Spike(s) => {
                let c = s.config();
                params.push(format!("users={}", c.peak_users));
                params.push(format!("spike_baseline_users={}", c.baseline_users));
                params.push(format!("spawn_rate={}", c.spawn_rate));
                params.push(format!("run_time_seconds={}", s.total_secs()));
            }
            LoadShape::Realistic(s) => {
                params.push(format!("users={}", s.peak_users()));
                params.push(format!("spawn_rate={}", self.spawn_rate.unwrap_or(5)));
                params.push(format!("run_time_seconds={}", s.run_time_secs()));
            }
            LoadShape::Custom(_) => {
                params.push(format!("custom_stages={}", self.custom_stages));
            }
        }
        params
    }
}

impl LoadShape {
    pub fn from_config(config: &ShapeConfig) -> Self {
        config.build()
    }
}

/// Where the runner writes its hand-off files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("/tmp"),
        }
    }
}

impl OutputConfig {
    pub fn from_env() -> Self {
        std::env::var("LOCUST_OUTPUT_DIR")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(|dir| Self {
                results_dir: PathBuf::from(dir),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Target, Tick};
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> ShapeConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ShapeConfig::from_vars(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_to_steady() {
        let shape = vars(&[]).build();
        assert_eq!(shape.name(), "steady");
        assert_eq!(shape.tick_secs(0), Tick::Run(Target::new(10, 10)));
        assert_eq!(shape.tick_secs(61), Tick::Stop);
    }

    #[test]
    fn test_unknown_shape_falls_back_to_steady() {
        let config = vars(&[("LOAD_SHAPE", "sawtooth"), ("USERS", "3")]);
        assert_eq!(config.kind, ShapeKind::Steady);
        assert_eq!(config.build().tick_secs(5), Tick::Run(Target::new(3, 3)));
    }

    #[test]
    fn test_bad_numbers_use_defaults() {
        let config = vars(&[("LOAD_SHAPE", "realistic"), ("USERS", "many"), ("RUN_TIME_SECONDS", "-5")]);
        assert_eq!(config.users, None);
        match config.build() {
            LoadShape::Realistic(shape) => {
                assert_eq!(shape.peak_users(), 50);
                assert_eq!(shape.run_time_secs(), 300);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_spike_variables() {
        let config = vars(&[
            ("LOAD_SHAPE", "Spike"),
            ("SPIKE_PEAK_USERS", "40"),
            ("SPIKE_RAMP_DURATION", "5"),
            ("SPAWN_RATE", "2"),
        ]);
        let LoadShape::Spike(shape) = config.build() else {
            panic!("expected spike");
        };
        assert_eq!(shape.config().peak_users, 40);
        assert_eq!(shape.config().baseline_users, 5);
        assert_eq!(shape.config().spawn_rate, 2);
        assert_eq!(shape.ramp_spawn_rate(), 7);
    }

    #[test]
    fn test_custom_stages() {
        let config = vars(&[
            ("LOAD_SHAPE", "custom"),
            ("CUSTOM_STAGES", r#"[{"duration": 10, "users": 2, "spawn_rate": 1}]"#),
        ]);
        let shape = LoadShape::from_config(&config);
        assert!(shape.configuration_warning().is_none());
        assert_eq!(shape.tick_secs(9), Tick::Run(Target::new(2, 1)));

        let empty = vars(&[("LOAD_SHAPE", "custom")]).build();
        assert!(empty.configuration_warning().is_some());
        assert_eq!(empty.tick_secs(0), Tick::Stop);
    }

    #[test]
    fn test_params() {
        let params = vars(&[("USERS", "4"), ("RUN_TIME_SECONDS", "30")]).as_params();
        assert_eq!(params, vec!["load_shape=steady", "users=4", "run_time_seconds=30"]);
    }
}
