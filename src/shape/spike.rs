#![forbid(unsafe_code)]

// Spike load shape - baseline, rapid ramp to peak, hold, cooldown back to baseline

use tracing::info;

use super::types::{lookup, Phase, Tick};

/// Durations and user counts for a spike test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpikeConfig {
    pub baseline_users: u32,
    pub peak_users: u32,
    /// Spawn rate for every phase except the ramp
    pub spawn_rate: u32,
    pub baseline_secs: u64,
    pub ramp_secs: u64,
    pub hold_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            baseline_users: 5,
            peak_users: 100,
            spawn_rate: 10,
            baseline_secs: 30,
            ramp_secs: 10,
            hold_secs: 60,
            cooldown_secs: 30,
        }
    }
}

/// Spike schedule with a derived ramp spawn rate.
///
/// The ramp rate is `ceil((peak - baseline) / ramp_secs)`, at least 1, so the
/// peak is reached by the end of the ramp window however short it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpikeShape {
    config: SpikeConfig,
    ramp_spawn_rate: u32,
    phases: [Phase; 4],
}

impl SpikeShape {
    pub fn new(config: SpikeConfig) -> Self {
        let ramp_spawn_rate = ramp_spawn_rate(&config);

        let baseline_end = config.baseline_secs;
        let ramp_end = baseline_end.saturating_add(config.ramp_secs);
        let hold_end = ramp_end.saturating_add(config.hold_secs);
        let cooldown_end = hold_end.saturating_add(config.cooldown_secs);

        let phases = [
            Phase::new(baseline_end, config.baseline_users, config.spawn_rate),
            Phase::new(ramp_end, config.peak_users, ramp_spawn_rate),
            Phase::new(hold_end, config.peak_users, config.spawn_rate),
            Phase::new(cooldown_end, config.baseline_users, config.spawn_rate),
        ];

        Self {
            config,
            ramp_spawn_rate,
            phases,
        }
    }

    pub fn config(&self) -> &SpikeConfig {
        &self.config
    }

    pub fn ramp_spawn_rate(&self) -> u32 {
        self.ramp_spawn_rate
    }

    pub fn total_secs(&self) -> u64 {
        self.phases[3].threshold_secs
    }

    pub fn tick(&self, elapsed_secs: u64) -> Tick {
        lookup(&self.phases, elapsed_secs)
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.phases.to_vec()
    }

    /// Logs the phase plan so the operator knows what the run will do.
    pub fn log_plan(&self) {
        let [baseline, ramp, hold, cooldown] = &self.phases;
        info!(
            "Spike plan: baseline [0s-{}s] at {} users (spawn_rate={}/s)",
            baseline.threshold_secs, baseline.users, baseline.spawn_rate
        );
        info!(
            "Spike plan: ramp [{}s-{}s] to {} users (spawn_rate={}/s)",
            baseline.threshold_secs, ramp.threshold_secs, ramp.users, ramp.spawn_rate
        );
        info!(
            "Spike plan: hold [{}s-{}s] at {} users",
            ramp.threshold_secs, hold.threshold_secs, hold.users
        );
        info!(
            "Spike plan: cooldown [{}s-{}s] to {} users, total {}s",
            hold.threshold_secs, cooldown.threshold_secs, cooldown.users, cooldown.threshold_secs
        );
    }
}

fn ramp_spawn_rate(config: &SpikeConfig) -> u32 {
    if config.ramp_secs == 0 || config.peak_users <= config.baseline_users {
        return config.spawn_rate;
    }
    let to_spawn = u64::from(config.peak_users - config.baseline_users);
    let rate = to_spawn.div_ceil(config.ramp_secs).max(1);
    u32::try_from(rate).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::types::Target;

    #[test]
    fn test_default_spike_phases() {
        let shape = SpikeShape::new(SpikeConfig::default());
        assert_eq!(shape.ramp_spawn_rate(), 10); // ceil(95 / 10)
        assert_eq!(shape.tick(0), Tick::Run(Target::new(5, 10)));
        assert_eq!(shape.tick(29), Tick::Run(Target::new(5, 10)));
        assert_eq!(shape.tick(30), Tick::Run(Target::new(100, 10)));
        assert_eq!(shape.tick(39), Tick::Run(Target::new(100, 10)));
        assert_eq!(shape.tick(40), Tick::Run(Target::new(100, 10)));
        assert_eq!(shape.tick(99), Tick::Run(Target::new(100, 10)));
        assert_eq!(shape.tick(100), Tick::Run(Target::new(5, 10)));
        assert_eq!(shape.tick(129), Tick::Run(Target::new(5, 10)));
        assert_eq!(shape.tick(130), Tick::Stop);
        assert_eq!(shape.total_secs(), 130);
    }

    #[test]
    fn test_ramp_rate_reaches_peak_in_window() {
        for (baseline, peak, ramp) in [(5, 100, 10), (0, 7, 3), (1, 1000, 1), (10, 11, 60)] {
            let shape = SpikeShape::new(SpikeConfig {
                baseline_users: baseline,
                peak_users: peak,
                ramp_secs: ramp,
                spawn_rate: 1,
                ..SpikeConfig::default()
            });
            let rate = u64::from(shape.ramp_spawn_rate());
            let needed = u64::from(peak - baseline).div_ceil(ramp);
            assert!(rate >= needed.max(1));
            assert!(u64::from(baseline) + rate * ramp >= u64::from(peak));
        }
    }

    #[test]
    fn test_ramp_rate_falls_back_to_base_rate() {
        let zero_ramp = SpikeShape::new(SpikeConfig {
            ramp_secs: 0,
            spawn_rate: 7,
            ..SpikeConfig::default()
        });
        assert_eq!(zero_ramp.ramp_spawn_rate(), 7);

        let no_spike = SpikeShape::new(SpikeConfig {
            baseline_users: 50,
            peak_users: 20,
            spawn_rate: 4,
            ..SpikeConfig::default()
        });
        assert_eq!(no_spike.ramp_spawn_rate(), 4);
    }

    #[test]
    fn test_zero_ramp_skips_straight_to_hold() {
        let shape = SpikeShape::new(SpikeConfig {
            ramp_secs: 0,
            ..SpikeConfig::default()
        });
        assert_eq!(shape.tick(30), Tick::Run(Target::new(100, 10)));
        assert_eq!(shape.tick(120), Tick::Stop);
    }
}
