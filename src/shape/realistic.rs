#![forbid(unsafe_code)]

// Realistic load shape - warm-up, ramp, peak, taper, cool-down as fixed
// fractions of the total run time.

use super::types::{lookup, Phase, Tick};

/// Cumulative end of each phase, in percent of the total run time.
const PHASE_END_PCT: [u64; 4] = [10, 25, 65, 85];

/// Users per phase, in percent of peak users.
const WARMUP_USERS_PCT: u32 = 10;
const RAMP_USERS_PCT: u32 = 50;
const TAPER_USERS_PCT: u32 = 30;
const COOLDOWN_USERS_PCT: u32 = 5;

/// Floor for the warm-up and cool-down user counts so neither phase is empty.
const MIN_EDGE_USERS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealisticShape {
    peak_users: u32,
    spawn_rate: u32,
    run_time_secs: u64,
}

impl RealisticShape {
    pub fn new(peak_users: u32, spawn_rate: u32, run_time_secs: u64) -> Self {
        Self {
            peak_users,
            spawn_rate,
            run_time_secs,
        }
    }

    pub fn peak_users(&self) -> u32 {
        self.peak_users
    }

    pub fn run_time_secs(&self) -> u64 {
        self.run_time_secs
    }

    /// Boundaries are derived from the run time on every call rather than cached.
    pub fn tick(&self, elapsed_secs: u64) -> Tick {
        lookup(&self.phases(), elapsed_secs)
    }

    pub fn phases(&self) -> Vec<Phase> {
        let total = self.run_time_secs;
        let [warmup_end, ramp_end, peak_end, taper_end] =
            PHASE_END_PCT.map(|pct| total.saturating_mul(pct) / 100);

        let peak = self.peak_users;
        let warmup_users = share(peak, WARMUP_USERS_PCT).max(MIN_EDGE_USERS);
        let ramp_users = share(peak, RAMP_USERS_PCT);
        let taper_users = share(peak, TAPER_USERS_PCT);
        let cooldown_users = share(peak, COOLDOWN_USERS_PCT).max(MIN_EDGE_USERS);

        vec![
            Phase::new(warmup_end, warmup_users, (self.spawn_rate / 2).max(1)),
            Phase::new(ramp_end, ramp_users, self.spawn_rate),
            Phase::new(peak_end, peak, self.spawn_rate),
            Phase::new(taper_end, taper_users, self.spawn_rate),
            Phase::new(total, cooldown_users, self.spawn_rate),
        ]
    }
}

fn share(users: u32, pct: u32) -> u32 {
    let scaled = u64::from(users) * u64::from(pct) / 100;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}
