#![forbid(unsafe_code)]

// Steady load shape - constant user count for a fixed duration

use super::types::{Phase, Target, Tick};

/// Constant load. Every user is spawned at once (spawn rate = user count).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteadyShape {
    users: u32,
    run_time_secs: u64,
}

impl SteadyShape {
    pub fn new(users: u32, run_time_secs: u64) -> Self {
        Self {
            users,
            run_time_secs,
        }
    }

    pub fn users(&self) -> u32 {
        self.users
    }

    pub fn run_time_secs(&self) -> u64 {
        self.run_time_secs
    }

    /// The tick at exactly `run_time_secs` still runs; only later ticks stop.
    pub fn tick(&self, elapsed_secs: u64) -> Tick {
        if elapsed_secs > self.run_time_secs {
            return Tick::Stop;
        }
        Tick::Run(Target::new(self.users, self.users))
    }

    pub fn phases(&self) -> Vec<Phase> {
        vec![Phase::new(
            self.run_time_secs.saturating_add(1),
            self.users,
            self.users,
        )]
    }
}
