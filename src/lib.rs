#![forbid(unsafe_code)]

// loadpulse library - load-phase scheduling and metrics export for inference API load tests

pub mod collector;
pub mod config;
pub mod export;
pub mod handoff;
pub mod runner;
pub mod shape;
pub mod stats;
pub mod traces;
