//! Time utilities for the arena simulation

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Round state machine tick period
pub const ROUND_TICK_MS: u64 = 1_000;

/// Scheduled-event pump period (reload completion, countdowns, respawns)
pub const TIMER_PUMP_MS: u64 = 50;

/// Host simulation rate used when no explicit delta is supplied
pub const SIMULATION_TPS: u32 = 60;

/// Default delta time of one simulation step (milliseconds)
pub fn tick_delta_ms() -> f32 {
    1000.0 / SIMULATION_TPS as f32
}

/// Whole seconds left until `deadline`, rounded up; zero or negative once passed
pub fn seconds_remaining(deadline: u64, now: u64) -> i64 {
    let remaining_ms = deadline as i64 - now as i64;
    if remaining_ms <= 0 {
        remaining_ms.div_euclid(1000)
    } else {
        (remaining_ms + 999) / 1000
    }
}
