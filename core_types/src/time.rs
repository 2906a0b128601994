//! Virtual time
//!
//! Simulated time is a plain microsecond counter. It only moves when the
//! hardware side consumes the next scheduled event; no time elapses while
//! embedded code runs.

/// Microseconds of simulated time since the simulation started
pub type VirtualTime = u64;

/// "Never": a timer holding this value is disarmed
pub const NEVER: VirtualTime = u64::MAX;

/// Converts virtual microseconds to seconds, for reports
pub fn as_secs_f64(time: VirtualTime) -> f64 {
    time as f64 / 1_000_000.0
}
