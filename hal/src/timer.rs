//! # Timer Device
//!
//! Read-only access to the current time.
//!
//! This trait does NOT:
//! - Provide wall-clock time
//! - Block or sleep (polling only)
//! - Program alarms (the tick timer model does that)
//!
//! In the simulator a tick is one microsecond of virtual time, and the
//! count only moves while the CPU is halted.

/// Monotonic time source
///
/// Implementations must never return a smaller value than before and
/// must not block.
pub trait TimerDevice {
    /// Returns the current tick count
    fn poll_ticks(&self) -> u64;
}
