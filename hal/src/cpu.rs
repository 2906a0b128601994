//! CPU abstraction

use core_types::CoreId;

/// CPU-level operations available to embedded code
///
/// This trait abstracts the few things embedded code needs from "the
/// processor" itself: going idle and knowing which core it runs on.
pub trait CpuHal {
    /// Halts the CPU until the next interrupt
    ///
    /// Returns once an interrupt has been delivered and serviced and this
    /// execution context has been scheduled again.
    fn halt(&self);

    /// Returns the core this CPU models
    fn cpu_id(&self) -> CoreId;

    /// Returns whether the CPU is executing (not halted)
    fn is_running(&self) -> bool;
}
