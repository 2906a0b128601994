//! # Embedded Kernel Seam
//!
//! The simulated CPU executes an embedded kernel it knows nothing about.
//! Everything scheduling-related (which thread should run, what an
//! interrupt means) stays on the kernel's side of this trait.
//!
//! `Cpu` is the handle type the simulator passes back into the kernel, so
//! that kernel code can halt, swap threads, or touch the interrupt
//! controller from inside these callbacks.

use core_types::{IrqLine, ThreadId};

/// Result of an interrupt service routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    /// Nothing scheduling-relevant changed
    Done,
    /// The ready set may have changed; ask the kernel before resuming
    Reschedule,
}

/// A context switch the kernel wants performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRequest {
    /// Thread that should run now
    pub next: ThreadId,
    /// Thread that was interrupted
    pub current: ThreadId,
}

/// The embedded kernel running on a simulated CPU
pub trait EmbeddedKernel<Cpu: ?Sized>: Send + Sync {
    /// Opaque per-thread data; never interpreted by the simulator
    type Payload: Send + 'static;

    /// Boot code, run on the CPU's initial execution context
    ///
    /// Normally creates threads and hands the CPU to the first one.
    fn boot(&self, cpu: &Cpu);

    /// Body of a logical thread
    ///
    /// Expected to run forever, calling halt or swap as part of the
    /// kernel's own scheduling.
    fn thread_entry(&self, cpu: &Cpu, payload: Self::Payload);

    /// Services one interrupt line
    fn isr(&self, cpu: &Cpu, line: IrqLine) -> IrqOutcome;

    /// Called once all pending interrupts have been serviced and at least
    /// one of them asked for rescheduling
    ///
    /// Returns the swap to perform, if a different thread should now run.
    fn reschedule(&self, cpu: &Cpu) -> Option<SwapRequest>;
}
