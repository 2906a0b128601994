//! # Simulated CPU
//!
//! Runs an embedded, preemptive multitasking kernel as an ordinary host
//! process by emulating the hardware it expects: a CPU that boots, halts
//! and wakes; context switches between logical threads; an interrupt
//! controller; and timers driven by a virtual clock.
//!
//! ## Philosophy
//!
//! **Execution must be reproducible.**
//!
//! The simulated CPU is infinitely fast: no virtual time passes while
//! embedded code runs, and time only advances when the next hardware event
//! is consumed. Every logical thread is backed by an OS thread, but only
//! the one named by the scheduling token may run, so the host's own
//! scheduler never influences what the embedded program observes. Running
//! the same program twice yields the same interleaving of threads and
//! interrupts.
//!
//! ## Layout
//!
//! - [`thread_emulator`]: logical threads on OS threads, one runner at a time
//! - [`irq_ctrl`]: interrupt lines, priorities, masking, lock
//! - [`time_scheduler`]: the virtual clock and its event loop
//! - [`timer_model`]: periodic tick and wake-up alarm hardware
//! - [`lifecycle`]: the run/halt state machine
//! - [`irq_handler`]: vectoring interrupts to the embedded kernel
//! - [`sim_core`]: one core, wired together
//! - [`smp`]: several cores on one clock
//!
//! The embedded kernel itself is reached only through
//! [`hal::EmbeddedKernel`]; [`test_utils::ScriptedKernel`] is a small one
//! for tests.

pub mod config;
pub mod error;
pub mod irq_ctrl;
pub mod irq_handler;
pub mod lifecycle;
pub mod sim_core;
pub mod smp;
pub mod test_utils;
pub mod thread_emulator;
mod thread_table;
pub mod time_scheduler;
pub mod timer_model;
pub mod trace;

pub use config::{SimConfig, ThreadTableConfig};
pub use error::SimError;
pub use irq_ctrl::{InterruptController, InterruptSink, IrqSource};
pub use lifecycle::{CpuLifecycle, CpuState, TerminateAction};
pub use sim_core::{KernelRef, SimCore};
pub use smp::Simulator;
pub use thread_emulator::ThreadEmulator;
pub use time_scheduler::{EventId, StepOutcome, TimerCell, VirtualTimeScheduler};
pub use timer_model::TickTimer;
pub use trace::{CoreEvent, ExecutionTrace, TraceRecord};
