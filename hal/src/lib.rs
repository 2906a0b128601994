//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the seams between embedded code and the (simulated)
//! hardware it runs on.
//!
//! ## Philosophy
//!
//! **Architecture must be fully abstracted and swappable.**
//!
//! The embedded kernel talks to a CPU, an interrupt controller and a time
//! source only through these traits; the simulator implements them.
//! Conversely the simulator reaches the kernel only through
//! [`EmbeddedKernel`].

pub mod cpu;
pub mod interrupts;
pub mod kernel;
pub mod timer;

pub use cpu::CpuHal;
pub use interrupts::{InterruptHal, IrqKey};
pub use kernel::{EmbeddedKernel, IrqOutcome, SwapRequest};
pub use timer::TimerDevice;
