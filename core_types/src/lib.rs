//! # Core Types
//!
//! This crate defines the fundamental types shared by the simulated CPU
//! crates.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: thread indices, cores, lines and
//!   priorities are distinct types and cannot be confused.
//! - **Validated at the edge**: an [`IrqLine`] always addresses a real line.
//!
//! ## Key Types
//!
//! - [`ThreadId`]: stable index of a logical thread
//! - [`CoreId`]: simulated CPU core
//! - [`IrqLine`], [`IrqPriority`]: interrupt controller addressing
//! - [`VirtualTime`], [`NEVER`]: simulated microseconds
//! - [`ThreadState`]: logical thread lifecycle

pub mod error;
pub mod ids;
pub mod irq;
pub mod thread;
pub mod time;

pub use error::IdError;
pub use ids::{CoreId, ThreadId};
pub use irq::{IrqLine, IrqPriority, IRQ_LINE_COUNT};
pub use thread::ThreadState;
pub use time::{VirtualTime, NEVER};
