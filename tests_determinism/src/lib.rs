//! Determinism Test Utilities
//!
//! Shared helpers for the simulator's integration tests.
//!
//! ## Test Philosophy
//!
//! - **One runner at a time**: no two logical threads ever execute together
//! - **Reproducible**: the same program yields the same trace, run after run
//! - **Time only moves forward**: and never skips an armed event
//! - **Cooperative cancellation**: aborted threads never run embedded code again

use core_types::IrqLine;
use parking_lot::Mutex;
use sim_cpu::test_utils::{ScriptedKernel, Task};
use sim_cpu::{KernelRef, SimConfig, Simulator};
use std::sync::Arc;

/// Line the tick timer raises with the default configuration
pub const TICK_LINE: IrqLine = IrqLine::const_new(0);

/// Installs test logging; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Ordered log written by embedded code, read by the test
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// Builds a one-core simulation around `kernel`
pub fn single_core(config: SimConfig, kernel: ScriptedKernel) -> Simulator<Task> {
    init_logging();
    let kernel: KernelRef<Task> = Arc::new(kernel);
    match Simulator::new(config, move |_| Arc::clone(&kernel)) {
        Ok(sim) => sim,
        Err(err) => panic!("invalid test configuration: {}", err),
    }
}

/// Boots and runs a simulation to completion, returning the final time
pub fn boot_and_run(sim: &Simulator<Task>) -> u64 {
    if let Err(err) = sim.boot_all() {
        panic!("boot failed: {}", err);
    }
    match sim.run() {
        Ok(time) => time,
        Err(err) => panic!("run failed: {}", err),
    }
}
