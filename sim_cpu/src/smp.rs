//! Multi-core bring-up: cores sharing one virtual clock.
//!
//! Each core runs its own embedded kernel instance (AMP). The cores only
//! meet in the [`VirtualTimeScheduler`], which serializes every hardware
//! event of every core on the driving thread.

use crate::config::SimConfig;
use crate::error::SimError;
use crate::lifecycle::CpuState;
use crate::sim_core::{KernelRef, SimCore};
use crate::time_scheduler::{StepOutcome, VirtualTimeScheduler};
use crate::trace::ExecutionTrace;
use core_types::time::as_secs_f64;
use core_types::{CoreId, VirtualTime};
use log::info;
use std::sync::Arc;

/// A complete simulation: clock, cores and their shared trace
pub struct Simulator<P: Send + 'static> {
    config: SimConfig,
    time: Arc<VirtualTimeScheduler>,
    cores: Vec<SimCore<P>>,
    trace: ExecutionTrace,
}

impl<P: Send + 'static> Simulator<P> {
    /// Builds the cores; `kernel_for` supplies each core's kernel
    pub fn new<F>(config: SimConfig, mut kernel_for: F) -> Result<Self, SimError>
    where
        F: FnMut(CoreId) -> KernelRef<P>,
    {
        config.validate()?;
        let time = Arc::new(VirtualTimeScheduler::new(config.end_of_time));
        let trace = ExecutionTrace::new();
        let cores = (0..config.core_count)
            .map(|index| {
                let id = CoreId(index);
                SimCore::new(id, &config, &time, kernel_for(id), trace.clone())
            })
            .collect();
        Ok(Self {
            config,
            time,
            cores,
            trace,
        })
    }

    /// Boots every core in order
    pub fn boot_all(&self) -> Result<(), SimError> {
        for core in &self.cores {
            core.boot()?;
        }
        Ok(())
    }

    /// Runs until the end of time or a stop request, then terminates
    /// every core
    ///
    /// Returns the final virtual time.
    pub fn run(&self) -> Result<VirtualTime, SimError> {
        self.ensure_booted()?;
        let outcome = loop {
            match self.time.step() {
                Ok(StepOutcome::Stepped { .. }) => continue,
                Ok(StepOutcome::Finished { time }) => break Ok(time),
                Err(err) => break Err(err),
            }
        };
        self.terminate_all();
        if let Ok(time) = outcome {
            info!("simulation finished at {}us ({:.6}s)", time, as_secs_f64(time));
        }
        outcome
    }

    /// Runs every event due at or before `until`
    ///
    /// Cores keep running afterwards; returns the virtual time reached.
    pub fn run_until(&self, until: VirtualTime) -> Result<VirtualTime, SimError> {
        self.ensure_booted()?;
        while let Some((_, next)) = self.time.find_next() {
            if next > until || self.time.stop_requested() {
                break;
            }
            if let StepOutcome::Finished { .. } = self.time.step()? {
                break;
            }
        }
        Ok(self.time.get_time())
    }

    fn ensure_booted(&self) -> Result<(), SimError> {
        match self.cores.iter().find(|core| core.state() == CpuState::NotBooted) {
            Some(core) => Err(SimError::NotBooted(core.id())),
            None => Ok(()),
        }
    }

    /// Terminates every core not already terminating
    pub fn terminate_all(&self) {
        for core in &self.cores {
            if core.state() != CpuState::Terminating {
                core.terminate();
            }
        }
    }

    pub fn core(&self, id: CoreId) -> Option<&SimCore<P>> {
        self.cores.get(id.0)
    }

    pub fn cores(&self) -> &[SimCore<P>] {
        &self.cores
    }

    pub fn time(&self) -> &Arc<VirtualTimeScheduler> {
        &self.time
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }
}

impl<P: Send + 'static> Drop for Simulator<P> {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
