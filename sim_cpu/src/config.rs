//! Simulator configuration
//!
//! Plain data, deserializable so that a driving program can load it from
//! whatever format it likes. Every field has a default; an empty document
//! yields a single-core simulation that runs until stopped.

use crate::error::SimError;
use core_types::{IrqLine, VirtualTime};
use serde::{Deserialize, Serialize};

/// Thread table allocation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadTableConfig {
    /// Slots added each time the table grows
    pub chunk_size: usize,
    /// Hand out slots of aborted threads again
    ///
    /// Off by default: a reused index can be confused with the old thread
    /// by anything still holding it.
    pub reuse_aborted: bool,
}

impl Default for ThreadTableConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            reuse_aborted: false,
        }
    }
}

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of simulated cores
    pub core_count: usize,
    /// Virtual time after which the simulation stops (none = run until stopped)
    pub end_of_time: Option<VirtualTime>,
    /// Thread table policy, applied to every core
    pub thread_table: ThreadTableConfig,
    /// Line raised by each core's tick timer
    pub tick_irq: IrqLine,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            core_count: 1,
            end_of_time: None,
            thread_table: ThreadTableConfig::default(),
            tick_irq: IrqLine::const_new(0),
        }
    }
}

impl SimConfig {
    /// Sets the number of cores
    pub fn with_core_count(mut self, core_count: usize) -> Self {
        self.core_count = core_count;
        self
    }

    /// Sets the end of time
    pub fn with_end_of_time(mut self, end_of_time: VirtualTime) -> Self {
        self.end_of_time = Some(end_of_time);
        self
    }

    /// Sets the thread table policy
    pub fn with_thread_table(mut self, thread_table: ThreadTableConfig) -> Self {
        self.thread_table = thread_table;
        self
    }

    /// Sets the tick timer line
    pub fn with_tick_irq(mut self, tick_irq: IrqLine) -> Self {
        self.tick_irq = tick_irq;
        self
    }

    /// Checks the configuration for values the simulator cannot honor
    pub fn validate(&self) -> Result<(), SimError> {
        if self.core_count == 0 {
            return Err(SimError::Config("core_count must be at least 1".into()));
        }
        if self.thread_table.chunk_size == 0 {
            return Err(SimError::Config(
                "thread_table.chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
