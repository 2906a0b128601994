//! Execution Trace
//!
//! Records what each simulated core did, stamped with virtual time.
//!
//! ## Philosophy
//!
//! - Deterministic: the same program produces the same trace, run after run
//! - Queryable: tests assert on ordering instead of sleeping and hoping
//! - Serializable: two traces can be compared as JSON documents
//!
//! ## Example
//!
//! ```
//! use sim_cpu::trace::{CoreEvent, ExecutionTrace};
//! use core_types::{CoreId, ThreadId};
//!
//! let trace = ExecutionTrace::new();
//! trace.record(0, CoreId(0), CoreEvent::Booted);
//! trace.record(0, CoreId(0), CoreEvent::ThreadCreated { thread: ThreadId::new(0), debug_id: 0 });
//!
//! assert_eq!(trace.len(), 2);
//! assert!(trace.has_event(|e| matches!(e, CoreEvent::Booted)));
//! ```

use core_types::{CoreId, IrqLine, ThreadId, VirtualTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Something a simulated core did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreEvent {
    /// Boot routine started
    Booted,
    /// Logical thread created
    ThreadCreated { thread: ThreadId, debug_id: u64 },
    /// Control handed from one logical thread to another
    ///
    /// `from` is `None` for the hand-off from the boot context.
    Swapped { from: Option<ThreadId>, to: ThreadId },
    /// Abort requested for a logical thread
    ThreadAborted { thread: ThreadId },
    /// CPU went idle
    Halted,
    /// CPU woken by the hardware side
    Woken,
    /// Interrupt service routine invoked
    IrqServiced { line: IrqLine },
    /// Termination requested while the CPU was running
    TerminateDeferred,
    /// Core cleaned up
    Terminated,
}

/// A single trace record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Virtual time of the event
    pub time: VirtualTime,
    /// Core the event happened on
    pub core: CoreId,
    /// What happened
    pub event: CoreEvent,
}

/// Shared, append-only execution trace
///
/// Cloning yields another handle to the same trace, so every core of a
/// simulation can write into one chronological record.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl ExecutionTrace {
    /// Creates a new empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event
    pub fn record(&self, time: VirtualTime, core: CoreId, event: CoreEvent) {
        self.records.lock().push(TraceRecord { time, core, event });
    }

    /// Returns a copy of all records
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    /// Returns the events of one core, in order
    pub fn events_for_core(&self, core: CoreId) -> Vec<CoreEvent> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.core == core)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Counts events matching a predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CoreEvent) -> bool,
    {
        self.records.lock().iter().filter(|r| predicate(&r.event)).count()
    }

    /// Checks if any event matches the predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&CoreEvent) -> bool,
    {
        self.records.lock().iter().any(|r| predicate(&r.event))
    }

    /// Clears all records
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Returns the number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Checks if the trace is empty
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_creation() {
        let trace = ExecutionTrace::new();
        assert_eq!(trace.len(), 0);
        assert!(trace.is_empty());
    }

    #[test]
    fn test_clones_share_records() {
        let trace = ExecutionTrace::new();
        let other = trace.clone();
        other.record(10, CoreId(0), CoreEvent::Halted);
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.records()[0].time, 10);
    }

    #[test]
    fn test_events_for_core() {
        let trace = ExecutionTrace::new();
        trace.record(0, CoreId(0), CoreEvent::Booted);
        trace.record(0, CoreId(1), CoreEvent::Booted);
        trace.record(5, CoreId(1), CoreEvent::Halted);

        assert_eq!(trace.events_for_core(CoreId(0)), vec![CoreEvent::Booted]);
        assert_eq!(
            trace.events_for_core(CoreId(1)),
            vec![CoreEvent::Booted, CoreEvent::Halted]
        );
    }

    #[test]
    fn test_count_and_clear() {
        let trace = ExecutionTrace::new();
        let line = IrqLine::new(2).unwrap();
        trace.record(1, CoreId(0), CoreEvent::IrqServiced { line });
        trace.record(2, CoreId(0), CoreEvent::IrqServiced { line });
        trace.record(3, CoreId(0), CoreEvent::Halted);

        assert_eq!(
            trace.count_events(|e| matches!(e, CoreEvent::IrqServiced { .. })),
            2
        );
        trace.clear();
        assert!(trace.is_empty());
    }

    #[test]
    fn test_records_serialize() {
        let trace = ExecutionTrace::new();
        trace.record(
            7,
            CoreId(0),
            CoreEvent::Swapped {
                from: None,
                to: ThreadId::new(1),
            },
        );
        let json = serde_json::to_string(&trace.records()).unwrap();
        let back: Vec<TraceRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trace.records());
    }
}
