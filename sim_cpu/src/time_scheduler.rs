//! # Virtual Time Scheduler
//!
//! Owns simulated time and advances it event by event.
//!
//! ## Philosophy
//!
//! - **Time only moves here**: no time passes while embedded code runs.
//!   The clock jumps straight to the next armed event.
//! - **Sources own their timers**: each hardware model keeps its next
//!   event time in a [`TimerCell`] it arms and disarms at will. The
//!   scheduler only reads the cells when looking for the next event.
//! - **Deterministic ties**: events due at the same time fire by tie-break
//!   rank, then by registration order.
//!
//! ## Example
//!
//! ```
//! use sim_cpu::time_scheduler::{StepOutcome, TimerCell, VirtualTimeScheduler};
//! use std::sync::Arc;
//!
//! let scheduler = VirtualTimeScheduler::new(Some(1_000));
//! let cell = Arc::new(TimerCell::new());
//! let fired = Arc::clone(&cell);
//! scheduler.register_event("once", Arc::clone(&cell), 0, move || fired.disarm());
//!
//! cell.arm(250);
//! assert!(matches!(scheduler.step(), Ok(StepOutcome::Stepped { time: 250, .. })));
//! assert_eq!(scheduler.step(), Ok(StepOutcome::Finished { time: 1_000 }));
//! ```

use crate::error::{fatal, SimError};
use core_types::{VirtualTime, NEVER};
use hal::TimerDevice;
use log::{debug, info, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Next event time of one hardware model; [`NEVER`] means disarmed
#[derive(Debug)]
pub struct TimerCell(AtomicU64);

impl TimerCell {
    /// Creates a disarmed cell
    pub fn new() -> Self {
        Self(AtomicU64::new(NEVER))
    }

    /// Schedules the event at `time`
    pub fn arm(&self, time: VirtualTime) {
        self.0.store(time, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.0.store(NEVER, Ordering::SeqCst);
    }

    /// Returns the armed time, [`NEVER`] if disarmed
    pub fn get(&self) -> VirtualTime {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.get() != NEVER
    }
}

impl Default for TimerCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle of a timed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(usize);

impl EventId {
    /// Registration index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event[{}]", self.0)
    }
}

/// Result of [`VirtualTimeScheduler::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// An event fired at `time`
    Stepped { time: VirtualTime, event: EventId },
    /// The simulation is over (end of time reached or stop requested)
    Finished { time: VirtualTime },
}

type Callback = Arc<dyn Fn() + Send + Sync>;

struct TimedEvent {
    name: String,
    cell: Arc<TimerCell>,
    tie_break: u32,
    callback: Callback,
}

/// Global virtual clock and event loop
pub struct VirtualTimeScheduler {
    now: AtomicU64,
    end_of_time: AtomicU64,
    stop: AtomicBool,
    events: Mutex<Vec<TimedEvent>>,
}

impl VirtualTimeScheduler {
    /// Creates a scheduler at time 0
    ///
    /// With `end_of_time` set, the simulation finishes once no event is due
    /// at or before it.
    pub fn new(end_of_time: Option<VirtualTime>) -> Self {
        Self {
            now: AtomicU64::new(0),
            end_of_time: AtomicU64::new(end_of_time.unwrap_or(NEVER)),
            stop: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Registers a timed event source
    ///
    /// `callback` runs on the hardware side each time the clock reaches the
    /// cell's armed time. It must re-arm or disarm the cell.
    pub fn register_event<F>(
        &self,
        name: impl Into<String>,
        cell: Arc<TimerCell>,
        tie_break: u32,
        callback: F,
    ) -> EventId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut events = self.events.lock();
        let id = EventId(events.len());
        let name = name.into();
        debug!("registered timed event {} '{}' (tie-break {})", id, name, tie_break);
        events.push(TimedEvent {
            name,
            cell,
            tie_break,
            callback: Arc::new(callback),
        });
        id
    }

    /// Current virtual time
    pub fn get_time(&self) -> VirtualTime {
        self.now.load(Ordering::SeqCst)
    }

    /// Sets (or clears, with `None`) the end of time
    pub fn set_end_of_time(&self, end_of_time: Option<VirtualTime>) {
        self.end_of_time
            .store(end_of_time.unwrap_or(NEVER), Ordering::SeqCst);
    }

    pub fn end_of_time(&self) -> Option<VirtualTime> {
        match self.end_of_time.load(Ordering::SeqCst) {
            NEVER => None,
            end => Some(end),
        }
    }

    /// Makes the next `step` finish the simulation
    pub fn request_stop(&self) {
        info!("simulation stop requested at {}us", self.get_time());
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Finds the earliest armed event
    ///
    /// Ties go to the lower tie-break rank, then to the earlier registration.
    pub fn find_next(&self) -> Option<(EventId, VirtualTime)> {
        self.events
            .lock()
            .iter()
            .enumerate()
            .map(|(index, event)| (event.cell.get(), event.tie_break, index))
            .filter(|(time, _, _)| *time != NEVER)
            .min()
            .map(|(time, _, index)| (EventId(index), time))
    }

    /// Advances the clock to the next event and runs it
    ///
    /// Returns [`SimError::NothingScheduled`] if no event is armed and no
    /// end of time is configured, since the simulation could never move on.
    pub fn step(&self) -> Result<StepOutcome, SimError> {
        let now = self.get_time();
        if self.stop_requested() {
            return Ok(StepOutcome::Finished { time: now });
        }

        let end_of_time = self.end_of_time();
        let (event, time) = match (self.find_next(), end_of_time) {
            (Some(next), _) => next,
            (None, Some(end)) => return Ok(self.finish(now, end)),
            (None, None) => return Err(SimError::NothingScheduled),
        };

        if time < now {
            fatal!(
                "time going backwards: {} due at {}us while now is {}us",
                event,
                time,
                now
            );
        }
        if let Some(end) = end_of_time {
            if time > end {
                return Ok(self.finish(now, end));
            }
        }

        let (name, callback) = {
            let events = self.events.lock();
            let entry = &events[event.index()];
            (entry.name.clone(), Arc::clone(&entry.callback))
        };
        self.now.store(time, Ordering::SeqCst);
        trace!("{}us: {} '{}'", time, event, name);
        callback();
        Ok(StepOutcome::Stepped { time, event })
    }

    fn finish(&self, now: VirtualTime, end: VirtualTime) -> StepOutcome {
        let time = now.max(end);
        self.now.store(time, Ordering::SeqCst);
        info!("end of time reached at {}us", time);
        StepOutcome::Finished { time }
    }
}

impl fmt::Debug for VirtualTimeScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualTimeScheduler")
            .field("now", &self.get_time())
            .field("end_of_time", &self.end_of_time())
            .field("events", &self.events.lock().len())
            .finish()
    }
}

impl TimerDevice for VirtualTimeScheduler {
    fn poll_ticks(&self) -> u64 {
        self.get_time()
    }
}
