//! # Tick Timer Model
//!
//! The timer hardware of one simulated core: a periodic system tick plus a
//! one-shot wake-up alarm, both in virtual time.
//!
//! ## Use Cases
//!
//! - The embedded kernel's system tick (`enable(period)` from its boot code)
//! - Tickless idle: `set_silent_ticks(n)` skips the next `n` tick interrupts
//! - Timed wake-ups of a halted CPU, even with interrupts locked
//!   (`wake_in_time`)
//!
//! Both timers share one [`TimerCell`], armed at whichever fires first.

use crate::error::fatal;
use crate::irq_ctrl::{InterruptController, IrqSource};
use crate::time_scheduler::{TimerCell, VirtualTimeScheduler};
use core_types::{CoreId, IrqLine, VirtualTime, NEVER};
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Tie-break rank of the timer's event; fires before the controller's
pub const TICK_TIMER_TIE_BREAK: u32 = 0;

#[derive(Debug)]
struct TimerState {
    /// Tick period, 0 while disabled
    period: VirtualTime,
    tick_at: VirtualTime,
    alarm_at: VirtualTime,
    silent_ticks: u64,
}

/// Periodic tick and wake-up alarm of one core
#[derive(Debug)]
pub struct TickTimer {
    core: CoreId,
    line: IrqLine,
    time: Arc<VirtualTimeScheduler>,
    irq: Arc<InterruptController>,
    cell: Arc<TimerCell>,
    state: Mutex<TimerState>,
}

impl TickTimer {
    /// Creates a disabled timer raising `line` on `irq`
    pub fn new(
        core: CoreId,
        line: IrqLine,
        time: &Arc<VirtualTimeScheduler>,
        irq: &Arc<InterruptController>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let cell = Arc::new(TimerCell::new());
            let this = this.clone();
            time.register_event(
                format!("{} tick timer", core),
                Arc::clone(&cell),
                TICK_TIMER_TIE_BREAK,
                move || {
                    if let Some(timer) = this.upgrade() {
                        timer.timer_reached();
                    }
                },
            );
            Self {
                core,
                line,
                time: Arc::clone(time),
                irq: Arc::clone(irq),
                cell,
                state: Mutex::new(TimerState {
                    period: 0,
                    tick_at: NEVER,
                    alarm_at: NEVER,
                    silent_ticks: 0,
                }),
            }
        })
    }

    fn update_cell(&self, st: &TimerState) {
        self.cell.arm(st.tick_at.min(st.alarm_at));
    }

    /// Starts the periodic tick; the first tick comes one period from now
    pub fn enable(&self, period: VirtualTime) {
        if period == 0 {
            fatal!("{}: tick period must be non-zero", self.core);
        }
        let mut st = self.state.lock();
        st.period = period;
        st.tick_at = self.time.get_time().saturating_add(period);
        self.update_cell(&st);
        debug!("{}: tick every {}us, first at {}us", self.core, period, st.tick_at);
    }

    /// Stops the periodic tick (the alarm is unaffected)
    pub fn disable(&self) {
        let mut st = self.state.lock();
        st.period = 0;
        st.tick_at = NEVER;
        self.update_cell(&st);
        debug!("{}: tick disabled", self.core);
    }

    /// Wakes the CPU at `time`, even if interrupts are locked then
    ///
    /// Only ever moves the alarm earlier. A time already past fires at the
    /// current time.
    pub fn wake_in_time(&self, time: VirtualTime) {
        let time = time.max(self.time.get_time());
        let mut st = self.state.lock();
        if time < st.alarm_at {
            st.alarm_at = time;
            self.update_cell(&st);
            trace!("{}: wake-up alarm at {}us", self.core, time);
        }
    }

    /// Skips the next `ticks` tick interrupts
    pub fn set_silent_ticks(&self, ticks: u64) {
        self.state.lock().silent_ticks = ticks;
    }

    pub fn pending_silent_ticks(&self) -> u64 {
        self.state.lock().silent_ticks
    }

    /// Tick period, `None` while disabled
    pub fn period(&self) -> Option<VirtualTime> {
        match self.state.lock().period {
            0 => None,
            period => Some(period),
        }
    }

    /// Next time the tick fires
    pub fn next_tick(&self) -> VirtualTime {
        self.state.lock().tick_at
    }

    pub fn line(&self) -> IrqLine {
        self.line
    }

    /// Callback of the timer's event
    pub fn timer_reached(&self) {
        let now = self.time.get_time();
        let mut raise = Vec::with_capacity(2);
        {
            let mut st = self.state.lock();
            if st.alarm_at == now {
                st.alarm_at = NEVER;
                raise.push(IrqSource::ForcedWake);
            }
            if st.tick_at == now {
                st.tick_at = now.saturating_add(st.period);
                if st.silent_ticks > 0 {
                    st.silent_ticks -= 1;
                    trace!("{}: silent tick at {}us", self.core, now);
                } else {
                    raise.push(IrqSource::Line(self.line));
                }
            }
            self.update_cell(&st);
        }
        for source in raise {
            self.irq.raise(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq_ctrl::InterruptSink;
    use crate::time_scheduler::StepOutcome;
    use hal::InterruptHal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct WakeCounter(AtomicUsize);

    impl InterruptSink for WakeCounter {
        fn wake_cpu(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn dispatch_from_sw(&self) {}
    }

    struct Fixture {
        time: Arc<VirtualTimeScheduler>,
        irq: Arc<InterruptController>,
        timer: Arc<TickTimer>,
        wakes: Arc<WakeCounter>,
    }

    fn fixture(end_of_time: VirtualTime) -> Fixture {
        let time = Arc::new(VirtualTimeScheduler::new(Some(end_of_time)));
        let irq = InterruptController::new(CoreId(0), &time);
        let wakes = Arc::new(WakeCounter::default());
        let sink: Weak<dyn InterruptSink> = Arc::downgrade(&wakes) as Weak<dyn InterruptSink>;
        irq.set_sink(sink);
        let timer = TickTimer::new(CoreId(0), IrqLine::new(0).unwrap(), &time, &irq);
        Fixture {
            time,
            irq,
            timer,
            wakes,
        }
    }

    fn run(f: &Fixture) -> Vec<VirtualTime> {
        let mut times = Vec::new();
        while let Ok(StepOutcome::Stepped { time, .. }) = f.time.step() {
            times.push(time);
        }
        times
    }

    impl Fixture {
        fn wakes(&self) -> usize {
            self.wakes.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_disabled_timer_never_fires() {
        let f = fixture(1_000);
        assert_eq!(f.timer.period(), None);
        assert_eq!(run(&f), Vec::<VirtualTime>::new());
        assert_eq!(f.time.get_time(), 1_000);
    }

    #[test]
    fn test_periodic_tick_raises_line() {
        let f = fixture(350);
        f.irq.enable(f.timer.line());
        f.timer.enable(100);

        run(&f);
        // Three ticks, each followed by the controller waking the CPU
        assert_eq!(f.wakes(), 3);
        assert!(f.irq.is_pending(f.timer.line()));
        assert_eq!(f.timer.next_tick(), 400);
    }

    #[test]
    fn test_silent_ticks_are_skipped() {
        let f = fixture(350);
        f.timer.enable(100);
        f.timer.set_silent_ticks(2);

        run(&f);
        assert_eq!(f.wakes(), 1);
        assert_eq!(f.timer.pending_silent_ticks(), 0);
    }

    #[test]
    fn test_disable_stops_ticks() {
        let f = fixture(1_000);
        f.timer.enable(100);
        f.time.step().unwrap();
        f.timer.disable();
        run(&f);
        assert_eq!(f.wakes(), 1);
        assert_eq!(f.timer.next_tick(), NEVER);
    }

    #[test]
    fn test_wake_in_time_forces_wake_while_locked() {
        let f = fixture(1_000);
        let _key = f.irq.lock();
        f.timer.wake_in_time(250);

        assert_eq!(run(&f), vec![250, 250]);
        assert_eq!(f.wakes(), 1);
        assert_eq!(f.irq.irq_status(), 0);
    }

    #[test]
    fn test_wake_in_time_only_moves_earlier() {
        let f = fixture(1_000);
        f.timer.wake_in_time(300);
        f.timer.wake_in_time(500);
        f.timer.wake_in_time(200);

        assert_eq!(run(&f), vec![200, 200]);
        assert_eq!(f.wakes(), 1);
    }

    #[test]
    fn test_tick_and_alarm_at_same_time() {
        let f = fixture(100);
        f.irq.enable(f.timer.line());
        f.timer.enable(100);
        f.timer.wake_in_time(100);

        // One timer event, then one controller wake for both sources
        assert_eq!(run(&f), vec![100, 100]);
        assert_eq!(f.wakes(), 1);
        assert!(f.irq.is_pending(f.timer.line()));
    }

    #[test]
    #[should_panic(expected = "tick period must be non-zero")]
    fn test_zero_period_is_fatal() {
        let f = fixture(1_000);
        f.timer.enable(0);
    }
}
