//! # Interrupt Controller Model
//!
//! A 64-line interrupt controller with per-line priority, enable mask and
//! pending state, plus a global lock.
//!
//! ## Design
//!
//! - **Pending before mask**: raising a disabled line is remembered in
//!   `premask`, so enabling it later delivers the interrupt at once.
//! - **Two ways in**: the hardware side (timers, the driving program)
//!   raises lines with [`InterruptController::raise`], waking the halted
//!   CPU through the scheduler, or with
//!   [`InterruptController::raise_and_wake`], waking it at once. Code
//!   running on the CPU uses [`InterruptController::raise_immediate`] and
//!   gets the interrupt dispatched before the call returns.
//! - **Two-tier masking**: [`IrqSource::ForcedWake`] wakes the CPU even
//!   while interrupts are locked; every other source is held back by the
//!   lock. Neither special source has pending or enable bits, so a forced
//!   wake while locked dispatches nothing: the woken CPU just sees the lock
//!   and returns to whatever it was doing.
//!
//! The controller does not know how to run an ISR. It reaches the CPU
//! through an [`InterruptSink`] installed at wiring time.

use crate::error::fatal;
use crate::time_scheduler::{TimerCell, VirtualTimeScheduler};
use core_types::{CoreId, IrqLine, IrqPriority, IRQ_LINE_COUNT};
use hal::{InterruptHal, IrqKey};
use log::{debug, trace};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// Tie-break rank of the controller's timed event
///
/// Hardware models that raise interrupts register at rank 0, so their
/// raise is always seen before the controller wakes the CPU.
pub const IRQ_CTRL_TIE_BREAK: u32 = 1;

/// Something that can raise an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    /// An addressable line
    Line(IrqLine),
    /// Wakes the CPU even while interrupts are locked
    ForcedWake,
    /// Wakes the CPU unless interrupts are locked
    SpuriousWake,
}

impl From<IrqLine> for IrqSource {
    fn from(line: IrqLine) -> Self {
        IrqSource::Line(line)
    }
}

/// The CPU side of the controller
pub trait InterruptSink: Send + Sync {
    /// Wakes the halted CPU; called from the hardware side
    fn wake_cpu(&self);

    /// Dispatches pending interrupts now; called from code running on the CPU
    fn dispatch_from_sw(&self);
}

struct ControllerState {
    pending: u64,
    premask: u64,
    enabled: u64,
    priorities: [IrqPriority; IRQ_LINE_COUNT],
    current_priority: IrqPriority,
    locked: bool,
    /// Set by a forced wake so the next wake ignores the lock
    lock_ignore: bool,
}

/// Interrupt controller of one simulated core
pub struct InterruptController {
    core: CoreId,
    time: Arc<VirtualTimeScheduler>,
    cell: Arc<TimerCell>,
    state: Mutex<ControllerState>,
    sink: OnceLock<Weak<dyn InterruptSink>>,
}

impl InterruptController {
    /// Creates a controller and registers its timed event with `time`
    ///
    /// Every line starts disabled at the highest priority, with interrupts
    /// unlocked and no interrupt being serviced.
    pub fn new(core: CoreId, time: &Arc<VirtualTimeScheduler>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let cell = Arc::new(TimerCell::new());
            let this = this.clone();
            time.register_event(
                format!("{} irq controller", core),
                Arc::clone(&cell),
                IRQ_CTRL_TIE_BREAK,
                move || {
                    if let Some(controller) = this.upgrade() {
                        controller.timer_triggered();
                    }
                },
            );
            Self {
                core,
                time: Arc::clone(time),
                cell,
                state: Mutex::new(ControllerState {
                    pending: 0,
                    premask: 0,
                    enabled: 0,
                    priorities: [IrqPriority::HIGHEST; IRQ_LINE_COUNT],
                    current_priority: IrqPriority::NONE,
                    locked: false,
                    lock_ignore: false,
                }),
                sink: OnceLock::new(),
            }
        })
    }

    /// Connects the controller to its CPU; may only be done once
    pub fn set_sink(&self, sink: Weak<dyn InterruptSink>) {
        if self.sink.set(sink).is_err() {
            fatal!("{}: interrupt sink installed twice", self.core);
        }
    }

    fn sink(&self) -> Option<Arc<dyn InterruptSink>> {
        let sink = self.sink.get().and_then(Weak::upgrade);
        if sink.is_none() {
            debug!("{}: no CPU attached, interrupt left pending", self.core);
        }
        sink
    }

    fn mark_raised(st: &mut ControllerState, source: IrqSource) {
        match source {
            IrqSource::Line(line) => {
                st.premask |= line.mask();
                if st.enabled & line.mask() != 0 {
                    st.pending |= line.mask();
                }
            }
            IrqSource::ForcedWake => st.lock_ignore = true,
            IrqSource::SpuriousWake => {}
        }
    }

    /// Raises a source from the hardware side
    ///
    /// The CPU is woken at the current virtual time, once every other
    /// hardware event due now has run.
    pub fn raise(&self, source: IrqSource) {
        let wake = {
            let mut st = self.state.lock();
            Self::mark_raised(&mut st, source);
            !st.locked || st.lock_ignore
        };
        trace!("{}: raised {:?}", self.core, source);
        if wake {
            self.cell.arm(self.time.get_time());
        }
    }

    /// Raises a source from the hardware side and wakes the CPU right away
    pub fn raise_and_wake(&self, source: IrqSource) {
        {
            let mut st = self.state.lock();
            Self::mark_raised(&mut st, source);
        }
        trace!("{}: raised {:?} (immediate)", self.core, source);
        self.raising_from_hw_now();
    }

    /// Raises a line from code running on the CPU
    ///
    /// Unless interrupts are locked, the interrupt is dispatched before
    /// this returns. A disabled line is only remembered in the premask.
    pub fn raise_immediate(&self, line: IrqLine) {
        let dispatch = {
            let mut st = self.state.lock();
            Self::mark_raised(&mut st, IrqSource::Line(line));
            !st.locked
        };
        trace!("{}: {} raised from software", self.core, line);
        if dispatch {
            if let Some(sink) = self.sink() {
                sink.dispatch_from_sw();
            }
        }
    }

    fn raising_from_hw_now(&self) {
        let wake = {
            let mut st = self.state.lock();
            if !st.locked || st.lock_ignore {
                st.lock_ignore = false;
                true
            } else {
                false
            }
        };
        if wake {
            if let Some(sink) = self.sink() {
                sink.wake_cpu();
            }
        }
    }

    /// Callback of the controller's timed event
    pub fn timer_triggered(&self) {
        self.cell.disarm();
        self.raising_from_hw_now();
    }

    /// Returns the line that should be serviced now, if any
    ///
    /// Only enabled, pending lines whose priority is strictly higher than
    /// the one currently being serviced qualify. Among those the highest
    /// priority wins, then the lowest line number. Nothing qualifies while
    /// interrupts are locked.
    pub fn highest_pending(&self) -> Option<IrqLine> {
        let st = self.state.lock();
        if st.locked {
            return None;
        }
        let mut winner = None;
        let mut winner_priority = st.current_priority;
        for line in IrqLine::iter_mask(st.pending & st.enabled) {
            let priority = st.priorities[line.number() as usize];
            if priority.preempts(winner_priority) {
                winner = Some(line);
                winner_priority = priority;
            }
        }
        winner
    }

    fn change_lock(&self, locked: bool) -> bool {
        let (previous, dispatch) = {
            let mut st = self.state.lock();
            let previous = st.locked;
            st.locked = locked;
            (previous, previous && !locked && st.pending & st.enabled != 0)
        };
        if dispatch {
            if let Some(sink) = self.sink() {
                sink.dispatch_from_sw();
            }
        }
        previous
    }

    /// Pending lines, as a bitmask
    pub fn irq_status(&self) -> u64 {
        self.state.lock().pending
    }

    /// Lines raised since last cleared, enabled or not, as a bitmask
    pub fn premask(&self) -> u64 {
        self.state.lock().premask
    }

    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.irq_status() & line.mask() != 0
    }

    pub fn priority(&self, line: IrqLine) -> IrqPriority {
        self.state.lock().priorities[line.number() as usize]
    }

    /// Priority of the interrupt being serviced ([`IrqPriority::NONE`] if none)
    pub fn current_priority(&self) -> IrqPriority {
        self.state.lock().current_priority
    }

    pub fn set_current_priority(&self, priority: IrqPriority) {
        self.state.lock().current_priority = priority;
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Forgets every raised line
    pub fn clear_all(&self) {
        let mut st = self.state.lock();
        st.pending = 0;
        st.premask = 0;
    }

    /// Forgets every raised line that is currently enabled
    pub fn clear_all_enabled(&self) {
        let mut st = self.state.lock();
        st.pending = 0;
        st.premask &= !st.enabled;
    }

    pub fn core(&self) -> CoreId {
        self.core
    }
}

impl InterruptHal for InterruptController {
    fn lock(&self) -> IrqKey {
        IrqKey::new(self.change_lock(true))
    }

    fn unlock(&self, key: IrqKey) {
        self.change_lock(key.was_locked());
    }

    fn enable(&self, line: IrqLine) {
        let raised = {
            let mut st = self.state.lock();
            st.enabled |= line.mask();
            st.premask & line.mask() != 0
        };
        if raised {
            self.raise_immediate(line);
        }
    }

    fn disable(&self, line: IrqLine) {
        self.state.lock().enabled &= !line.mask();
    }

    fn is_enabled(&self, line: IrqLine) -> bool {
        self.state.lock().enabled & line.mask() != 0
    }

    fn set_priority(&self, line: IrqLine, priority: IrqPriority) {
        self.state.lock().priorities[line.number() as usize] = priority;
    }

    fn raise_immediate(&self, line: IrqLine) {
        InterruptController::raise_immediate(self, line);
    }

    fn clear(&self, line: IrqLine) {
        let mut st = self.state.lock();
        st.pending &= !line.mask();
        st.premask &= !line.mask();
    }
}

impl fmt::Debug for InterruptController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("InterruptController")
            .field("core", &self.core)
            .field("pending", &format_args!("{:#018x}", st.pending))
            .field("enabled", &format_args!("{:#018x}", st.enabled))
            .field("locked", &st.locked)
            .field("current_priority", &st.current_priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        wakes: AtomicUsize,
        dispatches: AtomicUsize,
    }

    impl InterruptSink for RecordingSink {
        fn wake_cpu(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }

        fn dispatch_from_sw(&self) {
            self.dispatches.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RecordingSink {
        fn wakes(&self) -> usize {
            self.wakes.load(Ordering::SeqCst)
        }

        fn dispatches(&self) -> usize {
            self.dispatches.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        time: Arc<VirtualTimeScheduler>,
        ctrl: Arc<InterruptController>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let time = Arc::new(VirtualTimeScheduler::new(Some(1_000)));
        let ctrl = InterruptController::new(CoreId(2), &time);
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn InterruptSink> = Arc::downgrade(&sink) as Weak<dyn InterruptSink>;
        ctrl.set_sink(weak);
        Fixture { time, ctrl, sink }
    }

    fn line(number: u8) -> IrqLine {
        IrqLine::new(number).unwrap()
    }

    #[test]
    fn test_new_controller_starts_quiet() {
        let f = fixture();
        assert_eq!(f.ctrl.core(), CoreId(2));
        assert!(!f.ctrl.is_locked());
        assert_eq!(f.ctrl.irq_status(), 0);
        assert_eq!(f.ctrl.current_priority(), IrqPriority::NONE);
        assert_eq!(f.ctrl.priority(line(63)), IrqPriority::HIGHEST);
        assert!(!f.cell_armed());
    }

    #[test]
    fn test_priority_resolution_respects_current_priority() {
        let f = fixture();
        let (a, b) = (line(4), line(2));
        f.ctrl.set_priority(a, IrqPriority::new(1));
        f.ctrl.set_priority(b, IrqPriority::new(5));
        f.ctrl.enable(a);
        f.ctrl.enable(b);
        f.ctrl.raise(a.into());
        f.ctrl.raise(b.into());

        f.ctrl.set_current_priority(IrqPriority::new(3));
        assert_eq!(f.ctrl.highest_pending(), Some(a));

        f.ctrl.clear(a);
        assert_eq!(f.ctrl.highest_pending(), None);

        f.ctrl.set_current_priority(IrqPriority::NONE);
        assert_eq!(f.ctrl.highest_pending(), Some(b));
    }

    #[test]
    fn test_lower_number_wins_with_no_interrupt_active() {
        let f = fixture();
        let (a, b) = (line(9), line(3));
        f.ctrl.set_priority(a, IrqPriority::new(1));
        f.ctrl.set_priority(b, IrqPriority::new(5));
        f.ctrl.enable(a);
        f.ctrl.enable(b);
        f.ctrl.raise(a.into());
        f.ctrl.raise(b.into());
        assert_eq!(f.ctrl.highest_pending(), Some(a));
    }

    #[test]
    fn test_equal_priority_does_not_nest() {
        let f = fixture();
        let a = line(1);
        f.ctrl.set_priority(a, IrqPriority::new(2));
        f.ctrl.enable(a);
        f.ctrl.raise(a.into());
        f.ctrl.set_current_priority(IrqPriority::new(2));
        assert_eq!(f.ctrl.highest_pending(), None);
    }

    #[test]
    fn test_disabled_line_remembered_until_enabled() {
        let f = fixture();
        let a = line(7);
        f.ctrl.raise_immediate(a);
        assert_eq!(f.ctrl.irq_status(), 0);
        assert_eq!(f.ctrl.premask(), a.mask());
        let before = f.sink.dispatches();

        f.ctrl.enable(a);
        assert!(f.ctrl.is_pending(a));
        assert_eq!(f.sink.dispatches(), before + 1);
    }

    #[test]
    fn test_lock_defers_software_delivery() {
        let f = fixture();
        let a = line(0);
        f.ctrl.enable(a);

        let key = f.ctrl.lock();
        assert!(!key.was_locked());
        f.ctrl.raise_immediate(a);
        assert_eq!(f.sink.dispatches(), 0);
        assert_eq!(f.ctrl.highest_pending(), None);

        f.ctrl.unlock(key);
        assert_eq!(f.sink.dispatches(), 1);
        assert_eq!(f.ctrl.highest_pending(), Some(a));
    }

    #[test]
    fn test_nested_lock_only_outermost_unlock_delivers() {
        let f = fixture();
        let a = line(0);
        f.ctrl.enable(a);

        let outer = f.ctrl.lock();
        let inner = f.ctrl.lock();
        assert!(inner.was_locked());
        f.ctrl.raise_immediate(a);

        f.ctrl.unlock(inner);
        assert!(f.ctrl.is_locked());
        assert_eq!(f.sink.dispatches(), 0);

        f.ctrl.unlock(outer);
        assert!(!f.ctrl.is_locked());
        assert_eq!(f.sink.dispatches(), 1);
    }

    #[test]
    fn test_unlock_without_pending_does_not_dispatch() {
        let f = fixture();
        let key = f.ctrl.lock();
        f.ctrl.unlock(key);
        assert_eq!(f.sink.dispatches(), 0);
    }

    #[test]
    fn test_hardware_raise_wakes_through_scheduler() {
        let f = fixture();
        let a = line(3);
        f.ctrl.enable(a);
        f.ctrl.raise(a.into());
        assert_eq!(f.sink.wakes(), 0);

        f.time.step().unwrap();
        assert_eq!(f.sink.wakes(), 1);
        assert_eq!(f.time.get_time(), 0);
        assert!(!f.cell_armed());
    }

    #[test]
    fn test_hardware_raise_while_locked_does_not_wake() {
        let f = fixture();
        let _key = f.ctrl.lock();
        f.ctrl.raise(line(3).into());
        assert!(!f.cell_armed());
    }

    #[test]
    fn test_forced_wake_bypasses_lock() {
        let f = fixture();
        let _key = f.ctrl.lock();
        f.ctrl.raise_and_wake(IrqSource::ForcedWake);
        assert_eq!(f.sink.wakes(), 1);
        // No line became pending
        assert_eq!(f.ctrl.irq_status(), 0);
    }

    #[test]
    fn test_forced_wake_through_scheduler_bypasses_lock() {
        let f = fixture();
        let _key = f.ctrl.lock();
        f.ctrl.raise(IrqSource::ForcedWake);
        f.time.step().unwrap();
        assert_eq!(f.sink.wakes(), 1);
    }

    #[test]
    fn test_spurious_wake_ignored_while_locked() {
        let f = fixture();
        let key = f.ctrl.lock();
        f.ctrl.raise_and_wake(IrqSource::SpuriousWake);
        assert_eq!(f.sink.wakes(), 0);

        f.ctrl.unlock(key);
        f.ctrl.raise_and_wake(IrqSource::SpuriousWake);
        assert_eq!(f.sink.wakes(), 1);
    }

    #[test]
    fn test_forced_wake_only_bypasses_once() {
        let f = fixture();
        let _key = f.ctrl.lock();
        f.ctrl.raise_and_wake(IrqSource::ForcedWake);
        f.ctrl.raise_and_wake(IrqSource::SpuriousWake);
        assert_eq!(f.sink.wakes(), 1);
    }

    #[test]
    fn test_clear_all_enabled_keeps_disabled_premask() {
        let f = fixture();
        let (on, off) = (line(1), line(2));
        f.ctrl.enable(on);
        f.ctrl.raise(on.into());
        f.ctrl.raise(off.into());

        f.ctrl.clear_all_enabled();
        assert_eq!(f.ctrl.irq_status(), 0);
        assert_eq!(f.ctrl.premask(), off.mask());

        f.ctrl.clear_all();
        assert_eq!(f.ctrl.premask(), 0);
    }

    #[test]
    fn test_disable_hides_pending_line() {
        let f = fixture();
        let a = line(5);
        f.ctrl.enable(a);
        f.ctrl.raise(a.into());
        f.ctrl.disable(a);
        assert!(!f.ctrl.is_enabled(a));
        assert_eq!(f.ctrl.highest_pending(), None);
    }

    #[test]
    #[should_panic(expected = "interrupt sink installed twice")]
    fn test_sink_installed_twice_is_fatal() {
        let f = fixture();
        let weak: Weak<dyn InterruptSink> = Arc::downgrade(&f.sink) as Weak<dyn InterruptSink>;
        f.ctrl.set_sink(weak);
    }

    impl Fixture {
        fn cell_armed(&self) -> bool {
            self.ctrl.cell.is_armed()
        }
    }

    proptest! {
        #[test]
        fn prop_highest_pending_matches_reference(
            lines in proptest::collection::vec((0u8..64, 0u8..=255), 0..12),
            current in 0u16..=256,
        ) {
            let f = fixture();
            for (number, priority) in &lines {
                let line = line(*number);
                f.ctrl.set_priority(line, IrqPriority::new(*priority));
                f.ctrl.enable(line);
                f.ctrl.raise(line.into());
            }
            let current = if current == 256 {
                IrqPriority::NONE
            } else {
                IrqPriority::new(current as u8)
            };
            f.ctrl.set_current_priority(current);

            // Last priority written for a line wins
            let expected = (0u8..64)
                .filter_map(|number| {
                    let line = line(number);
                    f.ctrl.is_pending(line).then(|| (f.ctrl.priority(line), number))
                })
                .filter(|(priority, _)| priority.preempts(current))
                .min()
                .map(|(_, number)| line(number));

            prop_assert_eq!(f.ctrl.highest_pending(), expected);
        }
    }
}
