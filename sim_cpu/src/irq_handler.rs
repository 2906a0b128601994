//! Interrupt dispatch
//!
//! Vectors pending interrupts to the embedded kernel's ISR, highest
//! priority first, then lets the kernel reschedule once the outermost
//! level is done.

use crate::sim_core::SimCore;
use crate::trace::CoreEvent;
use core_types::{CoreId, IrqLine};
use hal::{InterruptHal, IrqOutcome};
use log::trace;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct DispatchState {
    nesting: u32,
    may_swap: bool,
    current_irq: Option<IrqLine>,
}

/// Per-core interrupt dispatch state
#[derive(Debug)]
pub struct IrqDispatcher {
    core: CoreId,
    state: Mutex<DispatchState>,
}

impl IrqDispatcher {
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Line whose ISR is running, if any
    pub fn current_irq(&self) -> Option<IrqLine> {
        self.state.lock().current_irq
    }

    /// Nesting depth of the dispatch loop
    pub fn nesting(&self) -> u32 {
        self.state.lock().nesting
    }

    /// Services every interrupt that may preempt the current context
    ///
    /// Runs on the CPU, either right after it wakes from halt or when code
    /// on the CPU raised or unmasked an interrupt. An ISR raising a
    /// higher-priority line re-enters this function.
    pub(crate) fn handle<P: Send + 'static>(&self, core: &SimCore<P>) {
        let irq = core.irq();
        if irq.is_locked() {
            trace!("{}: woken with interrupts locked", self.core);
            return;
        }
        let Some(mut line) = irq.highest_pending() else {
            trace!("{}: spurious wake", self.core);
            return;
        };

        {
            let mut st = self.state.lock();
            if st.nesting == 0 {
                st.may_swap = false;
            }
            st.nesting += 1;
        }

        loop {
            let previous_priority = irq.current_priority();
            let previous_irq = self.state.lock().current_irq.replace(line);
            irq.set_current_priority(irq.priority(line));
            irq.clear(line);

            core.record(CoreEvent::IrqServiced { line });
            trace!("{}: servicing {}", self.core, line);
            if core.kernel().isr(core, line) == IrqOutcome::Reschedule {
                self.state.lock().may_swap = true;
            }

            irq.set_current_priority(previous_priority);
            self.state.lock().current_irq = previous_irq;

            match irq.highest_pending() {
                Some(next) => line = next,
                None => break,
            }
        }

        let reschedule = {
            let mut st = self.state.lock();
            st.nesting -= 1;
            st.nesting == 0 && st.may_swap
        };
        if reschedule {
            if let Some(request) = core.kernel().reschedule(core) {
                core.swap(request.next, request.current);
            }
        }
    }
}
