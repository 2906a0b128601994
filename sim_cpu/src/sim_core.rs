//! # Simulated Core
//!
//! Wires together everything one simulated CPU core is made of: the thread
//! emulator, the interrupt controller, the tick timer, the run/halt
//! lifecycle and the embedded kernel running on top. All cores of a
//! simulation share one [`VirtualTimeScheduler`].
//!
//! A [`SimCore`] is a cheap handle: clones refer to the same core. It is
//! also the `Cpu` type the embedded kernel is given in every callback.

use crate::config::SimConfig;
use crate::error::{fatal, SimError};
use crate::irq_ctrl::{InterruptController, InterruptSink};
use crate::irq_handler::IrqDispatcher;
use crate::lifecycle::{CpuLifecycle, CpuState, TerminateAction};
use crate::thread_emulator::{exit_context, ThreadEmulator};
use crate::time_scheduler::VirtualTimeScheduler;
use crate::timer_model::TickTimer;
use crate::trace::{CoreEvent, ExecutionTrace};
use core_types::{CoreId, IrqLine, ThreadId};
use hal::{CpuHal, EmbeddedKernel};
use log::{debug, info, warn};
use std::sync::{Arc, Weak};

/// The embedded kernel as seen by a core
pub type KernelRef<P> = Arc<dyn EmbeddedKernel<SimCore<P>, Payload = P>>;

struct CoreInner<P: Send + 'static> {
    id: CoreId,
    time: Arc<VirtualTimeScheduler>,
    irq: Arc<InterruptController>,
    tick: Arc<TickTimer>,
    threads: ThreadEmulator<P>,
    lifecycle: Arc<CpuLifecycle>,
    dispatcher: IrqDispatcher,
    kernel: KernelRef<P>,
    trace: ExecutionTrace,
    self_ref: Weak<CoreInner<P>>,
}

/// Handle to one simulated core
pub struct SimCore<P: Send + 'static> {
    inner: Arc<CoreInner<P>>,
}

impl<P: Send + 'static> Clone for SimCore<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Send + 'static> CoreInner<P> {
    fn handle(&self) -> Option<SimCore<P>> {
        self.self_ref.upgrade().map(|inner| SimCore { inner })
    }
}

impl<P: Send + 'static> InterruptSink for CoreInner<P> {
    fn wake_cpu(&self) {
        let Some(core) = self.handle() else {
            return;
        };
        // The driving side only runs while the CPU is halted, so a running
        // CPU means the wake came from code on the CPU itself
        if self.lifecycle.is_running() {
            self.dispatcher.handle(&core);
        } else {
            core.interrupt_delivered();
        }
    }

    fn dispatch_from_sw(&self) {
        if !self.lifecycle.is_running() {
            fatal!(
                "{}: software interrupt dispatch while CPU {:?}",
                self.id,
                self.lifecycle.state()
            );
        }
        if let Some(core) = self.handle() {
            self.dispatcher.handle(&core);
        }
    }
}

impl<P: Send + 'static> SimCore<P> {
    /// Builds a core and registers its hardware models with `time`
    pub fn new(
        id: CoreId,
        config: &SimConfig,
        time: &Arc<VirtualTimeScheduler>,
        kernel: KernelRef<P>,
        trace: ExecutionTrace,
    ) -> Self {
        let irq = InterruptController::new(id, time);
        let tick = TickTimer::new(id, config.tick_irq, time, &irq);

        let inner = Arc::new_cyclic(|this: &Weak<CoreInner<P>>| {
            let entry_core = this.clone();
            let threads = ThreadEmulator::new(id.to_string(), &config.thread_table, move |payload: P| {
                let Some(inner) = entry_core.upgrade() else {
                    warn!("{}: thread started after its core was dropped", id);
                    exit_context();
                };
                let core = SimCore { inner };
                let kernel = Arc::clone(&core.inner.kernel);
                kernel.thread_entry(&core, payload);
            });

            let sink: Weak<dyn InterruptSink> = this.clone();
            irq.set_sink(sink);

            CoreInner {
                id,
                time: Arc::clone(time),
                irq: Arc::clone(&irq),
                tick: Arc::clone(&tick),
                threads,
                lifecycle: CpuLifecycle::new(id),
                dispatcher: IrqDispatcher::new(id),
                kernel,
                trace,
                self_ref: this.clone(),
            }
        });
        Self { inner }
    }

    pub(crate) fn record(&self, event: CoreEvent) {
        self.inner
            .trace
            .record(self.inner.time.get_time(), self.inner.id, event);
    }

    /// Boots the CPU: runs the kernel's boot routine until the CPU halts
    pub fn boot(&self) -> Result<(), SimError> {
        if self.state() != CpuState::NotBooted {
            return Err(SimError::AlreadyBooted(self.inner.id));
        }
        let core = self.clone();
        self.record(CoreEvent::Booted);
        info!("{}: booting at {}us", self.inner.id, self.inner.time.get_time());
        self.inner.lifecycle.boot(move || {
            let kernel = Arc::clone(&core.inner.kernel);
            kernel.boot(&core);
        })?;
        if self.inner.lifecycle.terminate_pending() {
            self.terminate();
        }
        Ok(())
    }

    /// Idles the CPU until an interrupt arrives, then services it
    ///
    /// Called by embedded code. Returns once this context is scheduled
    /// again, which may be much later if an ISR caused a thread swap.
    pub fn halt(&self) {
        self.record(CoreEvent::Halted);
        self.inner.lifecycle.halt();
        self.record(CoreEvent::Woken);
        self.inner.dispatcher.handle(self);
    }

    /// Hands the halted CPU to embedded code until it halts again
    ///
    /// Called from the hardware side. Completes a termination that was
    /// requested while the CPU was running.
    pub fn interrupt_delivered(&self) {
        if !self.inner.lifecycle.wake() {
            return;
        }
        if self.inner.lifecycle.terminate_pending() {
            self.terminate();
        }
    }

    /// Creates a logical thread; it runs once a swap names it
    pub fn new_thread(&self, payload: P) -> ThreadId {
        let thread = self.inner.threads.new_thread(payload);
        let debug_id = self.inner.threads.get_unique_debug_id(thread);
        self.record(CoreEvent::ThreadCreated { thread, debug_id });
        thread
    }

    /// Switches from the calling thread `current` to `next`
    pub fn swap(&self, next: ThreadId, current: ThreadId) {
        self.record(CoreEvent::Swapped {
            from: Some(current),
            to: next,
        });
        self.inner.threads.swap(next, current);
    }

    /// Hands the CPU from the boot context to the first logical thread
    ///
    /// The boot context ends here.
    pub fn first_thread_start(&self, next: ThreadId) -> ! {
        self.record(CoreEvent::Swapped {
            from: None,
            to: next,
        });
        self.inner.threads.first_thread_start(next);
        exit_context()
    }

    /// Requests that a logical thread be aborted
    pub fn abort_thread(&self, thread: ThreadId) {
        self.record(CoreEvent::ThreadAborted { thread });
        self.inner.threads.abort(thread);
    }

    /// Stops the core for good
    ///
    /// If embedded code is running, the stop is deferred until the CPU
    /// halts. Otherwise every execution context of the core exits and is
    /// joined before this returns.
    pub fn terminate(&self) {
        match self.inner.lifecycle.request_terminate() {
            TerminateAction::Deferred => self.record(CoreEvent::TerminateDeferred),
            TerminateAction::AlreadyTerminating => {}
            TerminateAction::Proceed => self.cleanup(),
        }
    }

    fn cleanup(&self) {
        debug!("{}: cleaning up", self.inner.id);
        self.inner.threads.terminate();
        self.inner.threads.join_remaining();
        if let Some(handle) = self.inner.lifecycle.take_boot_handle() {
            if handle.join().is_err() {
                warn!("{}: boot context ended with a panic", self.inner.id);
            }
        }
        self.record(CoreEvent::Terminated);
        info!("{}: terminated at {}us", self.inner.id, self.inner.time.get_time());
    }

    /// Ends the whole simulation from embedded code
    ///
    /// Stops the event loop and terminates this core once it halts. Never
    /// returns: the calling context exits during termination.
    pub fn exit(&self) -> ! {
        info!("{}: exit requested by embedded code", self.inner.id);
        self.inner.time.request_stop();
        self.terminate();
        // Only left through termination
        loop {
            self.inner.lifecycle.halt();
        }
    }

    pub fn id(&self) -> CoreId {
        self.inner.id
    }

    pub fn threads(&self) -> &ThreadEmulator<P> {
        &self.inner.threads
    }

    pub fn irq(&self) -> &Arc<InterruptController> {
        &self.inner.irq
    }

    pub fn tick(&self) -> &Arc<TickTimer> {
        &self.inner.tick
    }

    pub fn time(&self) -> &Arc<VirtualTimeScheduler> {
        &self.inner.time
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.inner.trace
    }

    pub fn state(&self) -> CpuState {
        self.inner.lifecycle.state()
    }

    /// Line whose ISR is running, if any
    pub fn current_irq(&self) -> Option<IrqLine> {
        self.inner.dispatcher.current_irq()
    }

    /// Depth of interrupt dispatch (0 outside any ISR)
    pub fn irq_nesting(&self) -> u32 {
        self.inner.dispatcher.nesting()
    }

    pub(crate) fn kernel(&self) -> &KernelRef<P> {
        &self.inner.kernel
    }
}

impl<P: Send + 'static> CpuHal for SimCore<P> {
    fn halt(&self) {
        SimCore::halt(self);
    }

    fn cpu_id(&self) -> CoreId {
        self.inner.id
    }

    fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }
}

impl<P: Send + 'static> std::fmt::Debug for SimCore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCore")
            .field("id", &self.inner.id)
            .field("state", &self.inner.lifecycle.state())
            .field("threads", &self.inner.threads.thread_count())
            .finish()
    }
}
