//! Test utilities
//!
//! [`ScriptedKernel`] is a deliberately small embedded kernel: a FIFO
//! round-robin run queue whose threads run test-supplied closures. It is
//! enough to drive every simulator path (boot, swaps, halts, interrupts,
//! aborts, termination) from a test without a real kernel.
//!
//! ```no_run
//! use sim_cpu::test_utils::{ScriptedKernel, Task};
//! use sim_cpu::{SimConfig, Simulator};
//! use std::sync::Arc;
//!
//! let kernel = Arc::new(
//!     ScriptedKernel::new()
//!         .with_task("main", Task::new(|ctx| ctx.exit())),
//! );
//! let sim = Simulator::new(SimConfig::default().with_end_of_time(1_000), |_| {
//!     kernel.clone() as sim_cpu::KernelRef<Task>
//! })
//! .unwrap();
//! sim.boot_all().unwrap();
//! sim.run().unwrap();
//! ```

use crate::error::fatal;
use crate::sim_core::SimCore;
use core_types::{IrqLine, ThreadId, ThreadState, VirtualTime};
use hal::{EmbeddedKernel, InterruptHal, IrqOutcome, SwapRequest};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// What a logical thread of a [`ScriptedKernel`] sees
pub struct TaskContext<'a> {
    cpu: &'a SimCore<Task>,
    kernel: &'a ScriptedKernel,
    me: ThreadId,
}

impl TaskContext<'_> {
    pub fn cpu(&self) -> &SimCore<Task> {
        self.cpu
    }

    pub fn kernel(&self) -> &ScriptedKernel {
        self.kernel
    }

    /// The calling thread
    pub fn me(&self) -> ThreadId {
        self.me
    }

    pub fn now(&self) -> VirtualTime {
        self.cpu.time().get_time()
    }

    /// Gives the CPU to the next ready thread, if any
    pub fn yield_now(&self) {
        self.kernel.yield_now(self.cpu, self.me);
    }

    /// Gives the CPU to a specific thread
    pub fn switch_to(&self, next: ThreadId) {
        self.kernel.switch_to(self.cpu, self.me, next);
    }

    /// Idles until an interrupt has been serviced and this thread runs again
    pub fn halt(&self) {
        self.cpu.halt();
    }

    /// Creates a ready thread
    pub fn spawn(&self, name: &str, task: Task) -> ThreadId {
        self.kernel.spawn(self.cpu, name, task)
    }

    /// Aborts a thread; aborting the caller takes effect at its next swap
    pub fn abort(&self, thread: ThreadId) {
        self.kernel.abort(self.cpu, thread);
    }

    /// Ends the simulation
    pub fn exit(&self) -> ! {
        self.cpu.exit()
    }
}

/// Body of a scripted thread
pub struct Task(Box<dyn FnOnce(&TaskContext<'_>) + Send>);

impl Task {
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) + Send + 'static,
    {
        Self(Box::new(body))
    }
}

/// Interrupt service routine of a [`ScriptedKernel`]
pub type IsrFn = Arc<dyn Fn(&SimCore<Task>, &ScriptedKernel, IrqLine) -> IrqOutcome + Send + Sync>;

#[derive(Debug, Default)]
struct RunQueue {
    ready: VecDeque<ThreadId>,
    current: Option<ThreadId>,
    /// Threads whose body returned; they idle and are never queued again
    finished: Vec<ThreadId>,
    pending_switch: Option<ThreadId>,
}

/// FIFO round-robin kernel driven by closures
#[derive(Default)]
pub struct ScriptedKernel {
    boot_tasks: Mutex<Vec<(String, Task)>>,
    tick_period: Option<VirtualTime>,
    isrs: HashMap<IrqLine, IsrFn>,
    run_queue: Mutex<RunQueue>,
}

impl ScriptedKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a thread created at boot; the first one added runs first
    pub fn with_task(self, name: &str, task: Task) -> Self {
        self.boot_tasks.lock().push((name.to_string(), task));
        self
    }

    /// Enables the core's tick timer and its line at boot
    pub fn with_tick(mut self, period: VirtualTime) -> Self {
        self.tick_period = Some(period);
        self
    }

    /// Installs an ISR for `line`; lines without one are acknowledged
    pub fn with_isr<F>(mut self, line: IrqLine, isr: F) -> Self
    where
        F: Fn(&SimCore<Task>, &ScriptedKernel, IrqLine) -> IrqOutcome + Send + Sync + 'static,
    {
        self.isrs.insert(line, Arc::new(isr));
        self
    }

    /// Thread the kernel considers running
    pub fn current(&self) -> Option<ThreadId> {
        self.run_queue.lock().current
    }

    /// Ready threads, in the order they will run
    pub fn ready(&self) -> Vec<ThreadId> {
        self.run_queue.lock().ready.iter().copied().collect()
    }

    /// Asks for a switch to `next` once interrupt handling completes
    ///
    /// Called from an ISR, which should then return
    /// [`IrqOutcome::Reschedule`].
    pub fn request_switch(&self, next: ThreadId) {
        self.run_queue.lock().pending_switch = Some(next);
    }

    pub fn spawn(&self, cpu: &SimCore<Task>, name: &str, task: Task) -> ThreadId {
        let thread = cpu.new_thread(task);
        cpu.threads().set_thread_name(thread, name);
        self.run_queue.lock().ready.push_back(thread);
        thread
    }

    pub fn abort(&self, cpu: &SimCore<Task>, thread: ThreadId) {
        self.run_queue.lock().ready.retain(|&id| id != thread);
        cpu.abort_thread(thread);
    }

    fn requeue(cpu: &SimCore<Task>, rq: &mut RunQueue, thread: ThreadId) {
        // Aborted or finished threads must not be scheduled again
        if cpu.threads().state(thread) == ThreadState::Runnable && !rq.finished.contains(&thread) {
            rq.ready.push_back(thread);
        }
    }

    fn yield_now(&self, cpu: &SimCore<Task>, me: ThreadId) {
        let next = {
            let mut rq = self.run_queue.lock();
            let next = rq.ready.pop_front();
            if next.is_some() {
                Self::requeue(cpu, &mut rq, me);
                rq.current = next;
            }
            next
        };
        if let Some(next) = next {
            cpu.swap(next, me);
        }
    }

    fn switch_to(&self, cpu: &SimCore<Task>, me: ThreadId, next: ThreadId) {
        {
            let mut rq = self.run_queue.lock();
            rq.ready.retain(|&id| id != next);
            Self::requeue(cpu, &mut rq, me);
            rq.current = Some(next);
        }
        cpu.swap(next, me);
    }

    /// Runs once a thread's body has returned
    fn finish(&self, cpu: &SimCore<Task>, me: ThreadId) -> ! {
        let next = {
            let mut rq = self.run_queue.lock();
            rq.ready.retain(|&id| id != me);
            rq.finished.push(me);
            let next = rq.ready.pop_front();
            if next.is_some() {
                rq.current = next;
            }
            next
        };
        if let Some(next) = next {
            cpu.abort_thread(me);
            cpu.swap(next, me);
        }
        // Nothing else to run: this thread becomes the idle thread
        loop {
            cpu.halt();
        }
    }
}

impl EmbeddedKernel<SimCore<Task>> for ScriptedKernel {
    type Payload = Task;

    fn boot(&self, cpu: &SimCore<Task>) {
        if let Some(period) = self.tick_period {
            cpu.irq().enable(cpu.tick().line());
            cpu.tick().enable(period);
        }

        let tasks = std::mem::take(&mut *self.boot_tasks.lock());
        for (name, task) in tasks {
            self.spawn(cpu, &name, task);
        }

        let first = {
            let mut rq = self.run_queue.lock();
            let first = rq.ready.pop_front();
            rq.current = first;
            first
        };
        match first {
            Some(first) => cpu.first_thread_start(first),
            None => loop {
                cpu.halt();
            },
        }
    }

    fn thread_entry(&self, cpu: &SimCore<Task>, task: Task) {
        let Some(me) = cpu.threads().current_logical_thread() else {
            fatal!("{}: thread entry outside a logical thread", cpu.id());
        };
        let ctx = TaskContext {
            cpu,
            kernel: self,
            me,
        };
        (task.0)(&ctx);
        self.finish(cpu, me);
    }

    fn isr(&self, cpu: &SimCore<Task>, line: IrqLine) -> IrqOutcome {
        match self.isrs.get(&line) {
            Some(isr) => isr(cpu, self, line),
            None => IrqOutcome::Done,
        }
    }

    fn reschedule(&self, cpu: &SimCore<Task>) -> Option<SwapRequest> {
        let mut rq = self.run_queue.lock();
        let next = rq.pending_switch.take()?;
        let current = rq.current?;
        if next == current {
            return None;
        }
        rq.ready.retain(|&id| id != next);
        Self::requeue(cpu, &mut rq, current);
        rq.current = Some(next);
        Some(SwapRequest { next, current })
    }
}
