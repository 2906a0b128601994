//! # Thread Emulator
//!
//! Runs each logical (embedded) thread on its own OS thread while making
//! sure only one of them executes embedded code at any instant.
//!
//! ## Design
//!
//! - **One lock, one token**: the emulator state (thread table plus the
//!   token naming the thread allowed to run) lives behind a single mutex.
//! - **Baton passing**: a thread hands the CPU over by writing the next
//!   thread's id into the token and broadcasting. Every woken thread
//!   re-checks the token, so spurious wakeups are harmless and no OS
//!   scheduling fairness is relied upon.
//! - **Cooperative cancellation**: aborts and termination are requests.
//!   The target observes them at its own swap point (or while waiting)
//!   and leaves by unwinding out of the embedded code, never while it
//!   could be half way through updating shared state.
//!
//! The emulator never interprets the payload of a thread: it only hands it
//! to the entry routine once the thread is first allowed to run.

use crate::config::ThreadTableConfig;
use crate::error::fatal;
use crate::thread_table::ThreadTable;
use core_types::{ThreadId, ThreadState};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Emulator instance and logical thread bound to this OS thread
    static CURRENT: Cell<Option<(u64, ThreadId)>> = const { Cell::new(None) };
}

/// Unwinding payload that ends an execution context
pub(crate) struct ContextExit;

/// Leaves the current execution context without returning to the caller
///
/// The unwind is caught by the wrapper that started the OS thread. It does
/// not go through the panic hook, so nothing is printed.
pub(crate) fn exit_context() -> ! {
    panic::resume_unwind(Box::new(ContextExit))
}

/// Returns true if an unwind payload came from [`exit_context`]
pub(crate) fn is_context_exit(payload: &(dyn Any + Send)) -> bool {
    payload.is::<ContextExit>()
}

/// Extracts a printable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[derive(Debug)]
struct EmulatorState {
    table: ThreadTable,
    /// Thread allowed to run; `None` until the first thread is started
    token: Option<ThreadId>,
    terminating: bool,
}

struct Shared<P> {
    instance: u64,
    name: String,
    state: Mutex<EmulatorState>,
    cond: Condvar,
    entry: Box<dyn Fn(P) + Send + Sync>,
}

impl<P: Send + 'static> Shared<P> {
    fn describe(&self, st: &EmulatorState, id: ThreadId) -> String {
        let slot = st.table.get(id);
        match &slot.name {
            Some(name) => format!("{}: {} '{}' #{}", self.name, id, name, slot.debug_id),
            None => format!("{}: {} #{}", self.name, id, slot.debug_id),
        }
    }

    fn let_run(&self, st: &mut EmulatorState, next: ThreadId) {
        let state = st.table.get(next).state;
        if state != ThreadState::Runnable {
            fatal!(
                "{} cannot be allowed to run in state {:?}",
                self.describe(st, next),
                state
            );
        }
        debug!("{} is allowed to run", self.describe(st, next));
        st.token = Some(next);
        self.cond.notify_all();
    }

    /// Blocks until the token names `id`
    ///
    /// Leaves the thread instead if it is being aborted or the emulator
    /// is terminating.
    fn wait_until_allowed<'a>(
        &'a self,
        mut st: MutexGuard<'a, EmulatorState>,
        id: ThreadId,
    ) -> MutexGuard<'a, EmulatorState> {
        st.table.get_mut(id).running = false;
        debug!("{} will now wait", self.describe(&st, id));
        loop {
            if st.terminating {
                debug!("{} leaving, emulator terminating", self.describe(&st, id));
                self.exit_thread(st, id);
            }
            if st.table.get(id).state == ThreadState::Aborting {
                debug!("{} leaving, abort requested", self.describe(&st, id));
                self.exit_thread(st, id);
            }
            if st.token == Some(id) {
                break;
            }
            self.cond.wait(&mut st);
        }
        st.table.get_mut(id).running = true;
        debug!("{} will now run", self.describe(&st, id));
        st
    }

    /// Marks `id` aborted, releases the lock and unwinds out of the thread
    fn exit_thread(&self, mut st: MutexGuard<'_, EmulatorState>, id: ThreadId) -> ! {
        let slot = st.table.get_mut(id);
        slot.running = false;
        slot.state = ThreadState::Aborted;
        debug!("{} aborted", self.describe(&st, id));
        drop(st);
        exit_context()
    }
}

fn thread_starter<P: Send + 'static>(shared: Arc<Shared<P>>, id: ThreadId, debug_id: u64, payload: P) {
    CURRENT.with(|current| current.set(Some((shared.instance, id))));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let st = shared.state.lock();
        debug!("{} starting", shared.describe(&st, id));
        // Blocks until first scheduled; the program may also finish first
        let st = shared.wait_until_allowed(st, id);
        drop(st);
        (shared.entry)(payload);
    }));

    CURRENT.with(|current| current.set(None));

    match outcome {
        Ok(()) => {
            let mut st = shared.state.lock();
            let slot = st.table.get_mut(id);
            slot.running = false;
            slot.state = ThreadState::Failed;
            warn!("{} entry routine returned", shared.describe(&st, id));
        }
        Err(payload) if is_context_exit(&*payload) => {
            // Left through a halt while terminating: the slot still shows it
            // running. Only touch the slot if it has not been handed out again.
            let mut st = shared.state.lock();
            let slot = st.table.get_mut(id);
            if slot.debug_id == debug_id && !slot.state.is_finished() {
                slot.running = false;
                slot.state = ThreadState::Aborted;
            }
            debug!("{}: {} #{} exited", shared.name, id, debug_id);
        }
        Err(payload) => {
            {
                let mut st = shared.state.lock();
                let slot = st.table.get_mut(id);
                slot.running = false;
                slot.state = ThreadState::Failed;
            }
            error!(
                "{}: {} #{} panicked: {}",
                shared.name,
                id,
                debug_id,
                panic_message(&*payload)
            );
            std::process::abort();
        }
    }
}

/// Emulates logical threads on top of OS threads
///
/// Cloning yields another handle to the same emulator.
pub struct ThreadEmulator<P: Send + 'static> {
    shared: Arc<Shared<P>>,
}

impl<P: Send + 'static> Clone for ThreadEmulator<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Send + 'static> ThreadEmulator<P> {
    /// Creates an emulator whose threads all run `entry(payload)`
    ///
    /// `name` prefixes log lines and OS thread names.
    pub fn new<F>(name: impl Into<String>, config: &ThreadTableConfig, entry: F) -> Self
    where
        F: Fn(P) + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                state: Mutex::new(EmulatorState {
                    table: ThreadTable::new(config),
                    token: None,
                    terminating: false,
                }),
                cond: Condvar::new(),
                entry: Box::new(entry),
            }),
        }
    }

    /// Returns the logical thread the calling OS thread runs, if it belongs
    /// to this emulator
    pub fn current_logical_thread(&self) -> Option<ThreadId> {
        CURRENT.with(|current| match current.get() {
            Some((instance, id)) if instance == self.shared.instance => Some(id),
            _ => None,
        })
    }

    fn assert_called_from(&self, id: ThreadId, operation: &str) {
        let caller = self.current_logical_thread();
        if caller != Some(id) {
            fatal!(
                "{}: {} on behalf of {} called from {:?}",
                self.shared.name,
                operation,
                id,
                caller
            );
        }
    }

    /// Creates a new logical thread and returns its stable id
    ///
    /// The OS thread is spawned immediately but blocks until the token
    /// names it; it never executes embedded code before that.
    pub fn new_thread(&self, payload: P) -> ThreadId {
        let mut st = self.shared.state.lock();
        if st.terminating {
            fatal!("{}: new_thread called after terminate", self.shared.name);
        }
        let id = st.table.allocate();
        let debug_id = st.table.get(id).debug_id;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-t{}", self.shared.name, id.index()))
            .spawn(move || thread_starter(shared, id, debug_id, payload));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => fatal!("{}: cannot spawn OS thread: {}", self.shared.name, err),
        };
        st.table.get_mut(id).handle = Some(handle);
        debug!("{} created", self.shared.describe(&st, id));
        id
    }

    /// Hands the CPU from `current` to `next`
    ///
    /// Must be called from `current` itself. Returns once `current` is
    /// allowed to run again. If `current` has been aborted, it finishes
    /// here instead and this call never returns.
    pub fn swap(&self, next: ThreadId, current: ThreadId) {
        self.assert_called_from(current, "swap");
        let mut st = self.shared.state.lock();
        if st.token != Some(current) {
            fatal!(
                "{}: token corrupted, {} swapping while token is {:?}",
                self.shared.name,
                current,
                st.token
            );
        }
        self.shared.let_run(&mut st, next);
        if st.table.get(current).state == ThreadState::Aborting {
            debug!("{} is being aborted", self.shared.describe(&st, current));
            self.shared.exit_thread(st, current);
        }
        let _st = self.shared.wait_until_allowed(st, current);
    }

    /// Lets the first logical thread run
    ///
    /// The caller (the boot context, not a logical thread) gives up its
    /// role for good: it must not execute embedded code afterwards.
    pub fn first_thread_start(&self, next: ThreadId) {
        if let Some(id) = self.current_logical_thread() {
            fatal!(
                "{}: first_thread_start called from logical thread {}",
                self.shared.name,
                id
            );
        }
        let mut st = self.shared.state.lock();
        if let Some(token) = st.token {
            fatal!(
                "{}: first_thread_start called while {} already holds the token",
                self.shared.name,
                token
            );
        }
        self.shared.let_run(&mut st, next);
        debug!("{}: boot context handing over", self.shared.name);
    }

    /// Requests that a thread be aborted
    ///
    /// A thread aborting itself finishes at its next swap. Any other thread
    /// is woken and finishes without running embedded code again. Aborting
    /// a thread that is already aborting or finished does nothing.
    pub fn abort(&self, id: ThreadId) {
        let mut st = self.shared.state.lock();
        let state = st.table.get(id).state;
        if state != ThreadState::Runnable {
            debug!(
                "{} already {:?}, abort ignored",
                self.shared.describe(&st, id),
                state
            );
            return;
        }
        st.table.get_mut(id).state = ThreadState::Aborting;
        if st.token == Some(id) {
            debug!("{} will be aborted at its next swap", self.shared.describe(&st, id));
        } else {
            debug!("{} aborting, not scheduled", self.shared.describe(&st, id));
            self.shared.cond.notify_all();
        }
    }

    /// Terminates every logical thread
    ///
    /// Only valid once the emulated CPU is halted; calling it from a logical
    /// thread of this emulator is fatal. Waiting threads are woken, leave,
    /// and are joined. The thread holding the token is left to the caller
    /// to release (see `join_remaining`).
    pub fn terminate(&self) {
        if let Some(id) = self.current_logical_thread() {
            fatal!(
                "{}: terminate called from logical thread {}",
                self.shared.name,
                id
            );
        }
        let (handles, holder) = {
            let mut st = self.shared.state.lock();
            if st.terminating {
                warn!("{}: terminate called twice", self.shared.name);
                return;
            }
            st.terminating = true;
            debug!("{}: terminating", self.shared.name);
            self.shared.cond.notify_all();

            let holder = st.token.and_then(|id| st.table.get_mut(id).handle.take());
            (st.table.take_handles(), holder)
        };

        join_all(&self.shared.name, handles);

        // Put the token holder's handle back for join_remaining
        if let Some(handle) = holder {
            let mut st = self.shared.state.lock();
            if let Some(id) = st.token {
                st.table.get_mut(id).handle = Some(handle);
            }
        }
    }

    /// Joins any OS thread still tracked after `terminate`
    ///
    /// The caller must have released the thread that held the token.
    pub(crate) fn join_remaining(&self) {
        let handles = self.shared.state.lock().table.take_handles();
        join_all(&self.shared.name, handles);
    }

    /// Returns the creation counter value of a thread
    pub fn get_unique_debug_id(&self, id: ThreadId) -> u64 {
        self.shared.state.lock().table.get(id).debug_id
    }

    /// Names a thread, for log lines
    pub fn set_thread_name(&self, id: ThreadId, name: impl Into<String>) {
        self.shared.state.lock().table.get_mut(id).name = Some(name.into());
    }

    /// Returns a thread's name, if set
    pub fn thread_name(&self, id: ThreadId) -> Option<String> {
        self.shared.state.lock().table.get(id).name.clone()
    }

    /// Returns the thread currently allowed to run
    pub fn current(&self) -> Option<ThreadId> {
        self.shared.state.lock().token
    }

    /// Returns a thread's lifecycle state
    pub fn state(&self, id: ThreadId) -> ThreadState {
        self.shared.state.lock().table.get(id).state
    }

    /// Returns whether a thread is the one executing
    pub fn is_running(&self, id: ThreadId) -> bool {
        self.shared.state.lock().table.get(id).running
    }

    /// Counts threads flagged as running (never more than one)
    pub fn running_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .table
            .iter()
            .filter(|(_, slot)| slot.running)
            .count()
    }

    /// Number of threads ever created
    pub fn thread_count(&self) -> u64 {
        self.shared.state.lock().table.created()
    }

    /// Returns whether `terminate` has been called
    pub fn is_terminating(&self) -> bool {
        self.shared.state.lock().terminating
    }

    /// Returns the emulator's name
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

fn join_all(name: &str, handles: Vec<JoinHandle<()>>) {
    let me = thread::current().id();
    for handle in handles {
        if handle.thread().id() == me {
            continue;
        }
        if handle.join().is_err() {
            warn!("{}: a logical thread ended with a panic", name);
        }
    }
}
