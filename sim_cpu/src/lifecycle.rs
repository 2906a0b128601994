//! # CPU Lifecycle
//!
//! The run/halt state machine of one simulated CPU, and the hand-over
//! between the CPU (whichever execution context is running embedded code)
//! and the driving side (the hardware models and the event loop).
//!
//! ```text
//! NotBooted --boot--> Running --halt--> Halted --wake--> Running
//!     |                  |                 |
//!     +---terminate------+--(deferred)-----+--terminate--> Terminating
//! ```
//!
//! At any instant exactly one side runs: the driving side blocks while the
//! CPU is `Running`, the CPU blocks while `Halted`.

use crate::error::{fatal, SimError};
use crate::thread_emulator::{exit_context, is_context_exit, panic_message};
use core_types::CoreId;
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Lifecycle state of a simulated CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    NotBooted,
    /// Executing embedded code
    Running,
    /// Idle, waiting for an interrupt
    Halted,
    /// Shutting down; no embedded code runs again
    Terminating,
}

/// What a termination request should lead to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateAction {
    /// The CPU is stopped: clean up now
    Proceed,
    /// The CPU is running: clean up once it halts
    Deferred,
    /// Termination already happened or is under way
    AlreadyTerminating,
}

#[derive(Debug)]
struct LifecycleState {
    state: CpuState,
    terminate_pending: bool,
    boot_returned: bool,
    boot_handle: Option<JoinHandle<()>>,
}

/// Run/halt state machine of one CPU
#[derive(Debug)]
pub struct CpuLifecycle {
    core: CoreId,
    state: Mutex<LifecycleState>,
    cond: Condvar,
}

impl CpuLifecycle {
    pub fn new(core: CoreId) -> Arc<Self> {
        Arc::new(Self {
            core,
            state: Mutex::new(LifecycleState {
                state: CpuState::NotBooted,
                terminate_pending: false,
                boot_returned: false,
                boot_handle: None,
            }),
            cond: Condvar::new(),
        })
    }

    /// Starts the CPU running `start` on a fresh boot context
    ///
    /// Blocks until the CPU halts for the first time. The boot routine is
    /// expected to hand the CPU to a logical thread or to halt; if it simply
    /// returns, the CPU is left halted and
    /// [`SimError::BootRoutineReturned`] is reported.
    pub fn boot<F>(self: &Arc<Self>, start: F) -> Result<(), SimError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut st = self.state.lock();
            if st.state != CpuState::NotBooted {
                return Err(SimError::AlreadyBooted(self.core));
            }
            st.state = CpuState::Running;
            debug!("{}: booting", self.core);
        }

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-boot", self.core))
            .spawn(move || this.boot_context(start));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => fatal!("{}: cannot spawn boot context: {}", self.core, err),
        };

        let mut st = self.state.lock();
        st.boot_handle = Some(handle);
        while st.state == CpuState::Running {
            self.cond.wait(&mut st);
        }
        if st.boot_returned {
            return Err(SimError::BootRoutineReturned(self.core));
        }
        debug!("{}: boot complete, CPU {:?}", self.core, st.state);
        Ok(())
    }

    fn boot_context<F: FnOnce()>(&self, start: F) {
        match panic::catch_unwind(AssertUnwindSafe(start)) {
            Ok(()) => {
                error!("{}: boot routine returned", self.core);
                let mut st = self.state.lock();
                st.boot_returned = true;
                st.state = CpuState::Halted;
                self.cond.notify_all();
            }
            Err(payload) if is_context_exit(&*payload) => {
                debug!("{}: boot context finished", self.core);
            }
            Err(payload) => {
                error!(
                    "{}: boot routine panicked: {}",
                    self.core,
                    panic_message(&*payload)
                );
                std::process::abort();
            }
        }
    }

    /// Idles the CPU until the driving side wakes it
    ///
    /// Called by the execution context currently running embedded code.
    /// If the CPU is terminated while halted, the calling context exits
    /// instead of returning.
    pub fn halt(&self) {
        let mut st = self.state.lock();
        if st.state != CpuState::Running {
            fatal!("{}: halt while {:?}", self.core, st.state);
        }
        st.state = CpuState::Halted;
        debug!("{}: halted", self.core);
        self.cond.notify_all();

        while st.state == CpuState::Halted {
            self.cond.wait(&mut st);
        }
        if st.state == CpuState::Terminating {
            debug!("{}: halted context leaving, terminating", self.core);
            drop(st);
            exit_context();
        }
    }

    /// Resumes the halted CPU and blocks until it halts again
    ///
    /// Called from the driving side. Returns false, without doing anything,
    /// if the CPU is not booted yet or is terminating.
    pub fn wake(&self) -> bool {
        let mut st = self.state.lock();
        match st.state {
            CpuState::NotBooted | CpuState::Terminating => {
                debug!("{}: wake ignored while {:?}", self.core, st.state);
                return false;
            }
            CpuState::Running => fatal!("{}: woken while already running", self.core),
            CpuState::Halted => {}
        }
        st.state = CpuState::Running;
        debug!("{}: woken", self.core);
        self.cond.notify_all();

        while st.state == CpuState::Running {
            self.cond.wait(&mut st);
        }
        true
    }

    /// Moves the CPU towards `Terminating`
    ///
    /// A halted CPU is released: the context blocked in [`Self::halt`]
    /// exits. A running CPU only records the request; the caller retries
    /// once it has halted (see [`Self::terminate_pending`]).
    pub fn request_terminate(&self) -> TerminateAction {
        let mut st = self.state.lock();
        match st.state {
            CpuState::NotBooted => {
                st.state = CpuState::Terminating;
                TerminateAction::Proceed
            }
            CpuState::Running => {
                debug!("{}: terminate deferred until halt", self.core);
                st.terminate_pending = true;
                TerminateAction::Deferred
            }
            CpuState::Halted => {
                st.state = CpuState::Terminating;
                st.terminate_pending = false;
                debug!("{}: terminating", self.core);
                self.cond.notify_all();
                TerminateAction::Proceed
            }
            CpuState::Terminating => {
                warn!("{}: terminate requested twice", self.core);
                TerminateAction::AlreadyTerminating
            }
        }
    }

    /// Takes the boot context's join handle
    pub fn take_boot_handle(&self) -> Option<JoinHandle<()>> {
        self.state.lock().boot_handle.take()
    }

    pub fn state(&self) -> CpuState {
        self.state.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == CpuState::Running
    }

    /// Returns whether a deferred terminate is waiting for the CPU to halt
    pub fn terminate_pending(&self) -> bool {
        self.state.lock().terminate_pending
    }

    pub fn core(&self) -> CoreId {
        self.core
    }
}
