//! Logical thread lifecycle states

use serde::{Deserialize, Serialize};

/// State of a logical thread slot
///
/// `Aborted` is only ever entered from the thread's own execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ThreadState {
    /// Slot not allocated
    #[default]
    Unused,
    /// Thread exists and may be scheduled
    Runnable,
    /// Abort requested, the thread has not reached a swap point yet
    Aborting,
    /// Thread has exited after an abort or termination
    Aborted,
    /// Thread entry routine returned (it must run forever)
    Failed,
}

impl ThreadState {
    /// Returns true if the thread has exited for good
    pub fn is_finished(&self) -> bool {
        matches!(self, ThreadState::Aborted | ThreadState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unused() {
        assert_eq!(ThreadState::default(), ThreadState::Unused);
    }

    #[test]
    fn test_finished_states() {
        assert!(ThreadState::Aborted.is_finished());
        assert!(ThreadState::Failed.is_finished());
        assert!(!ThreadState::Aborting.is_finished());
        assert!(!ThreadState::Runnable.is_finished());
        assert!(!ThreadState::Unused.is_finished());
    }
}
