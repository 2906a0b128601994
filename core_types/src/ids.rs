//! Identifiers for simulated entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical (embedded) thread
///
/// This is the stable index of the thread's slot in its emulator's thread
/// table. Indices are handed out by one emulator instance and are only
/// meaningful to that instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(usize);

impl ThreadId {
    /// Creates a thread ID from a table index
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the table index
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread[{}]", self.0)
    }
}

/// Identifier for a simulated CPU core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreId(pub usize);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}
