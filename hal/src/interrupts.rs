//! Interrupt handling abstraction

use core_types::{IrqLine, IrqPriority};

/// Saved interrupt lock state, returned by [`InterruptHal::lock`]
///
/// Restoring it with [`InterruptHal::unlock`] makes nested lock/unlock
/// pairs work: only the outermost unlock actually re-enables delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the key must be passed back to unlock()"]
pub struct IrqKey {
    was_locked: bool,
}

impl IrqKey {
    /// Wraps a previous lock state
    pub const fn new(was_locked: bool) -> Self {
        Self { was_locked }
    }

    /// Returns whether interrupts were locked before the matching `lock()`
    pub const fn was_locked(&self) -> bool {
        self.was_locked
    }
}

/// Interrupt controller operations available to embedded code
///
/// These are the operations an embedded kernel's architecture layer
/// performs against its interrupt controller. All of them take effect
/// immediately: a change that makes an interrupt deliverable delivers it
/// before returning.
pub trait InterruptHal {
    /// Locks (masks) all maskable interrupts, returning the previous state
    fn lock(&self) -> IrqKey;

    /// Restores the lock state saved by [`InterruptHal::lock`]
    fn unlock(&self, key: IrqKey);

    /// Enables a line
    fn enable(&self, line: IrqLine);

    /// Disables a line
    fn disable(&self, line: IrqLine);

    /// Returns whether a line is enabled
    fn is_enabled(&self, line: IrqLine) -> bool;

    /// Sets a line's priority
    fn set_priority(&self, line: IrqLine, priority: IrqPriority);

    /// Raises a line from software running on the CPU
    fn raise_immediate(&self, line: IrqLine);

    /// Clears a line's pending state
    fn clear(&self, line: IrqLine);
}
