//! Simulator errors
//!
//! Two classes of failure exist here:
//!
//! - Recoverable misuse of the driving-side API is reported as a
//!   [`SimError`].
//! - Invariant violations (corrupted token, time going backwards, an
//!   operation called from the wrong execution context) go through
//!   [`invariant_violation`]. Once one of those is detected the shared
//!   state cannot be trusted, so there is nothing to recover.

use core_types::{CoreId, IdError};
use std::fmt;
use thiserror::Error;

/// Simulator errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    /// `boot` called on a CPU that is past `NotBooted`
    #[error("{0} has already been booted")]
    AlreadyBooted(CoreId),

    /// Operation requires a booted CPU
    #[error("{0} has not been booted")]
    NotBooted(CoreId),

    /// The boot routine returned without starting a thread or halting
    #[error("boot routine of {0} returned without handing the CPU over")]
    BootRoutineReturned(CoreId),

    /// Every timed event is disarmed and no end of time is configured
    #[error("no timed event is armed and no end of time is configured")]
    NothingScheduled,

    /// Configuration rejected by `SimConfig::validate`
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Identifier construction failed
    #[error(transparent)]
    Id(#[from] IdError),
}

/// Reports a violated invariant and panics with the diagnostic
///
/// On a logical thread the panic reaches the thread entry wrapper, which
/// aborts the process.
#[track_caller]
pub(crate) fn invariant_violation(args: fmt::Arguments<'_>) -> ! {
    log::error!("programming error: {}", args);
    panic!("programming error: {}", args);
}

/// Formats and reports an invariant violation
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::error::invariant_violation(format_args!($($arg)*))
    };
}

pub(crate) use fatal;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SimError::AlreadyBooted(CoreId(0)).to_string(),
            "cpu0 has already been booted"
        );
        assert_eq!(
            SimError::NothingScheduled.to_string(),
            "no timed event is armed and no end of time is configured"
        );
    }

    #[test]
    fn test_id_error_converts() {
        let err: SimError = IdError::InvalidIrqLine(99).into();
        assert_eq!(err.to_string(), "interrupt line 99 is out of range");
    }

    #[test]
    #[should_panic(expected = "programming error: token corrupted")]
    fn test_fatal_panics_with_diagnostic() {
        fatal!("token corrupted");
    }
}
