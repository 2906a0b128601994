//! Errors raised when constructing identifier and value types

use thiserror::Error;

/// Identifier construction errors
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IdError {
    /// Line number outside the controller's addressable space
    #[error("interrupt line {0} is out of range")]
    InvalidIrqLine(u8),
}
