//! Interrupt line and priority types
//!
//! Lines are addressed `0..IRQ_LINE_COUNT`. Priorities follow the usual
//! embedded convention: a numerically lower value is a higher priority,
//! `0` being the highest. The extra value [`IrqPriority::NONE`] means "no
//! interrupt is being serviced" and is lower than every real priority.

use crate::error::IdError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of addressable interrupt lines per controller
pub const IRQ_LINE_COUNT: usize = 64;

/// An addressable interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct IrqLine(u8);

impl IrqLine {
    /// Creates a line, rejecting numbers outside the addressable space
    pub fn new(number: u8) -> Result<Self, IdError> {
        if (number as usize) < IRQ_LINE_COUNT {
            Ok(Self(number))
        } else {
            Err(IdError::InvalidIrqLine(number))
        }
    }

    /// Creates a line in a const context
    ///
    /// # Panics
    ///
    /// Panics (at compile time when evaluated in a const) if the number is
    /// out of range.
    pub const fn const_new(number: u8) -> Self {
        assert!((number as usize) < IRQ_LINE_COUNT, "interrupt line out of range");
        Self(number)
    }

    /// Returns the line number
    pub const fn number(&self) -> u8 {
        self.0
    }

    /// Returns this line's bit in a controller bitmask
    pub const fn mask(&self) -> u64 {
        1u64 << self.0
    }

    /// Iterates over every line set in `bits`, lowest number first
    pub fn iter_mask(bits: u64) -> impl Iterator<Item = IrqLine> {
        let mut remaining = bits;
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let number = remaining.trailing_zeros() as u8;
            remaining &= !(1u64 << number);
            Some(IrqLine(number))
        })
    }
}

impl TryFrom<u8> for IrqLine {
    type Error = IdError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Self::new(number)
    }
}

impl From<IrqLine> for u8 {
    fn from(line: IrqLine) -> u8 {
        line.0
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IRQ{}", self.0)
    }
}

/// Interrupt priority (0 = highest, 255 = lowest, 256 = none)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrqPriority(u16);

impl IrqPriority {
    /// Highest configurable priority
    pub const HIGHEST: IrqPriority = IrqPriority(0);
    /// Lowest configurable priority
    pub const LOWEST: IrqPriority = IrqPriority(255);
    /// Sentinel: no interrupt context is active
    pub const NONE: IrqPriority = IrqPriority(256);

    /// Creates a configurable priority
    pub const fn new(value: u8) -> Self {
        Self(value as u16)
    }

    /// Returns the raw value (256 for [`IrqPriority::NONE`])
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Returns true if `self` would preempt `other`
    ///
    /// Equal priorities never preempt each other.
    pub fn preempts(&self, other: IrqPriority) -> bool {
        self.0 < other.0
    }

    /// Returns true if this is the "no interrupt context" sentinel
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for IrqPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "prio(none)")
        } else {
            write!(f, "prio({})", self.0)
        }
    }
}
