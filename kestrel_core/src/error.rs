//! Error types and result definitions for Kestrel.
//!
//! Compilation of a method either succeeds or *bails out*. A bailout unwinds the
//! whole pass back to the compilation driver, which abandons optimizing compilation
//! of that method and falls back to a simpler strategy. No phase retries or recovers
//! internally.
//!
//! The enum distinguishes two families:
//! - Bailouts proper (dataflow that does not converge, use before definition,
//!   allocation dead ends)
//! - Internal errors (malformed input, failed self-verification), which are
//!   compiler bugs but are still reported instead of producing wrong code

use std::fmt;
use thiserror::Error;

/// The unified result type used throughout the compiler.
pub type CompileResult<T> = Result<T, CompileError>;

/// An operand found live on entry to a method, with the blocks that use and define it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndefinedOperand {
    /// Dense operand number of the offending value.
    pub operand: u32,
    /// Blocks whose local gen set contains the operand.
    pub used_in: Vec<u32>,
    /// Blocks whose local kill set contains the operand.
    pub defined_in: Vec<u32>,
}

impl fmt::Display for UndefinedOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operand {} used in ", self.operand)?;
        write_blocks(f, &self.used_in)?;
        f.write_str(", defined in ")?;
        write_blocks(f, &self.defined_in)
    }
}

fn write_blocks(f: &mut fmt::Formatter<'_>, blocks: &[u32]) -> fmt::Result {
    f.write_str("[")?;
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "B{block}")?;
    }
    f.write_str("]")
}

fn describe_operands(operands: &[UndefinedOperand]) -> String {
    operands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised by a compiler phase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Generic bailout.
    #[error("Bailout: {message}")]
    Bailout {
        /// Error description.
        message: String,
    },

    /// The global liveness fixpoint did not stabilize.
    #[error("Bailout: too many iterations in global liveness analysis ({iterations})")]
    LivenessDiverged {
        /// Iterations performed before giving up.
        iterations: u32,
    },

    /// Values are used before they are defined: the entry block has a live-in set.
    #[error(
        "Bailout: live-in set of the entry block must be empty: {}",
        describe_operands(.operands)
    )]
    UndefinedOperands {
        /// Every operand live on entry.
        operands: Vec<UndefinedOperand>,
    },

    /// An interval was expected to cover a position but none of its split children does.
    #[error("Bailout: no split child of operand {operand} covers position {position}")]
    MissingSplitChild {
        /// Operand number of the split parent.
        operand: u32,
        /// The position that was looked up.
        position: u32,
    },

    /// An interval needs a register at its first instruction and none can be freed.
    #[error("Bailout: no register found for operand {operand} at position {position}")]
    NoRegisterAvailable {
        /// Operand number of the interval.
        operand: u32,
        /// Start of the interval.
        position: u32,
    },

    /// The allocation failed self-verification.
    #[error("InternalError: invalid allocation: {message}")]
    InvalidAllocation {
        /// Error description.
        message: String,
    },

    /// The input does not satisfy a structural requirement of the consumer.
    #[error("InternalError: malformed LIR: {message}")]
    MalformedLir {
        /// Error description.
        message: String,
    },
}

impl CompileError {
    /// Create a generic bailout.
    pub fn bailout(message: impl Into<String>) -> Self {
        CompileError::Bailout {
            message: message.into(),
        }
    }

    /// Create a verification failure.
    pub fn invalid_allocation(message: impl Into<String>) -> Self {
        CompileError::InvalidAllocation {
            message: message.into(),
        }
    }

    /// Create a malformed-input error.
    pub fn malformed(message: impl Into<String>) -> Self {
        CompileError::MalformedLir {
            message: message.into(),
        }
    }

    /// Whether this is an ordinary bailout rather than an internal compiler error.
    #[must_use]
    pub fn is_bailout(&self) -> bool {
        !matches!(
            self,
            CompileError::InvalidAllocation { .. } | CompileError::MalformedLir { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bailout_display() {
        let err = CompileError::bailout("no register found");
        assert_eq!(err.to_string(), "Bailout: no register found");
        assert!(err.is_bailout());
    }

    #[test]
    fn test_undefined_operands_display() {
        let err = CompileError::UndefinedOperands {
            operands: vec![UndefinedOperand {
                operand: 17,
                used_in: vec![0, 2],
                defined_in: vec![3],
            }],
        };
        assert_eq!(
            err.to_string(),
            "Bailout: live-in set of the entry block must be empty: \
             operand 17 used in [B0, B2], defined in [B3]"
        );
    }

    #[test]
    fn test_internal_errors_are_not_bailouts() {
        assert!(!CompileError::malformed("block B1 has no label").is_bailout());
        assert!(!CompileError::invalid_allocation("overlap").is_bailout());
        assert!(CompileError::LivenessDiverged { iterations: 51 }.is_bailout());
    }
}
