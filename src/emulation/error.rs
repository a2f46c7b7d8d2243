//! Emulation error types.
//!
//! Some of these errors correspond to exceptions the CLR raises while executing code
//! (null dereference, integer division by zero, out-of-range array access, failed
//! casts). The interpreter does not report those as errors; it raises them as managed
//! exceptions of the type named by [`EmulationError::clr_exception`], so the code under
//! test can catch them like the real runtime would.

use std::fmt;

use crate::metadata::{runtime::names, token::Token};

/// Errors that can occur during CIL emulation.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// Evaluation stack underflow (pop from empty stack).
    StackUnderflow,
    /// Stack type mismatch during operation.
    StackTypeMismatch {
        /// Expected type.
        expected: &'static str,
        /// Actual type found.
        found: &'static str,
    },
    /// Local variable index out of bounds.
    LocalIndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of locals available.
        count: usize,
    },
    /// A local was read before being written in a body without `init_locals`.
    UninitializedLocal {
        /// The local index.
        index: usize,
    },
    /// Argument index out of bounds.
    ArgumentIndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of arguments available.
        count: usize,
    },
    /// A method was invoked with the wrong number of arguments.
    ArgumentCountMismatch {
        /// Arguments the method takes, `this` included.
        expected: usize,
        /// Arguments supplied.
        found: usize,
    },
    /// Invalid heap reference.
    InvalidHeapReference {
        /// The invalid reference ID.
        reference_id: u64,
    },
    /// Heap object of an unexpected kind.
    HeapTypeMismatch {
        /// Expected object kind.
        expected: &'static str,
        /// Actual object kind.
        found: &'static str,
    },
    /// Null reference access.
    NullReference,
    /// Division by zero.
    DivisionByZero,
    /// Array index out of bounds.
    ArrayIndexOutOfBounds {
        /// The requested index.
        index: i64,
        /// Array length.
        length: usize,
    },
    /// Failed cast.
    InvalidCast {
        /// Target type.
        expected: String,
        /// Actual type of the object.
        found: String,
    },
    /// A call target that is neither defined in the module, a registered native nor a
    /// runtime library method the emulator provides.
    MethodNotFound {
        /// The call target.
        token: Token,
    },
    /// A branch or handler boundary that is not part of the body.
    InvalidBranchTarget,
    /// Execution ran past the last instruction.
    FellThroughEnd {
        /// The method being executed.
        method: Token,
    },
    /// `rethrow` outside a catch handler.
    RethrowOutsideHandler,
    /// Executed instruction budget exhausted.
    InstructionLimitExceeded {
        /// The configured limit.
        limit: u64,
    },
    /// Call depth budget exhausted.
    CallDepthExceeded {
        /// The configured limit.
        limit: usize,
    },
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationError::StackUnderflow => write!(f, "evaluation stack underflow"),
            EmulationError::StackTypeMismatch { expected, found } => {
                write!(f, "stack type mismatch: expected {expected}, found {found}")
            }
            EmulationError::LocalIndexOutOfBounds { index, count } => {
                write!(
                    f,
                    "local variable index {index} out of bounds (count: {count})"
                )
            }
            EmulationError::UninitializedLocal { index } => {
                write!(f, "local variable {index} read before being written")
            }
            EmulationError::ArgumentIndexOutOfBounds { index, count } => {
                write!(f, "argument index {index} out of bounds (count: {count})")
            }
            EmulationError::ArgumentCountMismatch { expected, found } => {
                write!(f, "expected {expected} arguments, got {found}")
            }
            EmulationError::InvalidHeapReference { reference_id } => {
                write!(f, "invalid heap reference: {reference_id}")
            }
            EmulationError::HeapTypeMismatch { expected, found } => {
                write!(f, "heap object mismatch: expected {expected}, found {found}")
            }
            EmulationError::NullReference => write!(f, "null reference"),
            EmulationError::DivisionByZero => write!(f, "division by zero"),
            EmulationError::ArrayIndexOutOfBounds { index, length } => {
                write!(f, "array index {index} out of bounds (length: {length})")
            }
            EmulationError::InvalidCast { expected, found } => {
                write!(f, "cannot cast {found} to {expected}")
            }
            EmulationError::MethodNotFound { token } => {
                write!(f, "no implementation for method {token}")
            }
            EmulationError::InvalidBranchTarget => write!(f, "invalid branch target"),
            EmulationError::FellThroughEnd { method } => {
                write!(f, "execution ran past the end of method {method}")
            }
            EmulationError::RethrowOutsideHandler => {
                write!(f, "rethrow outside of a catch handler")
            }
            EmulationError::InstructionLimitExceeded { limit } => {
                write!(f, "instruction limit of {limit} exceeded")
            }
            EmulationError::CallDepthExceeded { limit } => {
                write!(f, "call depth limit of {limit} exceeded")
            }
        }
    }
}

impl std::error::Error for EmulationError {}

impl EmulationError {
    /// Checks if this error should be treated as a CLR exception.
    #[must_use]
    pub fn is_clr_exception(&self) -> bool {
        self.clr_exception().is_some()
    }

    /// Full name of the runtime exception the CLR raises for this error, if any.
    #[must_use]
    pub fn clr_exception(&self) -> Option<&'static str> {
        match self {
            EmulationError::NullReference => Some(names::NULL_REFERENCE_EXCEPTION),
            EmulationError::DivisionByZero => Some(names::DIVIDE_BY_ZERO_EXCEPTION),
            EmulationError::ArrayIndexOutOfBounds { .. } => {
                Some("System.IndexOutOfRangeException")
            }
            EmulationError::InvalidCast { .. } => Some("System.InvalidCastException"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            EmulationError::StackUnderflow,
            EmulationError::DivisionByZero,
            EmulationError::NullReference,
            EmulationError::LocalIndexOutOfBounds { index: 5, count: 3 },
            EmulationError::UninitializedLocal { index: 2 },
            EmulationError::MethodNotFound {
                token: Token::new(0x0A00_0001),
            },
        ];

        for err in errors {
            let display = format!("{err}");
            assert!(!display.is_empty());
        }
    }

    #[test]
    fn clr_exception_mapping() {
        assert_eq!(
            EmulationError::DivisionByZero.clr_exception(),
            Some(names::DIVIDE_BY_ZERO_EXCEPTION)
        );
        assert!(EmulationError::NullReference.is_clr_exception());
        assert!(!EmulationError::StackUnderflow.is_clr_exception());
        assert!(!EmulationError::InstructionLimitExceeded { limit: 10 }.is_clr_exception());
    }
}
