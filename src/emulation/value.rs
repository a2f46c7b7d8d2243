//! Runtime values of the emulator.
//!
//! CIL widens every small integer to 32 bits on the evaluation stack, so [`EmValue`]
//! only needs the stack types the supported opcode subset produces: 32 and 64-bit
//! integers, doubles, object references and the handles pushed by `ldtoken`.

use std::fmt;

use crate::{
    emulation::EmulationError,
    metadata::{signature::TypeSig, token::Token},
};

/// Reference to an object on the [`ManagedHeap`](crate::emulation::ManagedHeap).
///
/// Two `HeapRef` values are equal if they point to the same heap object, which is how
/// reference identity (for example of a rethrown exception) is observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(pub(crate) u64);

impl HeapRef {
    /// Creates a new heap reference with the given ID.
    #[must_use]
    pub fn new(id: u64) -> Self {
        HeapRef(id)
    }

    /// Returns the internal ID of this heap reference.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({})", self.0)
    }
}

/// A value on the evaluation stack, in a local or in an argument slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EmValue {
    /// No value; the result of a `void` call
    Void,
    /// 32-bit integer, also used for booleans, chars and smaller integers
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 64-bit floating point, also used for `float32`
    F64(f64),
    /// The null reference
    Null,
    /// Reference to a heap object
    ObjectRef(HeapRef),
    /// `RuntimeMethodHandle` pushed by `ldtoken` on a method
    MethodHandle(Token),
    /// `RuntimeTypeHandle` pushed by `ldtoken` on a type
    TypeHandle(Token),
}

impl EmValue {
    /// The zero value of a local of type `sig`, as set up by `init_locals`
    #[must_use]
    pub fn default_for(sig: &TypeSig) -> Self {
        match sig {
            TypeSig::I8 | TypeSig::U8 | TypeSig::I | TypeSig::U => EmValue::I64(0),
            TypeSig::R4 | TypeSig::R8 => EmValue::F64(0.0),
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I1
            | TypeSig::U1
            | TypeSig::I2
            | TypeSig::U2
            | TypeSig::I4
            | TypeSig::U4 => EmValue::I32(0),
            _ => EmValue::Null,
        }
    }

    /// Name of the stack type, for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            EmValue::Void => "void",
            EmValue::I32(_) => "int32",
            EmValue::I64(_) => "int64",
            EmValue::F64(_) => "float64",
            EmValue::Null => "null",
            EmValue::ObjectRef(_) => "object",
            EmValue::MethodHandle(_) => "RuntimeMethodHandle",
            EmValue::TypeHandle(_) => "RuntimeTypeHandle",
        }
    }

    /// True for `null`
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, EmValue::Null)
    }

    /// Heap reference carried by this value, if any
    #[must_use]
    pub fn as_object_ref(&self) -> Option<HeapRef> {
        match self {
            EmValue::ObjectRef(reference) => Some(*reference),
            _ => None,
        }
    }

    /// Reads an `int32`.
    ///
    /// # Errors
    /// Returns [`EmulationError::StackTypeMismatch`] for any other stack type.
    pub fn as_i32(&self) -> Result<i32, EmulationError> {
        match self {
            EmValue::I32(value) => Ok(*value),
            other => Err(EmulationError::StackTypeMismatch {
                expected: "int32",
                found: other.type_name(),
            }),
        }
    }

    /// Truth value as tested by `brtrue`/`brfalse`.
    ///
    /// # Errors
    /// Returns [`EmulationError::StackTypeMismatch`] for `void` and handles.
    pub fn is_true(&self) -> Result<bool, EmulationError> {
        match self {
            EmValue::I32(value) => Ok(*value != 0),
            EmValue::I64(value) => Ok(*value != 0),
            EmValue::F64(value) => Ok(*value != 0.0),
            EmValue::Null => Ok(false),
            EmValue::ObjectRef(_) => Ok(true),
            other => Err(EmulationError::StackTypeMismatch {
                expected: "int32, int64 or object",
                found: other.type_name(),
            }),
        }
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::Void => write!(f, "void"),
            EmValue::I32(value) => write!(f, "{value}"),
            EmValue::I64(value) => write!(f, "{value}L"),
            EmValue::F64(value) => write!(f, "{value}"),
            EmValue::Null => write!(f, "null"),
            EmValue::ObjectRef(reference) => write!(f, "{reference}"),
            EmValue::MethodHandle(token) => write!(f, "method {token}"),
            EmValue::TypeHandle(token) => write!(f, "type {token}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_locals_defaults() {
        assert_eq!(EmValue::default_for(&TypeSig::I4), EmValue::I32(0));
        assert_eq!(EmValue::default_for(&TypeSig::Boolean), EmValue::I32(0));
        assert_eq!(EmValue::default_for(&TypeSig::I8), EmValue::I64(0));
        assert_eq!(EmValue::default_for(&TypeSig::R8), EmValue::F64(0.0));
        assert_eq!(EmValue::default_for(&TypeSig::Object), EmValue::Null);
        assert_eq!(
            EmValue::default_for(&TypeSig::SzArray(Box::new(TypeSig::I4))),
            EmValue::Null
        );
    }

    #[test]
    fn truth_values() {
        assert!(EmValue::I32(7).is_true().unwrap());
        assert!(!EmValue::I32(0).is_true().unwrap());
        assert!(!EmValue::Null.is_true().unwrap());
        assert!(EmValue::ObjectRef(HeapRef::new(1)).is_true().unwrap());
        assert!(EmValue::Void.is_true().is_err());
    }

    #[test]
    fn int32_reads() {
        assert_eq!(EmValue::I32(-4).as_i32().unwrap(), -4);
        assert_eq!(
            EmValue::Null.as_i32(),
            Err(EmulationError::StackTypeMismatch {
                expected: "int32",
                found: "null"
            })
        );
    }
}
