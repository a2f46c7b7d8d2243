//! Simulated managed heap.
//!
//! Objects are never collected; an emulation run is short-lived and the heap is dropped
//! with its [`Interpreter`](crate::emulation::Interpreter).

use std::collections::HashMap;

use crate::{
    emulation::{EmValue, EmulationError, HeapRef},
    metadata::token::Token,
};

/// An object allocated on the [`ManagedHeap`].
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// A boxed value type
    Boxed(EmValue),
    /// A single-dimensional, zero-based array of references
    Array(Vec<EmValue>),
    /// A string
    String(String),
    /// A `MethodBase` describing a method of the module or of the runtime library
    Method(Token),
    /// A `System.Type` describing a type
    Type(Token),
    /// An instance of a type defined in the module
    Instance {
        /// `TypeDef` of the object
        type_token: Token,
    },
    /// An exception of a runtime library type
    Exception {
        /// Full name of the exception type
        type_name: String,
        /// Message passed to the constructor, if any
        message: Option<String>,
    },
}

impl HeapObject {
    /// Name of the object kind, for error messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::Boxed(_) => "boxed value",
            HeapObject::Array(_) => "array",
            HeapObject::String(_) => "string",
            HeapObject::Method(_) => "method",
            HeapObject::Type(_) => "type",
            HeapObject::Instance { .. } => "instance",
            HeapObject::Exception { .. } => "exception",
        }
    }
}

/// Simulated managed heap.
#[derive(Debug, Default)]
pub struct ManagedHeap {
    objects: HashMap<HeapRef, HeapObject>,
    next_id: u64,
}

impl ManagedHeap {
    /// Creates an empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `object` and returns a reference to it
    pub fn alloc(&mut self, object: HeapObject) -> HeapRef {
        self.next_id += 1;
        let reference = HeapRef::new(self.next_id);
        self.objects.insert(reference, object);
        reference
    }

    /// Allocates a string
    pub fn alloc_string(&mut self, value: &str) -> HeapRef {
        self.alloc(HeapObject::String(value.to_string()))
    }

    /// Allocates an array of `length` null references
    pub fn alloc_array(&mut self, length: usize) -> HeapRef {
        self.alloc(HeapObject::Array(vec![EmValue::Null; length]))
    }

    /// Allocates an exception of the runtime type `type_name`
    pub fn alloc_exception(&mut self, type_name: &str, message: Option<&str>) -> HeapRef {
        self.alloc(HeapObject::Exception {
            type_name: type_name.to_string(),
            message: message.map(ToString::to_string),
        })
    }

    /// Number of live objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing has been allocated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Looks an object up.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidHeapReference`] for a dangling reference.
    pub fn get(&self, reference: HeapRef) -> Result<&HeapObject, EmulationError> {
        self.objects
            .get(&reference)
            .ok_or(EmulationError::InvalidHeapReference {
                reference_id: reference.id(),
            })
    }

    /// Looks an object up for modification.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidHeapReference`] for a dangling reference.
    pub fn get_mut(&mut self, reference: HeapRef) -> Result<&mut HeapObject, EmulationError> {
        self.objects
            .get_mut(&reference)
            .ok_or(EmulationError::InvalidHeapReference {
                reference_id: reference.id(),
            })
    }

    /// Elements of the array `value` refers to.
    ///
    /// # Errors
    /// Fails with [`EmulationError::NullReference`] for `null` and with a mismatch error
    /// if `value` is not an array reference.
    pub fn array(&self, value: &EmValue) -> Result<&[EmValue], EmulationError> {
        match self.object(value)? {
            HeapObject::Array(elements) => Ok(elements),
            other => Err(EmulationError::HeapTypeMismatch {
                expected: "array",
                found: other.kind(),
            }),
        }
    }

    /// Contents of the string `value` refers to.
    ///
    /// # Errors
    /// Fails with [`EmulationError::NullReference`] for `null` and with a mismatch error
    /// if `value` is not a string reference.
    pub fn string(&self, value: &EmValue) -> Result<&str, EmulationError> {
        match self.object(value)? {
            HeapObject::String(text) => Ok(text),
            other => Err(EmulationError::HeapTypeMismatch {
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    /// The value inside the box `value` refers to.
    ///
    /// # Errors
    /// Fails with [`EmulationError::NullReference`] for `null` and with a mismatch error
    /// if `value` is not a boxed value.
    pub fn unbox(&self, value: &EmValue) -> Result<EmValue, EmulationError> {
        match self.object(value)? {
            HeapObject::Boxed(inner) => Ok(*inner),
            other => Err(EmulationError::HeapTypeMismatch {
                expected: "boxed value",
                found: other.kind(),
            }),
        }
    }

    /// The object `value` refers to.
    ///
    /// # Errors
    /// Fails with [`EmulationError::NullReference`] for `null` and with a stack type
    /// mismatch for non-reference values.
    pub fn object(&self, value: &EmValue) -> Result<&HeapObject, EmulationError> {
        match value {
            EmValue::ObjectRef(reference) => self.get(*reference),
            EmValue::Null => Err(EmulationError::NullReference),
            other => Err(EmulationError::StackTypeMismatch {
                expected: "object",
                found: other.type_name(),
            }),
        }
    }
}
