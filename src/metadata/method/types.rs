//! Method flags, signatures and local variables.
//!
//! # Key Types
//! - [`MethodAccessFlags`], [`MethodModifiers`]: Attribute flags
//! - [`MethodSig`], [`Param`]: Calling convention, parameters and return type
//! - [`LocalVariable`]: A method-scoped storage slot

use bitflags::bitflags;

use crate::metadata::signature::TypeSig;

/// Bitmask for `ACCESS` state extraction
pub const METHOD_ACCESS_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method access flags
    pub struct MethodAccessFlags: u32 {
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
    }
}

impl MethodAccessFlags {
    /// Extract access flags from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_ACCESS_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method modifiers and properties
    pub struct MethodModifiers: u32 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, depending upon the name of the method
        const RTSPECIAL_NAME = 0x1000;
    }
}

impl MethodModifiers {
    /// Extract method modifiers from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & !METHOD_ACCESS_MASK)
    }
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub sig: TypeSig,
}

impl Param {
    /// Creates a named parameter
    pub fn new(name: impl Into<String>, sig: TypeSig) -> Self {
        Param {
            name: name.into(),
            sig,
        }
    }
}

/// Method signature: calling convention, declared parameters and return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    /// Instance method; argument 0 is `this` and is not part of `params`
    pub has_this: bool,
    /// Declared parameters in order
    pub params: Vec<Param>,
    /// Declared return type
    pub return_type: TypeSig,
}

impl MethodSig {
    /// Static method signature
    #[must_use]
    pub fn static_method(params: Vec<Param>, return_type: TypeSig) -> Self {
        MethodSig {
            has_this: false,
            params,
            return_type,
        }
    }

    /// Instance method signature
    #[must_use]
    pub fn instance(params: Vec<Param>, return_type: TypeSig) -> Self {
        MethodSig {
            has_this: true,
            params,
            return_type,
        }
    }

    /// Argument index of declared parameter `index`, accounting for `this`
    #[must_use]
    pub fn argument_index(&self, index: usize) -> usize {
        index + usize::from(self.has_this)
    }

    /// Number of arguments on the call stack, `this` included
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.argument_index(self.params.len())
    }
}

/// A local variable slot of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Debug name, if any
    pub name: Option<String>,
    /// The signature of this variable
    pub sig: TypeSig,
}

impl LocalVariable {
    /// Creates a named local
    pub fn named(name: impl Into<String>, sig: TypeSig) -> Self {
        LocalVariable {
            name: Some(name.into()),
            sig,
        }
    }

    /// Creates an unnamed local
    #[must_use]
    pub fn unnamed(sig: TypeSig) -> Self {
        LocalVariable { name: None, sig }
    }
}
