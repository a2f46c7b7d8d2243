//! Method definitions and their bodies.
//!
//! # Key Types
//! - [`MethodDef`] - A method of a module type, with signature, body and attributes
//! - [`MethodBody`] - Instructions, locals and exception handlers
//! - [`MethodBodyBuilder`] - Assembles bodies from an instruction assembler closure
//! - [`ExceptionHandler`] - A protected region and its handler
//!
//! # Examples
//!
//! ```rust
//! use cilweave::prelude::*;
//!
//! let method = MethodDef::new(
//!     "Add",
//!     MethodAccessFlags::PUBLIC,
//!     MethodModifiers::STATIC,
//!     MethodSig::static_method(
//!         vec![Param::new("a", TypeSig::I4), Param::new("b", TypeSig::I4)],
//!         TypeSig::I4,
//!     ),
//! )
//! .with_body(
//!     MethodBodyBuilder::new()
//!         .implementation(|asm| {
//!             asm.ldarg(0).ldarg(1).add().ret();
//!             Ok(())
//!         })
//!         .build()?,
//! );
//!
//! assert!(method.is_static());
//! assert!(!method.is_constructor());
//! # Ok::<(), cilweave::Error>(())
//! ```

mod body;
mod builder;
mod exceptions;
mod types;
mod verify;

pub use body::{MethodBody, DEFAULT_MAX_STACK};
pub use builder::MethodBodyBuilder;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use types::{
    LocalVariable, MethodAccessFlags, MethodModifiers, MethodSig, Param, METHOD_ACCESS_MASK,
};

use crate::metadata::{attributes::CustomAttribute, token::Token};

/// Name of instance constructors
pub const CONSTRUCTOR_NAME: &str = ".ctor";
/// Name of type initializers
pub const TYPE_INITIALIZER_NAME: &str = ".cctor";

/// A method defined in the module.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// `MethodDef` token, assigned when the method is added to a module
    pub token: Token,
    /// Method name
    pub name: String,
    /// Accessibility
    pub access: MethodAccessFlags,
    /// Modifiers such as `STATIC` or `VIRTUAL`
    pub modifiers: MethodModifiers,
    /// Calling convention, parameters and return type
    pub signature: MethodSig,
    /// IL body; `None` for abstract and runtime-provided methods
    pub body: Option<MethodBody>,
    /// Custom attributes in declaration order
    pub custom_attributes: Vec<CustomAttribute>,
}

impl MethodDef {
    /// Creates a method without body or attributes.
    ///
    /// `signature.has_this` is forced to match the absence of `STATIC`.
    #[must_use]
    pub fn new(
        name: &str,
        access: MethodAccessFlags,
        modifiers: MethodModifiers,
        mut signature: MethodSig,
    ) -> Self {
        signature.has_this = !modifiers.contains(MethodModifiers::STATIC);
        MethodDef {
            token: Token::new(0),
            name: name.to_string(),
            access,
            modifiers,
            signature,
            body: None,
            custom_attributes: Vec::new(),
        }
    }

    /// Attaches a body
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Attaches a custom attribute
    #[must_use]
    pub fn with_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.custom_attributes.push(attribute);
        self
    }

    /// Static methods take no `this`
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(MethodModifiers::STATIC)
    }

    /// Abstract methods have no body
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(MethodModifiers::ABSTRACT)
    }

    /// Virtual methods are dispatched on the runtime type of `this`
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.modifiers.contains(MethodModifiers::VIRTUAL)
    }

    /// Instance constructor, which must chain to a base or sibling constructor first
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME && !self.is_static()
    }
}
