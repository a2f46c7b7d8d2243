//! Decorator kinds and weave targets.
//!
//! A [`DecoratorKind`] is computed once per module for every attribute type deriving from
//! the decorator marker base, with its three hooks already resolved to tokens. Discovery
//! pairs a kind with the attribute instance found on a method to form a
//! [`DecoratorDescriptor`], and a [`WeaveTarget`] names the method it applies to.

use std::fmt;

use crate::metadata::{attributes::CustomAttribute, token::Token};

/// An attribute type usable as a decorator, with its resolved hook methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratorKind {
    /// `TypeDef` of the attribute type
    pub attribute_type: Token,
    /// Full name of the attribute type
    pub name: String,
    /// `OnEntry(MethodBase, object[])`
    pub on_entry: Token,
    /// `OnExit(object, MethodBase, object[])`
    pub on_exit: Token,
    /// `OnException(Exception, MethodBase, object[])`
    pub on_exception: Token,
}

/// One decorator application: the kind and the attribute instance that selected it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratorDescriptor {
    /// The decorator kind
    pub kind: DecoratorKind,
    /// The attribute as written on the method, including its constructor arguments
    pub attribute: CustomAttribute,
}

/// A method selected for weaving.
#[derive(Debug, Clone, PartialEq)]
pub struct WeaveTarget {
    /// `TypeDef` declaring the method
    pub declaring_type: Token,
    /// `MethodDef` to weave
    pub method: Token,
    /// Decorator to apply
    pub descriptor: DecoratorDescriptor,
}

impl fmt::Display for WeaveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} (type {})",
            self.descriptor.kind.name, self.method, self.declaring_type
        )
    }
}
