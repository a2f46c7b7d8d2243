//! Custom attributes attached to method definitions.
//!
//! Only the attribute type and its fixed constructor arguments are modelled; that is all
//! decorator discovery and attribute instantiation need.

/// Represents a single custom attribute argument value
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttributeArgument {
    /// Boolean value
    Bool(bool),
    /// Signed 32-bit integer
    I4(i32),
    /// Signed 64-bit integer
    I8(i64),
    /// 64-bit floating point
    R8(f64),
    /// String value
    String(String),
}

/// A custom attribute instance applied to a member.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttribute {
    /// Attribute type (TypeDef of the module, or TypeRef)
    pub attribute_type: crate::metadata::token::Token,
    /// Fixed arguments passed to the attribute constructor
    pub fixed_args: Vec<CustomAttributeArgument>,
}

impl CustomAttribute {
    /// Attribute constructed without arguments
    #[must_use]
    pub fn new(attribute_type: crate::metadata::token::Token) -> Self {
        CustomAttribute {
            attribute_type,
            fixed_args: Vec::new(),
        }
    }

    /// Appends a constructor argument
    #[must_use]
    pub fn with_arg(mut self, arg: CustomAttributeArgument) -> Self {
        self.fixed_args.push(arg);
        self
    }
}
