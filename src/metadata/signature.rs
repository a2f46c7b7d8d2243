//! Type signatures and type names.
//!
//! [`TypeSig`] is the element-type level description of a parameter, local or return
//! type, following the ECMA-335 `ELEMENT_TYPE_*` vocabulary. [`TypeName`] and
//! [`TypeLocator`] identify a type either inside the module being woven or in the
//! runtime library it references.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 23.1.16 - Element types used in signatures

use std::fmt;

use crate::metadata::token::Token;

/// Type signature of a parameter, local variable or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// No value (return types only)
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `int8`
    I1,
    /// `unsigned int8`
    U1,
    /// `int16`
    I2,
    /// `unsigned int16`
    U2,
    /// `int32`
    I4,
    /// `unsigned int32`
    U4,
    /// `int64`
    I8,
    /// `unsigned int64`
    U8,
    /// `float32`
    R4,
    /// `float64`
    R8,
    /// `native int`
    I,
    /// `native unsigned int`
    U,
    /// `string`
    String,
    /// `object`
    Object,
    /// Reference type, by TypeDef/TypeRef token
    Class(Token),
    /// Value type, by TypeDef/TypeRef token
    ValueType(Token),
    /// Single-dimensional, zero-based array
    SzArray(Box<TypeSig>),
    /// Managed pointer (`ref`/`out` parameters)
    ByRef(Box<TypeSig>),
}

impl TypeSig {
    /// True for the "no value" return type
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// True if values of this type must be boxed to be stored as `object`
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            TypeSig::Boolean
                | TypeSig::Char
                | TypeSig::I1
                | TypeSig::U1
                | TypeSig::I2
                | TypeSig::U2
                | TypeSig::I4
                | TypeSig::U4
                | TypeSig::I8
                | TypeSig::U8
                | TypeSig::R4
                | TypeSig::R8
                | TypeSig::I
                | TypeSig::U
                | TypeSig::ValueType(_)
        )
    }

    /// The pointee of a by-ref signature
    #[must_use]
    pub fn by_ref_element(&self) -> Option<&TypeSig> {
        match self {
            TypeSig::ByRef(inner) => Some(inner),
            _ => None,
        }
    }

    /// Runtime library type backing a built-in element type
    #[must_use]
    pub fn builtin_name(&self) -> Option<TypeName> {
        let name = match self {
            TypeSig::Void => "Void",
            TypeSig::Boolean => "Boolean",
            TypeSig::Char => "Char",
            TypeSig::I1 => "SByte",
            TypeSig::U1 => "Byte",
            TypeSig::I2 => "Int16",
            TypeSig::U2 => "UInt16",
            TypeSig::I4 => "Int32",
            TypeSig::U4 => "UInt32",
            TypeSig::I8 => "Int64",
            TypeSig::U8 => "UInt64",
            TypeSig::R4 => "Single",
            TypeSig::R8 => "Double",
            TypeSig::I => "IntPtr",
            TypeSig::U => "UIntPtr",
            TypeSig::String => "String",
            TypeSig::Object => "Object",
            _ => return None,
        };
        Some(TypeName::new("System", name))
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => write!(f, "void"),
            TypeSig::Boolean => write!(f, "bool"),
            TypeSig::Char => write!(f, "char"),
            TypeSig::I1 => write!(f, "int8"),
            TypeSig::U1 => write!(f, "uint8"),
            TypeSig::I2 => write!(f, "int16"),
            TypeSig::U2 => write!(f, "uint16"),
            TypeSig::I4 => write!(f, "int32"),
            TypeSig::U4 => write!(f, "uint32"),
            TypeSig::I8 => write!(f, "int64"),
            TypeSig::U8 => write!(f, "uint64"),
            TypeSig::R4 => write!(f, "float32"),
            TypeSig::R8 => write!(f, "float64"),
            TypeSig::I => write!(f, "native int"),
            TypeSig::U => write!(f, "native uint"),
            TypeSig::String => write!(f, "string"),
            TypeSig::Object => write!(f, "object"),
            TypeSig::Class(token) => write!(f, "class {token}"),
            TypeSig::ValueType(token) => write!(f, "valuetype {token}"),
            TypeSig::SzArray(inner) => write!(f, "{inner}[]"),
            TypeSig::ByRef(inner) => write!(f, "{inner}&"),
        }
    }
}

/// Namespace-qualified type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName {
    /// Namespace, empty for the global namespace and for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
}

impl TypeName {
    /// Creates a type name from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Splits a full name at its last `.`
    #[must_use]
    pub fn parse(full_name: &str) -> Self {
        match full_name.rsplit_once('.') {
            Some((namespace, name)) => TypeName::new(namespace, name),
            None => TypeName::new("", full_name),
        }
    }

    /// Name of the single-dimensional array of this type
    #[must_use]
    pub fn array_of(&self) -> Self {
        TypeName::new(self.namespace.clone(), format!("{}[]", self.name))
    }

    /// `Namespace.Name`, or just `Name` in the global namespace
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Where a type lives: defined in the module, or provided by the runtime library.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeLocator {
    /// A TypeDef of the module being woven
    Definition(Token),
    /// A type of the referenced runtime library
    External(TypeName),
}

impl TypeLocator {
    /// Shorthand for an external type given by full name
    #[must_use]
    pub fn external(full_name: &str) -> Self {
        TypeLocator::External(TypeName::parse(full_name))
    }
}

impl fmt::Display for TypeLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeLocator::Definition(token) => write!(f, "TypeDef {token}"),
            TypeLocator::External(name) => write!(f, "[runtime]{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_types() {
        assert!(TypeSig::I4.is_value_type());
        assert!(TypeSig::ValueType(Token(0x01000001)).is_value_type());
        assert!(!TypeSig::String.is_value_type());
        assert!(!TypeSig::Object.is_value_type());
        assert!(!TypeSig::SzArray(Box::new(TypeSig::I4)).is_value_type());
        assert!(!TypeSig::ByRef(Box::new(TypeSig::I4)).is_value_type());
        assert!(TypeSig::Void.is_void());
    }

    #[test]
    fn builtin_names() {
        assert_eq!(
            TypeSig::I4.builtin_name().unwrap().full_name(),
            "System.Int32"
        );
        assert_eq!(TypeSig::Object.builtin_name().unwrap().name, "Object");
        assert!(TypeSig::Class(Token(0x02000001)).builtin_name().is_none());
    }

    #[test]
    fn type_name_parsing() {
        let name = TypeName::parse("System.Reflection.MethodBase");
        assert_eq!(name.namespace, "System.Reflection");
        assert_eq!(name.name, "MethodBase");
        assert_eq!(TypeName::parse("Global").full_name(), "Global");
        assert_eq!(
            TypeName::new("System", "Object").array_of().full_name(),
            "System.Object[]"
        );
    }

    #[test]
    fn display() {
        let sig = TypeSig::ByRef(Box::new(TypeSig::SzArray(Box::new(TypeSig::Object))));
        assert_eq!(sig.to_string(), "object[]&");
        assert_eq!(
            TypeLocator::external("System.Type").to_string(),
            "[runtime]System.Type"
        );
    }
}
