//! The runtime library a module is compiled against.
//!
//! The weaver never loads other assemblies. Instead, the external symbol universe it may
//! reference (reflection entry points, exception types, primitive value types and the
//! decorator contract base) is described by a [`RuntimeLibrary`]. The reference resolver
//! turns entries of this library into `TypeRef`/`MemberRef` rows of the module.

use std::collections::HashMap;

use crate::metadata::signature::TypeName;

/// Well-known full names of runtime library types.
pub mod names {
    /// Root of the type hierarchy
    pub const OBJECT: &str = "System.Object";
    /// Base of all value types
    pub const VALUE_TYPE: &str = "System.ValueType";
    /// The "no value" type
    pub const VOID: &str = "System.Void";
    /// Strings
    pub const STRING: &str = "System.String";
    /// Boolean values
    pub const BOOLEAN: &str = "System.Boolean";
    /// 32-bit integers
    pub const INT32: &str = "System.Int32";
    /// Base of all exceptions
    pub const EXCEPTION: &str = "System.Exception";
    /// Base of runtime-raised exceptions
    pub const SYSTEM_EXCEPTION: &str = "System.SystemException";
    /// Raised on invalid object state
    pub const INVALID_OPERATION_EXCEPTION: &str = "System.InvalidOperationException";
    /// Raised by integer division by zero
    pub const DIVIDE_BY_ZERO_EXCEPTION: &str = "System.DivideByZeroException";
    /// Raised when dereferencing null
    pub const NULL_REFERENCE_EXCEPTION: &str = "System.NullReferenceException";
    /// Raised on invalid arguments
    pub const ARGUMENT_EXCEPTION: &str = "System.ArgumentException";
    /// Base of all custom attributes
    pub const ATTRIBUTE: &str = "System.Attribute";
    /// Runtime type objects
    pub const TYPE: &str = "System.Type";
    /// Handle produced by `ldtoken` on a type
    pub const RUNTIME_TYPE_HANDLE: &str = "System.RuntimeTypeHandle";
    /// Handle produced by `ldtoken` on a method
    pub const RUNTIME_METHOD_HANDLE: &str = "System.RuntimeMethodHandle";
    /// Reflection base of members
    pub const MEMBER_INFO: &str = "System.Reflection.MemberInfo";
    /// Reflection base of methods and constructors
    pub const METHOD_BASE: &str = "System.Reflection.MethodBase";
    /// Base type of every decorator attribute
    pub const DECORATOR_ATTRIBUTE: &str = "MethodDecorator.Attributes.DecoratorAttribute";
}

/// A method provided by the runtime library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalMethod {
    /// Method name
    pub name: String,
    /// Declared parameter types
    pub params: Vec<TypeName>,
    /// Instance method
    pub has_this: bool,
    /// Dispatched virtually through `callvirt`
    pub is_virtual: bool,
}

impl ExternalMethod {
    /// Non-virtual instance method
    #[must_use]
    pub fn instance(name: &str, params: &[&str]) -> Self {
        ExternalMethod {
            name: name.to_string(),
            params: params.iter().map(|p| TypeName::parse(p)).collect(),
            has_this: true,
            is_virtual: false,
        }
    }

    /// Static method
    #[must_use]
    pub fn static_method(name: &str, params: &[&str]) -> Self {
        ExternalMethod {
            has_this: false,
            ..Self::instance(name, params)
        }
    }

    /// Virtual instance method
    #[must_use]
    pub fn virtual_method(name: &str, params: &[&str]) -> Self {
        ExternalMethod {
            is_virtual: true,
            ..Self::instance(name, params)
        }
    }
}

/// A type provided by the runtime library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalType {
    /// Full type name
    pub name: TypeName,
    /// Base type, `None` only for `System.Object`
    pub base: Option<TypeName>,
    /// Value types are boxed when stored as `object`
    pub is_value_type: bool,
    /// Abstract types cannot be instantiated
    pub is_abstract: bool,
    /// Declared methods
    pub methods: Vec<ExternalMethod>,
}

impl ExternalType {
    /// Reference type deriving from `base`
    #[must_use]
    pub fn class(name: &str, base: &str) -> Self {
        ExternalType {
            name: TypeName::parse(name),
            base: Some(TypeName::parse(base)),
            is_value_type: false,
            is_abstract: false,
            methods: Vec::new(),
        }
    }

    /// Value type
    #[must_use]
    pub fn value_type(name: &str) -> Self {
        ExternalType {
            is_value_type: true,
            ..Self::class(name, names::VALUE_TYPE)
        }
    }

    /// Marks the type abstract
    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Adds a method
    #[must_use]
    pub fn method(mut self, method: ExternalMethod) -> Self {
        self.methods.push(method);
        self
    }
}

/// The set of runtime library types a module may reference.
#[derive(Debug, Clone, Default)]
pub struct RuntimeLibrary {
    types: HashMap<TypeName, ExternalType>,
}

impl RuntimeLibrary {
    /// Creates an empty library
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The base class library subset woven code and the emulator rely on
    #[must_use]
    pub fn standard() -> Self {
        let mut library = RuntimeLibrary::new();

        library.add_type(ExternalType {
            name: TypeName::parse(names::OBJECT),
            base: None,
            is_value_type: false,
            is_abstract: false,
            methods: vec![ExternalMethod::instance(".ctor", &[])],
        });
        library.add_type(ExternalType::class(names::VALUE_TYPE, names::OBJECT).abstract_type());
        library.add_type(ExternalType::value_type(names::VOID));
        library.add_type(ExternalType::class(names::STRING, names::OBJECT));

        for primitive in [
            "System.Boolean",
            "System.Char",
            "System.SByte",
            "System.Byte",
            "System.Int16",
            "System.UInt16",
            "System.Int32",
            "System.UInt32",
            "System.Int64",
            "System.UInt64",
            "System.Single",
            "System.Double",
            "System.IntPtr",
            "System.UIntPtr",
            names::RUNTIME_TYPE_HANDLE,
            names::RUNTIME_METHOD_HANDLE,
        ] {
            library.add_type(ExternalType::value_type(primitive));
        }

        library.add_type(
            ExternalType::class(names::EXCEPTION, names::OBJECT)
                .method(ExternalMethod::instance(".ctor", &[]))
                .method(ExternalMethod::instance(".ctor", &[names::STRING]))
                .method(ExternalMethod::virtual_method("get_Message", &[])),
        );
        library.add_type(
            ExternalType::class(names::SYSTEM_EXCEPTION, names::EXCEPTION)
                .method(ExternalMethod::instance(".ctor", &[]))
                .method(ExternalMethod::instance(".ctor", &[names::STRING])),
        );
        for exception in [
            names::INVALID_OPERATION_EXCEPTION,
            names::DIVIDE_BY_ZERO_EXCEPTION,
            names::NULL_REFERENCE_EXCEPTION,
            names::ARGUMENT_EXCEPTION,
        ] {
            library.add_type(
                ExternalType::class(exception, names::SYSTEM_EXCEPTION)
                    .method(ExternalMethod::instance(".ctor", &[]))
                    .method(ExternalMethod::instance(".ctor", &[names::STRING])),
            );
        }

        library.add_type(
            ExternalType::class(names::ATTRIBUTE, names::OBJECT)
                .abstract_type()
                .method(ExternalMethod::instance(".ctor", &[])),
        );
        library.add_type(
            ExternalType::class(names::MEMBER_INFO, names::OBJECT)
                .abstract_type()
                .method(ExternalMethod::virtual_method("get_Name", &[]))
                .method(ExternalMethod::virtual_method(
                    "GetCustomAttributes",
                    &[names::TYPE, names::BOOLEAN],
                )),
        );
        library.add_type(
            ExternalType::class(names::METHOD_BASE, names::MEMBER_INFO)
                .abstract_type()
                .method(ExternalMethod::static_method(
                    "GetMethodFromHandle",
                    &[names::RUNTIME_METHOD_HANDLE],
                ))
                .method(ExternalMethod::static_method(
                    "GetMethodFromHandle",
                    &[names::RUNTIME_METHOD_HANDLE, names::RUNTIME_TYPE_HANDLE],
                )),
        );
        library.add_type(
            ExternalType::class(names::TYPE, names::MEMBER_INFO)
                .abstract_type()
                .method(ExternalMethod::static_method(
                    "GetTypeFromHandle",
                    &[names::RUNTIME_TYPE_HANDLE],
                )),
        );
        library.add_type(
            ExternalType::class(names::DECORATOR_ATTRIBUTE, names::ATTRIBUTE)
                .abstract_type()
                .method(ExternalMethod::instance(".ctor", &[]))
                .method(ExternalMethod::virtual_method(
                    "OnEntry",
                    &[names::METHOD_BASE, "System.Object[]"],
                ))
                .method(ExternalMethod::virtual_method(
                    "OnExit",
                    &[names::OBJECT, names::METHOD_BASE, "System.Object[]"],
                ))
                .method(ExternalMethod::virtual_method(
                    "OnException",
                    &[names::EXCEPTION, names::METHOD_BASE, "System.Object[]"],
                )),
        );

        library
    }

    /// Adds or replaces a type
    pub fn add_type(&mut self, ty: ExternalType) {
        self.types.insert(ty.name.clone(), ty);
    }

    /// Looks a type up by name
    #[must_use]
    pub fn get(&self, name: &TypeName) -> Option<&ExternalType> {
        self.types.get(name)
    }

    /// True if the library provides `name`
    #[must_use]
    pub fn contains(&self, name: &TypeName) -> bool {
        self.types.contains_key(name)
    }

    /// Walks `name` and its bases, starting with `name` itself
    pub fn base_chain<'a>(&'a self, name: &TypeName) -> impl Iterator<Item = &'a ExternalType> {
        let mut current = self.types.get(name);
        std::iter::from_fn(move || {
            let ty = current?;
            current = ty.base.as_ref().and_then(|base| self.types.get(base));
            Some(ty)
        })
        .take(self.types.len())
    }

    /// True if `name` is `ancestor` or derives from it
    #[must_use]
    pub fn derives_from(&self, name: &TypeName, ancestor: &TypeName) -> bool {
        self.base_chain(name).any(|ty| &ty.name == ancestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_library_hierarchy() {
        let library = RuntimeLibrary::standard();
        let div = TypeName::parse(names::DIVIDE_BY_ZERO_EXCEPTION);
        assert!(library.derives_from(&div, &TypeName::parse(names::EXCEPTION)));
        assert!(library.derives_from(&div, &TypeName::parse(names::OBJECT)));
        assert!(!library.derives_from(&div, &TypeName::parse(names::ATTRIBUTE)));

        let chain: Vec<String> = library
            .base_chain(&TypeName::parse(names::TYPE))
            .map(|ty| ty.name.full_name())
            .collect();
        assert_eq!(
            chain,
            vec![names::TYPE, names::MEMBER_INFO, names::OBJECT]
        );
    }

    #[test]
    fn reflection_entry_points() {
        let library = RuntimeLibrary::standard();
        let method_base = library.get(&TypeName::parse(names::METHOD_BASE)).unwrap();
        let overloads: Vec<usize> = method_base
            .methods
            .iter()
            .filter(|m| m.name == "GetMethodFromHandle")
            .map(|m| m.params.len())
            .collect();
        assert_eq!(overloads, vec![1, 2]);
        assert!(library
            .get(&TypeName::parse(names::INT32))
            .unwrap()
            .is_value_type);
    }

    #[test]
    fn decorator_contract() {
        let library = RuntimeLibrary::standard();
        let decorator = library
            .get(&TypeName::parse(names::DECORATOR_ATTRIBUTE))
            .unwrap();
        assert!(decorator.is_abstract);
        let on_exit = decorator
            .methods
            .iter()
            .find(|m| m.name == "OnExit")
            .unwrap();
        assert_eq!(on_exit.params[2].full_name(), "System.Object[]");
        assert!(on_exit.is_virtual && on_exit.has_this);
    }
}
