//! The in-memory module being woven.
//!
//! A [`Module`] owns its type definitions (with nested types and methods), the
//! reference tables woven code imports runtime symbols into, and the description of the
//! runtime library it is compiled against. Tokens for types and methods are assigned as
//! definitions are added.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::prelude::*;
//!
//! let mut module = Module::new("Sample");
//! let calculator = module.add_type(TypeDef::new("Sample", "Calculator"));
//! let add = module.add_method(
//!     calculator,
//!     MethodDef::new(
//!         "Add",
//!         MethodAccessFlags::PUBLIC,
//!         MethodModifiers::STATIC,
//!         MethodSig::static_method(vec![Param::new("a", TypeSig::I4)], TypeSig::I4),
//!     ),
//! )?;
//!
//! assert_eq!(module.method_full_name(add).as_deref(), Some("Sample.Calculator::Add"));
//! # Ok::<(), cilweave::Error>(())
//! ```

use bitflags::bitflags;

use crate::{
    metadata::{
        imports::ImportTable,
        method::MethodDef,
        runtime::{names, RuntimeLibrary},
        signature::{TypeLocator, TypeName, TypeSig},
        token::Token,
    },
    Error, Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Type attribute flags
    pub struct TypeAttributes: u32 {
        /// Type is visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Nested type with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type cannot be instantiated
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
    }
}

/// A type defined in the module.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// `TypeDef` token, assigned when the type is added to a module
    pub token: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Type attributes
    pub flags: TypeAttributes,
    /// Base type; `None` means `System.Object`
    pub extends: Option<TypeLocator>,
    /// Methods in declaration order
    pub methods: Vec<MethodDef>,
    /// Nested types in declaration order
    pub nested: Vec<TypeDef>,
}

impl TypeDef {
    /// Creates a public class deriving from `System.Object`
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        TypeDef {
            token: Token::new(0),
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: TypeAttributes::PUBLIC,
            extends: None,
            methods: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Sets the base type
    #[must_use]
    pub fn extends(mut self, base: TypeLocator) -> Self {
        self.extends = Some(base);
        self
    }

    /// Sets the type attributes
    #[must_use]
    pub fn with_flags(mut self, flags: TypeAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Appends a method
    #[must_use]
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Appends a nested type
    #[must_use]
    pub fn with_nested(mut self, nested: TypeDef) -> Self {
        self.nested.push(nested);
        self
    }

    /// Abstract types cannot be instantiated
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeAttributes::ABSTRACT)
    }

    /// Namespace and simple name
    #[must_use]
    pub fn type_name(&self) -> TypeName {
        TypeName::new(self.namespace.clone(), self.name.clone())
    }

    /// Finds a method by token among this type's own methods
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.token == token)
    }
}

/// A module: type definitions plus the reference tables and runtime they use.
#[derive(Debug)]
pub struct Module {
    /// Module name
    pub name: String,
    /// Top-level types in declaration order
    pub types: Vec<TypeDef>,
    /// Imported reference rows
    pub imports: ImportTable,
    /// The runtime library the module is compiled against
    pub runtime: RuntimeLibrary,
    type_rows: u32,
    method_rows: u32,
}

impl Module {
    /// Creates an empty module against [`RuntimeLibrary::standard`]
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_runtime(name, RuntimeLibrary::standard())
    }

    /// Creates an empty module against a custom runtime library
    #[must_use]
    pub fn with_runtime(name: &str, runtime: RuntimeLibrary) -> Self {
        Module {
            name: name.to_string(),
            types: Vec::new(),
            imports: ImportTable::new(),
            runtime,
            type_rows: 0,
            method_rows: 0,
        }
    }

    /// Adds a top-level type, assigning tokens to it, its methods and nested types
    pub fn add_type(&mut self, mut ty: TypeDef) -> Token {
        self.assign_tokens(&mut ty);
        let token = ty.token;
        self.types.push(ty);
        token
    }

    /// Adds a nested type to `parent`.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if `parent` is not a type of this module.
    pub fn add_nested_type(&mut self, parent: Token, mut ty: TypeDef) -> Result<Token> {
        if self.type_def(parent).is_none() {
            return Err(Error::TypeNotFound(parent.to_string()));
        }
        self.assign_tokens(&mut ty);
        let token = ty.token;
        if let Some(owner) = self.type_def_mut(parent) {
            owner.nested.push(ty);
        }
        Ok(token)
    }

    /// Adds a method to `owner`.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if `owner` is not a type of this module.
    pub fn add_method(&mut self, owner: Token, mut method: MethodDef) -> Result<Token> {
        if self.type_def(owner).is_none() {
            return Err(Error::TypeNotFound(owner.to_string()));
        }
        self.method_rows += 1;
        method.token = Token::from_parts(Token::METHOD_DEF, self.method_rows);
        let token = method.token;
        if let Some(ty) = self.type_def_mut(owner) {
            ty.methods.push(method);
        }
        Ok(token)
    }

    fn assign_tokens(&mut self, ty: &mut TypeDef) {
        self.type_rows += 1;
        ty.token = Token::from_parts(Token::TYPE_DEF, self.type_rows);
        for method in &mut ty.methods {
            self.method_rows += 1;
            method.token = Token::from_parts(Token::METHOD_DEF, self.method_rows);
        }
        for nested in &mut ty.nested {
            self.assign_tokens(nested);
        }
    }

    /// Every type, nested ones included, in declaration order (parents first)
    #[must_use]
    pub fn all_types(&self) -> Vec<&TypeDef> {
        fn walk<'a>(ty: &'a TypeDef, out: &mut Vec<&'a TypeDef>) {
            out.push(ty);
            for nested in &ty.nested {
                walk(nested, out);
            }
        }

        let mut out = Vec::new();
        for ty in &self.types {
            walk(ty, &mut out);
        }
        out
    }

    /// Looks up a type definition by token
    #[must_use]
    pub fn type_def(&self, token: Token) -> Option<&TypeDef> {
        fn find(types: &[TypeDef], token: Token) -> Option<&TypeDef> {
            types.iter().find_map(|ty| {
                if ty.token == token {
                    Some(ty)
                } else {
                    find(&ty.nested, token)
                }
            })
        }
        find(&self.types, token)
    }

    /// Looks up a type definition by token for mutation
    pub fn type_def_mut(&mut self, token: Token) -> Option<&mut TypeDef> {
        fn find(types: &mut [TypeDef], token: Token) -> Option<&mut TypeDef> {
            for ty in types {
                if ty.token == token {
                    return Some(ty);
                }
                if let Some(found) = find(&mut ty.nested, token) {
                    return Some(found);
                }
            }
            None
        }
        find(&mut self.types, token)
    }

    /// Looks up a method and its declaring type by method token
    #[must_use]
    pub fn method(&self, token: Token) -> Option<(&TypeDef, &MethodDef)> {
        self.all_types()
            .into_iter()
            .find_map(|ty| ty.method(token).map(|method| (ty, method)))
    }

    /// Looks up a method by token for mutation
    pub fn method_mut(&mut self, token: Token) -> Option<&mut MethodDef> {
        fn find(types: &mut [TypeDef], token: Token) -> Option<&mut MethodDef> {
            for ty in types {
                if let Some(method) = ty.methods.iter_mut().find(|m| m.token == token) {
                    return Some(method);
                }
                if let Some(found) = find(&mut ty.nested, token) {
                    return Some(found);
                }
            }
            None
        }
        find(&mut self.types, token)
    }

    /// Finds a method of `owner` by name
    #[must_use]
    pub fn find_method(&self, owner: Token, name: &str) -> Option<Token> {
        self.type_def(owner)?
            .methods
            .iter()
            .find(|method| method.name == name)
            .map(|method| method.token)
    }

    /// Full name of a type definition; nested types use `Outer/Inner`
    #[must_use]
    pub fn type_full_name(&self, token: Token) -> Option<String> {
        fn find(types: &[TypeDef], token: Token, prefix: Option<&str>) -> Option<String> {
            for ty in types {
                let name = match prefix {
                    Some(outer) => format!("{outer}/{}", ty.name),
                    None => ty.type_name().full_name(),
                };
                if ty.token == token {
                    return Some(name);
                }
                if let Some(found) = find(&ty.nested, token, Some(&name)) {
                    return Some(found);
                }
            }
            None
        }
        find(&self.types, token, None)
    }

    /// Finds a type definition by full name (see [`Module::type_full_name`])
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        self.all_types()
            .into_iter()
            .find(|ty| self.type_full_name(ty.token).as_deref() == Some(full_name))
    }

    /// `Namespace.Type::Method` for a method definition
    #[must_use]
    pub fn method_full_name(&self, token: Token) -> Option<String> {
        let (ty, method) = self.method(token)?;
        Some(format!("{}::{}", self.type_full_name(ty.token)?, method.name))
    }

    /// Full name of any type token: definition, `TypeRef` or `TypeSpec`
    #[must_use]
    pub fn token_type_name(&self, token: Token) -> Option<String> {
        match token.table() {
            Token::TYPE_DEF => self.type_full_name(token),
            Token::TYPE_REF => self
                .imports
                .get_type_ref(token)
                .map(|row| row.name.full_name()),
            Token::TYPE_SPEC => self
                .imports
                .get_type_spec(token)
                .and_then(|row| self.sig_type_name(&row.sig)),
            _ => None,
        }
    }

    /// Full name a signature refers to, `Ns.Name[]` for arrays
    #[must_use]
    pub fn sig_type_name(&self, sig: &TypeSig) -> Option<String> {
        match sig {
            TypeSig::Class(token) | TypeSig::ValueType(token) => self.token_type_name(*token),
            TypeSig::SzArray(inner) => self.sig_type_name(inner).map(|name| format!("{name}[]")),
            TypeSig::ByRef(inner) => self.sig_type_name(inner).map(|name| format!("{name}&")),
            builtin => builtin.builtin_name().map(|name| name.full_name()),
        }
    }

    /// Base of a definition, `System.Object` when none is declared
    #[must_use]
    pub fn base_of(&self, ty: &TypeDef) -> TypeLocator {
        ty.extends
            .clone()
            .unwrap_or_else(|| TypeLocator::external(names::OBJECT))
    }

    /// Disjoint borrows for weaving: the types mutably, the reference tables and the
    /// runtime library shared.
    pub fn split_for_weaving(&mut self) -> (&mut Vec<TypeDef>, &ImportTable, &RuntimeLibrary) {
        (&mut self.types, &self.imports, &self.runtime)
    }
}
