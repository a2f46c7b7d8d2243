//! Reference resolution for woven code.
//!
//! Instructions can only refer to symbols through tokens of the module being woven.
//! [`ReferenceResolver`] maps a logical description of a type or method (a
//! [`TypeLocator`], optionally with a [`MethodQuery`]) to such a token: a `TypeDef` or
//! `MethodDef` when the symbol is defined in the module, otherwise an interned `TypeRef`
//! or `MemberRef` row.
//!
//! Lookups are pure with respect to their inputs and memoized in `DashMap`s, so a resolver
//! can be shared by all weaving workers. Resolving the same symbol twice returns the same
//! token and never adds a second reference row.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::prelude::*;
//!
//! let module = Module::new("Sample");
//! let resolver = ReferenceResolver::for_module(&module);
//!
//! let method_base = TypeLocator::external("System.Reflection.MethodBase");
//! let query = MethodQuery::named("GetMethodFromHandle").with_param_count(2);
//! let first = resolver.resolve_method(&method_base, &query)?;
//! let second = resolver.resolve_method(&method_base, &query)?;
//!
//! assert_eq!(first, second);
//! assert_eq!(module.imports.member_ref_count(), 1);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::fmt;

use dashmap::DashMap;

use crate::{
    metadata::{
        imports::{ImportTable, MemberRefRow},
        index::{DefinitionIndex, MethodEntry},
        module::Module,
        runtime::{ExternalMethod, RuntimeLibrary},
        signature::{TypeLocator, TypeName, TypeSig},
        token::Token,
    },
    Error, Result,
};

/// Structured, hashable predicate selecting a method by name and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodQuery {
    /// Method name
    pub name: String,
    /// Required number of declared parameters, if constrained
    pub param_count: Option<usize>,
    /// Required full names of the parameter types; empty when unconstrained
    pub param_types: Vec<String>,
}

impl MethodQuery {
    /// Any method called `name`
    #[must_use]
    pub fn named(name: &str) -> Self {
        MethodQuery {
            name: name.to_string(),
            param_count: None,
            param_types: Vec::new(),
        }
    }

    /// Restricts the number of declared parameters
    #[must_use]
    pub fn with_param_count(mut self, count: usize) -> Self {
        self.param_count = Some(count);
        self
    }

    /// Restricts the parameter types (and thereby their number)
    #[must_use]
    pub fn with_param_types(mut self, types: &[&str]) -> Self {
        self.param_count = Some(types.len());
        self.param_types = types.iter().map(ToString::to_string).collect();
        self
    }

    fn count_matches(&self, count: usize) -> bool {
        self.param_count.map_or(true, |expected| expected == count)
    }

    fn matches_definition(&self, method: &MethodEntry) -> bool {
        method.name == self.name
            && self.count_matches(method.params.len())
            && (self.param_types.is_empty()
                || self
                    .param_types
                    .iter()
                    .zip(&method.params)
                    .all(|(expected, actual)| actual.as_deref() == Some(expected.as_str())))
    }

    fn matches_external(&self, method: &ExternalMethod) -> bool {
        method.name == self.name
            && self.count_matches(method.params.len())
            && (self.param_types.is_empty()
                || self
                    .param_types
                    .iter()
                    .zip(&method.params)
                    .all(|(expected, actual)| actual.full_name() == *expected))
    }
}

impl fmt::Display for MethodQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.param_types.is_empty() {
            write!(f, "({})", self.param_types.join(", "))
        } else if let Some(count) = self.param_count {
            write!(f, "/{count}")
        } else {
            Ok(())
        }
    }
}

/// Memoizing lookup service from logical symbols to module-local tokens.
pub struct ReferenceResolver<'a> {
    runtime: &'a RuntimeLibrary,
    imports: &'a ImportTable,
    definitions: DefinitionIndex,
    types: DashMap<TypeLocator, Token>,
    methods: DashMap<(TypeLocator, MethodQuery), Token>,
}

impl<'a> ReferenceResolver<'a> {
    /// Creates a resolver over a runtime library, the module's reference tables and a
    /// snapshot of its definitions
    #[must_use]
    pub fn new(
        runtime: &'a RuntimeLibrary,
        imports: &'a ImportTable,
        definitions: DefinitionIndex,
    ) -> Self {
        ReferenceResolver {
            runtime,
            imports,
            definitions,
            types: DashMap::new(),
            methods: DashMap::new(),
        }
    }

    /// Creates a resolver for a module that is not being mutated
    #[must_use]
    pub fn for_module(module: &'a Module) -> Self {
        Self::new(
            &module.runtime,
            &module.imports,
            DefinitionIndex::build(module),
        )
    }

    /// The definition snapshot lookups run against
    #[must_use]
    pub fn definitions(&self) -> &DefinitionIndex {
        &self.definitions
    }

    /// The runtime library lookups run against
    #[must_use]
    pub fn runtime(&self) -> &RuntimeLibrary {
        self.runtime
    }

    /// Human-readable name of a locator, for diagnostics
    #[must_use]
    pub fn describe(&self, locator: &TypeLocator) -> String {
        match locator {
            TypeLocator::Definition(token) => self
                .definitions
                .get(*token)
                .map_or_else(|| token.to_string(), |entry| entry.full_name.clone()),
            TypeLocator::External(name) => name.full_name(),
        }
    }

    /// Name of the method behind a `MethodDef` or `MemberRef` token
    #[must_use]
    pub fn method_name(&self, token: Token) -> Option<&str> {
        match token.table() {
            Token::METHOD_DEF => self.definitions.method(token).map(|m| m.name.as_str()),
            Token::MEMBER_REF => self.imports.get_member_ref(token).map(|row| row.name.as_str()),
            _ => None,
        }
    }

    /// Resolves a type to a `TypeDef` or `TypeRef` token.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if neither the module nor the runtime library
    /// define the type.
    pub fn resolve_type(&self, locator: &TypeLocator) -> Result<Token> {
        if let Some(token) = self.types.get(locator) {
            return Ok(*token);
        }

        let token = match locator {
            TypeLocator::Definition(token) if self.definitions.get(*token).is_some() => *token,
            TypeLocator::External(name) if self.runtime.contains(name) => {
                self.imports.type_ref(name)
            }
            _ => return Err(Error::TypeNotFound(self.describe(locator))),
        };

        self.types.insert(locator.clone(), token);
        Ok(token)
    }

    /// Resolves a method of `host` (or of one of its bases) matching `query`.
    ///
    /// Module definitions are searched along their in-module base chain first; once the
    /// chain leaves the module, the runtime library's base chain is searched and the
    /// result is imported as a `MemberRef` on the declaring runtime type.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if `host` does not exist and
    /// [`Error::MemberNotFound`] if no method along the chain matches.
    pub fn resolve_method(&self, host: &TypeLocator, query: &MethodQuery) -> Result<Token> {
        let key = (host.clone(), query.clone());
        if let Some(token) = self.methods.get(&key) {
            return Ok(*token);
        }

        let token = match host {
            TypeLocator::Definition(token) => {
                if self.definitions.get(*token).is_none() {
                    return Err(Error::TypeNotFound(self.describe(host)));
                }
                let defined = self.definitions.base_chain(*token).find_map(|entry| {
                    entry
                        .methods
                        .iter()
                        .find(|method| query.matches_definition(method))
                        .map(|method| method.token)
                });
                match (defined, self.definitions.external_base(*token)) {
                    (Some(token), _) => Some(token),
                    (None, Some(TypeLocator::External(base))) => self.find_external(&base, query),
                    (None, _) => None,
                }
            }
            TypeLocator::External(name) => {
                if !self.runtime.contains(name) {
                    return Err(Error::TypeNotFound(name.full_name()));
                }
                self.find_external(name, query)
            }
        };

        let token = token.ok_or_else(|| Error::MemberNotFound {
            host: self.describe(host),
            member: query.to_string(),
        })?;
        self.methods.insert(key, token);
        Ok(token)
    }

    fn find_external(&self, name: &TypeName, query: &MethodQuery) -> Option<Token> {
        self.runtime.base_chain(name).find_map(|ty| {
            let method = ty.methods.iter().find(|m| query.matches_external(m))?;
            Some(self.imports.member_ref(MemberRefRow {
                parent: self.imports.type_ref(&ty.name),
                name: method.name.clone(),
                params: method.params.clone(),
                has_this: method.has_this,
            }))
        })
    }

    /// Imports the type a signature denotes, as used by `box`, `newarr` or `castclass`.
    ///
    /// Built-in element types map to `TypeRef`s of the runtime library, class and value
    /// type signatures to their own token, and constructed types to `TypeSpec` rows.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if a built-in type is missing from the runtime
    /// library.
    pub fn import_type(&self, sig: &TypeSig) -> Result<Token> {
        match sig {
            TypeSig::Class(token) | TypeSig::ValueType(token) => Ok(*token),
            TypeSig::SzArray(_) | TypeSig::ByRef(_) => Ok(self.imports.type_spec(sig)),
            builtin => match builtin.builtin_name() {
                Some(name) => self.resolve_type(&TypeLocator::External(name)),
                None => Err(Error::TypeNotFound(builtin.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        method::{MethodAccessFlags, MethodDef, MethodModifiers, MethodSig, Param},
        module::TypeDef,
        runtime::names,
    };

    fn hook(name: &str, params: Vec<Param>) -> MethodDef {
        MethodDef::new(
            name,
            MethodAccessFlags::PUBLIC,
            MethodModifiers::VIRTUAL,
            MethodSig::instance(params, TypeSig::Void),
        )
    }

    #[test]
    fn resolve_external_type_is_idempotent() {
        let module = Module::new("Test");
        let resolver = ReferenceResolver::for_module(&module);
        let exception = TypeLocator::external(names::EXCEPTION);

        let a = resolver.resolve_type(&exception).unwrap();
        let b = resolver.resolve_type(&exception).unwrap();
        assert_eq!(a, b);
        assert!(a.is_table(Token::TYPE_REF));
        assert_eq!(module.imports.type_ref_count(), 1);
    }

    #[test]
    fn missing_symbols_are_reported() {
        let module = Module::new("Test");
        let resolver = ReferenceResolver::for_module(&module);

        assert!(matches!(
            resolver.resolve_type(&TypeLocator::external("System.Missing")),
            Err(Error::TypeNotFound(name)) if name == "System.Missing"
        ));

        match resolver.resolve_method(
            &TypeLocator::external(names::TYPE),
            &MethodQuery::named("GetTypeFromName"),
        ) {
            Err(Error::MemberNotFound { host, member }) => {
                assert_eq!(host, names::TYPE);
                assert_eq!(member, "GetTypeFromName");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overloads_are_distinguished_by_shape() {
        let module = Module::new("Test");
        let resolver = ReferenceResolver::for_module(&module);
        let method_base = TypeLocator::external(names::METHOD_BASE);

        let one = resolver
            .resolve_method(
                &method_base,
                &MethodQuery::named("GetMethodFromHandle").with_param_count(1),
            )
            .unwrap();
        let two = resolver
            .resolve_method(
                &method_base,
                &MethodQuery::named("GetMethodFromHandle").with_param_count(2),
            )
            .unwrap();
        assert_ne!(one, two);
        assert_eq!(module.imports.get_member_ref(two).unwrap().param_count(), 2);
    }

    #[test]
    fn inherited_runtime_members_use_declaring_type() {
        let module = Module::new("Test");
        let resolver = ReferenceResolver::for_module(&module);

        let token = resolver
            .resolve_method(
                &TypeLocator::external(names::METHOD_BASE),
                &MethodQuery::named("GetCustomAttributes").with_param_count(2),
            )
            .unwrap();
        let row = module.imports.get_member_ref(token).unwrap();
        let parent = module.imports.get_type_ref(row.parent).unwrap();
        assert_eq!(parent.name.full_name(), names::MEMBER_INFO);
        assert!(row.has_this);
    }

    #[test]
    fn definitions_win_over_runtime_bases() {
        let mut module = Module::new("Test");
        let decorator = module.add_type(
            TypeDef::new("App", "LogAttribute")
                .extends(TypeLocator::external(names::DECORATOR_ATTRIBUTE))
                .with_method(hook(
                    "OnEntry",
                    vec![
                        Param::new("method", TypeSig::Object),
                        Param::new("args", TypeSig::SzArray(Box::new(TypeSig::Object))),
                    ],
                )),
        );
        let derived = module.add_type(
            TypeDef::new("App", "TimedAttribute").extends(TypeLocator::Definition(decorator)),
        );
        let on_entry = module.find_method(decorator, "OnEntry").unwrap();
        let resolver = ReferenceResolver::for_module(&module);

        let found = resolver
            .resolve_method(
                &TypeLocator::Definition(derived),
                &MethodQuery::named("OnEntry").with_param_count(2),
            )
            .unwrap();
        assert_eq!(found, on_entry);

        let inherited = resolver
            .resolve_method(
                &TypeLocator::Definition(derived),
                &MethodQuery::named("OnExit").with_param_types(&[
                    names::OBJECT,
                    names::METHOD_BASE,
                    "System.Object[]",
                ]),
            )
            .unwrap();
        assert!(inherited.is_table(Token::MEMBER_REF));
    }

    #[test]
    fn parameter_types_are_checked() {
        let mut module = Module::new("Test");
        let ty = module.add_type(TypeDef::new("App", "Hooks").with_method(hook(
            "OnEntry",
            vec![Param::new("a", TypeSig::I4), Param::new("b", TypeSig::I4)],
        )));
        let resolver = ReferenceResolver::for_module(&module);

        let strict = MethodQuery::named("OnEntry").with_param_types(&["System.Int32", "System.String"]);
        assert!(resolver
            .resolve_method(&TypeLocator::Definition(ty), &strict)
            .is_err());
        let loose = MethodQuery::named("OnEntry").with_param_types(&["System.Int32", "System.Int32"]);
        assert!(resolver
            .resolve_method(&TypeLocator::Definition(ty), &loose)
            .is_ok());
    }

    #[test]
    fn import_type_mapping() {
        let mut module = Module::new("Test");
        let point = module.add_type(TypeDef::new("App", "Point"));
        let resolver = ReferenceResolver::for_module(&module);

        let int32 = resolver.import_type(&TypeSig::I4).unwrap();
        assert_eq!(
            module.imports.get_type_ref(int32).unwrap().name.full_name(),
            "System.Int32"
        );
        assert_eq!(resolver.import_type(&TypeSig::ValueType(point)).unwrap(), point);

        let array = TypeSig::SzArray(Box::new(TypeSig::Object));
        let spec = resolver.import_type(&array).unwrap();
        assert_eq!(resolver.import_type(&array).unwrap(), spec);
        assert_eq!(module.imports.type_spec_count(), 1);
    }

    #[test]
    fn query_display() {
        assert_eq!(MethodQuery::named("OnExit").to_string(), "OnExit");
        assert_eq!(
            MethodQuery::named("GetMethodFromHandle")
                .with_param_count(2)
                .to_string(),
            "GetMethodFromHandle/2"
        );
        assert_eq!(
            MethodQuery::named("OnEntry")
                .with_param_types(&["System.Reflection.MethodBase", "System.Object[]"])
                .to_string(),
            "OnEntry(System.Reflection.MethodBase, System.Object[])"
        );
    }
}
