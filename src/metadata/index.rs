//! Read-only snapshot of the module's definitions.
//!
//! Weaving mutates method bodies while symbols are being resolved. The
//! [`DefinitionIndex`] copies everything resolution needs out of the module up front
//! (type names, base types, method shapes) so lookups never alias the bodies being
//! rewritten.

use std::collections::HashMap;

use crate::metadata::{
    module::Module,
    signature::TypeLocator,
    token::Token,
};

/// Shape of a method definition, as far as resolution is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    /// `MethodDef` token
    pub token: Token,
    /// Method name
    pub name: String,
    /// Full names of the parameter types, `None` where a type cannot be named
    pub params: Vec<Option<String>>,
    /// Instance method
    pub has_this: bool,
    /// Has an IL body
    pub has_body: bool,
}

/// A type definition as seen by resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionEntry {
    /// `TypeDef` token
    pub token: Token,
    /// Full name, `Outer/Inner` for nested types
    pub full_name: String,
    /// Base type, `System.Object` when none is declared
    pub extends: TypeLocator,
    /// Abstract types cannot be instantiated
    pub is_abstract: bool,
    /// Methods in declaration order
    pub methods: Vec<MethodEntry>,
}

/// Snapshot of all type definitions of a module, nested types included.
#[derive(Debug, Clone, Default)]
pub struct DefinitionIndex {
    entries: HashMap<Token, DefinitionEntry>,
    by_name: HashMap<String, Token>,
    order: Vec<Token>,
}

impl DefinitionIndex {
    /// Captures the definitions of `module`
    #[must_use]
    pub fn build(module: &Module) -> Self {
        let mut index = DefinitionIndex::default();
        for ty in module.all_types() {
            let full_name = module
                .type_full_name(ty.token)
                .unwrap_or_else(|| ty.type_name().full_name());
            let methods = ty
                .methods
                .iter()
                .map(|method| MethodEntry {
                    token: method.token,
                    name: method.name.clone(),
                    params: method
                        .signature
                        .params
                        .iter()
                        .map(|param| module.sig_type_name(&param.sig))
                        .collect(),
                    has_this: method.signature.has_this,
                    has_body: method.body.is_some(),
                })
                .collect();

            index.by_name.insert(full_name.clone(), ty.token);
            index.order.push(ty.token);
            index.entries.insert(
                ty.token,
                DefinitionEntry {
                    token: ty.token,
                    full_name,
                    extends: module.base_of(ty),
                    is_abstract: ty.is_abstract(),
                    methods,
                },
            );
        }
        index
    }

    /// Entry of a `TypeDef` token
    #[must_use]
    pub fn get(&self, token: Token) -> Option<&DefinitionEntry> {
        self.entries.get(&token)
    }

    /// Entry by full name
    #[must_use]
    pub fn find(&self, full_name: &str) -> Option<&DefinitionEntry> {
        self.by_name.get(full_name).and_then(|token| self.entries.get(token))
    }

    /// Method entry of a `MethodDef` token
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodEntry> {
        self.entries
            .values()
            .flat_map(|entry| entry.methods.iter())
            .find(|method| method.token == token)
    }

    /// Entries in declaration order (parents before nested types)
    pub fn iter(&self) -> impl Iterator<Item = &DefinitionEntry> {
        self.order.iter().filter_map(|token| self.entries.get(token))
    }

    /// Number of indexed types
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the module defines no types
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Walks the in-module base chain of `token`, starting with `token` itself.
    ///
    /// The walk ends at the first base that is not a definition of the module (or at a
    /// cycle); that external base is returned by [`DefinitionIndex::external_base`].
    pub fn base_chain(&self, token: Token) -> impl Iterator<Item = &DefinitionEntry> {
        let mut current = self.entries.get(&token);
        std::iter::from_fn(move || {
            let entry = current?;
            current = match &entry.extends {
                TypeLocator::Definition(base) => self.entries.get(base),
                TypeLocator::External(_) => None,
            };
            Some(entry)
        })
        .take(self.entries.len())
    }

    /// The first base of `token` outside the module
    #[must_use]
    pub fn external_base(&self, token: Token) -> Option<TypeLocator> {
        self.base_chain(token)
            .last()
            .map(|entry| entry.extends.clone())
            .filter(|base| matches!(base, TypeLocator::External(_)))
    }

    /// True if `token` is `ancestor` or derives from it through in-module bases
    #[must_use]
    pub fn derives_from(&self, token: Token, ancestor: Token) -> bool {
        self.base_chain(token).any(|entry| entry.token == ancestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        method::{MethodAccessFlags, MethodDef, MethodModifiers, MethodSig, Param},
        module::TypeDef,
        signature::{TypeName, TypeSig},
    };

    #[test]
    fn chains_end_at_external_bases() {
        let mut module = Module::new("Test");
        let base = module.add_type(
            TypeDef::new("Ns", "Base").extends(TypeLocator::external("System.Attribute")),
        );
        let derived = module.add_type(
            TypeDef::new("Ns", "Derived")
                .extends(TypeLocator::Definition(base))
                .with_method(MethodDef::new(
                    "Run",
                    MethodAccessFlags::PUBLIC,
                    MethodModifiers::empty(),
                    MethodSig::instance(
                        vec![Param::new("args", TypeSig::SzArray(Box::new(TypeSig::Object)))],
                        TypeSig::Void,
                    ),
                )),
        );
        let index = DefinitionIndex::build(&module);

        let chain: Vec<Token> = index.base_chain(derived).map(|e| e.token).collect();
        assert_eq!(chain, vec![derived, base]);

        let run = index.get(derived).unwrap().methods[0].token;
        assert_eq!(index.method(run).map(|m| m.name.as_str()), Some("Run"));
        assert!(index.method(derived).is_none());
        assert_eq!(
            index.external_base(derived),
            Some(TypeLocator::External(TypeName::new("System", "Attribute")))
        );
        assert!(index.derives_from(derived, base));
        assert!(!index.derives_from(base, derived));

        let run = &index.find("Ns.Derived").unwrap().methods[0];
        assert_eq!(run.params, vec![Some("System.Object[]".to_string())]);
        assert!(run.has_this);
    }

    #[test]
    fn cyclic_bases_terminate() {
        let mut module = Module::new("Test");
        let a = module.add_type(TypeDef::new("Ns", "A"));
        let b = module.add_type(TypeDef::new("Ns", "B").extends(TypeLocator::Definition(a)));
        module.type_def_mut(a).unwrap().extends = Some(TypeLocator::Definition(b));

        let index = DefinitionIndex::build(&module);
        assert_eq!(index.base_chain(a).count(), 2);
        assert_eq!(index.external_base(a), None);
    }

    #[test]
    fn default_base_is_object() {
        let mut module = Module::new("Test");
        let plain = module.add_type(TypeDef::new("", "Plain"));
        let index = DefinitionIndex::build(&module);
        assert_eq!(
            index.get(plain).unwrap().extends,
            TypeLocator::external("System.Object")
        );
        assert_eq!(index.len(), 1);
    }
}
