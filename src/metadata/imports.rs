//! Imported type and member references of a module.
//!
//! Code woven into a method can only refer to runtime library symbols through rows of
//! the module's own reference tables: `TypeRef` for types, `MemberRef` for methods and
//! `TypeSpec` for constructed types such as arrays. The [`ImportTable`] interns these
//! rows, so asking for the same symbol twice always yields the same token and never
//! adds a duplicate row.
//!
//! # Thread Safety
//!
//! Rows are appended to `boxcar::Vec`s and indexed through a `DashMap`, so interning
//! works through a shared reference and can happen from several weaving threads at once.
//!
//! # Key Types
//! - [`ImportTable`] - Interning store for reference rows
//! - [`TypeRefRow`], [`MemberRefRow`], [`TypeSpecRow`] - Row contents

use dashmap::DashMap;

use crate::metadata::{
    signature::{TypeName, TypeSig},
    token::Token,
};

/// A type imported from the runtime library.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRefRow {
    /// Name of the imported type
    pub name: TypeName,
}

/// A method imported from the runtime library.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRefRow {
    /// `TypeRef` of the declaring type
    pub parent: Token,
    /// Member name
    pub name: String,
    /// Declared parameter types, which keep same-arity overloads apart
    pub params: Vec<TypeName>,
    /// Whether the member takes a `this` argument
    pub has_this: bool,
}

impl MemberRefRow {
    /// Number of declared parameters
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// A constructed type signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSpecRow {
    /// The signature
    pub sig: TypeSig,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ImportKey {
    Type(TypeRefRow),
    Member(MemberRefRow),
    Spec(TypeSpecRow),
}

/// Interning store for the module's reference tables.
#[derive(Debug, Default)]
pub struct ImportTable {
    type_refs: boxcar::Vec<TypeRefRow>,
    member_refs: boxcar::Vec<MemberRefRow>,
    type_specs: boxcar::Vec<TypeSpecRow>,
    index: DashMap<ImportKey, Token>,
}

impl ImportTable {
    /// Creates empty reference tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a `TypeRef` row for `name`
    pub fn type_ref(&self, name: &TypeName) -> Token {
        let row = TypeRefRow { name: name.clone() };
        *self
            .index
            .entry(ImportKey::Type(row.clone()))
            .or_insert_with(|| row_token(Token::TYPE_REF, self.type_refs.push(row)))
    }

    /// Interns a `MemberRef` row
    pub fn member_ref(&self, row: MemberRefRow) -> Token {
        *self
            .index
            .entry(ImportKey::Member(row.clone()))
            .or_insert_with(|| row_token(Token::MEMBER_REF, self.member_refs.push(row)))
    }

    /// Interns a `TypeSpec` row for `sig`
    pub fn type_spec(&self, sig: &TypeSig) -> Token {
        let row = TypeSpecRow { sig: sig.clone() };
        *self
            .index
            .entry(ImportKey::Spec(row.clone()))
            .or_insert_with(|| row_token(Token::TYPE_SPEC, self.type_specs.push(row)))
    }

    /// Row behind a `TypeRef` token
    #[must_use]
    pub fn get_type_ref(&self, token: Token) -> Option<&TypeRefRow> {
        row_index(token, Token::TYPE_REF).and_then(|index| self.type_refs.get(index))
    }

    /// Row behind a `MemberRef` token
    #[must_use]
    pub fn get_member_ref(&self, token: Token) -> Option<&MemberRefRow> {
        row_index(token, Token::MEMBER_REF).and_then(|index| self.member_refs.get(index))
    }

    /// Row behind a `TypeSpec` token
    #[must_use]
    pub fn get_type_spec(&self, token: Token) -> Option<&TypeSpecRow> {
        row_index(token, Token::TYPE_SPEC).and_then(|index| self.type_specs.get(index))
    }

    /// Number of `TypeRef` rows
    #[must_use]
    pub fn type_ref_count(&self) -> usize {
        self.type_refs.count()
    }

    /// Number of `MemberRef` rows
    #[must_use]
    pub fn member_ref_count(&self) -> usize {
        self.member_refs.count()
    }

    /// Number of `TypeSpec` rows
    #[must_use]
    pub fn type_spec_count(&self) -> usize {
        self.type_specs.count()
    }

    /// Iterates `(token, row)` pairs of the `MemberRef` table
    pub fn member_refs(&self) -> impl Iterator<Item = (Token, &MemberRefRow)> {
        self.member_refs
            .iter()
            .map(|(index, row)| (row_token(Token::MEMBER_REF, index), row))
    }
}

fn row_token(table: u8, index: usize) -> Token {
    #[allow(clippy::cast_possible_truncation)]
    Token::from_parts(table, index as u32 + 1)
}

fn row_index(token: Token, table: u8) -> Option<usize> {
    if token.is_table(table) && token.row() > 0 {
        Some(token.row() as usize - 1)
    } else {
        None
    }
}
