//! In-memory module representation the weaver operates on.
//!
//! This module contains the model of a compiled module: type and method definitions,
//! method bodies with their exception handlers, the reference tables woven code imports
//! runtime symbols into, and the runtime library those symbols come from.
//!
//! # Key Components
//!
//! - [`module`] - [`module::Module`] and [`module::TypeDef`]
//! - [`method`] - Method definitions, bodies, exception handlers and the body builder
//! - [`imports`] - Interned `TypeRef`/`MemberRef`/`TypeSpec` rows
//! - [`runtime`] - Description of the external runtime library
//! - [`index`] - Read-only snapshot of definitions used during resolution
//! - [`signature`] - Type signatures and type names
//! - [`token`] - Metadata table row references
//! - [`diagnostics`] - Thread-safe diagnostics collection
//!
//! # Examples
//!
//! ```rust
//! use cilweave::prelude::*;
//!
//! let mut module = Module::new("Sample");
//! let ty = module.add_type(TypeDef::new("Sample", "Widget"));
//! assert_eq!(module.type_full_name(ty).as_deref(), Some("Sample.Widget"));
//! assert!(module.runtime.contains(&TypeName::new("System", "Exception")));
//! ```

/// Custom attributes attached to methods
pub mod attributes;
/// Diagnostics collected while weaving
pub mod diagnostics;
/// Read-only definition snapshot
pub mod index;
/// Interned reference tables
pub mod imports;
/// Method definitions and bodies
pub mod method;
/// Modules and type definitions
pub mod module;
/// The external runtime library
pub mod runtime;
/// Type signatures and names
pub mod signature;
/// Commonly used metadata token type
pub mod token;
