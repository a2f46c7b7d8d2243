//! The method decorator weaver.
//!
//! Weaving a module happens in three stages:
//!
//! - [`discovery`] computes the decorator kinds of the module (attribute types deriving
//!   from the configured marker base, with their hooks resolved) and the methods carrying
//!   them.
//! - [`resolver`] turns every symbol the rewrite needs into a module-local token,
//!   interning references on first use and memoizing the result.
//! - [`transform`] rewrites one method body, wrapping the original code in a protected
//!   region that calls the decorator's hooks.
//!
//! [`ModuleWeaver`] ties the stages together and reports per-method outcomes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilweave::prelude::*;
//!
//! # fn example(mut module: Module) {
//! let config = WeaverConfig {
//!     parallel: false,
//!     ..WeaverConfig::default()
//! };
//! let report = ModuleWeaver::new(config).execute(&mut module);
//! assert!(report.is_success());
//! # }
//! ```

pub mod config;
pub mod decorator;
pub mod discovery;
pub mod module_weaver;
pub mod resolver;
pub mod transform;

pub use config::WeaverConfig;
pub use decorator::{DecoratorDescriptor, DecoratorKind, WeaveTarget};
pub use discovery::{decorator_kinds, discover};
pub use module_weaver::{ModuleWeaver, WeaveReport};
pub use resolver::{MethodQuery, ReferenceResolver};
pub use transform::{slots, MethodDecorator};
