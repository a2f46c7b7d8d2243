// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0


#![doc(html_no_source)]
#![deny(missing_docs)]

//! # cilweave
//!
//! Method decorator weaving for .NET CIL. Given a module in memory, `cilweave` finds
//! every method marked with a decorator attribute and rewrites its body so that the
//! decorator's hooks run around the original code:
//!
//! - `OnEntry(MethodBase, object[])` before the first original instruction
//! - `OnExit(object, MethodBase, object[])` after a normal return, with the boxed
//!   return value (or `null` for `void` methods)
//! - `OnException(Exception, MethodBase, object[])` when an exception escapes, which
//!   is then rethrown unchanged
//!
//! A decorator is any attribute type deriving from the marker base
//! (`MethodDecorator.Attributes.DecoratorAttribute` by default) that provides the three
//! hooks, declared or inherited.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cilweave::prelude::*;
//!
//! # fn example(module: &mut Module) -> cilweave::Result<()> {
//! let report = ModuleWeaver::new(WeaverConfig::default()).execute(module);
//! for (method, error) in &report.failed {
//!     eprintln!("{method}: {error}");
//! }
//! println!("woven {} methods", report.woven.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - The in-memory module: type and method definitions, signatures,
//!   method bodies, reference tables and the runtime library model
//! - [`assembly`] - CIL instructions, opcodes and the label-based assembler used to
//!   build and rewrite bodies
//! - [`weaver`] - Decorator discovery, reference resolution and the body transform
//! - [`emulation`] - An interpreter for checking woven bodies by executing them
//! - [`Error`] and [`Result`] - Error handling shared by all of the above
//!
//! ## Weaving in Parallel
//!
//! Each decorated method is rewritten independently. Reference rows needed by the woven
//! code are interned in thread-safe tables, so [`weaver::ModuleWeaver`] can process
//! methods on a `rayon` pool; the result does not depend on the scheduling.
//!
//! ## Logging
//!
//! Progress and per-method outcomes are reported through the `log` facade. Install any
//! logger implementation to see them. The same messages are collected as
//! [`metadata::diagnostics::Diagnostics`] in every [`weaver::WeaveReport`].

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use cilweave::prelude::*;
///
/// let mut module = Module::new("Sample.dll");
/// let report = ModuleWeaver::default().execute(&mut module);
/// assert!(report.is_success());
/// ```
pub mod prelude;

/// CIL instructions and the instruction assembler.
///
/// # Key Types
///
/// - [`assembly::Instruction`] - A single instruction with its operand
/// - [`assembly::InstructionList`] - The instruction sequence of a body, with stable ids
/// - [`assembly::InstructionAssembler`] - Fluent, label-based construction of bodies
/// - [`assembly::OpCode`] - The supported opcodes and their stack and flow behaviour
pub mod assembly;

/// The module model the weaver operates on.
///
/// # Key Components
///
/// - [`metadata::module`] - Modules and type definitions
/// - [`metadata::method`] - Method definitions, signatures, bodies and exception handlers
/// - [`metadata::imports`] - `TypeRef`, `MemberRef` and `TypeSpec` rows
/// - [`metadata::runtime`] - The referenced runtime library
/// - [`metadata::index`] - Lookup of definitions by token and name
/// - [`metadata::diagnostics`] - Messages collected while weaving
pub mod metadata;

/// Decorator discovery and method body weaving.
pub mod weaver;

/// Execution of method bodies, used to check woven code.
pub mod emulation;

/// `cilweave` Result type
pub type Result<T> = std::result::Result<T, Error>;

/// `cilweave` Error type
pub use error::Error;
