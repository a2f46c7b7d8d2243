//! CIL emulation for checking woven method bodies.
//!
//! Weaving rewrites code nobody reads by hand. To test it, this module executes method
//! bodies of a [`Module`](crate::metadata::module::Module) with a small interpreter,
//! so a test can call a woven method and observe what the hooks saw, what it returned
//! and which exception escaped.
//!
//! The interpreter covers the opcode subset the weaver and typical test methods use:
//! constants, locals and arguments, integer arithmetic and comparisons, branches, calls
//! with virtual dispatch, object and array creation, boxing, casts, `ldtoken`, `throw`,
//! `rethrow`, `leave` and typed catch handlers. `finally`, `fault` and `filter`
//! handlers, unmanaged memory and field access are not emulated.
//!
//! # Key Components
//!
//! - [`Interpreter`] - Executes methods of a module
//! - [`EmValue`] - A value on the evaluation stack, in a local or an argument
//! - [`ManagedHeap`] and [`HeapObject`] - Objects allocated while executing
//! - [`EmulationOutcome`] - How a call ended: a return value or a thrown exception
//! - [`EmulationLimits`] - Budgets that stop runaway code
//! - [`EmulationError`] - Reasons execution cannot continue
//!
//! # Runtime Library
//!
//! Calls to members of the runtime library go through `MemberRef` rows. The emulator
//! implements the ones woven code needs (reflection lookups of the current method and of
//! its attributes, exception construction and messages). Anything else can be supplied
//! with [`Interpreter::register_native`], which also replaces module methods, for
//! example to record the arguments a hook receives.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilweave::prelude::*;
//!
//! # fn example(module: &Module, add: Token) -> cilweave::Result<()> {
//! let mut interpreter = Interpreter::new(module);
//! let outcome = interpreter.invoke(add, vec![EmValue::I32(2), EmValue::I32(3)])?;
//! assert_eq!(outcome.returned(), Some(EmValue::I32(5)));
//! # Ok(())
//! # }
//! ```

mod error;
mod heap;
mod interpreter;
mod native;
mod value;

pub use error::EmulationError;
pub use heap::{HeapObject, ManagedHeap};
pub use interpreter::{EmulationLimits, EmulationOutcome, Interpreter, NativeMethod};
pub use value::{EmValue, HeapRef};
