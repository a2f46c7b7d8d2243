//! # cilweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types of the
//! cilweave library. Import it to build modules, weave them and execute the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilweave operations
pub use crate::Error;

/// The result type used throughout cilweave
pub use crate::Result;

// ================================================================================================
// Module Model
// ================================================================================================

/// Modules and the types they define
pub use crate::metadata::module::{Module, TypeAttributes, TypeDef};

/// Methods, signatures and bodies
pub use crate::metadata::method::{
    ExceptionHandler, ExceptionHandlerFlags, MethodAccessFlags, MethodBody, MethodBodyBuilder,
    MethodDef, MethodModifiers, MethodSig, Param, CONSTRUCTOR_NAME,
};

/// Type signatures and type names
pub use crate::metadata::signature::{TypeLocator, TypeName, TypeSig};

/// Metadata tokens
pub use crate::metadata::token::Token;

/// Custom attributes attached to methods
pub use crate::metadata::attributes::{CustomAttribute, CustomAttributeArgument};

/// The referenced runtime library and the names of its well-known types
pub use crate::metadata::runtime::{names, RuntimeLibrary};

/// Messages collected while weaving
pub use crate::metadata::diagnostics::{
    Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics,
};

// ================================================================================================
// Instructions
// ================================================================================================

/// Instruction construction
pub use crate::assembly::{CatchClause, InstructionAssembler, Label, OpCode};

// ================================================================================================
// Weaving
// ================================================================================================

/// Whole-module weaving
pub use crate::weaver::{ModuleWeaver, WeaveReport, WeaverConfig};

/// Single-method weaving and its inputs
pub use crate::weaver::{
    DecoratorDescriptor, DecoratorKind, MethodDecorator, MethodQuery, ReferenceResolver,
    WeaveTarget,
};

// ================================================================================================
// Emulation
// ================================================================================================

/// Execution of method bodies
pub use crate::emulation::{
    EmValue, EmulationLimits, EmulationOutcome, HeapObject, HeapRef, Interpreter, ManagedHeap,
};
