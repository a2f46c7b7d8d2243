//! CIL instruction model used by the weaver.
//!
//! This module provides the structural instruction representation that method bodies
//! are rewritten in. Branch targets are handles rather than byte offsets, so code can be
//! spliced into a body without re-encoding anything until offsets are requested.
//!
//! # Key Types
//! - [`OpCode`] - CIL opcodes with encoding, operand and flow information
//! - [`Instruction`] / [`Operand`] - A single instruction and its operand
//! - [`InstructionList`] - Doubly-linked instruction sequence with stable [`InstrId`] handles
//! - [`InstructionAssembler`] - Fluent emitter with labels
//!
//! # Example
//! ```rust
//! use cilweave::assembly::{InstructionAssembler, OpCode};
//!
//! let mut asm = InstructionAssembler::new();
//! asm.ldarg(0).ldarg(1).add().ret();
//! let (instructions, _) = asm.finish()?;
//!
//! let opcodes: Vec<_> = instructions.iter().map(|(_, i)| i.opcode).collect();
//! assert_eq!(opcodes, [OpCode::Ldarg0, OpCode::Ldarg1, OpCode::Add, OpCode::Ret]);
//! # Ok::<(), cilweave::Error>(())
//! ```

mod assembler;
mod instruction;
mod list;
mod opcodes;

pub use assembler::{
    ldarg, ldc_i4, ldloc, stloc, CatchClause, InstructionAssembler, Label, LabelMap,
};
pub use instruction::{InstrId, Instruction, Operand};
pub use list::{InstructionList, Iter};
pub use opcodes::{FlowType, OpCode, OperandType};
