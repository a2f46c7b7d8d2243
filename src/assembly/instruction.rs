//! Instruction and operand representation.
//!
//! Unlike a decoded byte stream, branch operands here are structural: a branch
//! refers to its target through an [`InstrId`] handle into the owning
//! [`crate::assembly::InstructionList`]. Inserting code anywhere in the list
//! therefore never invalidates an existing branch, and byte offsets are only
//! computed on demand.

use std::fmt;

use crate::{
    assembly::{FlowType, OpCode, OperandType},
    metadata::token::Token,
};

/// Stable handle to an instruction inside an [`crate::assembly::InstructionList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// Raw index into the list arena
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL#{}", self.0)
    }
}

/// Operand attached to an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 32-bit integer literal (also used for the 8-bit `ldc.i4.s` form)
    Int32(i32),
    /// 64-bit integer literal
    Int64(i64),
    /// 64-bit floating point literal
    Float64(f64),
    /// Argument index, counting `this` as argument 0 for instance methods
    Argument(u16),
    /// Local variable slot index
    Local(u16),
    /// Type reference (TypeDef, TypeRef or TypeSpec)
    Type(Token),
    /// Method reference (MethodDef or MemberRef)
    Method(Token),
    /// String literal
    String(String),
    /// Branch or leave target
    Target(InstrId),
}

/// A single CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The operand, matching [`OpCode::operand_type`]
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction without operand
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// Creates an instruction with an operand
    #[must_use]
    pub fn with(opcode: OpCode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// Encoded size of this instruction in bytes
    #[must_use]
    pub fn size(&self) -> u32 {
        self.opcode.size() + self.opcode.operand_type().size()
    }

    /// Control flow behaviour
    #[must_use]
    pub fn flow(&self) -> FlowType {
        self.opcode.flow()
    }

    /// The branch target, if this instruction is a branch or leave
    #[must_use]
    pub fn target(&self) -> Option<InstrId> {
        match self.operand {
            Operand::Target(id) => Some(id),
            _ => None,
        }
    }

    /// Local slot index for `ldloc*`/`stloc*`, including the macro forms
    #[must_use]
    pub fn local_index(&self) -> Option<u16> {
        match self.opcode {
            OpCode::Ldloc0 | OpCode::Stloc0 => Some(0),
            OpCode::Ldloc1 | OpCode::Stloc1 => Some(1),
            OpCode::Ldloc2 | OpCode::Stloc2 => Some(2),
            OpCode::Ldloc3 | OpCode::Stloc3 => Some(3),
            OpCode::LdlocS | OpCode::Ldloc | OpCode::StlocS | OpCode::Stloc => {
                match self.operand {
                    Operand::Local(index) => Some(index),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Argument index for `ldarg*`, including the macro forms
    #[must_use]
    pub fn argument_index(&self) -> Option<u16> {
        match self.opcode {
            OpCode::Ldarg0 => Some(0),
            OpCode::Ldarg1 => Some(1),
            OpCode::Ldarg2 => Some(2),
            OpCode::Ldarg3 => Some(3),
            OpCode::LdargS | OpCode::Ldarg => match self.operand {
                Operand::Argument(index) => Some(index),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether the operand variant is consistent with the opcode's operand type
    #[must_use]
    pub fn operand_matches(&self) -> bool {
        matches!(
            (self.opcode.operand_type(), &self.operand),
            (OperandType::None, Operand::None)
                | (OperandType::Int8 | OperandType::Int32, Operand::Int32(_))
                | (OperandType::Int64, Operand::Int64(_))
                | (OperandType::Float64, Operand::Float64(_))
                | (OperandType::Arg8 | OperandType::Arg16, Operand::Argument(_))
                | (OperandType::Local8 | OperandType::Local16, Operand::Local(_))
                | (
                    OperandType::ShortTarget | OperandType::Target,
                    Operand::Target(_)
                )
                | (OperandType::Token, Operand::Type(_) | Operand::Method(_))
                | (OperandType::String, Operand::String(_))
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(value) => write!(f, " {value}"),
            Operand::Int64(value) => write!(f, " {value}"),
            Operand::Float64(value) => write!(f, " {value}"),
            Operand::Argument(index) => write!(f, " A_{index}"),
            Operand::Local(index) => write!(f, " V_{index}"),
            Operand::Type(token) | Operand::Method(token) => write!(f, " {token}"),
            Operand::String(value) => write!(f, " {value:?}"),
            Operand::Target(id) => write!(f, " {id}"),
        }
    }
}
