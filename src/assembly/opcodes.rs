//! CIL opcode table for the instruction subset handled by the weaver.
//!
//! Every [`OpCode`] knows its ECMA-335 encoding, the kind of operand that follows it
//! and how it affects control flow. The encoding sizes are what
//! [`crate::metadata::method::MethodBody::offsets`] uses to lay out a body, and the
//! short/long branch pairs drive [`crate::metadata::method::MethodBody::widen_short_branches`].
//!
//! # References
//! - ECMA-335 6th Edition, Partition III - CIL Instruction Set

use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Next,
    /// Unconditional jump to the target operand
    Branch,
    /// Jump to the target operand if a condition holds, otherwise continue
    ConditionalBranch,
    /// Exit a protected region or handler, emptying the evaluation stack
    Leave,
    /// Return from the method
    Return,
    /// Raise or re-raise an exception
    Throw,
    /// Call another method, then continue
    Call,
}

/// Encoding of the operand that follows an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 64-bit floating point immediate
    Float64,
    /// 8-bit argument index
    Arg8,
    /// 16-bit argument index
    Arg16,
    /// 8-bit local index
    Local8,
    /// 16-bit local index
    Local16,
    /// Signed 8-bit branch displacement
    ShortTarget,
    /// Signed 32-bit branch displacement
    Target,
    /// Metadata token (type, method or field)
    Token,
    /// User string token
    String,
}

impl OperandType {
    /// Encoded size of the operand in bytes
    #[must_use]
    pub fn size(self) -> u32 {
        match self {
            OperandType::None => 0,
            OperandType::Int8 | OperandType::Arg8 | OperandType::Local8 => 1,
            OperandType::ShortTarget => 1,
            OperandType::Arg16 | OperandType::Local16 => 2,
            OperandType::Int32 | OperandType::Target => 4,
            OperandType::Token | OperandType::String => 4,
            OperandType::Int64 | OperandType::Float64 => 8,
        }
    }
}

/// A CIL opcode.
///
/// The [`Display`](std::fmt::Display) implementation yields the ILASM mnemonic.
#[allow(missing_docs)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, IntoStaticStr,
)]
pub enum OpCode {
    #[strum(to_string = "nop")]
    Nop,
    #[strum(to_string = "ldarg.0")]
    Ldarg0,
    #[strum(to_string = "ldarg.1")]
    Ldarg1,
    #[strum(to_string = "ldarg.2")]
    Ldarg2,
    #[strum(to_string = "ldarg.3")]
    Ldarg3,
    #[strum(to_string = "ldarg.s")]
    LdargS,
    #[strum(to_string = "ldarg")]
    Ldarg,
    #[strum(to_string = "ldloc.0")]
    Ldloc0,
    #[strum(to_string = "ldloc.1")]
    Ldloc1,
    #[strum(to_string = "ldloc.2")]
    Ldloc2,
    #[strum(to_string = "ldloc.3")]
    Ldloc3,
    #[strum(to_string = "ldloc.s")]
    LdlocS,
    #[strum(to_string = "ldloc")]
    Ldloc,
    #[strum(to_string = "stloc.0")]
    Stloc0,
    #[strum(to_string = "stloc.1")]
    Stloc1,
    #[strum(to_string = "stloc.2")]
    Stloc2,
    #[strum(to_string = "stloc.3")]
    Stloc3,
    #[strum(to_string = "stloc.s")]
    StlocS,
    #[strum(to_string = "stloc")]
    Stloc,
    #[strum(to_string = "ldnull")]
    Ldnull,
    #[strum(to_string = "ldc.i4.m1")]
    LdcI4M1,
    #[strum(to_string = "ldc.i4.0")]
    LdcI4_0,
    #[strum(to_string = "ldc.i4.1")]
    LdcI4_1,
    #[strum(to_string = "ldc.i4.2")]
    LdcI4_2,
    #[strum(to_string = "ldc.i4.3")]
    LdcI4_3,
    #[strum(to_string = "ldc.i4.4")]
    LdcI4_4,
    #[strum(to_string = "ldc.i4.5")]
    LdcI4_5,
    #[strum(to_string = "ldc.i4.6")]
    LdcI4_6,
    #[strum(to_string = "ldc.i4.7")]
    LdcI4_7,
    #[strum(to_string = "ldc.i4.8")]
    LdcI4_8,
    #[strum(to_string = "ldc.i4.s")]
    LdcI4S,
    #[strum(to_string = "ldc.i4")]
    LdcI4,
    #[strum(to_string = "ldc.i8")]
    LdcI8,
    #[strum(to_string = "ldc.r8")]
    LdcR8,
    #[strum(to_string = "ldstr")]
    Ldstr,
    #[strum(to_string = "dup")]
    Dup,
    #[strum(to_string = "pop")]
    Pop,
    #[strum(to_string = "add")]
    Add,
    #[strum(to_string = "sub")]
    Sub,
    #[strum(to_string = "mul")]
    Mul,
    #[strum(to_string = "div")]
    Div,
    #[strum(to_string = "rem")]
    Rem,
    #[strum(to_string = "neg")]
    Neg,
    #[strum(to_string = "ceq")]
    Ceq,
    #[strum(to_string = "cgt")]
    Cgt,
    #[strum(to_string = "clt")]
    Clt,
    #[strum(to_string = "br.s")]
    BrS,
    #[strum(to_string = "brfalse.s")]
    BrfalseS,
    #[strum(to_string = "brtrue.s")]
    BrtrueS,
    #[strum(to_string = "beq.s")]
    BeqS,
    #[strum(to_string = "bge.s")]
    BgeS,
    #[strum(to_string = "bgt.s")]
    BgtS,
    #[strum(to_string = "ble.s")]
    BleS,
    #[strum(to_string = "blt.s")]
    BltS,
    #[strum(to_string = "bne.un.s")]
    BneUnS,
    #[strum(to_string = "br")]
    Br,
    #[strum(to_string = "brfalse")]
    Brfalse,
    #[strum(to_string = "brtrue")]
    Brtrue,
    #[strum(to_string = "beq")]
    Beq,
    #[strum(to_string = "bge")]
    Bge,
    #[strum(to_string = "bgt")]
    Bgt,
    #[strum(to_string = "ble")]
    Ble,
    #[strum(to_string = "blt")]
    Blt,
    #[strum(to_string = "bne.un")]
    BneUn,
    #[strum(to_string = "leave.s")]
    LeaveS,
    #[strum(to_string = "leave")]
    Leave,
    #[strum(to_string = "ret")]
    Ret,
    #[strum(to_string = "throw")]
    Throw,
    #[strum(to_string = "rethrow")]
    Rethrow,
    #[strum(to_string = "endfinally")]
    Endfinally,
    #[strum(to_string = "call")]
    Call,
    #[strum(to_string = "callvirt")]
    Callvirt,
    #[strum(to_string = "newobj")]
    Newobj,
    #[strum(to_string = "newarr")]
    Newarr,
    #[strum(to_string = "ldlen")]
    Ldlen,
    #[strum(to_string = "ldelem.ref")]
    LdelemRef,
    #[strum(to_string = "stelem.ref")]
    StelemRef,
    #[strum(to_string = "box")]
    Box,
    #[strum(to_string = "unbox.any")]
    UnboxAny,
    #[strum(to_string = "castclass")]
    Castclass,
    #[strum(to_string = "ldtoken")]
    Ldtoken,
    #[strum(to_string = "ldobj")]
    Ldobj,
    #[strum(to_string = "ldind.ref")]
    LdindRef,
}

impl OpCode {
    /// ECMA-335 encoding. Two-byte opcodes carry the `0xFE` prefix in the high byte.
    #[must_use]
    pub fn value(self) -> u16 {
        match self {
            OpCode::Nop => 0x00,
            OpCode::Ldarg0 => 0x02,
            OpCode::Ldarg1 => 0x03,
            OpCode::Ldarg2 => 0x04,
            OpCode::Ldarg3 => 0x05,
            OpCode::Ldloc0 => 0x06,
            OpCode::Ldloc1 => 0x07,
            OpCode::Ldloc2 => 0x08,
            OpCode::Ldloc3 => 0x09,
            OpCode::Stloc0 => 0x0A,
            OpCode::Stloc1 => 0x0B,
            OpCode::Stloc2 => 0x0C,
            OpCode::Stloc3 => 0x0D,
            OpCode::LdargS => 0x0E,
            OpCode::LdlocS => 0x11,
            OpCode::StlocS => 0x13,
            OpCode::Ldnull => 0x14,
            OpCode::LdcI4M1 => 0x15,
            OpCode::LdcI4_0 => 0x16,
            OpCode::LdcI4_1 => 0x17,
            OpCode::LdcI4_2 => 0x18,
            OpCode::LdcI4_3 => 0x19,
            OpCode::LdcI4_4 => 0x1A,
            OpCode::LdcI4_5 => 0x1B,
            OpCode::LdcI4_6 => 0x1C,
            OpCode::LdcI4_7 => 0x1D,
            OpCode::LdcI4_8 => 0x1E,
            OpCode::LdcI4S => 0x1F,
            OpCode::LdcI4 => 0x20,
            OpCode::LdcI8 => 0x21,
            OpCode::LdcR8 => 0x23,
            OpCode::Dup => 0x25,
            OpCode::Pop => 0x26,
            OpCode::Call => 0x28,
            OpCode::Ret => 0x2A,
            OpCode::BrS => 0x2B,
            OpCode::BrfalseS => 0x2C,
            OpCode::BrtrueS => 0x2D,
            OpCode::BeqS => 0x2E,
            OpCode::BgeS => 0x2F,
            OpCode::BgtS => 0x30,
            OpCode::BleS => 0x31,
            OpCode::BltS => 0x32,
            OpCode::BneUnS => 0x33,
            OpCode::Br => 0x38,
            OpCode::Brfalse => 0x39,
            OpCode::Brtrue => 0x3A,
            OpCode::Beq => 0x3B,
            OpCode::Bge => 0x3C,
            OpCode::Bgt => 0x3D,
            OpCode::Ble => 0x3E,
            OpCode::Blt => 0x3F,
            OpCode::BneUn => 0x40,
            OpCode::LdindRef => 0x50,
            OpCode::Add => 0x58,
            OpCode::Sub => 0x59,
            OpCode::Mul => 0x5A,
            OpCode::Div => 0x5B,
            OpCode::Rem => 0x5D,
            OpCode::Neg => 0x65,
            OpCode::Callvirt => 0x6F,
            OpCode::Ldobj => 0x71,
            OpCode::Ldstr => 0x72,
            OpCode::Newobj => 0x73,
            OpCode::Castclass => 0x74,
            OpCode::Throw => 0x7A,
            OpCode::Box => 0x8C,
            OpCode::Newarr => 0x8D,
            OpCode::Ldlen => 0x8E,
            OpCode::LdelemRef => 0x9A,
            OpCode::StelemRef => 0xA2,
            OpCode::UnboxAny => 0xA5,
            OpCode::Ldtoken => 0xD0,
            OpCode::Endfinally => 0xDC,
            OpCode::Leave => 0xDD,
            OpCode::LeaveS => 0xDE,
            OpCode::Ceq => 0xFE01,
            OpCode::Cgt => 0xFE02,
            OpCode::Clt => 0xFE04,
            OpCode::Ldarg => 0xFE09,
            OpCode::Ldloc => 0xFE0C,
            OpCode::Stloc => 0xFE0E,
            OpCode::Rethrow => 0xFE1A,
        }
    }

    /// ILASM mnemonic
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Size of the opcode itself in bytes, without operand
    #[must_use]
    pub fn size(self) -> u32 {
        if self.value() > 0xFF {
            2
        } else {
            1
        }
    }

    /// Kind of operand that follows this opcode
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        match self {
            OpCode::LdargS => OperandType::Arg8,
            OpCode::Ldarg => OperandType::Arg16,
            OpCode::LdlocS | OpCode::StlocS => OperandType::Local8,
            OpCode::Ldloc | OpCode::Stloc => OperandType::Local16,
            OpCode::LdcI4S => OperandType::Int8,
            OpCode::LdcI4 => OperandType::Int32,
            OpCode::LdcI8 => OperandType::Int64,
            OpCode::LdcR8 => OperandType::Float64,
            OpCode::Ldstr => OperandType::String,
            OpCode::BrS
            | OpCode::BrfalseS
            | OpCode::BrtrueS
            | OpCode::BeqS
            | OpCode::BgeS
            | OpCode::BgtS
            | OpCode::BleS
            | OpCode::BltS
            | OpCode::BneUnS
            | OpCode::LeaveS => OperandType::ShortTarget,
            OpCode::Br
            | OpCode::Brfalse
            | OpCode::Brtrue
            | OpCode::Beq
            | OpCode::Bge
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Blt
            | OpCode::BneUn
            | OpCode::Leave => OperandType::Target,
            OpCode::Call
            | OpCode::Callvirt
            | OpCode::Newobj
            | OpCode::Newarr
            | OpCode::Box
            | OpCode::UnboxAny
            | OpCode::Castclass
            | OpCode::Ldtoken
            | OpCode::Ldobj => OperandType::Token,
            _ => OperandType::None,
        }
    }

    /// Control flow behaviour of this opcode
    #[must_use]
    pub fn flow(self) -> FlowType {
        match self {
            OpCode::BrS | OpCode::Br => FlowType::Branch,
            OpCode::LeaveS | OpCode::Leave => FlowType::Leave,
            OpCode::Ret => FlowType::Return,
            OpCode::Throw | OpCode::Rethrow | OpCode::Endfinally => FlowType::Throw,
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj => FlowType::Call,
            _ if self.is_branch() => FlowType::ConditionalBranch,
            _ => FlowType::Next,
        }
    }

    /// True for every opcode that carries a branch target operand
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::ShortTarget | OperandType::Target
        )
    }

    /// True for the 1-byte displacement branch forms
    #[must_use]
    pub fn is_short_branch(self) -> bool {
        self.operand_type() == OperandType::ShortTarget
    }

    /// Long-displacement counterpart of a short branch, `None` for anything else
    #[must_use]
    pub fn long_form(self) -> Option<OpCode> {
        Some(match self {
            OpCode::BrS => OpCode::Br,
            OpCode::BrfalseS => OpCode::Brfalse,
            OpCode::BrtrueS => OpCode::Brtrue,
            OpCode::BeqS => OpCode::Beq,
            OpCode::BgeS => OpCode::Bge,
            OpCode::BgtS => OpCode::Bgt,
            OpCode::BleS => OpCode::Ble,
            OpCode::BltS => OpCode::Blt,
            OpCode::BneUnS => OpCode::BneUn,
            OpCode::LeaveS => OpCode::Leave,
            _ => return None,
        })
    }

    /// Whether control can reach the textually next instruction
    #[must_use]
    pub fn falls_through(self) -> bool {
        !matches!(
            self.flow(),
            FlowType::Branch | FlowType::Leave | FlowType::Return | FlowType::Throw
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn encodings_are_unique() {
        let mut seen = HashSet::new();
        for opcode in OpCode::iter() {
            assert!(seen.insert(opcode.value()), "duplicate encoding for {opcode}");
        }
        assert_eq!(seen.len(), OpCode::COUNT);
    }

    #[test]
    fn mnemonics() {
        assert_eq!(OpCode::LdcI4M1.to_string(), "ldc.i4.m1");
        assert_eq!(OpCode::BneUnS.mnemonic(), "bne.un.s");
        assert_eq!(OpCode::Rethrow.to_string(), "rethrow");
    }

    #[test]
    fn sizes() {
        assert_eq!(OpCode::Ret.size(), 1);
        assert_eq!(OpCode::Rethrow.size(), 2);
        assert_eq!(OpCode::Ldloc.size() + OpCode::Ldloc.operand_type().size(), 4);
        assert_eq!(OpCode::BrS.size() + OpCode::BrS.operand_type().size(), 2);
        assert_eq!(OpCode::Br.size() + OpCode::Br.operand_type().size(), 5);
    }

    #[test]
    fn short_branches_have_long_forms() {
        for opcode in OpCode::iter() {
            if opcode.is_short_branch() {
                let long = opcode.long_form().unwrap();
                assert_eq!(long.operand_type(), OperandType::Target);
                assert_eq!(long.flow(), opcode.flow());
            } else {
                assert!(opcode.long_form().is_none());
            }
        }
    }

    #[test]
    fn flow_types() {
        assert_eq!(OpCode::Ret.flow(), FlowType::Return);
        assert_eq!(OpCode::Leave.flow(), FlowType::Leave);
        assert_eq!(OpCode::Brtrue.flow(), FlowType::ConditionalBranch);
        assert_eq!(OpCode::Rethrow.flow(), FlowType::Throw);
        assert_eq!(OpCode::Callvirt.flow(), FlowType::Call);
        assert!(!OpCode::Br.falls_through());
        assert!(OpCode::Blt.falls_through());
        assert!(OpCode::Add.falls_through());
    }
}
