//! Fluent instruction assembler with forward labels.
//!
//! The [`InstructionAssembler`] is used to write method bodies by hand (tests, demos,
//! synthetic benchmark modules) and exposes the macro-form selection helpers
//! ([`ldarg`], [`ldloc`], [`stloc`], [`ldc_i4`]) that the weaver uses when it emits
//! its own instructions.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::assembly::InstructionAssembler;
//!
//! let mut asm = InstructionAssembler::new();
//! let negative = asm.label();
//! asm.ldarg(0).ldc_i4(0).blt(negative).ldarg(0).ret();
//! asm.mark(negative)?.ldarg(0).neg().ret();
//! let (instructions, _labels) = asm.finish()?;
//! assert_eq!(instructions.len(), 8);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{InstrId, Instruction, InstructionList, OpCode, Operand},
    metadata::token::Token,
    Result,
};

/// A position in the instruction stream that branches can refer to before it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Resolved label positions after [`InstructionAssembler::finish`].
///
/// A label marked after the last instruction resolves to `None`, meaning "end of body".
#[derive(Debug, Clone, Default)]
pub struct LabelMap(HashMap<Label, Option<InstrId>>);

impl LabelMap {
    /// Instruction the label was marked at; `Some(None)` for the end of the body
    #[must_use]
    pub fn get(&self, label: Label) -> Option<Option<InstrId>> {
        self.0.get(&label).copied()
    }
}

/// A label-delimited typed catch clause recorded by the assembler.
///
/// End labels are exclusive; an end label marked after the last instruction means
/// "end of body".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchClause {
    /// First protected instruction
    pub try_start: Label,
    /// First instruction after the protected region
    pub try_end: Label,
    /// First handler instruction
    pub handler_start: Label,
    /// First instruction after the handler
    pub handler_end: Label,
    /// Exception type caught
    pub catch_type: Token,
}

#[derive(Debug, Clone)]
enum Pending {
    Ready(Operand),
    Label(Label),
}

/// Builds an [`InstructionList`] from a fluent sequence of emit calls.
#[derive(Debug, Default)]
pub struct InstructionAssembler {
    pending: Vec<(OpCode, Pending)>,
    marks: Vec<Option<usize>>,
    clauses: Vec<CatchClause>,
}

/// `ldarg` in its most compact encoding
#[must_use]
pub fn ldarg(index: u16) -> Instruction {
    match index {
        0 => Instruction::new(OpCode::Ldarg0),
        1 => Instruction::new(OpCode::Ldarg1),
        2 => Instruction::new(OpCode::Ldarg2),
        3 => Instruction::new(OpCode::Ldarg3),
        4..=255 => Instruction::with(OpCode::LdargS, Operand::Argument(index)),
        _ => Instruction::with(OpCode::Ldarg, Operand::Argument(index)),
    }
}

/// `ldloc` in its most compact encoding
#[must_use]
pub fn ldloc(index: u16) -> Instruction {
    match index {
        0 => Instruction::new(OpCode::Ldloc0),
        1 => Instruction::new(OpCode::Ldloc1),
        2 => Instruction::new(OpCode::Ldloc2),
        3 => Instruction::new(OpCode::Ldloc3),
        4..=255 => Instruction::with(OpCode::LdlocS, Operand::Local(index)),
        _ => Instruction::with(OpCode::Ldloc, Operand::Local(index)),
    }
}

/// `stloc` in its most compact encoding
#[must_use]
pub fn stloc(index: u16) -> Instruction {
    match index {
        0 => Instruction::new(OpCode::Stloc0),
        1 => Instruction::new(OpCode::Stloc1),
        2 => Instruction::new(OpCode::Stloc2),
        3 => Instruction::new(OpCode::Stloc3),
        4..=255 => Instruction::with(OpCode::StlocS, Operand::Local(index)),
        _ => Instruction::with(OpCode::Stloc, Operand::Local(index)),
    }
}

/// `ldc.i4` in its most compact encoding
#[must_use]
pub fn ldc_i4(value: i32) -> Instruction {
    match value {
        -1 => Instruction::new(OpCode::LdcI4M1),
        0 => Instruction::new(OpCode::LdcI4_0),
        1 => Instruction::new(OpCode::LdcI4_1),
        2 => Instruction::new(OpCode::LdcI4_2),
        3 => Instruction::new(OpCode::LdcI4_3),
        4 => Instruction::new(OpCode::LdcI4_4),
        5 => Instruction::new(OpCode::LdcI4_5),
        6 => Instruction::new(OpCode::LdcI4_6),
        7 => Instruction::new(OpCode::LdcI4_7),
        8 => Instruction::new(OpCode::LdcI4_8),
        -128..=127 => Instruction::with(OpCode::LdcI4S, Operand::Int32(value)),
        _ => Instruction::with(OpCode::LdcI4, Operand::Int32(value)),
    }
}

impl InstructionAssembler {
    /// Creates an empty assembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing was emitted yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Allocates a new, not yet marked label
    pub fn label(&mut self) -> Label {
        self.marks.push(None);
        Label(self.marks.len() - 1)
    }

    /// Binds `label` to the next instruction that will be emitted.
    ///
    /// # Errors
    /// Returns an error if the label was already marked or was not created by this
    /// assembler.
    pub fn mark(&mut self, label: Label) -> Result<&mut Self> {
        let position = self.pending.len();
        match self.marks.get_mut(label.0) {
            Some(slot) if slot.is_none() => *slot = Some(position),
            Some(_) => return Err(malformed_error!("Label {} marked twice", label.0)),
            None => return Err(malformed_error!("Unknown label {}", label.0)),
        }
        Ok(self)
    }

    /// Records a typed catch clause delimited by labels
    pub fn catch_clause(&mut self, clause: CatchClause) -> &mut Self {
        self.clauses.push(clause);
        self
    }

    /// Catch clauses recorded so far, in registration order
    #[must_use]
    pub fn clauses(&self) -> &[CatchClause] {
        &self.clauses
    }

    /// Emits an already constructed instruction
    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.pending
            .push((instruction.opcode, Pending::Ready(instruction.operand)));
        self
    }

    /// Emits a branch-family opcode targeting `label`
    pub fn branch(&mut self, opcode: OpCode, label: Label) -> &mut Self {
        self.pending.push((opcode, Pending::Label(label)));
        self
    }

    fn op(&mut self, opcode: OpCode) -> &mut Self {
        self.emit(Instruction::new(opcode))
    }

    fn op_with(&mut self, opcode: OpCode, operand: Operand) -> &mut Self {
        self.emit(Instruction::with(opcode, operand))
    }

    /// `nop`
    pub fn nop(&mut self) -> &mut Self {
        self.op(OpCode::Nop)
    }

    /// `ldarg` (compact form)
    pub fn ldarg(&mut self, index: u16) -> &mut Self {
        self.emit(ldarg(index))
    }

    /// `ldloc` (compact form)
    pub fn ldloc(&mut self, index: u16) -> &mut Self {
        self.emit(ldloc(index))
    }

    /// `stloc` (compact form)
    pub fn stloc(&mut self, index: u16) -> &mut Self {
        self.emit(stloc(index))
    }

    /// `ldc.i4` (compact form)
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        self.emit(ldc_i4(value))
    }

    /// `ldc.i8`
    pub fn ldc_i8(&mut self, value: i64) -> &mut Self {
        self.op_with(OpCode::LdcI8, Operand::Int64(value))
    }

    /// `ldc.r8`
    pub fn ldc_r8(&mut self, value: f64) -> &mut Self {
        self.op_with(OpCode::LdcR8, Operand::Float64(value))
    }

    /// `ldstr`
    pub fn ldstr(&mut self, value: &str) -> &mut Self {
        self.op_with(OpCode::Ldstr, Operand::String(value.to_string()))
    }

    /// `ldnull`
    pub fn ldnull(&mut self) -> &mut Self {
        self.op(OpCode::Ldnull)
    }

    /// `dup`
    pub fn dup(&mut self) -> &mut Self {
        self.op(OpCode::Dup)
    }

    /// `pop`
    pub fn pop(&mut self) -> &mut Self {
        self.op(OpCode::Pop)
    }

    /// `add`
    pub fn add(&mut self) -> &mut Self {
        self.op(OpCode::Add)
    }

    /// `sub`
    pub fn sub(&mut self) -> &mut Self {
        self.op(OpCode::Sub)
    }

    /// `mul`
    pub fn mul(&mut self) -> &mut Self {
        self.op(OpCode::Mul)
    }

    /// `div`
    pub fn div(&mut self) -> &mut Self {
        self.op(OpCode::Div)
    }

    /// `rem`
    pub fn rem(&mut self) -> &mut Self {
        self.op(OpCode::Rem)
    }

    /// `neg`
    pub fn neg(&mut self) -> &mut Self {
        self.op(OpCode::Neg)
    }

    /// `ceq`
    pub fn ceq(&mut self) -> &mut Self {
        self.op(OpCode::Ceq)
    }

    /// `cgt`
    pub fn cgt(&mut self) -> &mut Self {
        self.op(OpCode::Cgt)
    }

    /// `clt`
    pub fn clt(&mut self) -> &mut Self {
        self.op(OpCode::Clt)
    }

    /// `br`
    pub fn br(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Br, label)
    }

    /// `brtrue`
    pub fn brtrue(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Brtrue, label)
    }

    /// `brfalse`
    pub fn brfalse(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Brfalse, label)
    }

    /// `beq`
    pub fn beq(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Beq, label)
    }

    /// `bge`
    pub fn bge(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Bge, label)
    }

    /// `bgt`
    pub fn bgt(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Bgt, label)
    }

    /// `ble`
    pub fn ble(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Ble, label)
    }

    /// `blt`
    pub fn blt(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Blt, label)
    }

    /// `bne.un`
    pub fn bne_un(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::BneUn, label)
    }

    /// `leave`
    pub fn leave(&mut self, label: Label) -> &mut Self {
        self.branch(OpCode::Leave, label)
    }

    /// `ret`
    pub fn ret(&mut self) -> &mut Self {
        self.op(OpCode::Ret)
    }

    /// `throw`
    pub fn throw(&mut self) -> &mut Self {
        self.op(OpCode::Throw)
    }

    /// `rethrow`
    pub fn rethrow(&mut self) -> &mut Self {
        self.op(OpCode::Rethrow)
    }

    /// `call`
    pub fn call(&mut self, method: Token) -> &mut Self {
        self.op_with(OpCode::Call, Operand::Method(method))
    }

    /// `callvirt`
    pub fn callvirt(&mut self, method: Token) -> &mut Self {
        self.op_with(OpCode::Callvirt, Operand::Method(method))
    }

    /// `newobj`
    pub fn newobj(&mut self, constructor: Token) -> &mut Self {
        self.op_with(OpCode::Newobj, Operand::Method(constructor))
    }

    /// `newarr`
    pub fn newarr(&mut self, element_type: Token) -> &mut Self {
        self.op_with(OpCode::Newarr, Operand::Type(element_type))
    }

    /// `ldlen`
    pub fn ldlen(&mut self) -> &mut Self {
        self.op(OpCode::Ldlen)
    }

    /// `ldelem.ref`
    pub fn ldelem_ref(&mut self) -> &mut Self {
        self.op(OpCode::LdelemRef)
    }

    /// `stelem.ref`
    pub fn stelem_ref(&mut self) -> &mut Self {
        self.op(OpCode::StelemRef)
    }

    /// `box`
    pub fn box_value(&mut self, value_type: Token) -> &mut Self {
        self.op_with(OpCode::Box, Operand::Type(value_type))
    }

    /// `unbox.any`
    pub fn unbox_any(&mut self, value_type: Token) -> &mut Self {
        self.op_with(OpCode::UnboxAny, Operand::Type(value_type))
    }

    /// `castclass`
    pub fn castclass(&mut self, class: Token) -> &mut Self {
        self.op_with(OpCode::Castclass, Operand::Type(class))
    }

    /// `ldtoken` for a type
    pub fn ldtoken_type(&mut self, ty: Token) -> &mut Self {
        self.op_with(OpCode::Ldtoken, Operand::Type(ty))
    }

    /// `ldtoken` for a method
    pub fn ldtoken_method(&mut self, method: Token) -> &mut Self {
        self.op_with(OpCode::Ldtoken, Operand::Method(method))
    }

    /// Resolves labels and produces the final instruction list.
    ///
    /// # Errors
    /// Returns an error if a branch refers to a label that was never marked.
    pub fn finish(self) -> Result<(InstructionList, LabelMap)> {
        let mut list = InstructionList::new();
        let mut ids = Vec::with_capacity(self.pending.len());
        for (opcode, _) in &self.pending {
            // Placeholder operands are patched once every handle is known
            ids.push(list.push_back(Instruction::new(*opcode)));
        }

        let resolve = |label: Label| -> Result<Option<InstrId>> {
            match self.marks.get(label.0).copied().flatten() {
                Some(position) => Ok(ids.get(position).copied()),
                None => Err(malformed_error!("Label {} was never marked", label.0)),
            }
        };

        let mut labels = HashMap::new();
        for index in 0..self.marks.len() {
            if self.marks[index].is_some() {
                labels.insert(Label(index), resolve(Label(index))?);
            }
        }

        for (position, (opcode, pending)) in self.pending.iter().enumerate() {
            let operand = match pending {
                Pending::Ready(operand) => operand.clone(),
                Pending::Label(label) => match resolve(*label)? {
                    Some(target) => Operand::Target(target),
                    None => {
                        return Err(malformed_error!(
                            "{} targets the end of the body, which holds no instruction",
                            opcode
                        ))
                    }
                },
            };
            if let Some(instruction) = list.get_mut(ids[position]) {
                instruction.operand = operand;
            }
        }

        Ok((list, LabelMap(labels)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_forms() {
        assert_eq!(ldarg(2).opcode, OpCode::Ldarg2);
        assert_eq!(ldarg(4).opcode, OpCode::LdargS);
        assert_eq!(ldarg(256).opcode, OpCode::Ldarg);
        assert_eq!(ldloc(255).opcode, OpCode::LdlocS);
        assert_eq!(stloc(1).opcode, OpCode::Stloc1);
        assert_eq!(stloc(1000).opcode, OpCode::Stloc);
        assert_eq!(ldc_i4(-1).opcode, OpCode::LdcI4M1);
        assert_eq!(ldc_i4(100).opcode, OpCode::LdcI4S);
        assert_eq!(ldc_i4(1000).opcode, OpCode::LdcI4);
    }

    #[test]
    fn forward_and_backward_labels() {
        let mut asm = InstructionAssembler::new();
        let top = asm.label();
        let exit = asm.label();
        asm.mark(top).unwrap();
        asm.ldarg(0).brfalse(exit).br(top);
        asm.mark(exit).unwrap();
        asm.ret();

        let (list, labels) = asm.finish().unwrap();
        let ids = list.ids();
        assert_eq!(labels.get(top), Some(Some(ids[0])));
        assert_eq!(labels.get(exit), Some(Some(ids[3])));
        assert_eq!(list.get(ids[1]).unwrap().target(), Some(ids[3]));
        assert_eq!(list.get(ids[2]).unwrap().target(), Some(ids[0]));
    }

    #[test]
    fn end_label_resolves_to_none() {
        let mut asm = InstructionAssembler::new();
        let end = asm.label();
        asm.ret();
        asm.mark(end).unwrap();
        let (_, labels) = asm.finish().unwrap();
        assert_eq!(labels.get(end), Some(None));
    }

    #[test]
    fn unmarked_label_is_an_error() {
        let mut asm = InstructionAssembler::new();
        let nowhere = asm.label();
        asm.br(nowhere);
        assert!(asm.finish().is_err());
    }

    #[test]
    fn double_mark_is_an_error() {
        let mut asm = InstructionAssembler::new();
        let label = asm.label();
        asm.mark(label).unwrap();
        assert!(asm.mark(label).is_err());
    }
}
