//! Structural verification of method bodies.
//!
//! These checks are a subset of the ECMA-335 verifier rules that matter for code
//! produced by the weaver: every handle must be live, regions must be ordered, a
//! protected region cannot contain `ret`, and control cannot run off the end.
//!
//! # References
//! - ECMA-335 6th Edition, Partition I, Section 12.4.2 - Exception handling
//! - ECMA-335 6th Edition, Partition III, Section 1.7.5 - Backward branch constraints

use std::collections::HashMap;

use crate::{
    assembly::{InstrId, OpCode},
    metadata::method::{ExceptionHandler, MethodBody},
    Result,
};

/// Half-open `[start, end)` range of list positions
type Span = (usize, usize);

impl MethodBody {
    /// Checks the structural rules a woven body must satisfy.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] describing the first violated rule.
    pub fn verify(&self) -> Result<()> {
        let last = self
            .instructions
            .last()
            .ok_or_else(|| malformed_error!("Method body has no instructions"))?;

        let positions = self.instructions.positions();
        let locals = self.locals.len();

        for (id, instr) in self.instructions.iter() {
            if !instr.operand_matches() {
                return Err(malformed_error!(
                    "{} carries an operand that does not match its opcode",
                    instr
                ));
            }
            if let Some(target) = instr.target() {
                if !positions.contains_key(&target) {
                    return Err(malformed_error!("{} at {} targets a dead handle", instr, id));
                }
            }
            if let Some(local) = instr.local_index() {
                if usize::from(local) >= locals {
                    return Err(malformed_error!(
                        "{} references local {} but the body declares {}",
                        instr,
                        local,
                        locals
                    ));
                }
            }
        }

        let end = self.instructions.len();
        let mut regions = Vec::with_capacity(self.exception_handlers.len() * 2);
        for (index, handler) in self.exception_handlers.iter().enumerate() {
            let (protected, handled) = spans(handler, &positions, end).ok_or_else(|| {
                malformed_error!("Exception handler {} references a dead handle", index)
            })?;

            if !(protected.0 < protected.1 && protected.1 <= handled.0 && handled.0 < handled.1) {
                return Err(malformed_error!(
                    "Exception handler {} has misordered bounds: try {:?}, handler {:?}",
                    index,
                    protected,
                    handled
                ));
            }
            regions.push(protected);
            regions.push(handled);
        }

        for (position, (_, instr)) in self.instructions.iter().enumerate() {
            if instr.opcode == OpCode::Ret
                && regions
                    .iter()
                    .any(|(start, end)| (*start..*end).contains(&position))
            {
                return Err(malformed_error!(
                    "`ret` at position {} is inside a protected region or handler",
                    position
                ));
            }
        }

        match self.instructions.get(last) {
            Some(instr) if instr.opcode.falls_through() => Err(malformed_error!(
                "Control falls through the last instruction `{}`",
                instr
            )),
            _ => Ok(()),
        }
    }
}

fn spans(
    handler: &ExceptionHandler,
    positions: &HashMap<InstrId, usize>,
    end: usize,
) -> Option<(Span, Span)> {
    let start = |id: InstrId| positions.get(&id).copied();
    let stop = |id: Option<InstrId>| match id {
        Some(id) => positions.get(&id).copied(),
        None => Some(end),
    };

    Some((
        (start(handler.try_start)?, stop(handler.try_end)?),
        (start(handler.handler_start)?, stop(handler.handler_end)?),
    ))
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::{Instruction, InstructionList, OpCode, Operand},
        metadata::{
            method::{ExceptionHandler, LocalVariable, MethodBody},
            signature::TypeSig,
            token::Token,
        },
    };

    fn catch_all() -> Token {
        Token::new(0x0100_0001)
    }

    #[test]
    fn empty_body_fails() {
        assert!(MethodBody::new(InstructionList::new()).verify().is_err());
    }

    #[test]
    fn fall_through_end_fails() {
        let list: InstructionList = [Instruction::new(OpCode::Nop)].into_iter().collect();
        assert!(MethodBody::new(list).verify().is_err());
    }

    #[test]
    fn local_out_of_range_fails() {
        let list: InstructionList = [Instruction::new(OpCode::Ldloc1), Instruction::new(OpCode::Ret)]
            .into_iter()
            .collect();
        let mut body = MethodBody::new(list);
        body.locals.push(LocalVariable::unnamed(TypeSig::I4));
        assert!(body.verify().is_err());
        body.locals.push(LocalVariable::unnamed(TypeSig::I4));
        assert!(body.verify().is_ok());
    }

    #[test]
    fn ret_inside_try_fails() {
        let mut list = InstructionList::new();
        let ret = list.push_back(Instruction::new(OpCode::Ret));
        let handler = list.push_back(Instruction::new(OpCode::Pop));
        let exit = list.push_back(Instruction::new(OpCode::Ret));
        list.insert_before(exit, Instruction::with(OpCode::Leave, Operand::Target(exit)));

        let mut body = MethodBody::new(list);
        body.exception_handlers.push(ExceptionHandler::catch(
            ret,
            Some(handler),
            handler,
            Some(exit),
            catch_all(),
        ));
        assert!(body.verify().is_err());
    }

    #[test]
    fn well_formed_region_passes() {
        let mut list = InstructionList::new();
        let start = list.push_back(Instruction::new(OpCode::Nop));
        let handler = list.push_back(Instruction::new(OpCode::Pop));
        let exit = list.push_back(Instruction::new(OpCode::Ret));
        list.insert_before(handler, Instruction::with(OpCode::Leave, Operand::Target(exit)));
        list.insert_before(exit, Instruction::with(OpCode::Leave, Operand::Target(exit)));

        let mut body = MethodBody::new(list);
        body.exception_handlers.push(ExceptionHandler::catch(
            start,
            Some(handler),
            handler,
            Some(exit),
            catch_all(),
        ));
        assert!(body.verify().is_ok());

        body.exception_handlers[0].try_end = Some(start);
        assert!(body.verify().is_err());
    }
}
