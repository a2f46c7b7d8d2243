//! In-memory CIL method bodies.
//!
//! A [`MethodBody`] owns its [`InstructionList`], its local variable slots and its
//! exception handler table. Byte offsets are not stored; they are derived from the
//! instruction sizes whenever needed, which keeps the body editable.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::prelude::*;
//!
//! let body = MethodBodyBuilder::new()
//!     .local("sum", TypeSig::I4)
//!     .implementation(|asm| {
//!         asm.ldarg(0).ldarg(1).add().stloc(0).ldloc(0).ret();
//!         Ok(())
//!     })
//!     .build()?;
//!
//! assert_eq!(body.code_size(), 6);
//! assert_eq!(body.locals.len(), 1);
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use std::collections::HashMap;

use crate::{
    assembly::{InstrId, InstructionList},
    metadata::method::{ExceptionHandler, LocalVariable},
    Result,
};

/// Default evaluation stack depth of a method body without explicit information
pub const DEFAULT_MAX_STACK: u16 = 8;

/// Describes one method that has been compiled to CIL bytecode.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Instructions in execution order
    pub instructions: InstructionList,
    /// Local variable slots, indexed by `ldloc`/`stloc`
    pub locals: Vec<LocalVariable>,
    /// Flag, indicating to zero-initialize all local variables
    pub init_locals: bool,
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// A list of exception handlers this method has, innermost first
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Wraps an instruction list into a body without locals or handlers
    #[must_use]
    pub fn new(instructions: InstructionList) -> Self {
        MethodBody {
            instructions,
            locals: Vec::new(),
            init_locals: false,
            max_stack: DEFAULT_MAX_STACK,
            exception_handlers: Vec::new(),
        }
    }

    /// Appends a local slot and returns its index.
    ///
    /// # Errors
    /// Returns an error if the body already holds the maximum number of locals.
    pub fn add_local(&mut self, local: LocalVariable) -> Result<u16> {
        let index = u16::try_from(self.locals.len())
            .map_err(|_| malformed_error!("Too many local variables"))?;
        if index == u16::MAX {
            return Err(malformed_error!("Too many local variables"));
        }
        self.locals.push(local);
        Ok(index)
    }

    /// Total encoded size of the instructions in bytes
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.instructions.iter().map(|(_, instr)| instr.size()).sum()
    }

    /// Byte offset of every instruction
    #[must_use]
    pub fn offsets(&self) -> HashMap<InstrId, u32> {
        let mut offsets = HashMap::with_capacity(self.instructions.len());
        let mut offset = 0;
        for (id, instr) in self.instructions.iter() {
            offsets.insert(id, offset);
            offset += instr.size();
        }
        offsets
    }

    /// Promotes short branches whose displacement no longer fits in a signed byte.
    ///
    /// Widening one branch grows the code between other branches and their targets,
    /// so this repeats until no short branch is out of range. Returns the number of
    /// branches that were widened.
    pub fn widen_short_branches(&mut self) -> usize {
        let mut widened = 0;
        loop {
            let offsets = self.offsets();
            let overflowing: Vec<InstrId> = self
                .instructions
                .iter()
                .filter(|(_, instr)| instr.opcode.is_short_branch())
                .filter_map(|(id, instr)| {
                    let origin = i64::from(*offsets.get(&id)?) + i64::from(instr.size());
                    let target = i64::from(*offsets.get(&instr.target()?)?);
                    let displacement = target - origin;
                    (!(-128..=127).contains(&displacement)).then_some(id)
                })
                .collect();

            if overflowing.is_empty() {
                return widened;
            }

            for id in overflowing {
                if let Some(instr) = self.instructions.get_mut(id) {
                    if let Some(long) = instr.opcode.long_form() {
                        instr.opcode = long;
                        widened += 1;
                    }
                }
            }
        }
    }
}
