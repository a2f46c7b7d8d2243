//! Method body builder for creating CIL method implementations.
//!
//! This module provides [`MethodBodyBuilder`] for assembling a [`MethodBody`] from
//! local variable declarations and an [`InstructionAssembler`] closure. Catch clauses
//! recorded on the assembler with [`InstructionAssembler::catch_clause`] are turned
//! into exception handlers once labels are resolved.

use crate::{
    assembly::{CatchClause, InstructionAssembler, Label, LabelMap},
    metadata::{
        method::{body::DEFAULT_MAX_STACK, ExceptionHandler, LocalVariable, MethodBody},
        signature::TypeSig,
    },
    Result,
};

/// Type alias for method body implementation closures
type ImplementationFn = Box<dyn FnOnce(&mut InstructionAssembler) -> Result<()>>;

/// Builder for creating method body implementations.
///
/// # Examples
///
/// ## Method with a catch clause
///
/// ```rust
/// use cilweave::prelude::*;
///
/// let exception = Token::new(0x0100_0001);
/// let body = MethodBodyBuilder::new()
///     .local("result", TypeSig::I4)
///     .implementation(move |asm| {
///         let (try_start, handler, done) = (asm.label(), asm.label(), asm.label());
///         asm.mark(try_start)?.ldarg(0).ldarg(1).div().stloc(0).leave(done);
///         asm.mark(handler)?.pop().ldc_i4(-1).stloc(0).leave(done);
///         asm.mark(done)?.ldloc(0).ret();
///         asm.catch_clause(CatchClause {
///             try_start,
///             try_end: handler,
///             handler_start: handler,
///             handler_end: done,
///             catch_type: exception,
///         });
///         Ok(())
///     })
///     .build()?;
///
/// assert_eq!(body.exception_handlers.len(), 1);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub struct MethodBodyBuilder {
    /// Maximum stack depth
    max_stack: u16,

    /// Initialize locals to zero
    init_locals: bool,

    /// Local variable definitions
    locals: Vec<LocalVariable>,

    /// The implementation closure
    implementation: Option<ImplementationFn>,
}

impl Default for MethodBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodBodyBuilder {
    /// Create a new method body builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_stack: DEFAULT_MAX_STACK,
            init_locals: true,
            locals: Vec::new(),
            implementation: None,
        }
    }

    /// Set the maximum stack depth explicitly.
    #[must_use]
    pub fn max_stack(mut self, stack_size: u16) -> Self {
        self.max_stack = stack_size;
        self
    }

    /// Add a named local variable; locals are numbered in declaration order.
    #[must_use]
    pub fn local(mut self, name: &str, local_type: TypeSig) -> Self {
        self.locals.push(LocalVariable::named(name, local_type));
        self
    }

    /// Set whether locals are zero-initialized (defaults to `true`).
    #[must_use]
    pub fn init_locals(mut self, init: bool) -> Self {
        self.init_locals = init;
        self
    }

    /// Set the method implementation using the instruction assembler.
    #[must_use]
    pub fn implementation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(f));
        self
    }

    /// Build the method body.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No implementation was provided
    /// - The implementation closure returns an error
    /// - A label is left unmarked or a catch clause starts at the end of the body
    pub fn build(self) -> Result<MethodBody> {
        let MethodBodyBuilder {
            max_stack,
            init_locals,
            locals,
            implementation,
        } = self;

        let implementation = implementation
            .ok_or_else(|| malformed_error!("Method body implementation is required"))?;

        let mut asm = InstructionAssembler::new();
        implementation(&mut asm)?;
        let clauses = asm.clauses().to_vec();
        let (instructions, labels) = asm.finish()?;

        let exception_handlers = clauses
            .iter()
            .map(|clause| resolve_clause(clause, &labels))
            .collect::<Result<Vec<_>>>()?;

        Ok(MethodBody {
            instructions,
            locals,
            init_locals,
            max_stack,
            exception_handlers,
        })
    }
}

fn resolve_clause(clause: &CatchClause, labels: &LabelMap) -> Result<ExceptionHandler> {
    let bound = |label: Label| {
        labels
            .get(label)
            .ok_or_else(|| malformed_error!("Catch clause label {:?} was never marked", label))
    };
    let start = |label: Label| {
        bound(label)?.ok_or_else(|| {
            malformed_error!("Catch clause region cannot start at the end of the body")
        })
    };

    Ok(ExceptionHandler::catch(
        start(clause.try_start)?,
        bound(clause.try_end)?,
        start(clause.handler_start)?,
        bound(clause.handler_end)?,
        clause.catch_type,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::OpCode, metadata::token::Token};

    #[test]
    fn missing_implementation() {
        assert!(MethodBodyBuilder::new().build().is_err());
    }

    #[test]
    fn locals_and_flags() {
        let body = MethodBodyBuilder::new()
            .local("a", TypeSig::I4)
            .local("b", TypeSig::String)
            .init_locals(false)
            .max_stack(3)
            .implementation(|asm| {
                asm.ret();
                Ok(())
            })
            .build()
            .unwrap();

        assert_eq!(body.locals.len(), 2);
        assert_eq!(body.locals[1].name.as_deref(), Some("b"));
        assert!(!body.init_locals);
        assert_eq!(body.max_stack, 3);
    }

    #[test]
    fn catch_clause_resolves_to_handles() {
        let catch_type = Token::new(0x0100_0002);
        let body = MethodBodyBuilder::new()
            .implementation(move |asm| {
                let (start, handler, done) = (asm.label(), asm.label(), asm.label());
                asm.mark(start)?.ldnull().throw();
                asm.mark(handler)?.pop().leave(done);
                asm.mark(done)?.ret();
                asm.catch_clause(CatchClause {
                    try_start: start,
                    try_end: handler,
                    handler_start: handler,
                    handler_end: done,
                    catch_type,
                });
                Ok(())
            })
            .build()
            .unwrap();

        let ids = body.instructions.ids();
        let handler = &body.exception_handlers[0];
        assert_eq!(handler.try_start, ids[0]);
        assert_eq!(handler.try_end, Some(ids[2]));
        assert_eq!(handler.handler_start, ids[2]);
        assert_eq!(handler.handler_end, Some(ids[4]));
        assert_eq!(handler.catch_type, Some(catch_type));
        assert_eq!(body.instructions.get(ids[4]).unwrap().opcode, OpCode::Ret);
    }
}
