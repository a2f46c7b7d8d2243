//! The CIL interpreter.
//!
//! [`Interpreter`] executes method bodies of a [`Module`] one instruction at a time. Each
//! call runs in its own frame with an evaluation stack, argument and local slots; calls
//! recurse on the Rust stack, bounded by [`EmulationLimits::max_call_depth`].
//!
//! # Exceptions
//!
//! Thrown exceptions are heap objects. When an instruction throws, the handlers of the
//! current body are searched innermost first for a catch clause whose protected region
//! contains the instruction and whose catch type the exception derives from. If none
//! matches, the call returns [`EmulationOutcome::Threw`] and the caller repeats the
//! search at its call site. `rethrow` re-raises the very object that entered the
//! enclosing catch handler, so exception identity is preserved across handlers.
//!
//! Runtime faults the CLR turns into exceptions (see
//! [`EmulationError::clr_exception`]) are raised as managed exceptions as well. Every
//! other [`EmulationError`] aborts the emulation.
//!
//! Finally, fault and filter clauses are not emulated.

use std::{cmp::Ordering, collections::HashMap};

use crate::{
    assembly::{InstrId, Instruction, OpCode, Operand},
    emulation::{EmValue, EmulationError, HeapObject, HeapRef, ManagedHeap},
    metadata::{
        method::{ExceptionHandlerFlags, MethodBody, MethodDef},
        module::{Module, TypeDef},
        runtime::names,
        signature::{TypeLocator, TypeName},
        token::Token,
    },
    Error, Result,
};

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmulationOutcome {
    /// The method returned, with [`EmValue::Void`] for `void` methods
    Returned(EmValue),
    /// The method let an exception escape
    Threw(HeapRef),
}

impl EmulationOutcome {
    /// The returned value, if the method returned
    #[must_use]
    pub fn returned(&self) -> Option<EmValue> {
        match self {
            EmulationOutcome::Returned(value) => Some(*value),
            EmulationOutcome::Threw(_) => None,
        }
    }

    /// The escaping exception, if the method threw
    #[must_use]
    pub fn thrown(&self) -> Option<HeapRef> {
        match self {
            EmulationOutcome::Returned(_) => None,
            EmulationOutcome::Threw(exception) => Some(*exception),
        }
    }
}

/// Execution budget of an [`Interpreter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulationLimits {
    /// Instructions executed over the interpreter's lifetime
    pub max_instructions: u64,
    /// Nested calls into interpreted bodies
    pub max_call_depth: usize,
}

impl Default for EmulationLimits {
    fn default() -> Self {
        EmulationLimits {
            max_instructions: 1_000_000,
            max_call_depth: 128,
        }
    }
}

/// Implementation of a method provided by the host.
///
/// Receives the heap and the call arguments, `this` first for instance methods.
pub type NativeMethod = Box<dyn Fn(&mut ManagedHeap, &[EmValue]) -> Result<EmulationOutcome>>;

/// Interpreter over the method bodies of one module.
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::prelude::*;
///
/// # fn example(module: &Module, add: Token) -> cilweave::Result<()> {
/// let mut interpreter = Interpreter::new(module);
/// let outcome = interpreter.invoke(add, vec![EmValue::I32(2), EmValue::I32(3)])?;
/// assert_eq!(outcome.returned(), Some(EmValue::I32(5)));
/// # Ok(())
/// # }
/// ```
pub struct Interpreter<'m> {
    pub(super) module: &'m Module,
    pub(super) heap: ManagedHeap,
    natives: HashMap<Token, NativeMethod>,
    limits: EmulationLimits,
    executed: u64,
    depth: usize,
}

// Control transfer requested by one instruction
enum Step {
    Next,
    Jump(InstrId),
    Leave(InstrId),
    Return(EmValue),
    Throw(HeapRef),
}

struct Frame<'m> {
    method: Token,
    body: &'m MethodBody,
    returns_value: bool,
    args: Vec<EmValue>,
    locals: Vec<Option<EmValue>>,
    stack: Vec<EmValue>,
    positions: HashMap<InstrId, usize>,
    // Catch handlers being executed, innermost last: (handler index, caught exception)
    active: Vec<(usize, HeapRef)>,
}

impl<'m> Frame<'m> {
    fn new(method: Token, definition: &MethodDef, body: &'m MethodBody, args: Vec<EmValue>) -> Self {
        let locals = body
            .locals
            .iter()
            .map(|local| body.init_locals.then(|| EmValue::default_for(&local.sig)))
            .collect();
        Frame {
            method,
            body,
            returns_value: !definition.signature.return_type.is_void(),
            args,
            locals,
            stack: Vec::new(),
            positions: body.instructions.positions(),
            active: Vec::new(),
        }
    }

    fn push(&mut self, value: EmValue) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<EmValue> {
        Ok(self.stack.pop().ok_or(EmulationError::StackUnderflow)?)
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<EmValue>> {
        if count > self.stack.len() {
            return Err(EmulationError::StackUnderflow.into());
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn argument(&self, index: u16) -> Result<EmValue> {
        let index = usize::from(index);
        Ok(*self
            .args
            .get(index)
            .ok_or(EmulationError::ArgumentIndexOutOfBounds {
                index,
                count: self.args.len(),
            })?)
    }

    fn local(&self, index: u16) -> Result<EmValue> {
        let index = usize::from(index);
        let slot = self
            .locals
            .get(index)
            .ok_or(EmulationError::LocalIndexOutOfBounds {
                index,
                count: self.locals.len(),
            })?;
        Ok(slot.ok_or(EmulationError::UninitializedLocal { index })?)
    }

    fn set_local(&mut self, index: u16, value: EmValue) -> Result<()> {
        let index = usize::from(index);
        let count = self.locals.len();
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(EmulationError::LocalIndexOutOfBounds { index, count })?;
        *slot = Some(value);
        Ok(())
    }

    fn position(&self, id: InstrId) -> Result<usize> {
        Ok(*self
            .positions
            .get(&id)
            .ok_or(EmulationError::InvalidBranchTarget)?)
    }

    fn end_position(&self, end: Option<InstrId>) -> Result<usize> {
        end.map_or(Ok(self.positions.len()), |id| self.position(id))
    }

    fn in_range(&self, start: InstrId, end: Option<InstrId>, position: usize) -> Result<bool> {
        Ok(self.position(start)? <= position && position < self.end_position(end)?)
    }

    fn in_handler(&self, index: usize, position: usize) -> Result<bool> {
        match self.body.exception_handlers.get(index) {
            Some(handler) => self.in_range(handler.handler_start, handler.handler_end, position),
            None => Ok(false),
        }
    }

    // Drops the catch handlers that `position` is no longer inside of
    fn exit_handlers(&mut self, position: usize) -> Result<()> {
        let mut kept = Vec::with_capacity(self.active.len());
        for (index, exception) in std::mem::take(&mut self.active) {
            if self.in_handler(index, position)? {
                kept.push((index, exception));
            }
        }
        self.active = kept;
        Ok(())
    }
}

fn target(instr: &Instruction) -> Result<InstrId> {
    Ok(instr.target().ok_or(EmulationError::InvalidBranchTarget)?)
}

fn token_operand(instr: &Instruction) -> Result<Token> {
    match instr.operand {
        Operand::Method(token) | Operand::Type(token) => Ok(token),
        _ => Err(malformed_error!("{} without a token operand", instr.opcode)),
    }
}

macro_rules! integer_arithmetic {
    ($op:expr, $x:expr, $y:expr) => {
        match $op {
            OpCode::Add => Ok($x.wrapping_add($y)),
            OpCode::Sub => Ok($x.wrapping_sub($y)),
            OpCode::Mul => Ok($x.wrapping_mul($y)),
            OpCode::Div if $y == 0 => Err(EmulationError::DivisionByZero),
            OpCode::Div => Ok($x.wrapping_div($y)),
            OpCode::Rem if $y == 0 => Err(EmulationError::DivisionByZero),
            OpCode::Rem => Ok($x.wrapping_rem($y)),
            _ => Err(EmulationError::StackTypeMismatch {
                expected: "arithmetic operation",
                found: "integer",
            }),
        }
    };
}

fn arithmetic(op: OpCode, a: EmValue, b: EmValue) -> Result<EmValue> {
    let value = match (a, b) {
        (EmValue::I32(x), EmValue::I32(y)) => EmValue::I32(integer_arithmetic!(op, x, y)?),
        (EmValue::I64(x), EmValue::I64(y)) => EmValue::I64(integer_arithmetic!(op, x, y)?),
        (EmValue::F64(x), EmValue::F64(y)) => EmValue::F64(match op {
            OpCode::Add => x + y,
            OpCode::Sub => x - y,
            OpCode::Mul => x * y,
            OpCode::Div => x / y,
            _ => x % y,
        }),
        (a, b) => {
            return Err(EmulationError::StackTypeMismatch {
                expected: a.type_name(),
                found: b.type_name(),
            }
            .into())
        }
    };
    Ok(value)
}

// Ordering of two stack values; `None` for unordered pairs (NaN, distinct references)
fn compare(a: EmValue, b: EmValue) -> Result<Option<Ordering>> {
    match (a, b) {
        (EmValue::I32(x), EmValue::I32(y)) => Ok(Some(x.cmp(&y))),
        (EmValue::I64(x), EmValue::I64(y)) => Ok(Some(x.cmp(&y))),
        (EmValue::F64(x), EmValue::F64(y)) => Ok(x.partial_cmp(&y)),
        (
            EmValue::Null | EmValue::ObjectRef(_),
            EmValue::Null | EmValue::ObjectRef(_),
        ) => Ok((a == b).then_some(Ordering::Equal)),
        (a, b) => Err(EmulationError::StackTypeMismatch {
            expected: a.type_name(),
            found: b.type_name(),
        }
        .into()),
    }
}

fn condition(op: OpCode, ordering: Option<Ordering>) -> bool {
    match op {
        OpCode::Beq | OpCode::BeqS | OpCode::Ceq => ordering == Some(Ordering::Equal),
        OpCode::BneUn | OpCode::BneUnS => ordering != Some(Ordering::Equal),
        OpCode::Bge | OpCode::BgeS => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        OpCode::Bgt | OpCode::BgtS | OpCode::Cgt => ordering == Some(Ordering::Greater),
        OpCode::Ble | OpCode::BleS => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        _ => ordering == Some(Ordering::Less),
    }
}

impl<'m> Interpreter<'m> {
    /// Creates an interpreter over `module` with default limits
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        Interpreter {
            module,
            heap: ManagedHeap::new(),
            natives: HashMap::new(),
            limits: EmulationLimits::default(),
            executed: 0,
            depth: 0,
        }
    }

    /// Replaces the execution budget
    #[must_use]
    pub fn with_limits(mut self, limits: EmulationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Provides the implementation of `method`.
    ///
    /// Natives take precedence over bodies and over the built-in runtime library
    /// methods, so they can stand in for abstract hooks as well as for any method the
    /// emulator does not know.
    pub fn register_native<F>(&mut self, method: Token, native: F)
    where
        F: Fn(&mut ManagedHeap, &[EmValue]) -> Result<EmulationOutcome> + 'static,
    {
        self.natives.insert(method, Box::new(native));
    }

    /// The heap, to inspect values returned or thrown
    #[must_use]
    pub fn heap(&self) -> &ManagedHeap {
        &self.heap
    }

    /// The heap, to allocate arguments
    pub fn heap_mut(&mut self) -> &mut ManagedHeap {
        &mut self.heap
    }

    /// Instructions executed so far
    #[must_use]
    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Calls `method` with `args` (`this` first for instance methods).
    ///
    /// # Errors
    /// Returns an [`Error::Emulation`] if execution cannot continue (stack misuse,
    /// unknown call targets, exhausted limits) and [`Error::NotSupported`] for opcodes
    /// and handler kinds the emulator does not implement. Exceptions thrown by the
    /// code itself are not errors; they end in [`EmulationOutcome::Threw`].
    pub fn invoke(&mut self, method: Token, args: Vec<EmValue>) -> Result<EmulationOutcome> {
        self.call_method(method, args, false)
    }

    /// Allocates an object and runs the constructor `ctor` on it, like `newobj`.
    ///
    /// # Errors
    /// See [`Interpreter::invoke`].
    pub fn construct(&mut self, ctor: Token, args: Vec<EmValue>) -> Result<EmulationOutcome> {
        self.new_object(ctor, args)
    }

    pub(super) fn call_method(
        &mut self,
        target: Token,
        args: Vec<EmValue>,
        is_virtual: bool,
    ) -> Result<EmulationOutcome> {
        let resolved = if is_virtual {
            self.dispatch(target, args.first())?
        } else {
            target
        };

        if let Some(native) = self
            .natives
            .get(&resolved)
            .or_else(|| self.natives.get(&target))
        {
            return native(&mut self.heap, &args);
        }

        match resolved.table() {
            Token::METHOD_DEF => {
                let module = self.module;
                let (_, definition) = module
                    .method(resolved)
                    .ok_or(EmulationError::MethodNotFound { token: resolved })?;
                let body = definition
                    .body
                    .as_ref()
                    .ok_or(EmulationError::MethodNotFound { token: resolved })?;
                self.execute(resolved, definition, body, args)
            }
            Token::MEMBER_REF => self.runtime_call(resolved, args),
            _ => Err(EmulationError::MethodNotFound { token: resolved }.into()),
        }
    }

    pub(super) fn new_object(&mut self, ctor: Token, args: Vec<EmValue>) -> Result<EmulationOutcome> {
        let object = match ctor.table() {
            Token::METHOD_DEF => {
                let (ty, _) = self
                    .module
                    .method(ctor)
                    .ok_or(EmulationError::MethodNotFound { token: ctor })?;
                HeapObject::Instance {
                    type_token: ty.token,
                }
            }
            Token::MEMBER_REF => {
                let type_name = self
                    .module
                    .imports
                    .get_member_ref(ctor)
                    .and_then(|row| self.module.token_type_name(row.parent))
                    .ok_or(EmulationError::MethodNotFound { token: ctor })?;
                if !self.is_exception_type(&type_name) {
                    return Err(Error::NotSupported(format!(
                        "cannot construct runtime type {type_name}"
                    )));
                }
                HeapObject::Exception {
                    type_name,
                    message: None,
                }
            }
            _ => return Err(EmulationError::MethodNotFound { token: ctor }.into()),
        };

        let this = self.heap.alloc(object);
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(EmValue::ObjectRef(this));
        full.extend(args);
        Ok(match self.call_method(ctor, full, false)? {
            EmulationOutcome::Returned(_) => EmulationOutcome::Returned(EmValue::ObjectRef(this)),
            threw => threw,
        })
    }

    /// Name and declared parameter count of a call target
    pub(super) fn member_shape(&self, token: Token) -> Result<(&'m str, usize, bool)> {
        let module = self.module;
        match token.table() {
            Token::METHOD_DEF => module
                .method(token)
                .map(|(_, method)| {
                    (
                        method.name.as_str(),
                        method.signature.params.len(),
                        method.signature.has_this,
                    )
                })
                .ok_or_else(|| EmulationError::MethodNotFound { token }.into()),
            Token::MEMBER_REF => module
                .imports
                .get_member_ref(token)
                .map(|row| (row.name.as_str(), row.param_count(), row.has_this))
                .ok_or_else(|| EmulationError::MethodNotFound { token }.into()),
            _ => Err(EmulationError::MethodNotFound { token }.into()),
        }
    }

    // Finds the override of `target` for the runtime type of `this`
    fn dispatch(&self, target: Token, this: Option<&EmValue>) -> Result<Token> {
        let Some(EmValue::ObjectRef(reference)) = this else {
            return Ok(target);
        };
        let HeapObject::Instance { type_token } = self.heap.get(*reference)? else {
            return Ok(target);
        };

        let (name, param_count, _) = self.member_shape(target)?;
        Ok(self
            .definition_chain(*type_token)
            .into_iter()
            .flat_map(|ty| ty.methods.iter())
            .find(|method| {
                !method.is_static()
                    && method.name == name
                    && method.signature.params.len() == param_count
            })
            .map_or(target, |method| method.token))
    }

    // The type `ty` and its in-module bases
    pub(super) fn definition_chain(&self, ty: Token) -> Vec<&'m TypeDef> {
        let module = self.module;
        let limit = module.all_types().len();
        let mut chain = Vec::new();
        let mut current = module.type_def(ty);
        while let Some(definition) = current {
            if chain.len() > limit {
                break;
            }
            chain.push(definition);
            current = match &definition.extends {
                Some(TypeLocator::Definition(base)) => module.type_def(*base),
                _ => None,
            };
        }
        chain
    }

    fn is_exception_type(&self, type_name: &str) -> bool {
        self.module.runtime.derives_from(
            &TypeName::parse(type_name),
            &TypeName::parse(names::EXCEPTION),
        )
    }

    // Full names of the type of `reference` and all its bases
    fn type_chain(&self, reference: HeapRef) -> Result<Vec<String>> {
        let external = |name: &str| -> Vec<String> {
            let chain: Vec<String> = self
                .module
                .runtime
                .base_chain(&TypeName::parse(name))
                .map(|ty| ty.name.full_name())
                .collect();
            if chain.is_empty() {
                vec![name.to_string(), names::OBJECT.to_string()]
            } else {
                chain
            }
        };

        Ok(match self.heap.get(reference)? {
            HeapObject::Exception { type_name, .. } => {
                let mut chain = external(type_name);
                if !chain.iter().any(|name| name == names::EXCEPTION) {
                    chain.insert(1, names::EXCEPTION.to_string());
                }
                chain
            }
            HeapObject::Instance { type_token } => {
                let definitions = self.definition_chain(*type_token);
                let mut chain: Vec<String> = definitions
                    .iter()
                    .filter_map(|ty| self.module.type_full_name(ty.token))
                    .collect();
                if let Some(TypeLocator::External(base)) =
                    definitions.last().map(|ty| self.module.base_of(ty))
                {
                    chain.extend(external(&base.full_name()));
                }
                chain
            }
            HeapObject::String(_) => vec![names::STRING.to_string(), names::OBJECT.to_string()],
            HeapObject::Type(_) => vec![
                names::TYPE.to_string(),
                names::MEMBER_INFO.to_string(),
                names::OBJECT.to_string(),
            ],
            HeapObject::Method(_) => vec![
                names::METHOD_BASE.to_string(),
                names::MEMBER_INFO.to_string(),
                names::OBJECT.to_string(),
            ],
            HeapObject::Boxed(_) | HeapObject::Array(_) => vec![names::OBJECT.to_string()],
        })
    }

    // True if `reference` is an instance of the type `ty` (any type token)
    fn is_instance_of(&self, reference: HeapRef, ty: Token) -> Result<bool> {
        match self.module.token_type_name(ty) {
            Some(name) => Ok(self.type_chain(reference)?.contains(&name)),
            None => Ok(false),
        }
    }

    fn execute(
        &mut self,
        method: Token,
        definition: &'m MethodDef,
        body: &'m MethodBody,
        args: Vec<EmValue>,
    ) -> Result<EmulationOutcome> {
        let expected = definition.signature.argument_count();
        if args.len() != expected {
            return Err(EmulationError::ArgumentCountMismatch {
                expected,
                found: args.len(),
            }
            .into());
        }
        if self.depth >= self.limits.max_call_depth {
            return Err(EmulationError::CallDepthExceeded {
                limit: self.limits.max_call_depth,
            }
            .into());
        }

        log::trace!("entering {}", self.module.method_full_name(method).unwrap_or_default());
        self.depth += 1;
        let mut frame = Frame::new(method, definition, body, args);
        let result = self.run(&mut frame);
        self.depth -= 1;
        result
    }

    fn run(&mut self, frame: &mut Frame<'m>) -> Result<EmulationOutcome> {
        let body = frame.body;
        let mut pc = body
            .instructions
            .first()
            .ok_or(EmulationError::FellThroughEnd {
                method: frame.method,
            })?;

        loop {
            self.executed += 1;
            if self.executed > self.limits.max_instructions {
                return Err(EmulationError::InstructionLimitExceeded {
                    limit: self.limits.max_instructions,
                }
                .into());
            }

            let instr = body
                .instructions
                .get(pc)
                .ok_or(EmulationError::InvalidBranchTarget)?;
            let step = match self.step(frame, instr) {
                Ok(step) => step,
                Err(Error::Emulation(error)) if error.is_clr_exception() => {
                    let name = error.clr_exception().unwrap_or(names::EXCEPTION);
                    log::trace!("{instr} raised {name}");
                    Step::Throw(self.heap.alloc_exception(name, Some(&error.to_string())))
                }
                Err(error) => return Err(error),
            };

            pc = match step {
                Step::Next => body
                    .instructions
                    .next(pc)
                    .ok_or(EmulationError::FellThroughEnd {
                        method: frame.method,
                    })?,
                Step::Jump(target) => target,
                Step::Leave(target) => {
                    frame.stack.clear();
                    let position = frame.position(target)?;
                    frame.exit_handlers(position)?;
                    target
                }
                Step::Return(value) => return Ok(EmulationOutcome::Returned(value)),
                Step::Throw(exception) => match self.find_handler(frame, pc, exception)? {
                    Some(handler) => handler,
                    None => return Ok(EmulationOutcome::Threw(exception)),
                },
            };
        }
    }

    fn find_handler(
        &self,
        frame: &mut Frame<'m>,
        pc: InstrId,
        exception: HeapRef,
    ) -> Result<Option<InstrId>> {
        let position = frame.position(pc)?;
        frame.exit_handlers(position)?;

        let body = frame.body;
        for (index, handler) in body.exception_handlers.iter().enumerate() {
            if !frame.in_range(handler.try_start, handler.try_end, position)? {
                continue;
            }
            if handler.flags.intersects(
                ExceptionHandlerFlags::FILTER
                    | ExceptionHandlerFlags::FINALLY
                    | ExceptionHandlerFlags::FAULT,
            ) {
                return Err(Error::NotSupported(
                    "finally, fault and filter clauses are not emulated".to_string(),
                ));
            }

            let catches = match handler.catch_type {
                Some(catch_type) => self.is_instance_of(exception, catch_type)?,
                None => true,
            };
            if catches {
                frame.stack.clear();
                frame.push(EmValue::ObjectRef(exception));
                frame.active.push((index, exception));
                return Ok(Some(handler.handler_start));
            }
        }
        Ok(None)
    }

    fn step(&mut self, frame: &mut Frame<'m>, instr: &Instruction) -> Result<Step> {
        match instr.opcode {
            OpCode::Nop => {}
            OpCode::Ldarg0
            | OpCode::Ldarg1
            | OpCode::Ldarg2
            | OpCode::Ldarg3
            | OpCode::LdargS
            | OpCode::Ldarg => {
                let index = instr
                    .argument_index()
                    .ok_or_else(|| malformed_error!("{instr} without an argument index"))?;
                let value = frame.argument(index)?;
                frame.push(value);
            }
            OpCode::Ldloc0
            | OpCode::Ldloc1
            | OpCode::Ldloc2
            | OpCode::Ldloc3
            | OpCode::LdlocS
            | OpCode::Ldloc => {
                let index = instr
                    .local_index()
                    .ok_or_else(|| malformed_error!("{instr} without a local index"))?;
                let value = frame.local(index)?;
                frame.push(value);
            }
            OpCode::Stloc0
            | OpCode::Stloc1
            | OpCode::Stloc2
            | OpCode::Stloc3
            | OpCode::StlocS
            | OpCode::Stloc => {
                let index = instr
                    .local_index()
                    .ok_or_else(|| malformed_error!("{instr} without a local index"))?;
                let value = frame.pop()?;
                frame.set_local(index, value)?;
            }
            OpCode::Ldnull => frame.push(EmValue::Null),
            OpCode::LdcI4M1 => frame.push(EmValue::I32(-1)),
            OpCode::LdcI4_0 => frame.push(EmValue::I32(0)),
            OpCode::LdcI4_1 => frame.push(EmValue::I32(1)),
            OpCode::LdcI4_2 => frame.push(EmValue::I32(2)),
            OpCode::LdcI4_3 => frame.push(EmValue::I32(3)),
            OpCode::LdcI4_4 => frame.push(EmValue::I32(4)),
            OpCode::LdcI4_5 => frame.push(EmValue::I32(5)),
            OpCode::LdcI4_6 => frame.push(EmValue::I32(6)),
            OpCode::LdcI4_7 => frame.push(EmValue::I32(7)),
            OpCode::LdcI4_8 => frame.push(EmValue::I32(8)),
            OpCode::LdcI4S | OpCode::LdcI4 => match instr.operand {
                Operand::Int32(value) => frame.push(EmValue::I32(value)),
                _ => return Err(malformed_error!("{instr} without an int32 operand")),
            },
            OpCode::LdcI8 => match instr.operand {
                Operand::Int64(value) => frame.push(EmValue::I64(value)),
                _ => return Err(malformed_error!("{instr} without an int64 operand")),
            },
            OpCode::LdcR8 => match instr.operand {
                Operand::Float64(value) => frame.push(EmValue::F64(value)),
                _ => return Err(malformed_error!("{instr} without a float64 operand")),
            },
            OpCode::Ldstr => match &instr.operand {
                Operand::String(value) => {
                    let reference = self.heap.alloc_string(value);
                    frame.push(EmValue::ObjectRef(reference));
                }
                _ => return Err(malformed_error!("{instr} without a string operand")),
            },
            OpCode::Dup => {
                let value = frame.pop()?;
                frame.push(value);
                frame.push(value);
            }
            OpCode::Pop => {
                frame.pop()?;
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Rem => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(arithmetic(instr.opcode, a, b)?);
            }
            OpCode::Neg => {
                let value = match frame.pop()? {
                    EmValue::I32(x) => EmValue::I32(x.wrapping_neg()),
                    EmValue::I64(x) => EmValue::I64(x.wrapping_neg()),
                    EmValue::F64(x) => EmValue::F64(-x),
                    other => {
                        return Err(EmulationError::StackTypeMismatch {
                            expected: "number",
                            found: other.type_name(),
                        }
                        .into())
                    }
                };
                frame.push(value);
            }
            OpCode::Ceq | OpCode::Cgt | OpCode::Clt => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let result = condition(instr.opcode, compare(a, b)?);
                frame.push(EmValue::I32(i32::from(result)));
            }
            OpCode::Br | OpCode::BrS => return Ok(Step::Jump(target(instr)?)),
            OpCode::Brtrue | OpCode::BrtrueS | OpCode::Brfalse | OpCode::BrfalseS => {
                let value = frame.pop()?.is_true()?;
                let expected = matches!(instr.opcode, OpCode::Brtrue | OpCode::BrtrueS);
                if value == expected {
                    return Ok(Step::Jump(target(instr)?));
                }
            }
            OpCode::Beq
            | OpCode::BeqS
            | OpCode::Bge
            | OpCode::BgeS
            | OpCode::Bgt
            | OpCode::BgtS
            | OpCode::Ble
            | OpCode::BleS
            | OpCode::Blt
            | OpCode::BltS
            | OpCode::BneUn
            | OpCode::BneUnS => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                if condition(instr.opcode, compare(a, b)?) {
                    return Ok(Step::Jump(target(instr)?));
                }
            }
            OpCode::Leave | OpCode::LeaveS => return Ok(Step::Leave(target(instr)?)),
            OpCode::Ret => {
                let value = if frame.returns_value {
                    frame.pop()?
                } else {
                    EmValue::Void
                };
                return Ok(Step::Return(value));
            }
            OpCode::Throw => {
                return match frame.pop()? {
                    EmValue::ObjectRef(exception) => Ok(Step::Throw(exception)),
                    EmValue::Null => Err(EmulationError::NullReference.into()),
                    other => Err(EmulationError::StackTypeMismatch {
                        expected: "object",
                        found: other.type_name(),
                    }
                    .into()),
                };
            }
            OpCode::Rethrow => {
                let (_, exception) = frame
                    .active
                    .last()
                    .ok_or(EmulationError::RethrowOutsideHandler)?;
                return Ok(Step::Throw(*exception));
            }
            OpCode::Call | OpCode::Callvirt => {
                let method = token_operand(instr)?;
                let (_, param_count, has_this) = self.member_shape(method)?;
                let args = frame.pop_n(param_count + usize::from(has_this))?;
                let is_virtual = instr.opcode == OpCode::Callvirt;
                if is_virtual && args.first().is_some_and(EmValue::is_null) {
                    return Err(EmulationError::NullReference.into());
                }

                match self.call_method(method, args, is_virtual)? {
                    EmulationOutcome::Returned(EmValue::Void) => {}
                    EmulationOutcome::Returned(value) => frame.push(value),
                    EmulationOutcome::Threw(exception) => return Ok(Step::Throw(exception)),
                }
            }
            OpCode::Newobj => {
                let ctor = token_operand(instr)?;
                let (_, param_count, _) = self.member_shape(ctor)?;
                let args = frame.pop_n(param_count)?;
                match self.new_object(ctor, args)? {
                    EmulationOutcome::Returned(value) => frame.push(value),
                    EmulationOutcome::Threw(exception) => return Ok(Step::Throw(exception)),
                }
            }
            OpCode::Newarr => {
                let length = frame.pop()?.as_i32()?;
                let length = usize::try_from(length).map_err(|_| {
                    EmulationError::ArrayIndexOutOfBounds {
                        index: i64::from(length),
                        length: 0,
                    }
                })?;
                let array = self.heap.alloc_array(length);
                frame.push(EmValue::ObjectRef(array));
            }
            OpCode::Ldlen => {
                let array = frame.pop()?;
                let length = self.heap.array(&array)?.len();
                let length = i32::try_from(length).map_err(|_| EmulationError::StackTypeMismatch {
                    expected: "int32",
                    found: "native int",
                })?;
                frame.push(EmValue::I32(length));
            }
            OpCode::LdelemRef => {
                let index = frame.pop()?.as_i32()?;
                let array = frame.pop()?;
                let elements = self.heap.array(&array)?;
                let element = usize::try_from(index)
                    .ok()
                    .and_then(|index| elements.get(index))
                    .ok_or(EmulationError::ArrayIndexOutOfBounds {
                        index: i64::from(index),
                        length: elements.len(),
                    })?;
                frame.push(*element);
            }
            OpCode::StelemRef => {
                let value = frame.pop()?;
                let index = frame.pop()?.as_i32()?;
                let array = frame.pop()?;
                let reference = array.as_object_ref().ok_or(EmulationError::NullReference)?;
                match self.heap.get_mut(reference)? {
                    HeapObject::Array(elements) => {
                        let length = elements.len();
                        let slot = usize::try_from(index)
                            .ok()
                            .and_then(|index| elements.get_mut(index))
                            .ok_or(EmulationError::ArrayIndexOutOfBounds {
                                index: i64::from(index),
                                length,
                            })?;
                        *slot = value;
                    }
                    other => {
                        return Err(EmulationError::HeapTypeMismatch {
                            expected: "array",
                            found: other.kind(),
                        }
                        .into())
                    }
                }
            }
            OpCode::Box => {
                let value = frame.pop()?;
                let boxed = match value {
                    EmValue::ObjectRef(_) | EmValue::Null => value,
                    other => EmValue::ObjectRef(self.heap.alloc(HeapObject::Boxed(other))),
                };
                frame.push(boxed);
            }
            OpCode::UnboxAny => {
                let value = frame.pop()?;
                let unboxed = match self.heap.object(&value)? {
                    HeapObject::Boxed(inner) => *inner,
                    _ => value,
                };
                frame.push(unboxed);
            }
            OpCode::Castclass => {
                let value = frame.pop()?;
                if let EmValue::ObjectRef(reference) = value {
                    let ty = token_operand(instr)?;
                    let checked = matches!(
                        self.heap.get(reference)?,
                        HeapObject::Instance { .. } | HeapObject::Exception { .. }
                    );
                    if checked && !self.is_instance_of(reference, ty)? {
                        return Err(EmulationError::InvalidCast {
                            expected: self.module.token_type_name(ty).unwrap_or_default(),
                            found: self
                                .type_chain(reference)?
                                .into_iter()
                                .next()
                                .unwrap_or_default(),
                        }
                        .into());
                    }
                }
                frame.push(value);
            }
            OpCode::Ldtoken => match instr.operand {
                Operand::Method(token) => frame.push(EmValue::MethodHandle(token)),
                Operand::Type(token) => frame.push(EmValue::TypeHandle(token)),
                _ => return Err(malformed_error!("{instr} without a token operand")),
            },
            OpCode::Ldobj | OpCode::LdindRef | OpCode::Endfinally => {
                return Err(Error::NotSupported(format!(
                    "{} is not emulated",
                    instr.opcode
                )));
            }
        }
        Ok(Step::Next)
    }
}
