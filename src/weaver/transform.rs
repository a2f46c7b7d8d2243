//! The body transformer.
//!
//! [`MethodDecorator`] rewrites one method body so that the hooks of a decorator run
//! around the original code:
//!
//! ```text
//!     <prologue>            method = MethodBase.GetMethodFromHandle(...)
//!                           attribute = (Kind)method.GetCustomAttributes(typeof(Kind), false)[0]
//!                           parameters = new object[] { arg0, arg1, ... }
//!                           attribute.OnEntry(method, parameters)
//!     .try {
//!         <original body>   every `ret` replaced by `br EPILOGUE`
//!       EPILOGUE:
//!         [stloc retval]
//!         attribute.OnExit(retval, method, parameters)
//!         leave RETURN
//!     } catch System.Exception {
//!         stloc exception
//!         attribute.OnException(exception, method, parameters)
//!         rethrow
//!     }
//!   RETURN:
//!     [ldloc retval]
//!     ret
//! ```
//!
//! For constructors the prologue is placed after the first `call` to a `.ctor` (the
//! chained base or sibling constructor) and the protected region starts there.
//!
//! Every symbol the rewrite needs is resolved, and every precondition checked, before
//! the body is touched. The rewrite itself runs on a copy that only replaces the
//! original once it is complete (and verified, if configured), so a failing method is
//! never left partially instrumented.

use crate::{
    assembly::{ldarg, ldc_i4, ldloc, stloc, InstrId, Instruction, OpCode, Operand},
    metadata::{
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
        method::{ExceptionHandler, LocalVariable, MethodBody, MethodDef, CONSTRUCTOR_NAME},
        runtime::names,
        signature::{TypeLocator, TypeSig},
        token::Token,
    },
    weaver::{
        config::WeaverConfig,
        decorator::DecoratorDescriptor,
        resolver::{MethodQuery, ReferenceResolver},
    },
    Error, Result,
};

/// Evaluation stack depth the injected code needs (`OnExit` takes four operands)
const WOVEN_MAX_STACK: u16 = 4;

/// Names of the locals added to a woven body.
pub mod slots {
    /// The `MethodBase` of the woven method
    pub const METHOD: &str = "__fody$method";
    /// The decorator attribute instance
    pub const ATTRIBUTE: &str = "__fody$attribute";
    /// The exception caught by the injected handler
    pub const EXCEPTION: &str = "__fody$exception";
    /// The boxed arguments
    pub const PARAMETERS: &str = "__fody$parameters";
    /// The return value of a non-void method
    pub const RETURN_VALUE: &str = "__fody$retval";
}

/// How one declared parameter is loaded into the argument array.
struct ParamLoad {
    position: i32,
    argument: u16,
    deref: Option<Instruction>,
    box_type: Option<Token>,
}

/// Everything the rewrite needs, resolved before the body is touched.
struct WeavePlan {
    anchor: InstrId,
    method_base: Token,
    exception: Token,
    object: Token,
    attribute_type: Token,
    get_method_from_handle: Token,
    get_type_from_handle: Token,
    get_custom_attributes: Token,
    on_entry: Token,
    on_exit: Token,
    on_exception: Token,
    param_count: i32,
    params: Vec<ParamLoad>,
    return_type: TypeSig,
    return_box: Option<Token>,
    stores_return: bool,
}

/// Weaves decorator hooks into single methods.
///
/// A `MethodDecorator` holds no per-method state; one instance can weave any number of
/// methods, from several threads at once.
///
/// # Examples
///
/// ```rust
/// use cilweave::prelude::*;
/// use cilweave::metadata::diagnostics::Diagnostics;
///
/// # fn weave(module: &Module, mut method: MethodDef, descriptor: DecoratorDescriptor, host: Token) -> cilweave::Result<()> {
/// let resolver = ReferenceResolver::for_module(module);
/// let diagnostics = Diagnostics::new();
/// let config = WeaverConfig::default();
///
/// MethodDecorator::new(&resolver, &diagnostics, &config).decorate(&mut method, &descriptor, host)?;
/// assert!(method.body.as_ref().is_some_and(|body| !body.exception_handlers.is_empty()));
/// # Ok(())
/// # }
/// ```
pub struct MethodDecorator<'r, 'a> {
    resolver: &'r ReferenceResolver<'a>,
    diagnostics: &'r Diagnostics,
    config: &'r WeaverConfig,
}

impl<'r, 'a> MethodDecorator<'r, 'a> {
    /// Creates a transformer using `resolver` for every symbol it emits
    #[must_use]
    pub fn new(
        resolver: &'r ReferenceResolver<'a>,
        diagnostics: &'r Diagnostics,
        config: &'r WeaverConfig,
    ) -> Self {
        MethodDecorator {
            resolver,
            diagnostics,
            config,
        }
    }

    /// Weaves `descriptor`'s hooks into `method`, declared by `declaring_type`.
    ///
    /// # Errors
    /// Returns [`Error::WeaveFailed`] naming the method, wrapping the resolution,
    /// shape or verification error that stopped the weave. The method is unchanged
    /// in that case.
    pub fn decorate(
        &self,
        method: &mut MethodDef,
        descriptor: &DecoratorDescriptor,
        declaring_type: Token,
    ) -> Result<()> {
        let full_name = format!(
            "{}::{}",
            self.resolver
                .describe(&TypeLocator::Definition(declaring_type)),
            method.name
        );

        match self.weave(method, descriptor, declaring_type, &full_name) {
            Ok(()) => {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Info,
                        DiagnosticCategory::Transform,
                        format!("Woven {full_name} with {}", descriptor.kind.name),
                    )
                    .with_token(method.token),
                );
                Ok(())
            }
            Err(error) => Err(Error::WeaveFailed {
                method: full_name,
                source: Box::new(error),
            }),
        }
    }

    fn weave(
        &self,
        method: &mut MethodDef,
        descriptor: &DecoratorDescriptor,
        declaring_type: Token,
        full_name: &str,
    ) -> Result<()> {
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| invalid_shape(full_name, "method has no body"))?;
        let plan = self.plan(method, body, descriptor, full_name)?;

        let mut woven = body.clone();
        rewrite(&mut woven, method.token, declaring_type, &plan)?;
        let widened = woven.widen_short_branches();
        if widened > 0 {
            log::trace!("{full_name}: widened {widened} short branches");
        }
        if self.config.verify {
            woven.verify()?;
        }

        method.body = Some(woven);
        Ok(())
    }

    fn plan(
        &self,
        method: &MethodDef,
        body: &MethodBody,
        descriptor: &DecoratorDescriptor,
        full_name: &str,
    ) -> Result<WeavePlan> {
        let anchor = find_anchor(body, method.is_constructor(), self.resolver, full_name)?;

        let method_base = TypeLocator::external(names::METHOD_BASE);
        let get_method_from_handle = self.resolver.resolve_method(
            &method_base,
            &MethodQuery::named("GetMethodFromHandle")
                .with_param_types(&[names::RUNTIME_METHOD_HANDLE, names::RUNTIME_TYPE_HANDLE]),
        )?;
        let get_custom_attributes = self.resolver.resolve_method(
            &method_base,
            &MethodQuery::named("GetCustomAttributes")
                .with_param_types(&[names::TYPE, names::BOOLEAN]),
        )?;
        let get_type_from_handle = self.resolver.resolve_method(
            &TypeLocator::external(names::TYPE),
            &MethodQuery::named("GetTypeFromHandle")
                .with_param_types(&[names::RUNTIME_TYPE_HANDLE]),
        )?;

        let kind = &descriptor.kind;
        let attribute_type = self
            .resolver
            .resolve_type(&TypeLocator::Definition(kind.attribute_type))?;

        let signature = &method.signature;
        let param_count = i32::try_from(signature.params.len())
            .map_err(|_| invalid_shape(full_name, "too many parameters"))?;
        let mut params = Vec::with_capacity(signature.params.len());
        for (index, param) in signature.params.iter().enumerate() {
            let argument = u16::try_from(signature.argument_index(index))
                .map_err(|_| invalid_shape(full_name, "too many parameters"))?;
            let (deref, box_type) = match param.sig.by_ref_element() {
                Some(element) if element.is_value_type() => {
                    let element = self.resolver.import_type(element)?;
                    (
                        Some(Instruction::with(OpCode::Ldobj, Operand::Type(element))),
                        Some(element),
                    )
                }
                Some(_) => (Some(Instruction::new(OpCode::LdindRef)), None),
                None if param.sig.is_value_type() => {
                    (None, Some(self.resolver.import_type(&param.sig)?))
                }
                None => (None, None),
            };
            params.push(ParamLoad {
                position: i32::try_from(index)
                    .map_err(|_| invalid_shape(full_name, "too many parameters"))?,
                argument,
                deref,
                box_type,
            });
        }

        let return_type = signature.return_type.clone();
        let return_box = if return_type.is_value_type() {
            Some(self.resolver.import_type(&return_type)?)
        } else {
            None
        };
        let has_return = body
            .instructions
            .iter()
            .any(|(_, instr)| instr.opcode == OpCode::Ret);

        Ok(WeavePlan {
            anchor,
            method_base: self.resolver.resolve_type(&method_base)?,
            exception: self
                .resolver
                .resolve_type(&TypeLocator::external(names::EXCEPTION))?,
            object: self
                .resolver
                .resolve_type(&TypeLocator::external(names::OBJECT))?,
            attribute_type,
            get_method_from_handle,
            get_type_from_handle,
            get_custom_attributes,
            on_entry: kind.on_entry,
            on_exit: kind.on_exit,
            on_exception: kind.on_exception,
            param_count,
            params,
            stores_return: has_return && !return_type.is_void(),
            return_box,
            return_type,
        })
    }
}

fn invalid_shape(method: &str, reason: &str) -> Error {
    Error::InvalidMethodShape {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

/// First instruction of the code to protect: the body start, or for constructors the
/// instruction after the chained constructor call.
///
/// Calls made before the chained constructor (field initializers) stay ahead of the
/// prologue and outside the protected region.
fn find_anchor(
    body: &MethodBody,
    is_constructor: bool,
    resolver: &ReferenceResolver<'_>,
    full_name: &str,
) -> Result<InstrId> {
    let instructions = &body.instructions;
    let first = instructions
        .first()
        .ok_or_else(|| invalid_shape(full_name, "body has no instructions"))?;
    if !is_constructor {
        return Ok(first);
    }

    let mut returns_early = false;
    let mut chained_call = None;
    for (id, instr) in instructions.iter() {
        match (instr.opcode, &instr.operand) {
            (OpCode::Call, Operand::Method(target))
                if resolver.method_name(*target) == Some(CONSTRUCTOR_NAME) =>
            {
                chained_call = Some(id);
                break;
            }
            (OpCode::Ret, _) => returns_early = true,
            _ => {}
        }
    }

    let call = chained_call.ok_or_else(|| {
        invalid_shape(
            full_name,
            "constructor does not call a base or chained constructor",
        )
    })?;
    if returns_early {
        return Err(invalid_shape(
            full_name,
            "constructor returns before its chained constructor call",
        ));
    }
    instructions.next(call).ok_or_else(|| {
        invalid_shape(full_name, "constructor ends with its chained constructor call")
    })
}

fn call(method: Token) -> Instruction {
    Instruction::with(OpCode::Call, Operand::Method(method))
}

fn callvirt(method: Token) -> Instruction {
    Instruction::with(OpCode::Callvirt, Operand::Method(method))
}

fn typed(opcode: OpCode, ty: Token) -> Instruction {
    Instruction::with(opcode, Operand::Type(ty))
}

fn rewrite(
    body: &mut MethodBody,
    method_token: Token,
    declaring_type: Token,
    plan: &WeavePlan,
) -> Result<()> {
    body.init_locals = true;
    let method_slot = body.add_local(LocalVariable::named(
        slots::METHOD,
        TypeSig::Class(plan.method_base),
    ))?;
    let attribute_slot = body.add_local(LocalVariable::named(
        slots::ATTRIBUTE,
        TypeSig::Class(plan.attribute_type),
    ))?;
    let exception_slot = body.add_local(LocalVariable::named(
        slots::EXCEPTION,
        TypeSig::Class(plan.exception),
    ))?;
    let parameters_slot = body.add_local(LocalVariable::named(
        slots::PARAMETERS,
        TypeSig::SzArray(Box::new(TypeSig::Object)),
    ))?;
    let return_slot = body.add_local(if plan.return_type.is_void() {
        LocalVariable::unnamed(TypeSig::Object)
    } else {
        LocalVariable::named(slots::RETURN_VALUE, plan.return_type.clone())
    })?;

    let returns: Vec<InstrId> = body
        .instructions
        .iter()
        .filter(|(_, instr)| instr.opcode == OpCode::Ret)
        .map(|(id, _)| id)
        .collect();

    let mut prologue = vec![
        Instruction::with(OpCode::Ldtoken, Operand::Method(method_token)),
        typed(OpCode::Ldtoken, declaring_type),
        call(plan.get_method_from_handle),
        stloc(method_slot),
        ldloc(method_slot),
        typed(OpCode::Ldtoken, plan.attribute_type),
        call(plan.get_type_from_handle),
        ldc_i4(0),
        callvirt(plan.get_custom_attributes),
        ldc_i4(0),
        Instruction::new(OpCode::LdelemRef),
        typed(OpCode::Castclass, plan.attribute_type),
        stloc(attribute_slot),
        ldc_i4(plan.param_count),
        typed(OpCode::Newarr, plan.object),
        stloc(parameters_slot),
    ];
    for param in &plan.params {
        prologue.push(ldloc(parameters_slot));
        prologue.push(ldc_i4(param.position));
        prologue.push(ldarg(param.argument));
        prologue.extend(param.deref.clone());
        prologue.extend(param.box_type.map(|ty| typed(OpCode::Box, ty)));
        prologue.push(Instruction::new(OpCode::StelemRef));
    }
    prologue.extend([
        ldloc(attribute_slot),
        ldloc(method_slot),
        ldloc(parameters_slot),
        callvirt(plan.on_entry),
    ]);
    body.instructions
        .insert_all_before(plan.anchor, prologue)
        .ok_or_else(|| malformed_error!("Insertion point {} is not part of the body", plan.anchor))?;

    let list = &mut body.instructions;
    let store = plan.stores_return.then(|| list.push_back(stloc(return_slot)));
    let exit_call = list.push_back(ldloc(attribute_slot));
    let epilogue = store.unwrap_or(exit_call);
    list.push_back(ldloc(return_slot));
    if let Some(ty) = plan.return_box {
        list.push_back(typed(OpCode::Box, ty));
    }
    list.push_back(ldloc(method_slot));
    list.push_back(ldloc(parameters_slot));
    list.push_back(callvirt(plan.on_exit));
    // Target is patched once the return block exists
    let leave = list.push_back(Instruction::new(OpCode::Leave));

    let handler = list.push_back(stloc(exception_slot));
    for instr in [
        ldloc(attribute_slot),
        ldloc(exception_slot),
        ldloc(method_slot),
        ldloc(parameters_slot),
        callvirt(plan.on_exception),
        Instruction::new(OpCode::Rethrow),
    ] {
        list.push_back(instr);
    }

    let return_block = if plan.return_type.is_void() {
        list.push_back(Instruction::new(OpCode::Ret))
    } else {
        let load = list.push_back(ldloc(return_slot));
        list.push_back(Instruction::new(OpCode::Ret));
        load
    };

    if let Some(instr) = list.get_mut(leave) {
        instr.operand = Operand::Target(return_block);
    }
    for id in returns {
        if let Some(instr) = list.get_mut(id) {
            *instr = Instruction::with(OpCode::Br, Operand::Target(epilogue));
        }
    }

    for existing in &mut body.exception_handlers {
        existing.try_end.get_or_insert(epilogue);
        existing.handler_end.get_or_insert(epilogue);
    }
    body.exception_handlers.push(ExceptionHandler::catch(
        plan.anchor,
        Some(handler),
        handler,
        Some(return_block),
        plan.exception,
    ));
    body.max_stack = body.max_stack.max(WOVEN_MAX_STACK);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::CatchClause,
        metadata::{
            imports::MemberRefRow,
            index::DefinitionIndex,
            method::{
                MethodAccessFlags, MethodBodyBuilder, MethodModifiers, MethodSig, Param,
                DEFAULT_MAX_STACK,
            },
            module::Module,
            runtime::RuntimeLibrary,
            signature::TypeName,
        },
        test::{create_add_method, create_fixture, create_method, Fixture},
    };

    fn weave_copy(fixture: &Fixture, token: Token) -> Result<MethodDef> {
        let mut method = fixture.method(token);
        let resolver = ReferenceResolver::for_module(&fixture.module);
        let diagnostics = Diagnostics::new();
        let config = WeaverConfig::default();
        MethodDecorator::new(&resolver, &diagnostics, &config).decorate(
            &mut method,
            &fixture.descriptor(),
            fixture.host,
        )?;
        Ok(method)
    }

    fn opcodes(body: &MethodBody) -> Vec<OpCode> {
        body.instructions
            .iter()
            .map(|(_, instr)| instr.opcode)
            .collect()
    }

    #[test]
    fn add_is_wrapped() {
        let mut fixture = create_fixture();
        let add = fixture.add_decorated(create_add_method());
        let original_start = fixture
            .method(add)
            .body
            .unwrap()
            .instructions
            .first()
            .unwrap();
        let woven = weave_copy(&fixture, add).unwrap();
        let body = woven.body.as_ref().unwrap();

        assert!(body.init_locals);
        assert_eq!(body.max_stack, DEFAULT_MAX_STACK);
        let names: Vec<Option<&str>> = body.locals.iter().map(|l| l.name.as_deref()).collect();
        assert_eq!(
            names,
            vec![
                Some(slots::METHOD),
                Some(slots::ATTRIBUTE),
                Some(slots::EXCEPTION),
                Some(slots::PARAMETERS),
                Some(slots::RETURN_VALUE),
            ]
        );
        assert_eq!(body.locals[4].sig, TypeSig::I4);

        let ops = opcodes(body);
        assert_eq!(ops[0], OpCode::Ldtoken);
        assert_eq!(ops.last(), Some(&OpCode::Ret));
        assert_eq!(ops.iter().filter(|op| **op == OpCode::Ret).count(), 1);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::Box).count(), 3);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::Rethrow).count(), 1);

        let handler = body.exception_handlers.last().unwrap();
        assert!(handler.is_catch());
        assert_eq!(handler.try_start, original_start);
        assert_eq!(handler.try_end, Some(handler.handler_start));
        let positions = body.instructions.positions();
        assert!(positions[&handler.handler_start] < positions[&handler.handler_end.unwrap()]);
        body.verify().unwrap();
    }

    #[test]
    fn every_return_jumps_to_epilogue() {
        let mut fixture = create_fixture();
        let sign = fixture.add_decorated(create_method(
            "Sign",
            MethodModifiers::STATIC,
            vec![Param::new("value", TypeSig::I4)],
            TypeSig::I4,
            |asm| {
                let negative = asm.label();
                let positive = asm.label();
                asm.ldarg(0).ldc_i4(0).blt(negative);
                asm.ldarg(0).ldc_i4(0).bgt(positive);
                asm.ldc_i4(0).ret();
                asm.mark(negative)?.ldc_i4(-1).ret();
                asm.mark(positive)?.ldc_i4(1).ret();
                Ok(())
            },
        ));
        let woven = weave_copy(&fixture, sign).unwrap();
        let body = woven.body.as_ref().unwrap();

        let epilogue = body
            .instructions
            .iter()
            .find(|(_, instr)| instr.opcode == OpCode::StlocS && instr.local_index() == Some(4))
            .map(|(id, _)| id)
            .unwrap();
        let jumps: Vec<InstrId> = body
            .instructions
            .iter()
            .filter(|(_, instr)| instr.opcode == OpCode::Br)
            .filter_map(|(_, instr)| instr.target())
            .collect();
        assert_eq!(jumps, vec![epilogue; 3]);
        body.verify().unwrap();
    }

    #[test]
    fn void_methods_use_placeholder() {
        let mut fixture = create_fixture();
        let noop = fixture.add_decorated(create_method(
            "Noop",
            MethodModifiers::empty(),
            vec![],
            TypeSig::Void,
            |asm| {
                asm.nop().ret();
                Ok(())
            },
        ));
        let woven = weave_copy(&fixture, noop).unwrap();
        let body = woven.body.as_ref().unwrap();

        assert_eq!(body.locals[4], LocalVariable::unnamed(TypeSig::Object));
        let ops = opcodes(body);
        assert_eq!(ops[ops.len() - 2], OpCode::Rethrow);
        assert_eq!(ops[ops.len() - 1], OpCode::Ret);
        assert!(!ops.contains(&OpCode::StlocS));
        assert!(!ops.contains(&OpCode::Box));
        body.verify().unwrap();
    }

    #[test]
    fn instance_arguments_skip_this() {
        let mut fixture = create_fixture();
        let scale = fixture.add_decorated(create_method(
            "Scale",
            MethodModifiers::empty(),
            vec![Param::new("factor", TypeSig::I4)],
            TypeSig::I4,
            |asm| {
                asm.ldarg(1).ret();
                Ok(())
            },
        ));
        let on_entry = Operand::Method(fixture.kind().on_entry);
        let woven = weave_copy(&fixture, scale).unwrap();
        let body = woven.body.as_ref().unwrap();

        let loads: Vec<u16> = body
            .instructions
            .iter()
            .take_while(|(_, instr)| instr.operand != on_entry)
            .filter_map(|(_, instr)| instr.argument_index())
            .collect();
        assert_eq!(loads, vec![1]);
    }

    #[test]
    fn by_ref_parameters_are_dereferenced() {
        let mut fixture = create_fixture();
        let update = fixture.add_decorated(create_method(
            "Update",
            MethodModifiers::STATIC,
            vec![
                Param::new("count", TypeSig::ByRef(Box::new(TypeSig::I4))),
                Param::new("name", TypeSig::ByRef(Box::new(TypeSig::String))),
            ],
            TypeSig::Void,
            |asm| {
                asm.ret();
                Ok(())
            },
        ));
        let woven = weave_copy(&fixture, update).unwrap();
        let ops = opcodes(woven.body.as_ref().unwrap());

        let ldobj = ops.iter().position(|op| *op == OpCode::Ldobj).unwrap();
        assert_eq!(ops[ldobj - 1], OpCode::Ldarg0);
        assert_eq!(ops[ldobj + 1], OpCode::Box);
        let ldind = ops.iter().position(|op| *op == OpCode::LdindRef).unwrap();
        assert_eq!(ops[ldind - 1], OpCode::Ldarg1);
        assert_eq!(ops[ldind + 1], OpCode::StelemRef);
    }

    #[test]
    fn constructors_weave_after_chained_call() {
        let mut fixture = create_fixture();
        let imports = &fixture.module.imports;
        let object_ctor = imports.member_ref(MemberRefRow {
            parent: imports.type_ref(&TypeName::parse(names::OBJECT)),
            name: CONSTRUCTOR_NAME.to_string(),
            params: vec![],
            has_this: true,
        });
        let ctor = fixture.add_decorated(create_method(
            CONSTRUCTOR_NAME,
            MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
            vec![],
            TypeSig::Void,
            move |asm| {
                asm.ldarg(0).call(object_ctor).nop().ret();
                Ok(())
            },
        ));
        let woven = weave_copy(&fixture, ctor).unwrap();
        let body = woven.body.as_ref().unwrap();

        let ops = opcodes(body);
        assert_eq!(&ops[..3], &[OpCode::Ldarg0, OpCode::Call, OpCode::Ldtoken]);
        let handler = body.exception_handlers.last().unwrap();
        assert_eq!(
            body.instructions.get(handler.try_start).unwrap().opcode,
            OpCode::Nop
        );
        body.verify().unwrap();
    }

    #[test]
    fn small_stacks_grow_to_fit_hooks() {
        let mut fixture = create_fixture();
        let mut shallow = create_add_method();
        shallow.name = "Shallow".to_string();
        if let Some(body) = shallow.body.as_mut() {
            body.max_stack = 2;
        }
        let shallow = fixture.add_decorated(shallow);
        let mut deep = create_add_method();
        deep.name = "Deep".to_string();
        if let Some(body) = deep.body.as_mut() {
            body.max_stack = 6;
        }
        let deep = fixture.add_decorated(deep);

        let woven = weave_copy(&fixture, shallow).unwrap();
        assert_eq!(woven.body.unwrap().max_stack, WOVEN_MAX_STACK);
        let woven = weave_copy(&fixture, deep).unwrap();
        assert_eq!(woven.body.unwrap().max_stack, 6);
    }

    // Helper function to import `System.Object::.ctor()` and add a static `int Compute()`
    fn ctor_targets(fixture: &mut Fixture) -> (Token, Token) {
        let imports = &fixture.module.imports;
        let object_ctor = imports.member_ref(MemberRefRow {
            parent: imports.type_ref(&TypeName::parse(names::OBJECT)),
            name: CONSTRUCTOR_NAME.to_string(),
            params: vec![],
            has_this: true,
        });
        let compute = fixture
            .module
            .add_method(
                fixture.host,
                create_method("Compute", MethodModifiers::STATIC, vec![], TypeSig::I4, |asm| {
                    asm.ldc_i4(1).ret();
                    Ok(())
                }),
            )
            .unwrap();
        (object_ctor, compute)
    }

    #[test]
    fn field_initializers_stay_before_prologue() {
        let mut fixture = create_fixture();
        let (object_ctor, compute) = ctor_targets(&mut fixture);
        let ctor = fixture.add_decorated(create_method(
            CONSTRUCTOR_NAME,
            MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
            vec![],
            TypeSig::Void,
            move |asm| {
                asm.call(compute).pop().ldarg(0).call(object_ctor).ret();
                Ok(())
            },
        ));
        let woven = weave_copy(&fixture, ctor).unwrap();
        let body = woven.body.as_ref().unwrap();

        let ops = opcodes(body);
        assert_eq!(
            &ops[..5],
            &[
                OpCode::Call,
                OpCode::Pop,
                OpCode::Ldarg0,
                OpCode::Call,
                OpCode::Ldtoken
            ]
        );
        let handler = body.exception_handlers.last().unwrap();
        assert_eq!(
            body.instructions.get(handler.try_start).unwrap().opcode,
            OpCode::Br
        );
        body.verify().unwrap();
    }

    #[test]
    fn helper_calls_do_not_chain_constructors() {
        let mut fixture = create_fixture();
        let (_, compute) = ctor_targets(&mut fixture);
        let ctor = fixture.add_decorated(create_method(
            CONSTRUCTOR_NAME,
            MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
            vec![],
            TypeSig::Void,
            move |asm| {
                asm.call(compute).pop().ret();
                Ok(())
            },
        ));

        match weave_copy(&fixture, ctor).unwrap_err() {
            Error::WeaveFailed { source, .. } => {
                assert!(matches!(*source, Error::InvalidMethodShape { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn constructor_without_chained_call_is_rejected() {
        let mut fixture = create_fixture();
        let ctor = fixture.add_decorated(create_method(
            CONSTRUCTOR_NAME,
            MethodModifiers::SPECIAL_NAME,
            vec![],
            TypeSig::Void,
            |asm| {
                asm.nop().ret();
                Ok(())
            },
        ));
        let original = fixture.method(ctor);
        let mut method = original.clone();
        let resolver = ReferenceResolver::for_module(&fixture.module);
        let diagnostics = Diagnostics::new();
        let config = WeaverConfig::default();

        let error = MethodDecorator::new(&resolver, &diagnostics, &config)
            .decorate(&mut method, &fixture.descriptor(), fixture.host)
            .unwrap_err();
        match error {
            Error::WeaveFailed {
                method: name,
                source,
            } => {
                assert_eq!(name, "Sample.Calculator::.ctor");
                assert!(matches!(*source, Error::InvalidMethodShape { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            opcodes(method.body.as_ref().unwrap()),
            opcodes(original.body.as_ref().unwrap())
        );
        assert_eq!(diagnostics.count(), 0);
    }

    #[test]
    fn resolution_failure_leaves_method_untouched() {
        let mut fixture = create_fixture();
        let add = fixture.add_decorated(create_add_method());
        let descriptor = fixture.descriptor();

        // Same definitions against a runtime library without reflection types
        let empty = Module::with_runtime("Empty", RuntimeLibrary::new());
        let resolver = ReferenceResolver::new(
            &empty.runtime,
            &empty.imports,
            DefinitionIndex::build(&fixture.module),
        );
        let diagnostics = Diagnostics::new();
        let config = WeaverConfig::default();
        let mut method = fixture.method(add);

        let error = MethodDecorator::new(&resolver, &diagnostics, &config)
            .decorate(&mut method, &descriptor, fixture.host)
            .unwrap_err();
        match error {
            Error::WeaveFailed { source, .. } => {
                assert!(
                    matches!(*source, Error::TypeNotFound(ref name) if name == names::METHOD_BASE)
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        let body = method.body.as_ref().unwrap();
        assert_eq!(body.instructions.len(), 4);
        assert!(body.locals.is_empty());
        assert!(body.exception_handlers.is_empty());
    }

    #[test]
    fn methods_without_body_are_rejected() {
        let fixture = create_fixture();
        let mut hook = fixture.method(fixture.kind().on_entry);
        let resolver = ReferenceResolver::for_module(&fixture.module);
        let diagnostics = Diagnostics::new();
        let config = WeaverConfig::default();

        let error = MethodDecorator::new(&resolver, &diagnostics, &config)
            .decorate(&mut hook, &fixture.descriptor(), fixture.decorator)
            .unwrap_err();
        assert!(error.to_string().contains("method has no body"));
    }

    #[test]
    fn open_ended_handlers_are_pinned() {
        let mut fixture = create_fixture();
        let exception = fixture
            .module
            .imports
            .type_ref(&TypeName::parse(names::EXCEPTION));
        let body = MethodBodyBuilder::new()
            .implementation(move |asm| {
                let try_start = asm.label();
                let handler = asm.label();
                let end = asm.label();
                let done = asm.label();
                asm.mark(try_start)?.nop().leave(done);
                asm.mark(done)?.ret();
                asm.mark(handler)?.pop().rethrow();
                asm.mark(end)?;
                asm.catch_clause(CatchClause {
                    try_start,
                    try_end: done,
                    handler_start: handler,
                    handler_end: end,
                    catch_type: exception,
                });
                Ok(())
            })
            .build()
            .unwrap();
        assert_eq!(body.exception_handlers[0].handler_end, None);
        let guarded = fixture.add_decorated(
            MethodDef::new(
                "Guarded",
                MethodAccessFlags::PUBLIC,
                MethodModifiers::STATIC,
                MethodSig::static_method(vec![], TypeSig::Void),
            )
            .with_body(body),
        );
        let woven = weave_copy(&fixture, guarded).unwrap();
        let body = woven.body.as_ref().unwrap();

        let inner = &body.exception_handlers[0];
        let outer = &body.exception_handlers[1];
        let pinned = inner.handler_end.unwrap();
        assert_eq!(body.instructions.get(pinned).unwrap().opcode, OpCode::Ldloc1);
        assert_eq!(outer.try_end, Some(outer.handler_start));
        let positions = body.instructions.positions();
        assert!(positions[&pinned] < positions[&outer.handler_start]);
        body.verify().unwrap();
    }

    #[test]
    fn short_branches_are_widened() {
        let mut fixture = create_fixture();
        let many_returns = fixture.add_decorated(create_method(
            "ManyReturns",
            MethodModifiers::STATIC,
            vec![Param::new("flag", TypeSig::I4)],
            TypeSig::I4,
            |asm| {
                let done = asm.label();
                asm.ldarg(0).branch(OpCode::BrtrueS, done);
                for _ in 0..30 {
                    asm.ldc_i4(0).ret();
                }
                asm.mark(done)?.ldc_i4(1).ret();
                Ok(())
            },
        ));
        let original = fixture.method(many_returns);
        let branch = original
            .body
            .as_ref()
            .unwrap()
            .instructions
            .iter()
            .find(|(_, instr)| instr.opcode == OpCode::BrtrueS)
            .map(|(id, _)| id)
            .unwrap();

        let woven = weave_copy(&fixture, many_returns).unwrap();
        let body = woven.body.as_ref().unwrap();
        assert_eq!(body.instructions.get(branch).unwrap().opcode, OpCode::Brtrue);
        body.verify().unwrap();
    }
}
