//! Built-in implementations of runtime library methods.
//!
//! Calls to `MemberRef`s that no registered native handles land here. The emulator
//! provides the reflection entry points woven code relies on, plus the constructors and
//! accessors needed to create and inspect exceptions:
//!
//! | Member                            | Behaviour                                       |
//! |-----------------------------------|-------------------------------------------------|
//! | `MethodBase.GetMethodFromHandle`  | new `MethodBase` object for the handle          |
//! | `Type.GetTypeFromHandle`          | new `Type` object for the handle                |
//! | `MemberInfo.GetCustomAttributes`  | fresh attribute instances, constructors run     |
//! | `MemberInfo.get_Name`             | name of the method                              |
//! | `Exception.get_Message`           | message passed to the constructor, or null      |
//! | `.ctor` of any runtime type       | records the message of exceptions, else no-op   |

use crate::{
    emulation::{EmValue, EmulationError, EmulationOutcome, HeapObject, Interpreter},
    metadata::{
        attributes::{CustomAttribute, CustomAttributeArgument},
        method::CONSTRUCTOR_NAME,
        signature::TypeLocator,
        token::Token,
    },
    Error, Result,
};

fn this_argument(args: &[EmValue]) -> Result<EmValue> {
    Ok(*args.first().ok_or(EmulationError::ArgumentIndexOutOfBounds {
        index: 0,
        count: 0,
    })?)
}

impl<'m> Interpreter<'m> {
    pub(super) fn runtime_call(
        &mut self,
        method: Token,
        args: Vec<EmValue>,
    ) -> Result<EmulationOutcome> {
        let module = self.module;
        let row = module
            .imports
            .get_member_ref(method)
            .ok_or(EmulationError::MethodNotFound { token: method })?;

        let value = match row.name.as_str() {
            "GetMethodFromHandle" => match args.first() {
                Some(EmValue::MethodHandle(token)) => {
                    EmValue::ObjectRef(self.heap.alloc(HeapObject::Method(*token)))
                }
                other => return Err(handle_mismatch("RuntimeMethodHandle", other)),
            },
            "GetTypeFromHandle" => match args.first() {
                Some(EmValue::TypeHandle(token)) => {
                    EmValue::ObjectRef(self.heap.alloc(HeapObject::Type(*token)))
                }
                other => return Err(handle_mismatch("RuntimeTypeHandle", other)),
            },
            "GetCustomAttributes" => return self.get_custom_attributes(&args),
            "get_Name" => {
                let name = match self.heap.object(&this_argument(&args)?)? {
                    HeapObject::Method(token) => self
                        .member_shape(*token)
                        .map(|(name, _, _)| name.to_string())?,
                    HeapObject::Type(token) => {
                        module.token_type_name(*token).unwrap_or_default()
                    }
                    other => {
                        return Err(EmulationError::HeapTypeMismatch {
                            expected: "member",
                            found: other.kind(),
                        }
                        .into())
                    }
                };
                EmValue::ObjectRef(self.heap.alloc_string(&name))
            }
            "get_Message" => match self.heap.object(&this_argument(&args)?)? {
                HeapObject::Exception {
                    message: Some(message),
                    ..
                } => {
                    let message = message.clone();
                    EmValue::ObjectRef(self.heap.alloc_string(&message))
                }
                HeapObject::Exception { message: None, .. } => EmValue::Null,
                other => {
                    return Err(EmulationError::HeapTypeMismatch {
                        expected: "exception",
                        found: other.kind(),
                    }
                    .into())
                }
            },
            CONSTRUCTOR_NAME => {
                self.runtime_constructor(&args)?;
                EmValue::Void
            }
            _ => return Err(EmulationError::MethodNotFound { token: method }.into()),
        };
        Ok(EmulationOutcome::Returned(value))
    }

    fn runtime_constructor(&mut self, args: &[EmValue]) -> Result<()> {
        let this = this_argument(args)?;
        let message = match args.get(1) {
            Some(EmValue::Null) | None => None,
            Some(value) => Some(self.heap.string(value)?.to_string()),
        };

        let reference = this.as_object_ref().ok_or(EmulationError::NullReference)?;
        if let HeapObject::Exception {
            message: current, ..
        } = self.heap.get_mut(reference)?
        {
            *current = message;
        }
        Ok(())
    }

    fn get_custom_attributes(&mut self, args: &[EmValue]) -> Result<EmulationOutcome> {
        let method = match self.heap.object(&this_argument(args)?)? {
            HeapObject::Method(token) => *token,
            other => {
                return Err(EmulationError::HeapTypeMismatch {
                    expected: "method",
                    found: other.kind(),
                }
                .into())
            }
        };
        let filter = match args.get(1) {
            None | Some(EmValue::Null) => None,
            Some(value) => match self.heap.object(value)? {
                HeapObject::Type(token) => Some(*token),
                other => {
                    return Err(EmulationError::HeapTypeMismatch {
                        expected: "type",
                        found: other.kind(),
                    }
                    .into())
                }
            },
        };

        let module = self.module;
        let attributes: Vec<&CustomAttribute> = module
            .method(method)
            .map(|(_, definition)| {
                definition
                    .custom_attributes
                    .iter()
                    .filter(|attribute| {
                        filter.map_or(true, |ty| self.attribute_is(attribute.attribute_type, ty))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut instances = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            match self.instantiate_attribute(attribute)? {
                EmulationOutcome::Returned(instance) => instances.push(instance),
                threw @ EmulationOutcome::Threw(_) => return Ok(threw),
            }
        }
        let array = self.heap.alloc(HeapObject::Array(instances));
        Ok(EmulationOutcome::Returned(EmValue::ObjectRef(array)))
    }

    // True if the attribute type `attribute` is `ty` or derives from it
    fn attribute_is(&self, attribute: Token, ty: Token) -> bool {
        let chain = self.definition_chain(attribute);
        if chain.iter().any(|definition| definition.token == ty) {
            return true;
        }

        let module = self.module;
        match (chain.last(), module.token_type_name(ty)) {
            (Some(definition), Some(name)) => {
                match module.base_of(definition) {
                    TypeLocator::External(base) => module
                        .runtime
                        .base_chain(&base)
                        .any(|external| external.name.full_name() == name),
                    TypeLocator::Definition(_) => false,
                }
            }
            _ => false,
        }
    }

    // Allocates an attribute and runs the constructor matching its fixed arguments
    fn instantiate_attribute(&mut self, attribute: &CustomAttribute) -> Result<EmulationOutcome> {
        let args: Vec<EmValue> = attribute
            .fixed_args
            .iter()
            .map(|argument| match argument {
                CustomAttributeArgument::Bool(value) => EmValue::I32(i32::from(*value)),
                CustomAttributeArgument::I4(value) => EmValue::I32(*value),
                CustomAttributeArgument::I8(value) => EmValue::I64(*value),
                CustomAttributeArgument::R8(value) => EmValue::F64(*value),
                CustomAttributeArgument::String(value) => {
                    EmValue::ObjectRef(self.heap.alloc_string(value))
                }
            })
            .collect();

        let module = self.module;
        let ctor = module.type_def(attribute.attribute_type).and_then(|ty| {
            ty.methods.iter().find(|method| {
                method.is_constructor() && method.signature.params.len() == args.len()
            })
        });

        match ctor {
            Some(ctor) => self.new_object(ctor.token, args),
            None if args.is_empty() => {
                let instance = self.heap.alloc(HeapObject::Instance {
                    type_token: attribute.attribute_type,
                });
                Ok(EmulationOutcome::Returned(EmValue::ObjectRef(instance)))
            }
            None => Err(Error::MemberNotFound {
                host: module
                    .token_type_name(attribute.attribute_type)
                    .unwrap_or_default(),
                member: format!("{CONSTRUCTOR_NAME}/{}", args.len()),
            }),
        }
    }
}

fn handle_mismatch(expected: &'static str, found: Option<&EmValue>) -> Error {
    EmulationError::StackTypeMismatch {
        expected,
        found: found.map_or("nothing", EmValue::type_name),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use crate::{
        emulation::{EmValue, EmulationOutcome, HeapObject, Interpreter},
        metadata::{
            attributes::{CustomAttribute, CustomAttributeArgument},
            imports::MemberRefRow,
            method::{MethodModifiers, Param, CONSTRUCTOR_NAME},
            module::Module,
            runtime::names,
            signature::{TypeLocator, TypeName, TypeSig},
            token::Token,
        },
        test::{create_body, create_fixture, create_method},
        weaver::{MethodQuery, ReferenceResolver},
    };

    // Helper function to import a runtime member
    fn import_member(module: &Module, ty: &str, name: &str, params: &[&str]) -> Token {
        let parent = module.imports.type_ref(&TypeName::parse(ty));
        module.imports.member_ref(MemberRefRow {
            parent,
            name: name.to_string(),
            params: params.iter().map(|param| TypeName::parse(param)).collect(),
            has_this: true,
        })
    }

    // static object[] Probe() => MethodBase.GetMethodFromHandle(...).GetCustomAttributes(typeof(LogAttribute), false);
    #[test]
    fn custom_attributes_are_fresh_instances() {
        let mut fixture = create_fixture();
        let (get_method, get_type, get_attributes) = {
            let resolver = ReferenceResolver::for_module(&fixture.module);
            let method_base = TypeLocator::external(names::METHOD_BASE);
            (
                resolver
                    .resolve_method(
                        &method_base,
                        &MethodQuery::named("GetMethodFromHandle").with_param_count(2),
                    )
                    .unwrap(),
                resolver
                    .resolve_method(
                        &TypeLocator::external(names::TYPE),
                        &MethodQuery::named("GetTypeFromHandle").with_param_count(1),
                    )
                    .unwrap(),
                resolver
                    .resolve_method(
                        &method_base,
                        &MethodQuery::named("GetCustomAttributes").with_param_count(2),
                    )
                    .unwrap(),
            )
        };

        let probe = fixture.add_decorated(create_method(
            "Probe",
            MethodModifiers::STATIC,
            vec![],
            TypeSig::Object,
            |asm| {
                asm.ldnull().ret();
                Ok(())
            },
        ));
        let (host, decorator) = (fixture.host, fixture.decorator);
        fixture.module.method_mut(probe).unwrap().body = Some(create_body(move |asm| {
            asm.ldtoken_method(probe)
                .ldtoken_type(host)
                .call(get_method)
                .ldtoken_type(decorator)
                .call(get_type)
                .ldc_i4(0)
                .callvirt(get_attributes)
                .ret();
            Ok(())
        }));

        let mut interpreter = Interpreter::new(&fixture.module);
        let first = interpreter.invoke(probe, vec![]).unwrap().returned().unwrap();
        let second = interpreter.invoke(probe, vec![]).unwrap().returned().unwrap();

        let heap = interpreter.heap();
        let first = heap.array(&first).unwrap().to_vec();
        let second = heap.array(&second).unwrap().to_vec();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0], second[0]);
        assert_eq!(
            heap.object(&first[0]).unwrap(),
            &HeapObject::Instance {
                type_token: decorator
            }
        );
    }

    #[test]
    fn attribute_arguments_reach_the_constructor() {
        let mut fixture = create_fixture();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let ctor = fixture
            .module
            .add_method(
                fixture.decorator,
                create_method(
                    CONSTRUCTOR_NAME,
                    MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
                    vec![Param::new("level", TypeSig::I4), Param::new("tag", TypeSig::String)],
                    TypeSig::Void,
                    |asm| {
                        asm.ret();
                        Ok(())
                    },
                ),
            )
            .unwrap();
        let target = fixture
            .module
            .add_method(
                fixture.host,
                create_method("Tagged", MethodModifiers::STATIC, vec![], TypeSig::Void, |asm| {
                    asm.ret();
                    Ok(())
                })
                .with_attribute(
                    CustomAttribute::new(fixture.decorator)
                        .with_arg(CustomAttributeArgument::I4(3))
                        .with_arg(CustomAttributeArgument::String("audit".to_string())),
                ),
            )
            .unwrap();

        let mut interpreter = Interpreter::new(&fixture.module);
        let recorded = seen.clone();
        interpreter.register_native(ctor, move |heap, args| {
            recorded
                .borrow_mut()
                .push((args[1], heap.string(&args[2])?.to_string()));
            Ok(EmulationOutcome::Returned(EmValue::Void))
        });

        let get_attributes = import_member(
            &fixture.module,
            names::MEMBER_INFO,
            "GetCustomAttributes",
            &[names::TYPE, names::BOOLEAN],
        );
        let method = interpreter.heap_mut().alloc(HeapObject::Method(target));
        let outcome = interpreter
            .invoke(
                get_attributes,
                vec![EmValue::ObjectRef(method), EmValue::Null, EmValue::I32(0)],
            )
            .unwrap();
        let array = outcome.returned().unwrap();
        assert_eq!(interpreter.heap().array(&array).unwrap().len(), 1);
        assert_eq!(*seen.borrow(), vec![(EmValue::I32(3), "audit".to_string())]);
    }

    #[test]
    fn exception_constructors_record_messages() {
        let fixture = create_fixture();
        let ctor = import_member(
            &fixture.module,
            names::INVALID_OPERATION_EXCEPTION,
            CONSTRUCTOR_NAME,
            &[names::STRING],
        );
        let get_message = import_member(&fixture.module, names::EXCEPTION, "get_Message", &[]);

        let mut interpreter = Interpreter::new(&fixture.module);
        let message = interpreter.heap_mut().alloc_string("broken");
        let exception = interpreter
            .construct(ctor, vec![EmValue::ObjectRef(message)])
            .unwrap()
            .returned()
            .unwrap();
        let message = interpreter
            .invoke(get_message, vec![exception])
            .unwrap()
            .returned()
            .unwrap();
        assert_eq!(interpreter.heap().string(&message).unwrap(), "broken");

        let bare = import_member(&fixture.module, names::EXCEPTION, CONSTRUCTOR_NAME, &[]);
        let exception = interpreter.construct(bare, vec![]).unwrap().returned().unwrap();
        assert_eq!(
            interpreter.invoke(get_message, vec![exception]).unwrap().returned(),
            Some(EmValue::Null)
        );
    }

    #[test]
    fn unknown_runtime_members_are_reported() {
        let fixture = create_fixture();
        let missing = import_member(&fixture.module, names::TYPE, "GetFields", &[]);
        let mut interpreter = Interpreter::new(&fixture.module);
        let this = interpreter.heap_mut().alloc(HeapObject::Type(fixture.host));
        assert!(interpreter
            .invoke(missing, vec![EmValue::ObjectRef(this)])
            .is_err());
    }
}
