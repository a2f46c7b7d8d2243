use crate::{
    assembly::InstructionAssembler,
    metadata::{
        attributes::CustomAttribute,
        method::{
            MethodAccessFlags, MethodBody, MethodBodyBuilder, MethodDef, MethodModifiers,
            MethodSig, Param, CONSTRUCTOR_NAME,
        },
        module::{Module, TypeDef},
        runtime::names,
        signature::{TypeLocator, TypeName, TypeSig},
        token::Token,
    },
    weaver::{DecoratorDescriptor, DecoratorKind},
    Result,
};

/// A module with one decorator attribute type and an empty host type.
pub struct Fixture {
    pub module: Module,
    pub decorator: Token,
    pub host: Token,
}

impl Fixture {
    // Adds a method to the host type, decorated with the fixture's attribute
    pub fn add_decorated(&mut self, method: MethodDef) -> Token {
        let method = method.with_attribute(CustomAttribute::new(self.decorator));
        self.module.add_method(self.host, method).unwrap()
    }

    pub fn kind(&self) -> DecoratorKind {
        DecoratorKind {
            attribute_type: self.decorator,
            name: self.module.type_full_name(self.decorator).unwrap(),
            on_entry: self.module.find_method(self.decorator, "OnEntry").unwrap(),
            on_exit: self.module.find_method(self.decorator, "OnExit").unwrap(),
            on_exception: self.module.find_method(self.decorator, "OnException").unwrap(),
        }
    }

    pub fn descriptor(&self) -> DecoratorDescriptor {
        DecoratorDescriptor {
            kind: self.kind(),
            attribute: CustomAttribute::new(self.decorator),
        }
    }

    pub fn method(&self, token: Token) -> MethodDef {
        self.module.method(token).unwrap().1.clone()
    }
}

// Helper function to create a virtual hook without body
pub fn create_hook(name: &str, params: Vec<Param>) -> MethodDef {
    MethodDef::new(
        name,
        MethodAccessFlags::PUBLIC,
        MethodModifiers::VIRTUAL | MethodModifiers::HIDE_BY_SIG,
        MethodSig::instance(params, TypeSig::Void),
    )
}

// Helper function to create an instance constructor that only returns
pub fn create_trivial_ctor() -> MethodDef {
    create_method(
        CONSTRUCTOR_NAME,
        MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
        vec![],
        TypeSig::Void,
        |asm| {
            asm.ret();
            Ok(())
        },
    )
}

// Helper function to create a decorator attribute type with the three hooks
pub fn create_decorator_type(module: &mut Module, namespace: &str, name: &str) -> Token {
    let method_base = TypeSig::Class(module.imports.type_ref(&TypeName::parse(names::METHOD_BASE)));
    let exception = TypeSig::Class(module.imports.type_ref(&TypeName::parse(names::EXCEPTION)));
    let args = || Param::new("args", TypeSig::SzArray(Box::new(TypeSig::Object)));

    module.add_type(
        TypeDef::new(namespace, name)
            .extends(TypeLocator::external(names::DECORATOR_ATTRIBUTE))
            .with_method(create_trivial_ctor())
            .with_method(create_hook(
                "OnEntry",
                vec![Param::new("method", method_base.clone()), args()],
            ))
            .with_method(create_hook(
                "OnExit",
                vec![
                    Param::new("returnValue", TypeSig::Object),
                    Param::new("method", method_base.clone()),
                    args(),
                ],
            ))
            .with_method(create_hook(
                "OnException",
                vec![
                    Param::new("exception", exception),
                    Param::new("method", method_base),
                    args(),
                ],
            )),
    )
}

// Helper function to create a public method from an assembler closure
pub fn create_method<F>(
    name: &str,
    modifiers: MethodModifiers,
    params: Vec<Param>,
    return_type: TypeSig,
    implementation: F,
) -> MethodDef
where
    F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
{
    let signature = if modifiers.contains(MethodModifiers::STATIC) {
        MethodSig::static_method(params, return_type)
    } else {
        MethodSig::instance(params, return_type)
    };
    MethodDef::new(name, MethodAccessFlags::PUBLIC, modifiers, signature)
        .with_body(create_body(implementation))
}

// Helper function to build a body without locals
pub fn create_body<F>(implementation: F) -> MethodBody
where
    F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
{
    MethodBodyBuilder::new()
        .init_locals(false)
        .implementation(implementation)
        .build()
        .unwrap()
}

// static int Add(int a, int b) => a + b;
pub fn create_add_method() -> MethodDef {
    create_method(
        "Add",
        MethodModifiers::STATIC,
        vec![Param::new("a", TypeSig::I4), Param::new("b", TypeSig::I4)],
        TypeSig::I4,
        |asm| {
            asm.ldarg(0).ldarg(1).add().ret();
            Ok(())
        },
    )
}

// Helper function to create the default fixture: Sample.LogAttribute and Sample.Calculator
pub fn create_fixture() -> Fixture {
    let mut module = Module::new("Sample");
    let decorator = create_decorator_type(&mut module, "Sample", "LogAttribute");
    let host = module.add_type(TypeDef::new("Sample", "Calculator").with_method(create_trivial_ctor()));
    Fixture {
        module,
        decorator,
        host,
    }
}
