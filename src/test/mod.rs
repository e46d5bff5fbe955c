//! Shared fixtures for unit tests.
//!
//! Builds small programs the way a Java compiler would emit them: enum classes with
//! their generated members, a `Main` class holding the callers, and SSA bodies that
//! use enum values in the shapes the analysis distinguishes.

use crate::{
    analysis::{IfKind, IrCode, IrCodeBuilder, IrOp, TypeElement},
    compiler::{passes::enums::VALUES_FIELD_NAME, MethodOptimizationInfo, OptimizationFeedback},
    graph::{
        enum_methods, AccessFlags, Application, ClassKind, DexType, EncodedField, EncodedMethod, FieldRef,
        InvokeKind, MethodRef, ProgramClass, Proto, CLASS_INITIALIZER, INSTANCE_INITIALIZER,
    },
    Result,
};

/// The type holding the callers built by these fixtures.
pub fn main_type() -> DexType {
    DexType::class("Main")
}

/// Builds `enum <name> { <constants> }` as `javac` emits it.
pub fn enum_class(name: &str, constants: &[&str]) -> ProgramClass {
    let ty = DexType::class(name);
    let mut class = ProgramClass::new(
        ty.clone(),
        ClassKind::Program,
        AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ENUM,
        Some(DexType::java_lang_enum()),
    );
    let constant_flags = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL | AccessFlags::ENUM;
    for constant in constants {
        class
            .fields
            .push(EncodedField::new(FieldRef::new(ty.clone(), constant, ty.clone()), constant_flags));
    }
    class.fields.push(EncodedField::new(
        FieldRef::new(ty.clone(), VALUES_FIELD_NAME, ty.to_array(1)),
        AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
    ));

    let method = |name: &str, proto: Proto, access: AccessFlags| {
        EncodedMethod::new(MethodRef::new(ty.clone(), name, proto), access)
    };
    class.methods = vec![
        method(
            INSTANCE_INITIALIZER,
            Proto::new(DexType::void(), vec![DexType::string(), DexType::int()]),
            AccessFlags::PRIVATE | AccessFlags::CONSTRUCTOR,
        ),
        method(
            CLASS_INITIALIZER,
            Proto::new(DexType::void(), vec![]),
            AccessFlags::STATIC | AccessFlags::CONSTRUCTOR,
        ),
        method(
            "values",
            Proto::new(ty.to_array(1), vec![]),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        ),
        method(
            "valueOf",
            Proto::new(ty.clone(), vec![DexType::string()]),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        ),
    ];
    class
}

/// Builds an application with the modeled library and `classes`.
pub fn program_with(classes: Vec<ProgramClass>) -> Application {
    let mut app = Application::with_java_lang();
    for class in classes {
        app.add_class(class);
    }
    app
}

/// Builds `Main` declaring `methods`, all static.
pub fn main_class(methods: &[MethodRef]) -> ProgramClass {
    let mut class = ProgramClass::new(main_type(), ClassKind::Program, AccessFlags::PUBLIC, Some(DexType::object()));
    class.methods = methods
        .iter()
        .map(|m| EncodedMethod::new(m.clone(), AccessFlags::PUBLIC | AccessFlags::STATIC))
        .collect();
    class
}

/// Builds `Holder` with a static field `value` of type `Object`.
pub fn object_field_class() -> ProgramClass {
    let ty = DexType::class("Holder");
    let mut class = ProgramClass::new(ty.clone(), ClassKind::Program, AccessFlags::PUBLIC, Some(DexType::object()));
    class.fields.push(EncodedField::new(
        object_field(),
        AccessFlags::PUBLIC | AccessFlags::STATIC,
    ));
    class
}

/// `Holder.value:Object`
pub fn object_field() -> FieldRef {
    FieldRef::new(DexType::class("Holder"), "value", DexType::object())
}

/// Starts the body of the static method `Main.<name><proto>`.
pub fn caller(name: &str, proto: Proto) -> Result<IrCodeBuilder> {
    IrCodeBuilder::new(MethodRef::new(main_type(), name, proto), true)
}

/// Records the initializers of the enum `ty` as free of side effects.
pub fn side_effect_free_enum(feedback: &OptimizationFeedback, ty: &DexType) {
    let init = MethodRef::new(
        ty.clone(),
        INSTANCE_INITIALIZER,
        Proto::new(DexType::void(), vec![DexType::string(), DexType::int()]),
    );
    let clinit = MethodRef::new(ty.clone(), CLASS_INITIALIZER, Proto::new(DexType::void(), vec![]));
    feedback.set_method_info(init, MethodOptimizationInfo::field_initializer(vec![]));
    feedback.set_method_info(clinit, MethodOptimizationInfo::side_effect_free());
}

/// Bodies of `Main` methods using values of one enum.
pub struct EnumBodies {
    ty: DexType,
}

impl EnumBodies {
    pub fn new(ty: &DexType) -> Self {
        Self { ty: ty.clone() }
    }

    fn constant(&self, name: &str) -> FieldRef {
        FieldRef::new(self.ty.clone(), name, self.ty.clone())
    }

    /// `static int <name>(E value) { return value == E.<constant> ? 1 : value.ordinal(); }`
    pub fn compare_with_constant(&self, name: &str, constant: &str) -> Result<IrCode> {
        let mut ir = caller(name, Proto::new(DexType::int(), vec![self.ty.clone()]))?;
        let entry = ir.entry();
        let value = ir.arguments()[0];
        let same = ir.new_block();
        let other = ir.new_block();
        ir.at_line(3);
        let expected = ir.value(
            entry,
            IrOp::StaticGet {
                field: self.constant(constant),
            },
            TypeElement::of(&self.ty),
        )?;
        ir.effect(
            entry,
            IrOp::If {
                kind: IfKind::Eq,
                lhs: value,
                rhs: Some(expected),
                then_target: same,
                else_target: other,
            },
        )?;
        ir.at_line(4);
        let one = ir.int(same, 1)?;
        ir.effect(same, IrOp::Return { value: Some(one) })?;
        ir.at_line(5);
        let ordinal = ir.value(
            other,
            IrOp::Invoke {
                kind: InvokeKind::Virtual,
                method: enum_methods::ordinal().with_holder(self.ty.clone()),
                args: vec![value],
            },
            TypeElement::INT,
        )?;
        ir.effect(other, IrOp::Return { value: Some(ordinal) })?;
        ir.build()
    }

    /// `static void <name>() { Holder.value = E.<constant>; }`
    pub fn store_into_object_field(&self, name: &str, constant: &str) -> Result<IrCode> {
        let mut ir = caller(name, Proto::new(DexType::void(), vec![]))?;
        let entry = ir.entry();
        let value = ir.value(
            entry,
            IrOp::StaticGet {
                field: self.constant(constant),
            },
            TypeElement::of(&self.ty),
        )?;
        ir.effect(
            entry,
            IrOp::StaticPut {
                value,
                field: object_field(),
            },
        )?;
        ir.effect(entry, IrOp::Return { value: None })?;
        ir.build()
    }

    /// `static Object <name>(int flag) { if (flag == 0) return E.<constant>; return new Object(); }`
    pub fn return_as_object(&self, name: &str, constant: &str) -> Result<IrCode> {
        let mut ir = caller(name, Proto::new(DexType::object(), vec![DexType::int()]))?;
        let entry = ir.entry();
        let flag = ir.arguments()[0];
        let enum_branch = ir.new_block();
        let object_branch = ir.new_block();
        ir.effect(
            entry,
            IrOp::If {
                kind: IfKind::Eq,
                lhs: flag,
                rhs: None,
                then_target: enum_branch,
                else_target: object_branch,
            },
        )?;
        let value = ir.value(
            enum_branch,
            IrOp::StaticGet {
                field: self.constant(constant),
            },
            TypeElement::of(&self.ty),
        )?;
        ir.effect(enum_branch, IrOp::Return { value: Some(value) })?;
        let object = ir.value(
            object_branch,
            IrOp::NewInstance { ty: DexType::object() },
            TypeElement::of(&DexType::object()),
        )?;
        ir.effect(object_branch, IrOp::Return { value: Some(object) })?;
        ir.build()
    }
}
