//! Enum unboxing integration tests.
//!
//! These tests run the complete pass through the public API:
//! 1. Build a program with enum classes and a `Main` class of callers
//! 2. Register the SSA body of every caller in a `CompilerContext`
//! 3. Run `EnumUnboxingPass`
//! 4. Verify the eligible set, the rewritten bodies and the pruned program

use std::collections::BTreeSet;

use bytelens::{
    analysis::{IfKind, IrCode, IrCodeBuilder, IrOp, TypeElement, ValueId},
    compiler::{
        passes::enums::{seed_candidates, EnumUsageAnalysis, EnumUnboxingUtility, VALUES_FIELD_NAME},
        AppView, CompilerContext, CompilerOptions, EnumUnboxingOutcome, EnumUnboxingPass, MethodOptimizationInfo,
        OptimizationFeedback, Reason,
    },
    graph::{
        enum_methods, AccessFlags, Application, ClassKind, DexType, EncodedField, EncodedMethod, FieldRef,
        InvokeKind, MethodRef, ProgramClass, Proto, CLASS_INITIALIZER, INSTANCE_INITIALIZER,
    },
    Result,
};

fn main_type() -> DexType {
    DexType::class("Main")
}

fn constant(ty: &DexType, name: &str) -> FieldRef {
    FieldRef::new(ty.clone(), name, ty.clone())
}

fn holder_field() -> FieldRef {
    FieldRef::new(main_type(), "sink", DexType::object())
}

fn enum_class(name: &str, constants: &[&str]) -> ProgramClass {
    let ty = DexType::class(name);
    let mut class = ProgramClass::new(
        ty.clone(),
        ClassKind::Program,
        AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ENUM,
        Some(DexType::java_lang_enum()),
    );
    for name in constants {
        class.fields.push(EncodedField::new(
            constant(&ty, name),
            AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL | AccessFlags::ENUM,
        ));
    }
    class.fields.push(EncodedField::new(
        FieldRef::new(ty.clone(), VALUES_FIELD_NAME, ty.to_array(1)),
        AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
    ));
    class.methods = vec![
        EncodedMethod::new(init_of(&ty), AccessFlags::PRIVATE | AccessFlags::CONSTRUCTOR),
        EncodedMethod::new(clinit_of(&ty), AccessFlags::STATIC | AccessFlags::CONSTRUCTOR),
        EncodedMethod::new(
            MethodRef::new(ty.clone(), "values", Proto::new(ty.to_array(1), vec![])),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        ),
        EncodedMethod::new(
            MethodRef::new(ty.clone(), "valueOf", Proto::new(ty.clone(), vec![DexType::string()])),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        ),
    ];
    class
}

fn init_of(ty: &DexType) -> MethodRef {
    MethodRef::new(
        ty.clone(),
        INSTANCE_INITIALIZER,
        Proto::new(DexType::void(), vec![DexType::string(), DexType::int()]),
    )
}

fn clinit_of(ty: &DexType) -> MethodRef {
    MethodRef::new(ty.clone(), CLASS_INITIALIZER, Proto::new(DexType::void(), vec![]))
}

fn mark_initializers_pure(feedback: &OptimizationFeedback, ty: &DexType) {
    feedback.set_method_info(init_of(ty), MethodOptimizationInfo::field_initializer(vec![]));
    feedback.set_method_info(clinit_of(ty), MethodOptimizationInfo::side_effect_free());
}

struct Program {
    enums: Vec<ProgramClass>,
    bodies: Vec<IrCode>,
}

impl Program {
    fn new(enums: Vec<ProgramClass>) -> Self {
        Self {
            enums,
            bodies: Vec::new(),
        }
    }

    fn with_body(mut self, code: IrCode) -> Self {
        self.bodies.push(code);
        self
    }

    fn view(&self, options: CompilerOptions) -> AppView {
        let mut app = Application::with_java_lang();
        for class in &self.enums {
            app.add_class(class.clone());
        }
        let mut main = ProgramClass::new(main_type(), ClassKind::Program, AccessFlags::PUBLIC, Some(DexType::object()));
        main.methods = self
            .bodies
            .iter()
            .map(|code| EncodedMethod::new(code.method().clone(), AccessFlags::PUBLIC | AccessFlags::STATIC))
            .collect();
        main.fields.push(EncodedField::new(holder_field(), AccessFlags::PUBLIC | AccessFlags::STATIC));
        app.add_class(main);
        AppView::new(app, options)
    }

    fn context(&self) -> CompilerContext {
        let ctx = CompilerContext::new();
        for class in &self.enums {
            mark_initializers_pure(&ctx.feedback, &class.ty);
        }
        for code in &self.bodies {
            ctx.insert_code(code.clone());
        }
        ctx
    }
}

/// `static int <name>(E x) { if (x == E.<constant>) return 7; return x.ordinal(); }`
fn compare_and_ordinal(ty: &DexType, name: &str, expected: &str) -> Result<IrCode> {
    let method = MethodRef::new(main_type(), name, Proto::new(DexType::int(), vec![ty.clone()]));
    let mut ir = IrCodeBuilder::new(method, true)?;
    let entry = ir.entry();
    let x = ir.arguments()[0];
    let equal = ir.new_block();
    let other = ir.new_block();
    let value = ir.value(entry, IrOp::StaticGet { field: constant(ty, expected) }, TypeElement::of(ty))?;
    ir.effect(
        entry,
        IrOp::If {
            kind: IfKind::Eq,
            lhs: x,
            rhs: Some(value),
            then_target: equal,
            else_target: other,
        },
    )?;
    let seven = ir.int(equal, 7)?;
    ir.effect(equal, IrOp::Return { value: Some(seven) })?;
    let ordinal = ir.value(
        other,
        IrOp::Invoke {
            kind: InvokeKind::Virtual,
            method: enum_methods::ordinal().with_holder(ty.clone()),
            args: vec![x],
        },
        TypeElement::INT,
    )?;
    ir.effect(other, IrOp::Return { value: Some(ordinal) })?;
    ir.build()
}

/// `static void <name>() { Main.sink = E.<constant>; }`
fn store_as_object(ty: &DexType, name: &str, stored: &str) -> Result<IrCode> {
    let method = MethodRef::new(main_type(), name, Proto::new(DexType::void(), vec![]));
    let mut ir = IrCodeBuilder::new(method, true)?;
    let entry = ir.entry();
    let value = ir.value(entry, IrOp::StaticGet { field: constant(ty, stored) }, TypeElement::of(ty))?;
    ir.effect(
        entry,
        IrOp::StaticPut {
            value,
            field: holder_field(),
        },
    )?;
    ir.effect(entry, IrOp::Return { value: None })?;
    ir.build()
}

/// `static Object <name>(int flag) { return flag == 0 ? E.<constant> : new Object(); }`
fn return_enum_or_object(ty: &DexType, name: &str, returned: &str) -> Result<IrCode> {
    let method = MethodRef::new(main_type(), name, Proto::new(DexType::object(), vec![DexType::int()]));
    let mut ir = IrCodeBuilder::new(method, true)?;
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
        IrOp::StaticGet { field: constant(ty, returned) },
        TypeElement::of(ty),
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

/// `static void <name>() { paint(null); }` with `paint(E)`.
fn pass_null(ty: &DexType, name: &str) -> Result<IrCode> {
    let method = MethodRef::new(main_type(), name, Proto::new(DexType::void(), vec![]));
    let mut ir = IrCodeBuilder::new(method, true)?;
    let entry = ir.entry();
    let null = ir.null(entry)?;
    ir.effect(
        entry,
        IrOp::Invoke {
            kind: InvokeKind::Static,
            method: paint(ty),
            args: vec![null],
        },
    )?;
    ir.effect(entry, IrOp::Return { value: None })?;
    ir.build()
}

fn paint(ty: &DexType) -> MethodRef {
    MethodRef::new(main_type(), "paint", Proto::new(DexType::void(), vec![ty.clone()]))
}

fn const_value(code: &IrCode, value: ValueId) -> Option<i64> {
    code.definition_of(value).and_then(|def| match def.op {
        IrOp::ConstNumber { value } => Some(value),
        _ => None,
    })
}

#[test]
fn test_comparison_with_constant_becomes_ordinal_comparison() -> Result<()> {
    let e = DexType::class("E");
    let code = compare_and_ordinal(&e, "isB", "B")?;
    let method = code.method().clone();
    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(code);
    let view = program.view(CompilerOptions::default());
    let ctx = program.context();

    let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
    assert_eq!(outcome.unboxed, BTreeSet::from([e.clone()]));
    assert!(outcome.view.definition_for(&e).is_none());
    assert!(outcome.view.unboxed_enums().contains(&e));

    let current = outcome.view.lens().lookup_method_signature(&method);
    assert_eq!(current.proto.params, vec![DexType::int()]);
    let Some(body) = ctx.code(&current) else {
        panic!("rewritten body missing");
    };
    let comparison = body.instructions().find_map(|instr| match instr.op {
        IrOp::If { lhs, rhs: Some(rhs), .. } => Some((lhs, rhs)),
        _ => None,
    });
    let Some((lhs, rhs)) = comparison else {
        panic!("comparison missing");
    };
    assert_eq!(body.value_type(lhs), TypeElement::INT);
    assert_eq!(const_value(&body, rhs), Some(1));

    let utility_calls = body
        .instructions()
        .filter(|instr| {
            matches!(&instr.op, IrOp::Invoke { kind: InvokeKind::Static, method, .. }
                if *method == EnumUnboxingUtility::ordinal_method())
        })
        .count();
    assert_eq!(utility_calls, 1);
    assert!(!body.references_type(&e));
    assert!(ctx.has_code(&EnumUnboxingUtility::ordinal_method()));
    Ok(())
}

#[test]
fn test_store_into_object_field_keeps_enum() -> Result<()> {
    let e = DexType::class("E");
    let compare = compare_and_ordinal(&e, "isA", "A")?;
    let store = store_as_object(&e, "publish", "B")?;
    let program = Program::new(vec![enum_class("E", &["A", "B"])])
        .with_body(compare.clone())
        .with_body(store.clone());
    let view = program.view(CompilerOptions::default());
    let ctx = program.context();

    let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
    assert!(outcome.unboxed.is_empty());
    let rejection = outcome.rejected.get(&e);
    assert_eq!(rejection.map(|r| r.reason), Some(Reason::TypeMissmatchFieldPut));
    assert_eq!(rejection.and_then(|r| r.context.clone()), Some(store.method().clone()));

    assert!(outcome.view.definition_for(&e).is_some());
    let Some(body) = ctx.code(compare.method()) else {
        panic!("comparison body missing");
    };
    assert!(body.references_type(&e));
    assert_eq!(body.instructions().count(), compare.instructions().count());
    Ok(())
}

#[test]
fn test_implicit_upcast_in_return_keeps_enum() -> Result<()> {
    let e = DexType::class("E");
    let code = return_enum_or_object(&e, "either", "A")?;
    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(code.clone());
    let view = program.view(CompilerOptions::default());
    let ctx = program.context();

    let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
    assert!(outcome.unboxed.is_empty());
    assert_eq!(
        outcome.rejected.get(&e).map(|r| r.reason),
        Some(Reason::ImplicitUpCastInReturn)
    );
    assert!(outcome.reprocessed.is_empty());
    let Some(body) = ctx.code(code.method()) else {
        panic!("body missing");
    };
    let returned: Vec<TypeElement> = body
        .instructions()
        .filter_map(|instr| match instr.op {
            IrOp::Return { value: Some(value) } => Some(body.value_type(value)),
            _ => None,
        })
        .collect();
    assert_eq!(returned, vec![TypeElement::of(&e), TypeElement::of(&DexType::object())]);
    Ok(())
}

#[test]
fn test_null_passed_to_enum_parameter_becomes_zero() -> Result<()> {
    let e = DexType::class("E");
    let caller = pass_null(&e, "clear")?;
    let mut program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(caller.clone());

    // paint(E) itself only compares its argument.
    let mut ir = IrCodeBuilder::new(paint(&e), true)?;
    let entry = ir.entry();
    ir.effect(entry, IrOp::Return { value: None })?;
    program = program.with_body(ir.build()?);

    let view = program.view(CompilerOptions::default());
    let ctx = program.context();
    let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
    assert!(outcome.unboxed.contains(&e));
    assert!(outcome.reprocessed.contains(caller.method()));

    let Some(body) = ctx.code(caller.method()) else {
        panic!("caller body missing");
    };
    let args = body.instructions().find_map(|instr| match &instr.op {
        IrOp::Invoke { method, args, .. } => Some((method.clone(), args.clone())),
        _ => None,
    });
    let Some((target, args)) = args else {
        panic!("call missing");
    };
    assert_eq!(target.proto.params, vec![DexType::int()]);
    assert_eq!(body.value_type(args[0]), TypeElement::INT);
    assert_eq!(const_value(&body, args[0]), Some(0));
    Ok(())
}

#[test]
fn test_eligible_set_is_independent_of_scan_order() -> Result<()> {
    let first = DexType::class("First");
    let second = DexType::class("Second");
    let third = DexType::class("Third");
    let program = Program::new(vec![
        enum_class("First", &["X", "Y"]),
        enum_class("Second", &["X", "Y", "Z"]),
        enum_class("Third", &["X"]),
    ])
    .with_body(compare_and_ordinal(&first, "f1", "Y")?)
    .with_body(store_as_object(&second, "s1", "Z")?)
    .with_body(compare_and_ordinal(&second, "s2", "X")?)
    .with_body(compare_and_ordinal(&third, "t1", "X")?)
    .with_body(return_enum_or_object(&third, "t2", "X")?);
    let view = program.view(CompilerOptions::default());
    let ctx = program.context();

    let mut orders: Vec<Vec<usize>> = vec![(0..program.bodies.len()).collect()];
    orders.push(orders[0].iter().rev().copied().collect());
    orders.push(vec![2, 4, 0, 3, 1]);
    orders.push(vec![1, 3, 4, 2, 0]);

    let mut results = Vec::new();
    for order in orders {
        let candidates = seed_candidates(view.app(), view.options());
        let analysis = EnumUsageAnalysis::new(&view, &candidates);
        for index in order {
            analysis.analyze(&program.bodies[index]);
        }
        let eligible: BTreeSet<DexType> = analysis.finish(&ctx.feedback, &ctx.reporter).into_keys().collect();
        let rejected: Vec<(DexType, Reason)> = candidates
            .rejected()
            .into_iter()
            .map(|(ty, rejection)| (ty, rejection.reason))
            .collect();
        results.push((eligible, rejected));
    }

    assert_eq!(results[0].0, BTreeSet::from([first]));
    assert_eq!(
        results[0].1,
        vec![
            (second, Reason::TypeMissmatchFieldPut),
            (third, Reason::ImplicitUpCastInReturn)
        ]
    );
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    Ok(())
}

#[test]
fn test_debug_logs_report_boxed_enums() -> Result<()> {
    let e = DexType::class("E");
    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(store_as_object(&e, "publish", "A")?);
    let view = program.view(CompilerOptions::default().with_enum_unboxing_debug_logs(true));
    let ctx = program.context();

    EnumUnboxingPass::new().run(&view, &ctx)?;
    let messages = ctx.reporter.messages(bytelens::compiler::DiagnosticLevel::Info);
    assert!(messages.iter().any(|m| m == "Unboxed enums (Unboxing succeeded 0): []"));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Boxed enums (Unboxing failed 1):\n- E: TYPE_MISSMATCH_FIELD_PUT")));
    Ok(())
}

fn unbox(program: &Program) -> Result<(EnumUnboxingOutcome, CompilerContext)> {
    let view = program.view(CompilerOptions::default());
    let ctx = program.context();
    let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
    Ok((outcome, ctx))
}

/// Asserts `ty` stayed boxed for `reason` and `code` was left as it was.
fn assert_kept(outcome: &EnumUnboxingOutcome, ctx: &CompilerContext, ty: &DexType, reason: Reason, code: &IrCode) {
    assert!(!outcome.unboxed.contains(ty));
    let rejection = outcome.rejected.get(ty);
    assert_eq!(rejection.map(|r| r.reason), Some(reason));
    assert_eq!(rejection.and_then(|r| r.context.clone()), Some(code.method().clone()));
    assert!(outcome.view.definition_for(ty).is_some());
    let Some(body) = ctx.code(code.method()) else {
        panic!("body of {} missing", code.method());
    };
    assert!(body.references_type(ty));
    assert_eq!(body.instructions().count(), code.instructions().count());
}

fn main_method(name: &str, return_type: DexType, params: Vec<DexType>) -> MethodRef {
    MethodRef::new(main_type(), name, Proto::new(return_type, params))
}

/// `static void <name>(<params>) { }`
fn empty_body(name: &str, params: Vec<DexType>) -> Result<IrCode> {
    let mut ir = IrCodeBuilder::new(main_method(name, DexType::void(), params), true)?;
    let entry = ir.entry();
    ir.effect(entry, IrOp::Return { value: None })?;
    ir.build()
}

#[test]
fn test_enum_passed_as_object_is_generic_invoke() -> Result<()> {
    let e = DexType::class("E");
    let accept = empty_body("accept", vec![DexType::object()])?;
    let mut ir = IrCodeBuilder::new(main_method("send", DexType::void(), vec![]), true)?;
    let entry = ir.entry();
    let value = ir.value(entry, IrOp::StaticGet { field: constant(&e, "A") }, TypeElement::of(&e))?;
    ir.effect(
        entry,
        IrOp::Invoke {
            kind: InvokeKind::Static,
            method: accept.method().clone(),
            args: vec![value],
        },
    )?;
    ir.effect(entry, IrOp::Return { value: None })?;
    let send = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A", "B"])])
        .with_body(accept)
        .with_body(send.clone());
    let (outcome, ctx) = unbox(&program)?;
    assert_kept(&outcome, &ctx, &e, Reason::GenericInvoke, &send);
    let Some(body) = ctx.code(send.method()) else {
        panic!("send body missing");
    };
    assert_eq!(body.value_type(value), TypeElement::of(&e));
    Ok(())
}

#[test]
fn test_phi_of_enum_and_object_is_invalid_phi() -> Result<()> {
    let e = DexType::class("E");
    let mut ir = IrCodeBuilder::new(main_method("mix", DexType::void(), vec![DexType::int()]), true)?;
    let entry = ir.entry();
    let flag = ir.arguments()[0];
    let left = ir.new_block();
    let right = ir.new_block();
    let join = ir.new_block();
    ir.effect(
        entry,
        IrOp::If {
            kind: IfKind::Eq,
            lhs: flag,
            rhs: None,
            then_target: left,
            else_target: right,
        },
    )?;
    let value = ir.value(left, IrOp::StaticGet { field: constant(&e, "A") }, TypeElement::of(&e))?;
    ir.effect(left, IrOp::Goto { target: join })?;
    let object = ir.value(
        right,
        IrOp::NewInstance { ty: DexType::object() },
        TypeElement::of(&DexType::object()),
    )?;
    ir.effect(right, IrOp::Goto { target: join })?;
    let phi = ir.phi(join, TypeElement::of(&DexType::object()), vec![value, object])?;
    ir.effect(join, IrOp::Return { value: None })?;
    let mix = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(mix.clone());
    let (outcome, ctx) = unbox(&program)?;
    assert_kept(&outcome, &ctx, &e, Reason::InvalidPhi, &mix);
    let Some(body) = ctx.code(mix.method()) else {
        panic!("mix body missing");
    };
    assert_eq!(body.value_type(phi), TypeElement::of(&DexType::object()));
    assert_eq!(body.value_type(value), TypeElement::of(&e));
    Ok(())
}

#[test]
fn test_instance_of_enum_keeps_enum() -> Result<()> {
    let e = DexType::class("E");
    let mut ir = IrCodeBuilder::new(main_method("check", DexType::int(), vec![DexType::object()]), true)?;
    let entry = ir.entry();
    let object = ir.arguments()[0];
    let test = ir.value(
        entry,
        IrOp::InstanceOf {
            value: object,
            ty: e.clone(),
        },
        TypeElement::INT,
    )?;
    ir.effect(entry, IrOp::Return { value: Some(test) })?;
    let check = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A"])]).with_body(check.clone());
    let (outcome, ctx) = unbox(&program)?;
    assert_kept(&outcome, &ctx, &e, Reason::InstanceOf, &check);
    Ok(())
}

#[test]
fn test_check_cast_to_enum_is_down_cast() -> Result<()> {
    let e = DexType::class("E");
    let mut ir = IrCodeBuilder::new(main_method("cast", DexType::void(), vec![DexType::object()]), true)?;
    let entry = ir.entry();
    let object = ir.arguments()[0];
    let cast = ir.value(
        entry,
        IrOp::CheckCast {
            value: object,
            ty: e.clone(),
        },
        TypeElement::of(&e),
    )?;
    ir.effect(entry, IrOp::Return { value: None })?;
    let body = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(body.clone());
    let (outcome, ctx) = unbox(&program)?;
    assert_kept(&outcome, &ctx, &e, Reason::DownCast, &body);
    let Some(kept) = ctx.code(body.method()) else {
        panic!("cast body missing");
    };
    assert_eq!(kept.value_type(cast), TypeElement::of(&e));
    Ok(())
}

#[test]
fn test_comparison_with_object_is_invalid_if_types() -> Result<()> {
    let e = DexType::class("E");
    let mut ir = IrCodeBuilder::new(main_method("same", DexType::int(), vec![DexType::object()]), true)?;
    let entry = ir.entry();
    let object = ir.arguments()[0];
    let equal = ir.new_block();
    let other = ir.new_block();
    let value = ir.value(entry, IrOp::StaticGet { field: constant(&e, "A") }, TypeElement::of(&e))?;
    ir.effect(
        entry,
        IrOp::If {
            kind: IfKind::Eq,
            lhs: value,
            rhs: Some(object),
            then_target: equal,
            else_target: other,
        },
    )?;
    let one = ir.int(equal, 1)?;
    ir.effect(equal, IrOp::Return { value: Some(one) })?;
    let zero = ir.int(other, 0)?;
    ir.effect(other, IrOp::Return { value: Some(zero) })?;
    let same = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(same.clone());
    let (outcome, ctx) = unbox(&program)?;
    assert_kept(&outcome, &ctx, &e, Reason::InvalidIfTypes, &same);
    Ok(())
}

#[test]
fn test_store_into_object_array_is_invalid_array_put() -> Result<()> {
    let e = DexType::class("E");
    let mut ir = IrCodeBuilder::new(main_method("leak", DexType::void(), vec![]), true)?;
    let entry = ir.entry();
    let size = ir.int(entry, 1)?;
    let index = ir.int(entry, 0)?;
    let objects = DexType::object().to_array(1);
    let array = ir.value(
        entry,
        IrOp::NewArrayEmpty {
            ty: objects.clone(),
            size,
        },
        TypeElement::of(&objects),
    )?;
    let value = ir.value(entry, IrOp::StaticGet { field: constant(&e, "A") }, TypeElement::of(&e))?;
    ir.effect(entry, IrOp::ArrayPut { array, index, value })?;
    ir.effect(entry, IrOp::Return { value: None })?;
    let leak = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(leak.clone());
    let (outcome, ctx) = unbox(&program)?;
    assert_kept(&outcome, &ctx, &e, Reason::InvalidArrayPut, &leak);
    Ok(())
}

#[test]
fn test_enum_arrays_become_int_arrays() -> Result<()> {
    let e = DexType::class("E");
    let flat = e.to_array(1);
    let nested = e.to_array(2);
    let method = main_method("pick", DexType::int(), vec![]);
    let mut ir = IrCodeBuilder::new(method.clone(), true)?;
    let entry = ir.entry();
    let equal = ir.new_block();
    let other = ir.new_block();
    let zero = ir.int(entry, 0)?;
    let one = ir.int(entry, 1)?;
    let two = ir.int(entry, 2)?;
    let array = ir.value(entry, IrOp::NewArrayEmpty { ty: flat.clone(), size: two }, TypeElement::of(&flat))?;
    let a = ir.value(entry, IrOp::StaticGet { field: constant(&e, "A") }, TypeElement::of(&e))?;
    ir.effect(
        entry,
        IrOp::ArrayPut {
            array,
            index: zero,
            value: a,
        },
    )?;
    let loaded = ir.value(entry, IrOp::ArrayGet { array, index: one }, TypeElement::of(&e))?;
    let matrix = ir.value(
        entry,
        IrOp::NewArrayEmpty {
            ty: nested.clone(),
            size: one,
        },
        TypeElement::of(&nested),
    )?;
    let row = ir.value(
        entry,
        IrOp::ArrayGet {
            array: matrix,
            index: zero,
        },
        TypeElement::of(&flat),
    )?;
    let b = ir.value(entry, IrOp::StaticGet { field: constant(&e, "B") }, TypeElement::of(&e))?;
    ir.effect(
        entry,
        IrOp::ArrayPut {
            array: row,
            index: zero,
            value: b,
        },
    )?;
    ir.effect(
        entry,
        IrOp::If {
            kind: IfKind::Eq,
            lhs: loaded,
            rhs: Some(b),
            then_target: equal,
            else_target: other,
        },
    )?;
    ir.effect(equal, IrOp::Return { value: Some(one) })?;
    ir.effect(other, IrOp::Return { value: Some(zero) })?;
    let pick = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A", "B"])]).with_body(pick);
    let (outcome, ctx) = unbox(&program)?;
    assert_eq!(outcome.unboxed, BTreeSet::from([e.clone()]));
    let Some(body) = ctx.code(&method) else {
        panic!("pick body missing");
    };
    assert!(!body.references_type(&e));
    let allocated: Vec<DexType> = body
        .instructions()
        .filter_map(|instr| match &instr.op {
            IrOp::NewArrayEmpty { ty, .. } => Some(ty.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(allocated, vec![DexType::int().to_array(1), DexType::int().to_array(2)]);
    let stored: Vec<Option<i64>> = body
        .instructions()
        .filter_map(|instr| match instr.op {
            IrOp::ArrayPut { value, .. } => Some(const_value(&body, value)),
            _ => None,
        })
        .collect();
    assert_eq!(stored, vec![Some(0), Some(1)]);
    let arrays: Vec<TypeElement> = body
        .instructions()
        .filter_map(|instr| match instr.op {
            IrOp::ArrayGet { .. } => instr.out.map(|out| body.value_type(out)),
            _ => None,
        })
        .collect();
    assert_eq!(arrays, vec![TypeElement::INT, TypeElement::of(&DexType::int().to_array(1))]);
    Ok(())
}

#[test]
fn test_discarded_values_and_value_of_calls_keep_enums() -> Result<()> {
    let e = DexType::class("E");
    let f = DexType::class("F");

    let mut ir = IrCodeBuilder::new(main_method("touch", DexType::void(), vec![]), true)?;
    let entry = ir.entry();
    ir.effect(
        entry,
        IrOp::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef::new(e.clone(), "values", Proto::new(e.to_array(1), vec![])),
            args: vec![],
        },
    )?;
    ir.effect(entry, IrOp::Return { value: None })?;
    let touch = ir.build()?;

    let mut ir = IrCodeBuilder::new(main_method("parse", DexType::void(), vec![DexType::string()]), true)?;
    let entry = ir.entry();
    let name = ir.arguments()[0];
    ir.effect(
        entry,
        IrOp::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef::new(f.clone(), "valueOf", Proto::new(f.clone(), vec![DexType::string()])),
            args: vec![name],
        },
    )?;
    ir.effect(entry, IrOp::Return { value: None })?;
    let parse = ir.build()?;

    let program = Program::new(vec![enum_class("E", &["A", "B"]), enum_class("F", &["X"])])
        .with_body(compare_and_ordinal(&e, "isB", "B")?)
        .with_body(compare_and_ordinal(&f, "isX", "X")?)
        .with_body(touch.clone())
        .with_body(parse.clone());
    let (outcome, ctx) = unbox(&program)?;
    assert!(outcome.unboxed.is_empty());
    assert_kept(&outcome, &ctx, &e, Reason::ValuesInvoke, &touch);
    assert_kept(&outcome, &ctx, &f, Reason::ValueOfInvoke, &parse);
    Ok(())
}
