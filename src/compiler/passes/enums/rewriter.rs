//! Rewrites the enum-specific instructions of a body before the lens is applied.
//!
//! The lens only knows that an unboxed enum type became `int`. What an enum value
//! *is* after unboxing is decided here:
//!
//! - a read of an enum constant becomes `const <ordinal>`
//! - `ordinal()` becomes a call of the synthesized utility method
//! - `null` flowing into an unboxed slot (a phi, an array element, a comparison)
//!   becomes `const 0` typed `int`
//!
//! Ordinals start at 0, so an unboxed `null` and the first constant are the same `int`.
//! After unboxing, `x == null` also holds when `x` is the first constant, and a `null`
//! stored in place of an enum reads back as that constant. The usage analysis accepts
//! null comparisons, so this is a known loss of precision of the encoding.
//!
//! The rewriter runs on the types the body had before the lens was installed and
//! returns the phis whose operand types changed, for the phi type fixpoint that the
//! [`LensCodeRewriter`](crate::compiler::LensCodeRewriter) runs at the end.

use std::collections::{BTreeSet, HashMap};

use crate::{
    analysis::{InstrId, IrCode, IrOp, TypeElement, ValueId},
    compiler::{passes::enums::EnumUnboxingUtility, EventKind, EventLog},
    graph::{Application, DexType, FieldRef, InvokeKind, MethodRef, Proto},
    Error, Result,
};

/// Rewrites uses of unboxed enum constants and methods.
#[derive(Debug, Clone)]
pub struct EnumUnboxingRewriter {
    enums: BTreeSet<DexType>,
    ordinals: HashMap<FieldRef, i64>,
    ordinal_method: MethodRef,
}

impl EnumUnboxingRewriter {
    /// Creates a rewriter for `enums`, collecting the ordinals of their constants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDefinition`] if one of `enums` has no definition in `app`.
    pub fn new(app: &Application, enums: &BTreeSet<DexType>) -> Result<Self> {
        let mut ordinals = HashMap::new();
        for ty in enums {
            let class = app
                .definition_for(ty)
                .ok_or_else(|| Error::MissingDefinition(ty.clone()))?;
            for (ordinal, constant) in class.enum_constants().into_iter().enumerate() {
                let ordinal = i64::try_from(ordinal).map_err(|_| internal_error!("Too many constants in {}", ty))?;
                ordinals.insert(constant.field.clone(), ordinal);
            }
        }
        Ok(Self {
            enums: enums.clone(),
            ordinals,
            ordinal_method: EnumUnboxingUtility::ordinal_method(),
        })
    }

    /// Returns the unboxed enums.
    #[must_use]
    pub fn enums(&self) -> &BTreeSet<DexType> {
        &self.enums
    }

    /// Returns the ordinal of every constant of the unboxed enums.
    #[must_use]
    pub fn ordinals(&self) -> &HashMap<FieldRef, i64> {
        &self.ordinals
    }

    fn is_unboxed(&self, ty: &TypeElement) -> bool {
        ty.reference_type().is_some_and(|t| self.enums.contains(t))
    }

    fn is_unboxed_array(&self, ty: &TypeElement) -> bool {
        ty.reference_type()
            .and_then(DexType::element_type)
            .is_some_and(|element| self.enums.contains(&element))
    }

    fn is_ordinal_call(&self, code: &IrCode, method: &MethodRef, args: &[ValueId]) -> bool {
        &*method.name == "ordinal"
            && method.proto == Proto::new(DexType::int(), vec![])
            && args.len() == 1
            && self.is_unboxed(&code.value_type(args[0]))
    }

    /// Rewrites `code` in place.
    ///
    /// # Returns
    ///
    /// The phis whose operands changed type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the body is inconsistent.
    pub fn rewrite_code(&self, code: &mut IrCode, events: &EventLog) -> Result<BTreeSet<ValueId>> {
        let method = code.method().clone();
        let mut affected = BTreeSet::new();

        for id in code.instruction_ids() {
            let Some(instr) = code.instruction(id).cloned() else {
                continue;
            };
            match &instr.op {
                IrOp::StaticGet { field } => {
                    let Some(ordinal) = self.ordinals.get(field).copied() else {
                        continue;
                    };
                    let out = instr.out.map(|_| code.create_value(TypeElement::INT));
                    code.replace_instruction(id, IrOp::ConstNumber { value: ordinal }, out)?;
                    if let Some(out) = out {
                        affected.extend(code.phi_users_of(out));
                    }
                    events
                        .record(EventKind::EnumConstantUnboxed)
                        .at(&method, id)
                        .message(format!("{field} -> {ordinal}"));
                }
                IrOp::Invoke { method: called, args, .. } if self.is_ordinal_call(code, called, args) => {
                    let op = IrOp::Invoke {
                        kind: InvokeKind::Static,
                        method: self.ordinal_method.clone(),
                        args: vec![args[0]],
                    };
                    code.replace_instruction(id, op, instr.out)?;
                    events
                        .record(EventKind::OrdinalCallRewritten)
                        .at(&method, id)
                        .message(format!("{called} -> {}", self.ordinal_method));
                }
                IrOp::ArrayPut { array, value, .. }
                    if code.value_type(*value).is_null() && self.is_unboxed_array(&code.value_type(*array)) =>
                {
                    self.replace_null_use(code, id, *value, events)?;
                }
                IrOp::If { lhs, rhs: Some(rhs), .. } => {
                    for (null, other) in [(*lhs, *rhs), (*rhs, *lhs)] {
                        if code.value_type(null).is_null() && self.is_unboxed(&code.value_type(other)) {
                            self.replace_null_use(code, id, null, events)?;
                        }
                    }
                }
                _ => {}
            }
        }

        let phis: Vec<(ValueId, Vec<ValueId>)> = code
            .phis()
            .filter(|phi| self.is_unboxed(&code.value_type(phi.value)))
            .map(|phi| (phi.value, phi.operands.clone()))
            .collect();
        for (phi, operands) in phis {
            let nulls: BTreeSet<ValueId> = operands
                .into_iter()
                .filter(|operand| code.value_type(*operand).is_null())
                .collect();
            for null in nulls {
                let Some((definition, position)) = code
                    .definition_of(null)
                    .filter(|d| d.op.is_zero_const())
                    .map(|d| (d.id, d.position.clone()))
                else {
                    continue;
                };
                let zero = code.create_value(TypeElement::INT);
                code.insert_after(definition, IrOp::ConstNumber { value: 0 }, Some(zero), position)?;
                code.replace_phi_operand(phi, null, zero)?;
                affected.insert(phi);
                events
                    .record(EventKind::NullUnboxed)
                    .at(&method, definition)
                    .message(format!("null operand of {phi}"));
            }
        }
        Ok(affected)
    }

    /// Replaces the `null` operand `null` of `user` by a fresh `const 0`.
    ///
    /// The zero is indistinguishable from the ordinal of the first constant.
    fn replace_null_use(&self, code: &mut IrCode, user: InstrId, null: ValueId, events: &EventLog) -> Result<()> {
        let position = code
            .instruction(user)
            .map(|i| i.position.clone())
            .unwrap_or_default();
        let zero = code.create_value(TypeElement::INT);
        code.insert_before(user, IrOp::ConstNumber { value: 0 }, Some(zero), position)?;
        code.replace_use_in(user, null, zero)?;
        events
            .record(EventKind::NullUnboxed)
            .at(code.method(), user)
            .message(format!("{null} -> {zero}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IfKind, IrCodeBuilder, Nullability},
        test::{enum_class, program_with},
    };

    fn color() -> DexType {
        DexType::class("Color")
    }

    fn constant(name: &str) -> FieldRef {
        FieldRef::new(color(), name, color())
    }

    fn rewriter() -> Result<EnumUnboxingRewriter> {
        let app = program_with(vec![enum_class("Color", &["RED", "GREEN", "BLUE"])]);
        EnumUnboxingRewriter::new(&app, &BTreeSet::from([color()]))
    }

    #[test]
    fn test_constants_and_ordinal_calls() -> Result<()> {
        let method = MethodRef::new(DexType::class("Main"), "check", Proto::new(DexType::int(), vec![color()]));
        let mut ir = IrCodeBuilder::new(method, true)?;
        let entry = ir.entry();
        let argument = ir.arguments()[0];
        let green = ir.value(entry, IrOp::StaticGet { field: constant("GREEN") }, TypeElement::of(&color()))?;
        let ordinal = MethodRef::new(color(), "ordinal", Proto::new(DexType::int(), vec![]));
        ir.value(
            entry,
            IrOp::Invoke {
                kind: InvokeKind::Virtual,
                method: ordinal,
                args: vec![green],
            },
            TypeElement::INT,
        )?;
        ir.effect(entry, IrOp::Return { value: Some(argument) })?;
        let mut code = ir.build()?;

        let events = EventLog::new();
        let rewriter = rewriter()?;
        assert_eq!(rewriter.ordinals().get(&constant("BLUE")), Some(&2));
        rewriter.rewrite_code(&mut code, &events)?;

        let ops: Vec<IrOp> = code.instructions().map(|i| i.op.clone()).collect();
        assert!(ops.contains(&IrOp::ConstNumber { value: 1 }));
        let utility_call = ops.iter().find_map(|op| match op {
            IrOp::Invoke { kind, method, .. } => Some((*kind, method.clone())),
            _ => None,
        });
        assert_eq!(utility_call, Some((InvokeKind::Static, EnumUnboxingUtility::ordinal_method())));
        assert_eq!(events.count(EventKind::EnumConstantUnboxed), 1);
        assert_eq!(events.count(EventKind::OrdinalCallRewritten), 1);
        Ok(())
    }

    #[test]
    fn test_null_phi_operand_becomes_zero() -> Result<()> {
        let method = MethodRef::new(DexType::class("Main"), "pick", Proto::new(color(), vec![DexType::int()]));
        let mut ir = IrCodeBuilder::new(method, true)?;
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
        let red = ir.value(
            left,
            IrOp::StaticGet { field: constant("RED") },
            TypeElement::from_dex_type(&color(), Nullability::Maybe),
        )?;
        ir.effect(left, IrOp::Goto { target: join })?;
        let null = ir.null(right)?;
        ir.effect(right, IrOp::Goto { target: join })?;
        let phi = ir.phi(join, TypeElement::of(&color()), vec![red, null])?;
        ir.effect(join, IrOp::Return { value: Some(phi) })?;
        let mut code = ir.build()?;

        let affected = rewriter()?.rewrite_code(&mut code, &EventLog::new())?;
        assert!(affected.contains(&phi));
        let operands = code.phi(phi).map(|p| p.operands.clone()).unwrap_or_default();
        assert_eq!(operands.len(), 2);
        assert!(operands.iter().all(|v| code.value_type(*v) == TypeElement::INT));
        assert!(code.value(null).is_some_and(|v| v.is_unused()));
        code.is_consistent_ssa()
    }
    #[test]
    fn test_null_comparison_compares_with_first_ordinal() -> Result<()> {
        let method = MethodRef::new(DexType::class("Main"), "isNull", Proto::new(DexType::int(), vec![color()]));
        let mut ir = IrCodeBuilder::new(method, true)?;
        let entry = ir.entry();
        let argument = ir.arguments()[0];
        let yes = ir.new_block();
        let no = ir.new_block();
        let null = ir.null(entry)?;
        ir.effect(
            entry,
            IrOp::If {
                kind: IfKind::Eq,
                lhs: argument,
                rhs: Some(null),
                then_target: yes,
                else_target: no,
            },
        )?;
        let one = ir.int(yes, 1)?;
        ir.effect(yes, IrOp::Return { value: Some(one) })?;
        let zero = ir.int(no, 0)?;
        ir.effect(no, IrOp::Return { value: Some(zero) })?;
        let mut code = ir.build()?;

        let events = EventLog::new();
        rewriter()?.rewrite_code(&mut code, &events)?;
        let rhs = code.instructions().find_map(|i| match i.op {
            IrOp::If { rhs: Some(rhs), .. } => Some(rhs),
            _ => None,
        });
        let Some(rhs) = rhs else {
            panic!("comparison missing");
        };
        assert_ne!(rhs, null);
        assert_eq!(code.value_type(rhs), TypeElement::INT);
        // The same value the first constant unboxes to.
        assert_eq!(rewriter()?.ordinals().get(&constant("RED")), Some(&0));
        assert_eq!(code.definition_of(rhs).map(|d| d.op.clone()), Some(IrOp::ConstNumber { value: 0 }));
        assert_eq!(events.count(EventKind::NullUnboxed), 1);
        code.is_consistent_ssa()
    }

    #[test]
    fn test_enum_without_definition_is_missing() {
        let result = EnumUnboxingRewriter::new(&Application::with_java_lang(), &BTreeSet::from([color()]));
        assert!(matches!(result, Err(Error::MissingDefinition(ty)) if ty == color()));
    }
}
