//! Whole-program validation of enum candidate uses.
//!
//! [`EnumUsageAnalysis::analyze`] looks at every value of one method body whose type
//! is a candidate (or an array of one) and validates each of its users. The first use
//! that an `int` cannot represent removes the candidate from the shared
//! [`EnumCandidates`] for good. Methods only holding representable uses are recorded
//! as dependencies of the candidates they mention, so they are reprocessed if the
//! candidate is unboxed.
//!
//! `null` constants get a separate treatment: a `null` flowing into a slot declared
//! with a candidate type does not make the value a candidate, but the method still
//! depends on that candidate.
//!
//! After every method was analyzed, [`EnumUsageAnalysis::finish`] checks the enum
//! initializers against the optimization summaries and reports the outcome.
//!
//! # Thread Safety
//!
//! `analyze` only reads its body and writes into the concurrent candidate map, so all
//! methods may be analyzed in parallel and in any order.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    analysis::{Instruction, IrCode, IrOp, TypeElement, ValueId},
    compiler::{
        passes::enums::{seed::is_expected_direct_method, EnumCandidates, Reason},
        AppView, OptimizationFeedback, Reporter,
    },
    graph::{enum_methods, DexType, InvokeKind, MethodRef},
};

/// Validates the uses of enum candidates, one method at a time.
pub struct EnumUsageAnalysis<'a> {
    view: &'a AppView,
    candidates: &'a EnumCandidates,
    debug_logs: bool,
}

impl<'a> EnumUsageAnalysis<'a> {
    /// Creates an analysis pruning `candidates`.
    #[must_use]
    pub fn new(view: &'a AppView, candidates: &'a EnumCandidates) -> Self {
        Self {
            view,
            candidates,
            debug_logs: view.options().enable_enum_unboxing_debug_logs,
        }
    }

    /// Returns the candidate map being pruned.
    #[must_use]
    pub fn candidates(&self) -> &EnumCandidates {
        self.candidates
    }

    /// Validates every candidate-typed value of `code`.
    ///
    /// The compiler-generated methods of a candidate itself are skipped; they are
    /// judged by [`EnumUsageAnalysis::finish`] or replaced wholesale.
    pub fn analyze(&self, code: &IrCode) {
        if self.is_skipped(code.method()) {
            return;
        }
        let mut eligible = BTreeSet::new();
        for instr in code.instructions() {
            self.analyze_definition(code, instr);
            self.record_member_references(instr, &mut eligible);
            if let Some(out) = instr.out {
                self.analyze_value(code, out, Some(instr), &mut eligible);
            }
        }
        for phi in code.phis() {
            self.analyze_value(code, phi.value, None, &mut eligible);
        }
        for ty in &eligible {
            self.candidates.record_dependency(ty, code.method());
        }
    }

    fn is_skipped(&self, method: &MethodRef) -> bool {
        if !self.candidates.contains(&method.holder) {
            return false;
        }
        self.view.definition_for(&method.holder).is_some_and(|class| {
            class
                .lookup_direct_method(method)
                .is_some_and(|m| is_expected_direct_method(class, m))
        })
    }

    fn candidate_of(&self, ty: &TypeElement) -> Option<DexType> {
        ty.class_or_base_type().filter(|t| self.candidates.contains(t))
    }

    fn reject(&self, ty: &DexType, reason: Reason, code: &IrCode) {
        self.candidates.reject(ty, reason, Some(code.method()));
    }

    fn analyze_value(
        &self,
        code: &IrCode,
        value: ValueId,
        definition: Option<&Instruction>,
        eligible: &mut BTreeSet<DexType>,
    ) {
        let ty = code.value_type(value);
        if let Some(enum_type) = self.candidate_of(&ty) {
            match self.validate_uses(code, value, &enum_type) {
                Reason::Eligible if definition.is_some_and(|d| matches!(d.op, IrOp::CheckCast { .. })) => {
                    self.reject(&enum_type, Reason::DownCast, code);
                }
                Reason::Eligible => {
                    eligible.insert(enum_type);
                }
                reason => self.reject(&enum_type, reason, code),
            }
        }
        if ty.is_null() {
            self.analyze_null_uses(code, value, eligible);
        }
    }

    /// Records the candidates named by the member an instruction refers to.
    ///
    /// A call or field access keeps its reference to a candidate even when its result
    /// is discarded, so the method must be reprocessed once the candidate is unboxed.
    fn record_member_references(&self, instr: &Instruction, eligible: &mut BTreeSet<DexType>) {
        let mut note = |ty: &DexType| {
            let base = ty.base_type();
            if self.candidates.contains(&base) {
                eligible.insert(base);
            }
        };
        if let Some(method) = instr.op.invoked_method() {
            note(&method.holder);
            note(&method.proto.return_type);
            method.proto.params.iter().for_each(&mut note);
        }
        if let Some(field) = instr.op.field() {
            note(&field.holder);
            note(&field.ty);
        }
    }

    /// Rejects candidates whose identity an instruction itself exposes, whether or not
    /// its result is used.
    fn analyze_definition(&self, code: &IrCode, definition: &Instruction) {
        match &definition.op {
            IrOp::ConstClass { ty } if self.candidates.contains(&ty.base_type()) => {
                self.reject(&ty.base_type(), Reason::ConstClass, code);
            }
            IrOp::InstanceOf { ty, .. } if self.candidates.contains(&ty.base_type()) => {
                self.reject(&ty.base_type(), Reason::InstanceOf, code);
            }
            IrOp::Invoke {
                kind: InvokeKind::Static,
                method,
                ..
            } if self.candidates.contains(&method.holder) => {
                if let Some(class) = self.view.definition_for(&method.holder) {
                    if class.is_value_of_method(method) {
                        self.reject(&method.holder, Reason::ValueOfInvoke, code);
                    } else if class.is_values_method(method) {
                        self.reject(&method.holder, Reason::ValuesInvoke, code);
                    }
                }
            }
            IrOp::StaticGet { field } if self.candidates.contains(&field.holder) => {
                let is_constant = self
                    .view
                    .definition_for(&field.holder)
                    .and_then(|class| class.lookup_field(field))
                    .is_some_and(|f| f.is_enum_constant());
                if !is_constant && code.method().holder != field.holder {
                    self.reject(&field.holder, Reason::UnexpectedStaticField, code);
                }
            }
            _ => {}
        }
    }

    /// Returns the first reason a use of `value` is not representable, or
    /// [`Reason::Eligible`].
    fn validate_uses(&self, code: &IrCode, value: ValueId, enum_type: &DexType) -> Reason {
        for user in code.users_of(value) {
            let Some(instr) = code.instruction(user) else {
                continue;
            };
            let reason = self.validate_use(code, instr, value, enum_type);
            if !reason.is_eligible() {
                return reason;
            }
        }
        let value_type = code.value_type(value);
        for phi in code.phi_users_of(value) {
            let Some(phi) = code.phi(phi) else {
                continue;
            };
            let compatible = phi.operands.iter().all(|operand| {
                let ty = code.value_type(*operand);
                ty.is_null() || ty.equal_up_to_nullability(&value_type)
            });
            if !compatible {
                return Reason::InvalidPhi;
            }
        }
        Reason::Eligible
    }

    fn validate_use(&self, code: &IrCode, instr: &Instruction, value: ValueId, enum_type: &DexType) -> Reason {
        let value_type = code.value_type(value);
        let declared = value_type.to_dex_type();
        match &instr.op {
            IrOp::Invoke { kind, method, args } => self.validate_invoke(code, *kind, method, args, value),
            // The enum instance itself is written to; candidates declare no instance fields.
            IrOp::InstancePut { object, .. } if *object == value => Reason::FieldPutOnEnum,
            IrOp::InstancePut { field, .. } | IrOp::StaticPut { field, .. } => {
                let Some(resolved) = self.view.app().resolve_field(field) else {
                    return Reason::InvalidFieldPut;
                };
                if !resolved.holder.is_program() {
                    return Reason::InvalidFieldPut;
                }
                if resolved.holder.is_enum() {
                    return Reason::FieldPutOnEnum;
                }
                if Some(&resolved.definition.field.ty) != declared.as_ref() {
                    return Reason::TypeMissmatchFieldPut;
                }
                Reason::Eligible
            }
            IrOp::If { rhs: None, .. } => Reason::Eligible,
            IrOp::If { lhs, rhs: Some(rhs), .. } => {
                let lhs = code.value_type(*lhs);
                let rhs = code.value_type(*rhs);
                if lhs.equal_up_to_nullability(&rhs) || lhs.is_null() || rhs.is_null() {
                    Reason::Eligible
                } else {
                    Reason::InvalidIfTypes
                }
            }
            IrOp::ArrayLength { .. } | IrOp::ArrayGet { .. } => Reason::Eligible,
            IrOp::ArrayPut { array, value: stored, .. } => {
                let array_type = code.value_type(*array).to_dex_type();
                let element = array_type.as_ref().and_then(DexType::element_type);
                let stored_type = code.value_type(*stored);
                let valid = element.is_some_and(|element| {
                    element.base_type() == *enum_type
                        && (stored_type.is_null() || stored_type.to_dex_type() == Some(element))
                });
                if valid {
                    Reason::Eligible
                } else {
                    Reason::InvalidArrayPut
                }
            }
            IrOp::NewArrayFilled { ty, .. } => {
                if ty.element_type() == declared {
                    Reason::Eligible
                } else {
                    Reason::InvalidArrayPut
                }
            }
            IrOp::Assume { .. } => match instr.out {
                Some(alias) => self.validate_uses(code, alias, enum_type),
                None => Reason::Eligible,
            },
            IrOp::Return { .. } => {
                if Some(&code.method().proto.return_type) == declared.as_ref() {
                    Reason::Eligible
                } else {
                    Reason::ImplicitUpCastInReturn
                }
            }
            IrOp::CheckCast { .. } => Reason::DownCast,
            IrOp::InstanceOf { .. } => Reason::InstanceOf,
            _ => Reason::OtherUnsupportedInstruction,
        }
    }

    fn validate_invoke(
        &self,
        code: &IrCode,
        kind: InvokeKind,
        method: &MethodRef,
        args: &[ValueId],
        value: ValueId,
    ) -> Reason {
        if method.holder.is_array() {
            return if &*method.name == "clone" {
                Reason::Eligible
            } else {
                Reason::InvalidInvokeOnArray
            };
        }
        let Some(target) = self.view.app().lookup_single_target(method, kind) else {
            return Reason::InvalidInvoke;
        };
        let holder = target.holder;
        if holder.is_program() {
            if holder.is_values_method(&target.definition.method) {
                return Reason::ValuesInvoke;
            }
            if holder.is_value_of_method(&target.definition.method) {
                return Reason::ValueOfInvoke;
            }
            let declared = code.value_type(value).to_dex_type();
            let offset = usize::from(kind.has_receiver());
            for (index, _) in args.iter().enumerate().filter(|(_, arg)| **arg == value) {
                let slot = if index < offset {
                    Some(&holder.ty)
                } else {
                    target.definition.method.proto.params.get(index - offset)
                };
                if slot != declared.as_ref() {
                    return Reason::GenericInvoke;
                }
            }
            return Reason::Eligible;
        }
        if holder.is_classpath() {
            return Reason::InvalidInvoke;
        }
        if holder.ty != DexType::java_lang_enum() {
            return Reason::UnsupportedLibraryCall;
        }
        let called = &target.definition.method;
        if called.matches_signature(&enum_methods::ordinal()) {
            return Reason::Eligible;
        }
        if self.debug_logs {
            if called.matches_signature(&enum_methods::compare_to()) {
                return Reason::CompareToInvoke;
            }
            if called.matches_signature(&enum_methods::name()) {
                return Reason::NameInvoke;
            }
            if called.matches_signature(&enum_methods::to_string()) {
                return Reason::ToStringInvoke;
            }
        }
        Reason::UnsupportedLibraryCall
    }

    fn analyze_null_uses(&self, code: &IrCode, value: ValueId, eligible: &mut BTreeSet<DexType>) {
        let mut used = |ty: &DexType| {
            let base = ty.base_type();
            if self.candidates.contains(&base) {
                eligible.insert(base);
            }
        };
        for user in code.users_of(value) {
            let Some(instr) = code.instruction(user) else {
                continue;
            };
            match &instr.op {
                IrOp::Invoke { kind, method, args } => {
                    let offset = usize::from(kind.has_receiver());
                    for (index, _) in args.iter().enumerate().filter(|(_, arg)| **arg == value) {
                        if index < offset {
                            if self.candidates.contains(&method.holder) {
                                self.reject(&method.holder, Reason::EnumMethodCalledWithNullReceiver, code);
                            }
                        } else if let Some(param) = method.proto.params.get(index - offset) {
                            used(param);
                        }
                    }
                }
                IrOp::InstancePut { value: stored, field, .. } | IrOp::StaticPut { value: stored, field }
                    if *stored == value =>
                {
                    used(&field.ty);
                }
                IrOp::Return { .. } => used(&code.method().proto.return_type),
                _ => {}
            }
        }
    }

    /// Removes candidates whose initializers cannot be dropped and reports the outcome.
    ///
    /// # Arguments
    ///
    /// * `feedback` - Optimization summaries of the enum initializers
    /// * `reporter` - Receives the summary diagnostics
    ///
    /// # Returns
    ///
    /// The surviving candidates with the methods depending on each.
    pub fn finish(
        &self,
        feedback: &OptimizationFeedback,
        reporter: &Reporter,
    ) -> BTreeMap<DexType, BTreeSet<MethodRef>> {
        for ty in self.candidates.types() {
            if let Some(reason) = self.initializer_reason(&ty, feedback) {
                self.candidates.reject(&ty, reason, None);
            }
        }
        let unboxed = self.candidates.freeze();
        self.report(&unboxed, reporter);
        unboxed
    }

    fn initializer_reason(&self, ty: &DexType, feedback: &OptimizationFeedback) -> Option<Reason> {
        let Some(class) = self.view.definition_for(ty) else {
            return Some(Reason::MissingInfoMap);
        };
        let Some(init) = class.lookup_direct_method(&class.enum_constructor_signature()) else {
            return Some(Reason::NoInit);
        };
        if feedback.initializer_may_have_side_effects(&init.method) {
            return Some(Reason::InvalidInit);
        }
        if class
            .class_initializer()
            .is_some_and(|clinit| feedback.may_have_side_effects(&clinit.method))
        {
            return Some(Reason::InvalidClinit);
        }
        None
    }

    fn report(&self, unboxed: &BTreeMap<DexType, BTreeSet<MethodRef>>, reporter: &Reporter) {
        let names: Vec<String> = unboxed.keys().map(DexType::source_name).collect();
        reporter.info(format!(
            "Unboxed enums (Unboxing succeeded {}): [{}]",
            names.len(),
            names.join(", ")
        ));
        if !self.debug_logs {
            return;
        }
        let rejected = self.candidates.rejected();
        let mut message = format!("Boxed enums (Unboxing failed {}):\n", rejected.len());
        for (ty, rejection) in &rejected {
            message.push_str(&format!("- {}: {}", ty.source_name(), rejection.reason));
            if let Some(context) = &rejection.context {
                message.push_str(&format!(" (in {})", context.to_source_string()));
            }
            message.push('\n');
        }
        reporter.info(message);
    }
}
