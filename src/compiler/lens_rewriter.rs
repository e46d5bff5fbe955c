//! Applies the installed graph lens to one method body.
//!
//! Whole-program passes record how types, methods and fields changed in a
//! [`GraphLens`](crate::graph::GraphLens) layer instead of rewriting every body. The
//! [`LensCodeRewriter`] brings a single [`IrCode`] up to date with the lens in one
//! linear pass over its instructions:
//!
//! - Type-carrying instructions (`const-class`, `check-cast`, `new-instance`, ...)
//!   are rebuilt with the mapped type and a freshly typed out-value
//! - Invokes are retargeted; the prototype change of the target drives argument
//!   removal, argument retyping, the synthetic trailing `null` and the
//!   materialization of constants for returns that became `void`
//! - Field accesses are retargeted or replaced by calls of static accessors
//! - Catch guards are mapped, and handlers made dead by duplicate guards are unlinked
//! - Every other out-value gets its type mapped
//!
//! Phis whose operand types changed are collected on the way and recomputed at the
//! end by the [`PhiTypeUpdater`], restricted to that set.
//!
//! # Errors
//!
//! A mismatch between the return type a call expects through the lens and the return
//! type of its new target is a compiler defect and yields [`crate::Error::Internal`].
//! A direct constructor call on a class that was vertically merged into a subtype
//! cannot be rewritten and yields [`crate::Error::Fatal`], naming the keep rule that
//! avoids the merge.

use std::collections::{BTreeSet, HashSet};

use crate::{
    analysis::{BasicBlock, Instruction, IrCode, IrOp, PhiTypeUpdater, TypeElement, ValueId},
    compiler::{passes::enums::EnumUnboxingRewriter, AppView, CompilerContext, EventKind, EventLog, Reporter},
    graph::{
        default_value_has_changed, ArgumentInfo, ConstantReturn, DexType, FieldRef, InvokeKind, MethodRef,
        ReturnChange,
    },
    Result,
};

/// Rewrites method bodies through the lens installed in an [`AppView`].
pub struct LensCodeRewriter<'a> {
    view: &'a AppView,
    enum_rewriter: Option<&'a EnumUnboxingRewriter>,
}

impl<'a> LensCodeRewriter<'a> {
    /// Creates a rewriter for the lens of `view`.
    #[must_use]
    pub fn new(view: &'a AppView) -> Self {
        Self {
            view,
            enum_rewriter: None,
        }
    }

    /// Runs `rewriter` on every body before the lens is applied.
    ///
    /// The enum rewriter works on the types the body had before the enum unboxing
    /// lens was installed, so it must see the body first.
    #[must_use]
    pub fn with_enum_rewriter(mut self, rewriter: &'a EnumUnboxingRewriter) -> Self {
        self.enum_rewriter = Some(rewriter);
        self
    }

    /// Rewrites `code` in place.
    ///
    /// `code` must already carry its current signature (see
    /// [`CompilerContext::rekey_codes`]). Events are merged into `ctx.events` and fatal
    /// diagnostics are reported to `ctx.reporter`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Fatal`] for calls that cannot be rewritten without a keep
    /// rule and [`crate::Error::Internal`] if a rewrite invariant is violated.
    pub fn rewrite(&self, code: &mut IrCode, ctx: &CompilerContext) -> Result<()> {
        let events = EventLog::new();
        let result = self.rewrite_with(code, &events, &ctx.reporter);
        if !events.is_empty() {
            ctx.events.merge(events);
        }
        result
    }

    fn rewrite_with(&self, code: &mut IrCode, events: &EventLog, reporter: &Reporter) -> Result<()> {
        let mut affected = BTreeSet::new();
        if let Some(enum_rewriter) = self.enum_rewriter {
            affected.extend(enum_rewriter.rewrite_code(code, events)?);
        }

        let unlinked = if self.view.options().enable_vertical_class_merging {
            self.rewrite_catch_guards(code, events)?
        } else {
            false
        };

        for id in code.instruction_ids() {
            let Some(instr) = code.instruction(id).cloned() else {
                continue;
            };
            match &instr.op {
                IrOp::Invoke { kind, method, args } => {
                    self.rewrite_invoke(code, &instr, *kind, method, args, &mut affected, events, reporter)?;
                }
                IrOp::InstanceGet { .. } | IrOp::StaticGet { .. } => {
                    self.rewrite_field_get(code, &instr, &mut affected, events)?;
                }
                IrOp::InstancePut { .. } | IrOp::StaticPut { .. } => {
                    self.rewrite_field_put(code, &instr, events)?;
                }
                IrOp::Return { value: Some(value) } => {
                    self.rewrite_return(code, &instr, *value, events)?;
                }
                op if op.embedded_type().is_some() => {
                    self.rewrite_embedded_type(code, &instr, &mut affected, events)?;
                }
                _ => self.fixup_out_type(code, &instr, &mut affected)?,
            }
        }

        if unlinked {
            affected.extend(code.remove_unreachable_blocks()?);
        }
        affected.retain(|value| code.phi(*value).is_some());
        if !affected.is_empty() {
            PhiTypeUpdater::new(self.view.app()).update(code, &affected)?;
        }
        if self.view.options().verify_after_rewrite {
            self.verify(code)?;
        }
        Ok(())
    }

    fn rewrite_catch_guards(&self, code: &mut IrCode, events: &EventLog) -> Result<bool> {
        let lens = self.view.lens();
        let guarded: Vec<(crate::analysis::BlockId, Vec<DexType>)> = code
            .blocks()
            .filter(|b| b.has_catch_handlers())
            .map(|b| (b.id, b.catch_handlers.iter().map(|h| h.guard.clone()).collect()))
            .collect();

        let mut unlinked = false;
        for (block, guards) in guarded {
            let mut seen = HashSet::new();
            let mut dead = Vec::new();
            for (index, guard) in guards.iter().enumerate() {
                let mapped = lens.lookup_type(guard);
                if mapped != *guard {
                    code.set_catch_guard(block, index, mapped.clone())?;
                }
                // The first handler for a guard wins; later ones can never match.
                if !seen.insert(mapped) {
                    dead.push(index);
                }
            }
            for index in dead.into_iter().rev() {
                let handler = code.remove_catch_handler(block, index)?;
                events
                    .record(EventKind::CatchHandlerUnlinked)
                    .method(code.method())
                    .message(format!("{block}: catch {} -> {}", handler.guard, handler.target));
                unlinked = true;
            }
        }
        Ok(unlinked)
    }

    #[allow(clippy::too_many_arguments)]
    fn rewrite_invoke(
        &self,
        code: &mut IrCode,
        instr: &Instruction,
        kind: InvokeKind,
        method: &MethodRef,
        args: &[ValueId],
        affected: &mut BTreeSet<ValueId>,
        events: &EventLog,
        reporter: &Reporter,
    ) -> Result<()> {
        let lens = self.view.lens();
        if method.holder.is_array() {
            // Methods of array types (clone) cannot move; only their types are mapped.
            let mapped = method
                .with_holder(lens.lookup_type(&method.holder))
                .with_proto(method.proto.map_types(|t| lens.lookup_type(t)));
            if mapped != *method {
                let op = IrOp::Invoke {
                    kind,
                    method: mapped,
                    args: args.to_vec(),
                };
                code.replace_instruction(instr.id, op, instr.out)?;
            }
            return self.fixup_out_type(code, instr, affected);
        }

        self.check_invoke_direct(code, kind, method, args, reporter)?;
        let context = code.method().clone();
        let lookup = lens.lookup_method(method, &context, kind);
        if lookup.method == *method && lookup.kind == kind {
            return self.fixup_out_type(code, instr, affected);
        }

        let changes = lens.lookup_prototype_changes(&lookup.method);
        let mut new_args = Vec::with_capacity(args.len() + 1);
        for (index, arg) in args.iter().enumerate() {
            match changes.arguments.get(index) {
                Some(ArgumentInfo::Removed { .. }) => {}
                Some(ArgumentInfo::RewrittenType(info)) => {
                    new_args.push(self.rewrite_value_if_default(code, instr, *arg, &info.old_type, &info.new_type, events)?);
                }
                None => new_args.push(*arg),
            }
        }

        let mut constant = None;
        let mut new_out = None;
        let mut out_changed = false;
        if let Some(out) = instr.out {
            if let ReturnChange::ConstantVoid { old_type, value } = &changes.return_change {
                let ConstantReturn::Number(number) = *value;
                let ty = if number == 0 {
                    TypeElement::default_value_of(old_type)
                } else {
                    TypeElement::of(old_type)
                };
                let replacement = code.create_value(ty.clone());
                code.replace_users(out, replacement)?;
                if ty != code.value_type(out) {
                    affected.extend(code.phi_users_of(replacement));
                }
                constant = Some((replacement, number));
            } else {
                let expected = lens.lookup_type(&method.proto.return_type);
                if lookup.method.proto.return_type != expected {
                    return Err(internal_error!(
                        "Unexpected need to insert a cast: {} returns {} where {} expects {}",
                        lookup.method,
                        lookup.method.proto.return_type,
                        context,
                        expected
                    ));
                }
                let (value, changed) = fresh_out_value(code, out, self.view)?;
                new_out = Some(value);
                out_changed = changed;
            }
        }

        if changes.extra_null_parameter {
            let null = code.create_value(TypeElement::Null);
            code.insert_before(instr.id, IrOp::ConstNumber { value: 0 }, Some(null), instr.position.clone())?;
            new_args.push(null);
        }

        let expected = lookup.method.arity() + usize::from(lookup.kind.has_receiver());
        if new_args.len() != expected {
            return Err(internal_error!(
                "Rewritten call of {} in {} passes {} arguments, expected {}",
                lookup.method,
                context,
                new_args.len(),
                expected
            ));
        }

        let message = format!("{} -> {}", method, lookup.method);
        let op = IrOp::Invoke {
            kind: lookup.kind,
            method: lookup.method,
            args: new_args,
        };
        code.replace_instruction(instr.id, op, new_out)?;
        if let (Some(value), true) = (new_out, out_changed) {
            affected.extend(code.phi_users_of(value));
        }
        events.record(EventKind::InvokeRetargeted).at(&context, instr.id).message(message);

        if let Some((value, number)) = constant {
            let guarded = code.block(instr.block).is_some_and(BasicBlock::has_catch_handlers);
            let op = IrOp::ConstNumber { value: number };
            if guarded {
                // Only the call may throw inside the handler range; the constant goes
                // into a fresh successor block.
                let next = code.split_block_after(instr.id)?;
                code.insert_at_block_start(next, op, Some(value), instr.position.clone())?;
                events
                    .record(EventKind::BlockSplit)
                    .at(&context, instr.id)
                    .message(format!("{} split into {}", instr.block, next));
            } else {
                code.insert_after(instr.id, op, Some(value), instr.position.clone())?;
            }
            events
                .record(EventKind::ConstantMaterialized)
                .at(&context, instr.id)
                .message(format!("{value} <- const {number}"));
        }
        Ok(())
    }

    fn check_invoke_direct(
        &self,
        code: &IrCode,
        kind: InvokeKind,
        method: &MethodRef,
        args: &[ValueId],
        reporter: &Reporter,
    ) -> Result<()> {
        let merged = self.view.merged_classes();
        if kind != InvokeKind::Direct || !method.is_instance_initializer() || merged.is_empty() {
            return Ok(());
        }
        let Some(receiver) = args.first() else {
            return Ok(());
        };
        let Some(IrOp::NewInstance { ty: instantiated }) = code.definition_of(*receiver).map(|d| &d.op) else {
            return Ok(());
        };
        if *instantiated == method.holder || !merged.has_been_merged_into_subtype(&method.holder) {
            return Ok(());
        }
        let holder = method.holder.source_name();
        let target = merged
            .target_for(&method.holder)
            .map_or_else(|| instantiated.source_name(), DexType::source_name);
        let message = format!(
            "Unable to rewrite `invoke-direct {holder}.<init>(new {}, ...)` in method `{}` after type `{holder}` \
             was merged into `{target}`. Please add the following rule to your Proguard configuration file: \
             `-keep,allowobfuscation class {holder}`.",
            instantiated.source_name(),
            code.method().to_source_string(),
        );
        Err(reporter.fatal(message, code.method()))
    }

    fn rewrite_field_get(
        &self,
        code: &mut IrCode,
        instr: &Instruction,
        affected: &mut BTreeSet<ValueId>,
        events: &EventLog,
    ) -> Result<()> {
        let lens = self.view.lens();
        let (field, object) = match &instr.op {
            IrOp::InstanceGet { object, field } => (field, Some(*object)),
            IrOp::StaticGet { field } => (field, None),
            _ => return Ok(()),
        };
        let actual = lens.lookup_field(field);
        let op = if let Some(getter) = lens.lookup_get_field_for_method(&actual, code.method()) {
            IrOp::Invoke {
                kind: InvokeKind::Static,
                method: getter,
                args: object.into_iter().collect(),
            }
        } else if actual != *field {
            match object {
                Some(object) => IrOp::InstanceGet {
                    object,
                    field: actual.clone(),
                },
                None => IrOp::StaticGet { field: actual.clone() },
            }
        } else {
            return self.fixup_out_type(code, instr, affected);
        };

        let (new_out, changed) = match instr.out {
            Some(out) => {
                let (value, changed) = fresh_out_value(code, out, self.view)?;
                (Some(value), changed)
            }
            None => (None, false),
        };
        record_field_rewrite(events, code.method(), instr, field, &op);
        code.replace_instruction(instr.id, op, new_out)?;
        if let (Some(value), true) = (new_out, changed) {
            affected.extend(code.phi_users_of(value));
        }
        Ok(())
    }

    fn rewrite_field_put(&self, code: &mut IrCode, instr: &Instruction, events: &EventLog) -> Result<()> {
        let lens = self.view.lens();
        let (field, object, value) = match &instr.op {
            IrOp::InstancePut { object, value, field } => (field, Some(*object), *value),
            IrOp::StaticPut { value, field } => (field, None, *value),
            _ => return Ok(()),
        };
        let actual = lens.lookup_field(field);
        let op = if let Some(setter) = lens.lookup_put_field_for_method(&actual, code.method()) {
            IrOp::Invoke {
                kind: InvokeKind::Static,
                method: setter,
                args: object.into_iter().chain([value]).collect(),
            }
        } else if actual != *field {
            let value = self.rewrite_value_if_default(code, instr, value, &field.ty, &actual.ty, events)?;
            match object {
                Some(object) => IrOp::InstancePut {
                    object,
                    value,
                    field: actual.clone(),
                },
                None => IrOp::StaticPut {
                    value,
                    field: actual.clone(),
                },
            }
        } else {
            return Ok(());
        };
        record_field_rewrite(events, code.method(), instr, field, &op);
        code.replace_instruction(instr.id, op, None)
    }

    fn rewrite_return(&self, code: &mut IrCode, instr: &Instruction, value: ValueId, events: &EventLog) -> Result<()> {
        let initial = match code.value_type(value) {
            TypeElement::Primitive(primitive) => DexType::primitive(primitive),
            _ => DexType::object(),
        };
        let return_type = code.method().proto.return_type.clone();
        let rewritten = self.rewrite_value_if_default(code, instr, value, &initial, &return_type, events)?;
        if rewritten != value {
            code.replace_instruction(instr.id, IrOp::Return { value: Some(rewritten) }, None)?;
        }
        Ok(())
    }

    fn rewrite_embedded_type(
        &self,
        code: &mut IrCode,
        instr: &Instruction,
        affected: &mut BTreeSet<ValueId>,
        events: &EventLog,
    ) -> Result<()> {
        let mut op = instr.op.clone();
        let Some(ty) = op.embedded_type_mut() else {
            return Ok(());
        };
        let mapped = self.view.lens().lookup_type(ty);
        if mapped == *ty {
            return Ok(());
        }
        let message = format!("{ty} -> {mapped}");
        *ty = mapped;

        let (new_out, changed) = match instr.out {
            Some(out) => {
                let (value, changed) = fresh_out_value(code, out, self.view)?;
                (Some(value), changed)
            }
            None => (None, false),
        };
        code.replace_instruction(instr.id, op, new_out)?;
        if let (Some(value), true) = (new_out, changed) {
            affected.extend(code.phi_users_of(value));
        }
        events
            .record(EventKind::TypeRewritten)
            .at(code.method(), instr.id)
            .message(message);
        Ok(())
    }

    fn fixup_out_type(&self, code: &mut IrCode, instr: &Instruction, affected: &mut BTreeSet<ValueId>) -> Result<()> {
        let Some(out) = instr.out else {
            return Ok(());
        };
        let current = code.value_type(out);
        let mapped = current.fixup_class_type_references(self.view.lens());
        if mapped != current {
            code.set_value_type(out, mapped)?;
            affected.extend(code.phi_users_of(out));
        }
        Ok(())
    }

    /// Replaces a zero constant flowing into a slot whose default value changed
    /// category (`null` versus `0`) by a constant of the new category.
    fn rewrite_value_if_default(
        &self,
        code: &mut IrCode,
        anchor: &Instruction,
        value: ValueId,
        old_type: &DexType,
        new_type: &DexType,
        events: &EventLog,
    ) -> Result<ValueId> {
        if !default_value_has_changed(old_type, new_type) {
            return Ok(value);
        }
        let is_zero = code.definition_of(value).is_some_and(|d| d.op.is_zero_const());
        let ty = TypeElement::default_value_of(new_type);
        if !is_zero || code.value_type(value) == ty {
            return Ok(value);
        }
        let replacement = code.create_value(ty);
        code.insert_before(anchor.id, IrOp::ConstNumber { value: 0 }, Some(replacement), anchor.position.clone())?;
        events
            .record(EventKind::ConstantMaterialized)
            .at(code.method(), anchor.id)
            .message(format!("{replacement} <- const 0 replaces {value} as {new_type}"));
        Ok(replacement)
    }

    fn verify(&self, code: &IrCode) -> Result<()> {
        code.is_consistent_ssa()?;
        let mut defined = code.phis().map(|p| p.value).chain(code.instructions().filter_map(|i| i.out));
        if let Some(value) = defined.find(|v| code.value_type(*v) == TypeElement::Top) {
            return Err(internal_error!("{} has no consistent type in {}", value, code.method()));
        }
        if let Some(ty) = self.view.unboxed_enums().iter().find(|ty| code.references_type(ty)) {
            return Err(internal_error!("{} still references the unboxed enum {}", code.method(), ty));
        }
        Ok(())
    }
}

/// Creates a value replacing `old` with the lens-mapped type and the same local info.
fn fresh_out_value(code: &mut IrCode, old: ValueId, view: &AppView) -> Result<(ValueId, bool)> {
    let current = code.value_type(old);
    let mapped = current.fixup_class_type_references(view.lens());
    let changed = mapped != current;
    let value = code.create_value(mapped);
    if let Some(local) = code.value(old).and_then(|v| v.local.clone()) {
        code.set_local(value, &local)?;
    }
    Ok((value, changed))
}

fn record_field_rewrite(events: &EventLog, method: &MethodRef, instr: &Instruction, field: &FieldRef, op: &IrOp) {
    let target = match op {
        IrOp::Invoke { method, .. } => method.to_string(),
        other => other.field().map(ToString::to_string).unwrap_or_default(),
    };
    events
        .record(EventKind::FieldRewritten)
        .at(method, instr.id)
        .message(format!("{field} -> {target}"));
}
