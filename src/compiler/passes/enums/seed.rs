//! Structural selection of enum unboxing candidates.
//!
//! Only enums whose declaration can be fully replaced by ordinals are seeded: a
//! direct subclass of `java.lang.Enum` without subclasses, interfaces, instance
//! fields or virtual methods, and with nothing static besides its constants, the
//! `$VALUES` array and the compiler-generated methods. Enums failing one of these
//! checks are recorded as rejected so they still show up in diagnostics.

use crate::{
    compiler::{
        passes::enums::{EnumCandidates, Reason},
        CompilerOptions,
    },
    graph::{Application, DexType, EncodedField, EncodedMethod, ProgramClass},
};

/// Name of the static array backing `values()`.
pub const VALUES_FIELD_NAME: &str = "$VALUES";

/// Seeds the candidates from the program's enum declarations.
#[must_use]
pub fn seed_candidates(app: &Application, options: &CompilerOptions) -> EnumCandidates {
    let candidates = EnumCandidates::new();
    for class in app.program_classes() {
        if !class.is_enum() || class.super_type.as_ref() != Some(&DexType::java_lang_enum()) {
            continue;
        }
        candidates.add(class.ty.clone());
        if let Some(reason) = structural_reason(app, class, options) {
            candidates.reject(&class.ty, reason, None);
        }
    }
    log::debug!("Seeded {} enum unboxing candidates", candidates.len());
    candidates
}

fn structural_reason(app: &Application, class: &ProgramClass, options: &CompilerOptions) -> Option<Reason> {
    if options.is_pinned(&class.ty) {
        return Some(Reason::Pinned);
    }
    if app.has_subtypes(&class.ty) {
        return Some(Reason::Subtypes);
    }
    if !class.interfaces.is_empty() {
        return Some(Reason::Interface);
    }
    if class.instance_fields().next().is_some() {
        return Some(Reason::InstanceField);
    }
    if !class.static_fields().all(|f| is_expected_static_field(class, f)) {
        return Some(Reason::UnexpectedStaticField);
    }
    if class.virtual_methods().next().is_some() {
        return Some(Reason::VirtualMethod);
    }
    if !class.direct_methods().all(|m| is_expected_direct_method(class, m)) {
        return Some(Reason::UnexpectedDirectMethod);
    }
    None
}

fn is_expected_static_field(class: &ProgramClass, field: &EncodedField) -> bool {
    (field.is_enum_constant() && field.field.ty == class.ty)
        || (&*field.field.name == VALUES_FIELD_NAME && field.field.ty == class.ty.to_array(1))
}

/// Returns `true` for the constructor, the static initializer, `values()` and
/// `valueOf(String)` every enum declares.
#[must_use]
pub fn is_expected_direct_method(class: &ProgramClass, method: &EncodedMethod) -> bool {
    let method = &method.method;
    method.is_initializer() || class.is_values_method(method) || class.is_value_of_method(method)
}
