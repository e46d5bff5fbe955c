//! Per-method and per-field optimization summaries.
//!
//! Other analyses publish what they learned about a method or field into the shared
//! [`OptimizationFeedback`]: whether a method may have side effects, which constant it
//! returns, the dynamic type of a field, and so on. Enum unboxing consults these
//! summaries to judge the safety of an enum's initializers, and afterwards rewrites
//! them through the new lens so that facts about enum references become facts about
//! ordinals.
//!
//! # Thread Safety
//!
//! Summaries live in `DashMap`s and can be read and published from rayon workers.
//! [`OptimizationFeedback::fixup`] rekeys the maps and must not run concurrently with
//! readers that expect the previous keys.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    analysis::TypeElement,
    graph::{DexType, FieldRef, GraphLens, MethodRef},
};

/// A statically known value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AbstractValue {
    /// Nothing is known.
    #[default]
    Unknown,
    /// Always `null`.
    Null,
    /// Always this number.
    SingleNumber(i64),
    /// Always this string constant.
    SingleString(Arc<str>),
    /// Always the value of this static final field, such as an enum constant.
    SingleField(FieldRef),
}

impl AbstractValue {
    /// Rewrites the value through `lens` for a slot that now has type `ty`.
    ///
    /// # Arguments
    ///
    /// * `lens` - The newly installed lens
    /// * `unboxed_constants` - Ordinals of the constants of unboxed enums
    /// * `ty` - The current type of the slot holding the value
    #[must_use]
    pub fn fixup(&self, lens: &GraphLens, unboxed_constants: &HashMap<FieldRef, i64>, ty: &DexType) -> AbstractValue {
        match self {
            AbstractValue::SingleField(field) => match unboxed_constants.get(field) {
                Some(ordinal) => AbstractValue::SingleNumber(*ordinal),
                None => AbstractValue::SingleField(lens.lookup_field(field)),
            },
            AbstractValue::Null if ty.is_primitive() => AbstractValue::SingleNumber(0),
            other => other.clone(),
        }
    }

    /// Returns `true` if something is known.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, AbstractValue::Unknown)
    }
}

fn fixup_dynamic_type(ty: Option<&TypeElement>, lens: &GraphLens) -> Option<TypeElement> {
    // Dynamic types only describe references; a type unboxed to a primitive is dropped.
    ty.map(|t| t.fixup_class_type_references(lens))
        .filter(TypeElement::is_reference)
}

/// What an instance initializer does besides assigning instance fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceInitializerInfo {
    /// The instance fields assigned by the initializer.
    pub initialized_fields: Vec<FieldRef>,
    /// The initializer may do more than assign instance fields.
    pub may_have_other_side_effects: bool,
}

/// Summary of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodOptimizationInfo {
    /// The method may have observable side effects.
    pub may_have_side_effects: bool,
    /// The value every normal return produces.
    pub abstract_return_value: AbstractValue,
    /// A sharper bound of the returned reference than the declared return type.
    pub dynamic_return_type: Option<TypeElement>,
    /// Present for analyzed instance initializers.
    pub instance_initializer: Option<InstanceInitializerInfo>,
}

impl Default for MethodOptimizationInfo {
    fn default() -> Self {
        Self {
            may_have_side_effects: true,
            abstract_return_value: AbstractValue::Unknown,
            dynamic_return_type: None,
            instance_initializer: None,
        }
    }
}

impl MethodOptimizationInfo {
    /// Summary of a method known to be free of side effects.
    #[must_use]
    pub fn side_effect_free() -> Self {
        Self {
            may_have_side_effects: false,
            ..Self::default()
        }
    }

    /// Summary of an instance initializer that only assigns `fields`.
    #[must_use]
    pub fn field_initializer(fields: Vec<FieldRef>) -> Self {
        Self {
            may_have_side_effects: false,
            instance_initializer: Some(InstanceInitializerInfo {
                initialized_fields: fields,
                may_have_other_side_effects: false,
            }),
            ..Self::default()
        }
    }

    /// Sets the abstract return value.
    #[must_use]
    pub fn with_return_value(mut self, value: AbstractValue) -> Self {
        self.abstract_return_value = value;
        self
    }

    /// Sets the dynamic return type.
    #[must_use]
    pub fn with_dynamic_return_type(mut self, ty: TypeElement) -> Self {
        self.dynamic_return_type = Some(ty);
        self
    }

    fn fixup(&self, lens: &GraphLens, constants: &HashMap<FieldRef, i64>, method: &MethodRef) -> Self {
        Self {
            may_have_side_effects: self.may_have_side_effects,
            abstract_return_value: self.abstract_return_value.fixup(lens, constants, &method.proto.return_type),
            dynamic_return_type: fixup_dynamic_type(self.dynamic_return_type.as_ref(), lens),
            instance_initializer: self.instance_initializer.as_ref().map(|info| InstanceInitializerInfo {
                initialized_fields: info.initialized_fields.iter().map(|f| lens.lookup_field(f)).collect(),
                may_have_other_side_effects: info.may_have_other_side_effects,
            }),
        }
    }
}

/// Summary of one field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldOptimizationInfo {
    /// The value the field always holds.
    pub abstract_value: AbstractValue,
    /// A sharper bound of the stored reference than the declared type.
    pub dynamic_type: Option<TypeElement>,
}

impl FieldOptimizationInfo {
    fn fixup(&self, lens: &GraphLens, constants: &HashMap<FieldRef, i64>, field: &FieldRef) -> Self {
        Self {
            abstract_value: self.abstract_value.fixup(lens, constants, &field.ty),
            dynamic_type: fixup_dynamic_type(self.dynamic_type.as_ref(), lens),
        }
    }
}

/// The shared store of optimization summaries.
#[derive(Debug, Default)]
pub struct OptimizationFeedback {
    methods: DashMap<MethodRef, MethodOptimizationInfo>,
    fields: DashMap<FieldRef, FieldOptimizationInfo>,
}

impl OptimizationFeedback {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the summary of `method`.
    pub fn set_method_info(&self, method: MethodRef, info: MethodOptimizationInfo) {
        self.methods.insert(method, info);
    }

    /// Returns the summary of `method`.
    #[must_use]
    pub fn method_info(&self, method: &MethodRef) -> Option<MethodOptimizationInfo> {
        self.methods.get(method).map(|info| info.clone())
    }

    /// Publishes the summary of `field`.
    pub fn set_field_info(&self, field: FieldRef, info: FieldOptimizationInfo) {
        self.fields.insert(field, info);
    }

    /// Returns the summary of `field`.
    #[must_use]
    pub fn field_info(&self, field: &FieldRef) -> Option<FieldOptimizationInfo> {
        self.fields.get(field).map(|info| info.clone())
    }

    /// Returns `true` unless `method` is known to be free of side effects.
    #[must_use]
    pub fn may_have_side_effects(&self, method: &MethodRef) -> bool {
        self.methods.get(method).map_or(true, |info| info.may_have_side_effects)
    }

    /// Returns `true` unless the instance initializer `method` is known to do nothing
    /// but assign instance fields.
    #[must_use]
    pub fn initializer_may_have_side_effects(&self, method: &MethodRef) -> bool {
        self.methods.get(method).map_or(true, |info| {
            info.instance_initializer
                .as_ref()
                .map_or(true, |init| init.may_have_other_side_effects)
        })
    }

    /// Returns the number of method summaries.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Returns the number of field summaries.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Rewrites every summary through `lens` and rekeys it by the current signature.
    ///
    /// # Arguments
    ///
    /// * `lens` - The newly installed lens
    /// * `unboxed_constants` - Ordinals of the constants of unboxed enums; summaries
    ///   naming one of them now name its ordinal
    pub fn fixup(&self, lens: &GraphLens, unboxed_constants: &HashMap<FieldRef, i64>) {
        let methods: Vec<(MethodRef, MethodOptimizationInfo)> = self
            .methods
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        self.methods.clear();
        methods.into_par_iter().for_each(|(method, info)| {
            let current = lens.lookup_method_signature(&method);
            let info = info.fixup(lens, unboxed_constants, &current);
            self.methods.insert(current, info);
        });

        let fields: Vec<(FieldRef, FieldOptimizationInfo)> = self
            .fields
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        self.fields.clear();
        fields.into_par_iter().for_each(|(field, info)| {
            let current = lens.lookup_field(&field);
            let info = info.fixup(lens, unboxed_constants, &current);
            self.fields.insert(current, info);
        });
    }
}
