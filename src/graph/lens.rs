//! Composable graph lenses.
//!
//! A [`GraphLens`] describes how the program's types, methods, fields and method
//! signatures changed since the input was read. Each whole-program transformation
//! contributes one immutable layer recording only its own delta, and links to the layer
//! that was installed before it. The chain always ends in the identity lens.
//!
//! # Architecture
//!
//! ```text
//!  EnumUnboxing ──▶ MemberRebinding ──▶ VerticalClassMerging ──▶ Identity
//!   (newest)                                                   (fixed point)
//! ```
//!
//! A query on a layer first asks the previous layer, then applies its own delta to the
//! answer. The identity lens returns every input unchanged, so every query terminates.
//!
//! Layers are shared through `Arc` and never mutated after [`LensBuilder::build`].
//! Installing a new lens means building a new layer on top of the current one; readers
//! holding the old chain keep a consistent snapshot.
//!
//! # Prototype Changes
//!
//! A method's prototype change is stored under the method's *rewritten* signature in the
//! layer that changed it. Every change is described by exactly one layer: building a
//! layer that describes a method whose original signature already has a change fails
//! with [`Error::LensConflict`](crate::Error::LensConflict).
//!
//! # Thread Safety
//!
//! [`GraphLens`] is `Send + Sync` and cheap to clone.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use strum::Display;

use crate::{
    graph::{
        prototype::{ArgumentInfo, ArgumentInfoCollection, RewrittenPrototypeDescription, RewrittenTypeInfo},
        DexType, FieldRef, InvokeKind, MethodRef,
    },
    Error, Result,
};

/// The transformation a lens layer was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LensKind {
    /// Vertical class merging: a class merged into its single subtype.
    VerticalClassMerging,
    /// Member rebinding and publicization.
    MemberRebinding,
    /// Removal of unused method arguments.
    ArgumentRemoval,
    /// Enum unboxing.
    EnumUnboxing,
    /// Any other transformation.
    Other,
}

/// Result of a method lookup: the current target and the corrected invoke kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodLookupResult {
    /// The current signature of the invoked method.
    pub method: MethodRef,
    /// The invoke kind the call must use now.
    pub kind: InvokeKind,
}

/// One layer of the lens chain.
struct NestedLens {
    kind: LensKind,
    type_map: HashMap<DexType, DexType>,
    method_map: HashMap<MethodRef, MethodRef>,
    field_map: HashMap<FieldRef, FieldRef>,
    original_methods: HashMap<MethodRef, MethodRef>,
    original_fields: HashMap<FieldRef, FieldRef>,
    prototype_changes: HashMap<MethodRef, RewrittenPrototypeDescription>,
    publicized: HashSet<MethodRef>,
    field_getters: HashMap<FieldRef, MethodRef>,
    field_setters: HashMap<FieldRef, MethodRef>,
    previous: GraphLens,
}

impl NestedLens {
    fn map_invocation_kind(&self, method: &MethodRef, kind: InvokeKind) -> InvokeKind {
        if kind == InvokeKind::Direct && self.publicized.contains(method) {
            InvokeKind::Virtual
        } else {
            kind
        }
    }
}

enum LensLayer {
    Identity,
    Nested(NestedLens),
}

/// An immutable chain of lens layers.
#[derive(Clone)]
pub struct GraphLens(Arc<LensLayer>);

impl Default for GraphLens {
    fn default() -> Self {
        Self::identity()
    }
}

impl GraphLens {
    /// Returns the identity lens.
    #[must_use]
    pub fn identity() -> Self {
        Self(Arc::new(LensLayer::Identity))
    }

    /// Returns `true` for the identity lens.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(*self.0, LensLayer::Identity)
    }

    /// Returns the kind of the newest layer (`None` for the identity lens).
    #[must_use]
    pub fn kind(&self) -> Option<LensKind> {
        match &*self.0 {
            LensLayer::Identity => None,
            LensLayer::Nested(layer) => Some(layer.kind),
        }
    }

    /// Returns the layer below the newest one (`None` for the identity lens).
    #[must_use]
    pub fn previous(&self) -> Option<&GraphLens> {
        match &*self.0 {
            LensLayer::Identity => None,
            LensLayer::Nested(layer) => Some(&layer.previous),
        }
    }

    /// Returns the number of non-identity layers.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some(previous) = current.previous() {
            depth += 1;
            current = previous;
        }
        depth
    }

    /// Returns `true` if both handles share the same layer.
    #[must_use]
    pub fn same_layer(&self, other: &GraphLens) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the current type for a type of the original program.
    ///
    /// Array types are mapped by substituting their base type.
    #[must_use]
    pub fn lookup_type(&self, ty: &DexType) -> DexType {
        if ty.is_array() {
            let base = ty.base_type();
            let mapped = self.lookup_type(&base);
            return if mapped == base {
                ty.clone()
            } else {
                ty.replace_base_type(&mapped)
            };
        }
        match &*self.0 {
            LensLayer::Identity => ty.clone(),
            LensLayer::Nested(layer) => {
                let previous = layer.previous.lookup_type(ty);
                layer.type_map.get(&previous).cloned().unwrap_or(previous)
            }
        }
    }

    /// Returns the current target and invoke kind of a call.
    ///
    /// # Arguments
    ///
    /// * `method` - The invoked method as referenced by the code
    /// * `context` - The current signature of the method containing the call
    /// * `kind` - The invoke kind as written in the code
    #[must_use]
    pub fn lookup_method(&self, method: &MethodRef, context: &MethodRef, kind: InvokeKind) -> MethodLookupResult {
        match &*self.0 {
            LensLayer::Identity => MethodLookupResult {
                method: method.clone(),
                kind,
            },
            LensLayer::Nested(layer) => {
                let previous_context = layer.original_methods.get(context).unwrap_or(context);
                let previous = layer.previous.lookup_method(method, previous_context, kind);
                match layer.method_map.get(&previous.method) {
                    Some(moved) => MethodLookupResult {
                        kind: layer.map_invocation_kind(moved, previous.kind),
                        method: moved.clone(),
                    },
                    None => MethodLookupResult {
                        kind: layer.map_invocation_kind(&previous.method, previous.kind),
                        method: previous.method,
                    },
                }
            }
        }
    }

    /// Returns the current signature of a method of the original program.
    #[must_use]
    pub fn lookup_method_signature(&self, method: &MethodRef) -> MethodRef {
        match &*self.0 {
            LensLayer::Identity => method.clone(),
            LensLayer::Nested(layer) => {
                let previous = layer.previous.lookup_method_signature(method);
                layer.method_map.get(&previous).cloned().unwrap_or(previous)
            }
        }
    }

    /// Returns the current signature of a field of the original program.
    #[must_use]
    pub fn lookup_field(&self, field: &FieldRef) -> FieldRef {
        match &*self.0 {
            LensLayer::Identity => field.clone(),
            LensLayer::Nested(layer) => {
                let previous = layer.previous.lookup_field(field);
                layer.field_map.get(&previous).cloned().unwrap_or(previous)
            }
        }
    }

    /// Returns a static accessor replacing reads of `field`, if one was recorded.
    ///
    /// `field` is the current signature returned by [`GraphLens::lookup_field`]. `None`
    /// means the read keeps accessing the field. The accessor itself keeps its own read.
    #[must_use]
    pub fn lookup_get_field_for_method(&self, field: &FieldRef, context: &MethodRef) -> Option<MethodRef> {
        match &*self.0 {
            LensLayer::Identity => None,
            LensLayer::Nested(layer) => match layer.field_getters.get(field) {
                Some(accessor) if accessor != context => Some(accessor.clone()),
                Some(_) => None,
                None => layer.previous.lookup_get_field_for_method(field, context),
            },
        }
    }

    /// Returns a static accessor replacing writes of `field`, if one was recorded.
    #[must_use]
    pub fn lookup_put_field_for_method(&self, field: &FieldRef, context: &MethodRef) -> Option<MethodRef> {
        match &*self.0 {
            LensLayer::Identity => None,
            LensLayer::Nested(layer) => match layer.field_setters.get(field) {
                Some(accessor) if accessor != context => Some(accessor.clone()),
                Some(_) => None,
                None => layer.previous.lookup_put_field_for_method(field, context),
            },
        }
    }

    /// Returns how the prototype of `method` differs from its declaration.
    ///
    /// `method` is the current signature, as returned by [`GraphLens::lookup_method`].
    #[must_use]
    pub fn lookup_prototype_changes(&self, method: &MethodRef) -> RewrittenPrototypeDescription {
        match &*self.0 {
            LensLayer::Identity => RewrittenPrototypeDescription::none(),
            LensLayer::Nested(layer) => match layer.prototype_changes.get(method) {
                Some(changes) => changes.clone(),
                None => {
                    let previous = layer.original_methods.get(method).unwrap_or(method);
                    layer.previous.lookup_prototype_changes(previous)
                }
            },
        }
    }

    /// Returns the signature `method` had in the original program.
    #[must_use]
    pub fn original_method_signature(&self, method: &MethodRef) -> MethodRef {
        match &*self.0 {
            LensLayer::Identity => method.clone(),
            LensLayer::Nested(layer) => {
                let previous = layer.original_methods.get(method).unwrap_or(method);
                layer.previous.original_method_signature(previous)
            }
        }
    }

    /// Returns the signature `field` had in the original program.
    #[must_use]
    pub fn original_field_signature(&self, field: &FieldRef) -> FieldRef {
        match &*self.0 {
            LensLayer::Identity => field.clone(),
            LensLayer::Nested(layer) => {
                let previous = layer.original_fields.get(field).unwrap_or(field);
                layer.previous.original_field_signature(previous)
            }
        }
    }
}

impl fmt::Debug for GraphLens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for GraphLens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current = self;
        loop {
            match &*current.0 {
                LensLayer::Identity => return write!(f, "Identity"),
                LensLayer::Nested(layer) => {
                    write!(f, "{} -> ", layer.kind)?;
                    current = &layer.previous;
                }
            }
        }
    }
}

/// Records the deltas of one transformation and builds a lens layer from them.
///
/// # Examples
///
/// ```rust,ignore
/// let mut builder = LensBuilder::new(LensKind::EnumUnboxing);
/// builder.map_type(color.clone(), DexType::int());
/// builder.move_method(paint_color, paint_int, true);
/// let lens = builder.build(&current)?.unwrap_or(current);
/// ```
pub struct LensBuilder {
    kind: LensKind,
    type_map: HashMap<DexType, DexType>,
    method_map: HashMap<MethodRef, MethodRef>,
    field_map: HashMap<FieldRef, FieldRef>,
    original_methods: HashMap<MethodRef, MethodRef>,
    original_fields: HashMap<FieldRef, FieldRef>,
    prototype_changes: HashMap<MethodRef, RewrittenPrototypeDescription>,
    publicized: HashSet<MethodRef>,
    field_getters: HashMap<FieldRef, MethodRef>,
    field_setters: HashMap<FieldRef, MethodRef>,
    pending_error: Option<Error>,
}

impl LensBuilder {
    /// Creates an empty builder for a layer of the given kind.
    #[must_use]
    pub fn new(kind: LensKind) -> Self {
        Self {
            kind,
            type_map: HashMap::new(),
            method_map: HashMap::new(),
            field_map: HashMap::new(),
            original_methods: HashMap::new(),
            original_fields: HashMap::new(),
            prototype_changes: HashMap::new(),
            publicized: HashSet::new(),
            field_getters: HashMap::new(),
            field_setters: HashMap::new(),
            pending_error: None,
        }
    }

    /// Records that type `from` is now `to`.
    pub fn map_type(&mut self, from: DexType, to: DexType) -> &mut Self {
        if from != to {
            self.type_map.insert(from, to);
        }
        self
    }

    /// Records that method `from` is now `to`, deriving the prototype change from the
    /// position-by-position difference of the two signatures.
    ///
    /// Both signatures must have the same arity; otherwise [`LensBuilder::build`] fails.
    /// Use [`LensBuilder::move_method_with_prototype_changes`] for arity changes.
    ///
    /// # Arguments
    ///
    /// * `from` - The signature before the move
    /// * `to` - The signature after the move
    /// * `is_static` - Whether the method is static (argument indices start after the receiver otherwise)
    pub fn move_method(&mut self, from: MethodRef, to: MethodRef, is_static: bool) -> &mut Self {
        if from.arity() != to.arity() {
            self.pending_error.get_or_insert_with(|| {
                internal_error!("Cannot derive prototype changes for {} -> {}: arity differs", from, to)
            });
            return self;
        }
        let offset = usize::from(!is_static);
        let mut arguments = ArgumentInfoCollection::new();
        for (index, (from_type, to_type)) in from.proto.params.iter().zip(&to.proto.params).enumerate() {
            if from_type != to_type {
                arguments.add(
                    index + offset,
                    ArgumentInfo::RewrittenType(RewrittenTypeInfo::new(from_type.clone(), to_type.clone())),
                );
            }
        }
        let return_info = (from.proto.return_type != to.proto.return_type).then(|| {
            RewrittenTypeInfo::new(from.proto.return_type.clone(), to.proto.return_type.clone())
        });
        let changes = RewrittenPrototypeDescription::for_rewritten_types(return_info, arguments);
        self.move_method_with_prototype_changes(from, to, changes)
    }

    /// Records that method `from` is now `to` with an explicit prototype change.
    pub fn move_method_with_prototype_changes(
        &mut self,
        from: MethodRef,
        to: MethodRef,
        changes: RewrittenPrototypeDescription,
    ) -> &mut Self {
        if !changes.is_empty() {
            self.prototype_changes.insert(to.clone(), changes);
        }
        if from != to {
            self.original_methods.insert(to.clone(), from.clone());
            self.method_map.insert(from, to);
        }
        self
    }

    /// Records that field `from` is now `to`.
    pub fn move_field(&mut self, from: FieldRef, to: FieldRef) -> &mut Self {
        if from != to {
            self.original_fields.insert(to.clone(), from.clone());
            self.field_map.insert(from, to);
        }
        self
    }

    /// Records that a private instance method was made public, so `invoke-direct`
    /// on it becomes `invoke-virtual`.
    pub fn publicize(&mut self, method: MethodRef) -> &mut Self {
        self.publicized.insert(method);
        self
    }

    /// Records a static accessor replacing reads of `field` everywhere except in `accessor`.
    pub fn record_field_getter(&mut self, field: FieldRef, accessor: MethodRef) -> &mut Self {
        self.field_getters.insert(field, accessor);
        self
    }

    /// Records a static accessor replacing writes of `field` everywhere except in `accessor`.
    pub fn record_field_setter(&mut self, field: FieldRef, accessor: MethodRef) -> &mut Self {
        self.field_setters.insert(field, accessor);
        self
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty()
            && self.method_map.is_empty()
            && self.field_map.is_empty()
            && self.prototype_changes.is_empty()
            && self.publicized.is_empty()
            && self.field_getters.is_empty()
            && self.field_setters.is_empty()
    }

    /// Builds the layer on top of `previous`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if nothing was recorded, so callers keep `previous` installed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LensConflict`] if a recorded prototype change describes a method
    /// whose change is already recorded by `previous`, and [`Error::Internal`] if a
    /// prototype change could not be derived.
    pub fn build(self, previous: &GraphLens) -> Result<Option<GraphLens>> {
        if let Some(error) = self.pending_error {
            return Err(error);
        }
        if self.is_empty() {
            return Ok(None);
        }
        for method in self.prototype_changes.keys() {
            let before = self.original_methods.get(method).unwrap_or(method);
            if !previous.lookup_prototype_changes(before).is_empty() {
                return Err(Error::LensConflict(method.clone()));
            }
        }
        Ok(Some(GraphLens(Arc::new(LensLayer::Nested(NestedLens {
            kind: self.kind,
            type_map: self.type_map,
            method_map: self.method_map,
            field_map: self.field_map,
            original_methods: self.original_methods,
            original_fields: self.original_fields,
            prototype_changes: self.prototype_changes,
            publicized: self.publicized,
            field_getters: self.field_getters,
            field_setters: self.field_setters,
            previous: previous.clone(),
        })))))
    }
}
