//! Class definitions and the whole-program application snapshot.
//!
//! An [`Application`] is an immutable map of every class visible to the compiler:
//! program classes being optimized, classpath classes the program links against and
//! library classes of the runtime. Passes never mutate an application in place. A pass
//! that changes declarations builds a new snapshot and threads it into the next
//! [`AppView`](crate::compiler::AppView).
//!
//! # Resolution
//!
//! - [`Application::resolve_method`] and [`Application::resolve_field`] walk the superclass
//!   chain starting at the reference's holder, then the interfaces for methods.
//! - [`Application::lookup_single_target`] answers which definition an invoke will reach,
//!   when that is statically known.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
};

use bitflags::bitflags;
use strum::Display;

use crate::graph::{DexType, FieldRef, InvokeKind, MethodRef, Proto};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Access flags of classes, methods and fields
    pub struct AccessFlags: u32 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Accessible only from the declaring class
        const PRIVATE = 0x0002;
        /// Accessible from subclasses and the package
        const PROTECTED = 0x0004;
        /// Static member
        const STATIC = 0x0008;
        /// Final class, method or field
        const FINAL = 0x0010;
        /// The class is an interface
        const INTERFACE = 0x0200;
        /// Abstract class or method
        const ABSTRACT = 0x0400;
        /// Compiler generated
        const SYNTHETIC = 0x1000;
        /// Enum class or enum constant field
        const ENUM = 0x4000;
        /// Instance or class initializer
        const CONSTRUCTOR = 0x10000;
    }
}

/// Where a class definition comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ClassKind {
    /// A class being compiled and optimized.
    Program,
    /// A class the program is compiled against but that is not part of the output.
    Classpath,
    /// A runtime library class.
    Library,
}

/// An explicit static field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StaticValue {
    /// The `null` reference.
    Null,
    /// An integral constant.
    Int(i64),
    /// A string constant.
    String(Arc<str>),
}

impl StaticValue {
    /// The default value of `int` fields.
    pub const INT_DEFAULT: StaticValue = StaticValue::Int(0);
}

/// A method definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMethod {
    /// The method signature, qualified with its declaring class.
    pub method: MethodRef,
    /// Access flags.
    pub access: AccessFlags,
}

impl EncodedMethod {
    /// Creates a new method definition.
    #[must_use]
    pub fn new(method: MethodRef, access: AccessFlags) -> Self {
        Self { method, access }
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    /// Returns `true` for methods dispatched directly (static, private or initializers).
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.is_static() || self.access.contains(AccessFlags::PRIVATE) || self.method.is_initializer()
    }

    /// Returns `true` for virtually dispatched methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.is_direct()
    }

    /// Returns a copy of this definition with another signature.
    #[must_use]
    pub fn to_type_substituted(&self, method: MethodRef) -> EncodedMethod {
        EncodedMethod {
            method,
            access: self.access,
        }
    }
}

/// A field definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField {
    /// The field signature, qualified with its declaring class.
    pub field: FieldRef,
    /// Access flags.
    pub access: AccessFlags,
    /// The explicit static value, if any.
    pub static_value: Option<StaticValue>,
}

impl EncodedField {
    /// Creates a new field definition without explicit static value.
    #[must_use]
    pub fn new(field: FieldRef, access: AccessFlags) -> Self {
        Self {
            field,
            access,
            static_value: None,
        }
    }

    /// Sets the explicit static value.
    #[must_use]
    pub fn with_static_value(mut self, value: StaticValue) -> Self {
        self.static_value = Some(value);
        self
    }

    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    /// Returns `true` for enum constant fields.
    #[must_use]
    pub fn is_enum_constant(&self) -> bool {
        self.is_static() && self.access.contains(AccessFlags::ENUM)
    }
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramClass {
    /// The class type.
    pub ty: DexType,
    /// Program, classpath or library.
    pub kind: ClassKind,
    /// Access flags.
    pub access: AccessFlags,
    /// The superclass (`None` only for `java.lang.Object`).
    pub super_type: Option<DexType>,
    /// Directly implemented interfaces.
    pub interfaces: Vec<DexType>,
    /// Declared methods.
    pub methods: Vec<EncodedMethod>,
    /// Declared fields, static and instance.
    pub fields: Vec<EncodedField>,
}

impl ProgramClass {
    /// Creates an empty class definition.
    #[must_use]
    pub fn new(ty: DexType, kind: ClassKind, access: AccessFlags, super_type: Option<DexType>) -> Self {
        Self {
            ty,
            kind,
            access,
            super_type,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Returns `true` for program classes.
    #[must_use]
    pub fn is_program(&self) -> bool {
        self.kind == ClassKind::Program
    }

    /// Returns `true` for library classes.
    #[must_use]
    pub fn is_library(&self) -> bool {
        self.kind == ClassKind::Library
    }

    /// Returns `true` for classpath classes.
    #[must_use]
    pub fn is_classpath(&self) -> bool {
        self.kind == ClassKind::Classpath
    }

    /// Returns `true` for enum classes.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.access.contains(AccessFlags::ENUM)
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    /// Iterates the directly dispatched methods.
    pub fn direct_methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.methods.iter().filter(|m| m.is_direct())
    }

    /// Iterates the virtually dispatched methods.
    pub fn virtual_methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.methods.iter().filter(|m| m.is_virtual())
    }

    /// Iterates the static fields.
    pub fn static_fields(&self) -> impl Iterator<Item = &EncodedField> {
        self.fields.iter().filter(|f| f.is_static())
    }

    /// Iterates the instance fields.
    pub fn instance_fields(&self) -> impl Iterator<Item = &EncodedField> {
        self.fields.iter().filter(|f| !f.is_static())
    }

    /// Finds a declared method with the same name and prototype as `method`.
    #[must_use]
    pub fn lookup_method(&self, method: &MethodRef) -> Option<&EncodedMethod> {
        self.methods
            .iter()
            .find(|m| m.method.matches_signature(method))
    }

    /// Finds a declared direct method with the same name and prototype as `method`.
    #[must_use]
    pub fn lookup_direct_method(&self, method: &MethodRef) -> Option<&EncodedMethod> {
        self.direct_methods()
            .find(|m| m.method.matches_signature(method))
    }

    /// Finds a declared field with the same name and type as `field`.
    #[must_use]
    pub fn lookup_field(&self, field: &FieldRef) -> Option<&EncodedField> {
        self.fields.iter().find(|f| f.field.matches_signature(field))
    }

    /// Returns the class initializer, if declared.
    #[must_use]
    pub fn class_initializer(&self) -> Option<&EncodedMethod> {
        self.methods.iter().find(|m| m.method.is_class_initializer())
    }

    /// Returns the enum constant fields in declaration order.
    ///
    /// The position of a constant in this list is its ordinal.
    #[must_use]
    pub fn enum_constants(&self) -> Vec<&EncodedField> {
        self.fields
            .iter()
            .filter(|f| f.is_enum_constant() && f.field.ty == self.ty)
            .collect()
    }

    /// Returns the ordinal of an enum constant of this class.
    #[must_use]
    pub fn ordinal_of(&self, field: &FieldRef) -> Option<usize> {
        self.enum_constants()
            .iter()
            .position(|f| f.field.matches_signature(field))
    }

    /// Returns `true` if `method` is the synthesized `values()` method of this enum.
    #[must_use]
    pub fn is_values_method(&self, method: &MethodRef) -> bool {
        self.is_enum()
            && method.holder == self.ty
            && &*method.name == "values"
            && method.proto.params.is_empty()
            && method.proto.return_type == self.ty.to_array(1)
    }

    /// Returns `true` if `method` is the synthesized `valueOf(String)` method of this enum.
    #[must_use]
    pub fn is_value_of_method(&self, method: &MethodRef) -> bool {
        self.is_enum()
            && method.holder == self.ty
            && &*method.name == "valueOf"
            && method.proto.params == [DexType::string()]
            && method.proto.return_type == self.ty
    }

    /// Returns the signature of the `<init>(String, int)` constructor every enum declares.
    #[must_use]
    pub fn enum_constructor_signature(&self) -> MethodRef {
        MethodRef::new(
            self.ty.clone(),
            crate::graph::INSTANCE_INITIALIZER,
            Proto::new(DexType::void(), vec![DexType::string(), DexType::int()]),
        )
    }
}

/// Result of a successful method resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod<'a> {
    /// The class declaring the resolved definition.
    pub holder: &'a ProgramClass,
    /// The resolved definition.
    pub definition: &'a EncodedMethod,
}

/// Result of a successful field resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField<'a> {
    /// The class declaring the resolved definition.
    pub holder: &'a ProgramClass,
    /// The resolved definition.
    pub definition: &'a EncodedField,
}

/// Immutable snapshot of all classes visible to the compiler.
#[derive(Debug, Clone, Default)]
pub struct Application {
    classes: BTreeMap<DexType, Arc<ProgramClass>>,
}

impl Application {
    /// Creates an empty application.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an application seeded with the modeled `java.lang` library classes.
    #[must_use]
    pub fn with_java_lang() -> Self {
        let mut app = Self::new();
        for class in java_lang_classes() {
            app.add_class(class);
        }
        app
    }

    /// Adds or replaces a class definition.
    pub fn add_class(&mut self, class: ProgramClass) {
        self.classes.insert(class.ty.clone(), Arc::new(class));
    }

    /// Returns a new snapshot with `classes` replacing definitions by type.
    #[must_use]
    pub fn rewritten_with(&self, classes: Vec<ProgramClass>) -> Application {
        let mut next = self.clone();
        for class in classes {
            next.add_class(class);
        }
        next
    }

    /// Returns a new snapshot without the given classes.
    #[must_use]
    pub fn without_classes(&self, removed: &BTreeSet<DexType>) -> Application {
        Application {
            classes: self
                .classes
                .iter()
                .filter(|(ty, _)| !removed.contains(*ty))
                .map(|(ty, class)| (ty.clone(), class.clone()))
                .collect(),
        }
    }

    /// Returns the definition of a type, if visible.
    ///
    /// Array and primitive types have no definition.
    #[must_use]
    pub fn definition_for(&self, ty: &DexType) -> Option<&ProgramClass> {
        self.classes.get(ty).map(AsRef::as_ref)
    }

    /// Returns the definition of a type if it is a program class.
    #[must_use]
    pub fn program_definition_for(&self, ty: &DexType) -> Option<&ProgramClass> {
        self.definition_for(ty).filter(|c| c.is_program())
    }

    /// Iterates all class definitions in descriptor order.
    pub fn classes(&self) -> impl Iterator<Item = &ProgramClass> {
        self.classes.values().map(AsRef::as_ref)
    }

    /// Iterates the program classes in descriptor order.
    pub fn program_classes(&self) -> impl Iterator<Item = &ProgramClass> {
        self.classes().filter(|c| c.is_program())
    }

    /// Returns the number of class definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if the application defines no classes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterates the superclass chain of `ty`, starting with `ty` itself.
    pub fn superclass_chain<'a>(&'a self, ty: &DexType) -> impl Iterator<Item = &'a ProgramClass> + 'a {
        let mut next = self.definition_for(ty);
        std::iter::from_fn(move || {
            let current = next?;
            next = current
                .super_type
                .as_ref()
                .and_then(|s| self.definition_for(s));
            Some(current)
        })
    }

    /// Returns `true` if `sub` is `sup` or a (transitive) subtype of it.
    ///
    /// Interfaces are followed. Every reference type is a subtype of `java.lang.Object`.
    #[must_use]
    pub fn is_subtype(&self, sub: &DexType, sup: &DexType) -> bool {
        if sub == sup || (sub.is_reference() && *sup == DexType::object()) {
            return true;
        }
        if sub.is_array() || sup.is_array() {
            return match (sub.element_type(), sup.element_type()) {
                (Some(a), Some(b)) if a.is_reference() && b.is_reference() => self.is_subtype(&a, &b),
                _ => false,
            };
        }
        let mut seen = HashSet::new();
        let mut worklist = vec![sub.clone()];
        while let Some(current) = worklist.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if current == *sup {
                return true;
            }
            if let Some(class) = self.definition_for(&current) {
                worklist.extend(class.super_type.iter().cloned());
                worklist.extend(class.interfaces.iter().cloned());
            }
        }
        false
    }

    /// Returns `true` if `sub` is a subtype of `sup` and differs from it.
    #[must_use]
    pub fn is_strict_subtype(&self, sub: &DexType, sup: &DexType) -> bool {
        sub != sup && self.is_subtype(sub, sup)
    }

    /// Returns `true` if any class in the application directly extends or implements `ty`.
    #[must_use]
    pub fn has_subtypes(&self, ty: &DexType) -> bool {
        self.classes().any(|c| {
            c.super_type.as_ref() == Some(ty) || c.interfaces.iter().any(|i| i == ty)
        })
    }

    /// Resolves a method reference.
    ///
    /// Walks the superclass chain from the holder, then searches implemented interfaces
    /// for a default or abstract declaration.
    #[must_use]
    pub fn resolve_method(&self, method: &MethodRef) -> Option<ResolvedMethod<'_>> {
        for class in self.superclass_chain(&method.holder) {
            if let Some(definition) = class.lookup_method(method) {
                return Some(ResolvedMethod {
                    holder: class,
                    definition,
                });
            }
        }
        let mut seen = HashSet::new();
        let mut worklist: Vec<DexType> = self
            .superclass_chain(&method.holder)
            .flat_map(|c| c.interfaces.iter().cloned())
            .collect();
        while let Some(interface) = worklist.pop() {
            if !seen.insert(interface.clone()) {
                continue;
            }
            if let Some(class) = self.definition_for(&interface) {
                if let Some(definition) = class.lookup_method(method) {
                    return Some(ResolvedMethod {
                        holder: class,
                        definition,
                    });
                }
                worklist.extend(class.interfaces.iter().cloned());
            }
        }
        None
    }

    /// Resolves a field reference by walking the superclass chain from its holder.
    #[must_use]
    pub fn resolve_field(&self, field: &FieldRef) -> Option<ResolvedField<'_>> {
        self.superclass_chain(&field.holder).find_map(|class| {
            class.lookup_field(field).map(|definition| ResolvedField {
                holder: class,
                definition,
            })
        })
    }

    /// Returns the single definition an invoke can dispatch to, if statically known.
    ///
    /// Static, direct and super calls reach their resolution target. Virtual and interface
    /// calls reach it only when no program subtype of the holder overrides the method.
    ///
    /// # Arguments
    ///
    /// * `method` - The invoked method reference
    /// * `kind` - The invoke kind of the call
    #[must_use]
    pub fn lookup_single_target(&self, method: &MethodRef, kind: InvokeKind) -> Option<ResolvedMethod<'_>> {
        let resolved = self.resolve_method(method)?;
        match kind {
            InvokeKind::Static => resolved.definition.is_static().then_some(resolved),
            InvokeKind::Direct | InvokeKind::Super => {
                (!resolved.definition.is_static()).then_some(resolved)
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                if resolved.definition.is_static() {
                    return None;
                }
                let overridden = self.program_classes().any(|c| {
                    c.ty != resolved.holder.ty
                        && self.is_strict_subtype(&c.ty, &method.holder)
                        && c.virtual_methods().any(|m| m.method.matches_signature(method))
                });
                (!overridden).then_some(resolved)
            }
            InvokeKind::Polymorphic => None,
        }
    }
}

/// Returns the modeled `java.lang` library classes: `Object`, `String`, `Throwable`
/// and the `Enum` surface used by enum unboxing.
#[must_use]
pub fn java_lang_classes() -> Vec<ProgramClass> {
    let object = DexType::object();
    let enum_type = DexType::java_lang_enum();
    let public = AccessFlags::PUBLIC;
    let method = |holder: &DexType, name: &str, ret: DexType, params: Vec<DexType>, access: AccessFlags| {
        EncodedMethod::new(MethodRef::new(holder.clone(), name, Proto::new(ret, params)), access)
    };

    let mut object_class = ProgramClass::new(object.clone(), ClassKind::Library, public, None);
    object_class.methods = vec![
        method(&object, "<init>", DexType::void(), vec![], public | AccessFlags::CONSTRUCTOR),
        method(&object, "hashCode", DexType::int(), vec![], public),
        method(&object, "equals", DexType::new("Z"), vec![object.clone()], public),
        method(&object, "toString", DexType::string(), vec![], public),
        method(&object, "getClass", DexType::new("Ljava/lang/Class;"), vec![], public | AccessFlags::FINAL),
    ];

    let string_class = ProgramClass::new(
        DexType::string(),
        ClassKind::Library,
        public | AccessFlags::FINAL,
        Some(object.clone()),
    );

    let mut throwable_class =
        ProgramClass::new(DexType::throwable(), ClassKind::Library, public, Some(object.clone()));
    throwable_class.methods = vec![method(
        &DexType::throwable(),
        "<init>",
        DexType::void(),
        vec![],
        public | AccessFlags::CONSTRUCTOR,
    )];

    let mut enum_class = ProgramClass::new(
        enum_type.clone(),
        ClassKind::Library,
        public | AccessFlags::ABSTRACT,
        Some(object.clone()),
    );
    enum_class.methods = vec![
        method(
            &enum_type,
            "<init>",
            DexType::void(),
            vec![DexType::string(), DexType::int()],
            AccessFlags::PROTECTED | AccessFlags::CONSTRUCTOR,
        ),
        method(&enum_type, "ordinal", DexType::int(), vec![], public | AccessFlags::FINAL),
        method(&enum_type, "name", DexType::string(), vec![], public | AccessFlags::FINAL),
        method(&enum_type, "toString", DexType::string(), vec![], public),
        method(&enum_type, "compareTo", DexType::int(), vec![enum_type.clone()], public | AccessFlags::FINAL),
        method(&enum_type, "hashCode", DexType::int(), vec![], public | AccessFlags::FINAL),
        method(&enum_type, "equals", DexType::new("Z"), vec![object.clone()], public | AccessFlags::FINAL),
    ];

    vec![object_class, string_class, throwable_class, enum_class]
}

/// The library `Enum` methods the enum unboxing analysis distinguishes.
pub mod enum_methods {
    use crate::graph::{DexType, MethodRef, Proto};

    /// `java.lang.Enum.ordinal()I`
    #[must_use]
    pub fn ordinal() -> MethodRef {
        MethodRef::new(DexType::java_lang_enum(), "ordinal", Proto::new(DexType::int(), vec![]))
    }

    /// `java.lang.Enum.name()Ljava/lang/String;`
    #[must_use]
    pub fn name() -> MethodRef {
        MethodRef::new(DexType::java_lang_enum(), "name", Proto::new(DexType::string(), vec![]))
    }

    /// `java.lang.Enum.toString()Ljava/lang/String;`
    #[must_use]
    pub fn to_string() -> MethodRef {
        MethodRef::new(DexType::java_lang_enum(), "toString", Proto::new(DexType::string(), vec![]))
    }

    /// `java.lang.Enum.compareTo(Ljava/lang/Enum;)I`
    #[must_use]
    pub fn compare_to() -> MethodRef {
        MethodRef::new(
            DexType::java_lang_enum(),
            "compareTo",
            Proto::new(DexType::int(), vec![DexType::java_lang_enum()]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with_hierarchy() -> Application {
        let mut app = Application::with_java_lang();
        let base = DexType::class("Base");
        let sub = DexType::class("Sub");
        let mut base_class = ProgramClass::new(base.clone(), ClassKind::Program, AccessFlags::PUBLIC, Some(DexType::object()));
        base_class.methods.push(EncodedMethod::new(
            MethodRef::new(base.clone(), "run", Proto::new(DexType::void(), vec![])),
            AccessFlags::PUBLIC,
        ));
        base_class.fields.push(EncodedField::new(
            FieldRef::new(base.clone(), "count", DexType::int()),
            AccessFlags::PUBLIC,
        ));
        let mut sub_class = ProgramClass::new(sub.clone(), ClassKind::Program, AccessFlags::PUBLIC, Some(base));
        sub_class.methods.push(EncodedMethod::new(
            MethodRef::new(sub, "run", Proto::new(DexType::void(), vec![])),
            AccessFlags::PUBLIC,
        ));
        app.add_class(base_class);
        app.add_class(sub_class);
        app
    }

    #[test]
    fn test_subtyping() {
        let app = app_with_hierarchy();
        let base = DexType::class("Base");
        let sub = DexType::class("Sub");
        assert!(app.is_subtype(&sub, &base));
        assert!(app.is_strict_subtype(&sub, &DexType::object()));
        assert!(!app.is_subtype(&base, &sub));
        assert!(app.is_subtype(&sub.to_array(1), &base.to_array(1)));
        assert!(app.is_subtype(&sub.to_array(1), &DexType::object()));
        assert!(app.has_subtypes(&base));
        assert!(!app.has_subtypes(&sub));
    }

    #[test]
    fn test_resolution_walks_superclasses() {
        let app = app_with_hierarchy();
        let field = FieldRef::new(DexType::class("Sub"), "count", DexType::int());
        let resolved = app.resolve_field(&field).map(|r| r.holder.ty.clone());
        assert_eq!(resolved, Some(DexType::class("Base")));

        let ordinal = enum_methods::ordinal().with_holder(DexType::class("Sub"));
        assert!(app.resolve_method(&ordinal).is_none());
    }

    #[test]
    fn test_single_target_respects_overrides() {
        let app = app_with_hierarchy();
        let on_base = MethodRef::new(DexType::class("Base"), "run", Proto::new(DexType::void(), vec![]));
        assert!(app.lookup_single_target(&on_base, InvokeKind::Virtual).is_none());
        let on_sub = on_base.with_holder(DexType::class("Sub"));
        let target = app.lookup_single_target(&on_sub, InvokeKind::Virtual);
        assert_eq!(target.map(|t| t.holder.ty.clone()), Some(DexType::class("Sub")));
        assert!(app.lookup_single_target(&on_sub, InvokeKind::Static).is_none());
    }

    #[test]
    fn test_without_classes() {
        let app = app_with_hierarchy();
        let removed: BTreeSet<_> = [DexType::class("Sub")].into_iter().collect();
        let pruned = app.without_classes(&removed);
        assert!(pruned.definition_for(&DexType::class("Sub")).is_none());
        assert!(pruned.definition_for(&DexType::class("Base")).is_some());
        assert_eq!(pruned.len() + 1, app.len());
    }
}
