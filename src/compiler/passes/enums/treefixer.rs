//! Program-wide signature rewrite for unboxed enums.
//!
//! The tree fixer walks every program class and substitutes `int` for each unboxed
//! enum in method prototypes and field types, including the base type of arrays. Each
//! changed member is recorded in a [`LensBuilder`] of kind
//! [`LensKind::EnumUnboxing`]; `move_method` derives the prototype change from the old
//! and new signatures.
//!
//! A rewritten signature that clashes with an existing method gets [`COLLISION_SUFFIX`]
//! in its name. For virtual methods the name is chosen once per original signature
//! over all classes, so an override and the method it overrides are renamed alike.
//!
//! The unboxed enums themselves are not rewritten. Their methods get a body that
//! throws, since nothing can legitimately run them once their type is gone, and the
//! classes are pruned after reprocessing.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::{
    analysis::IrCode,
    compiler::{EventKind, EventLog},
    graph::{
        Application, DexType, EncodedField, GraphLens, LensBuilder, LensKind, MethodRef,
        ProgramClass, Proto, StaticValue,
    },
    Result,
};

/// Suffix appended to a rewritten method name that would clash with an existing method.
pub const COLLISION_SUFFIX: &str = "$enumunboxing$";

/// Output of [`EnumUnboxingTreeFixer::fix`].
#[derive(Debug)]
pub struct TreeFixResult {
    /// The enum unboxing lens layer, `None` if no signature changed.
    pub lens: Option<GraphLens>,
    /// The rewritten definitions of every class whose declarations changed.
    pub classes: Vec<ProgramClass>,
    /// Throwing bodies for every method of the unboxed enums.
    pub stubs: Vec<IrCode>,
}

/// Rewrites declarations mentioning the unboxed enums.
pub struct EnumUnboxingTreeFixer<'a> {
    app: &'a Application,
    enums: &'a BTreeSet<DexType>,
    builder: LensBuilder,
    renamed: HashMap<MethodRef, MethodRef>,
}

/// Methods that must end up with the same new name.
///
/// Virtual methods sharing name and prototype form one group over the whole program;
/// every other method is a group of its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RenameGroup {
    holder: Option<DexType>,
    name: String,
    proto: Proto,
}

impl<'a> EnumUnboxingTreeFixer<'a> {
    /// Creates a tree fixer unboxing `enums`.
    #[must_use]
    pub fn new(app: &'a Application, enums: &'a BTreeSet<DexType>) -> Self {
        Self {
            app,
            enums,
            builder: LensBuilder::new(LensKind::EnumUnboxing),
            renamed: HashMap::new(),
        }
    }

    /// Returns `ty` with every unboxed enum replaced by `int`.
    #[must_use]
    pub fn substitute(&self, ty: &DexType) -> DexType {
        let base = ty.base_type();
        if !self.enums.contains(&base) {
            return ty.clone();
        }
        if ty.is_array() {
            ty.replace_base_type(&DexType::int())
        } else {
            DexType::int()
        }
    }

    /// Rewrites all program classes and builds the lens layer on top of `previous`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for an explicit static value other than `null`
    /// on a field whose type is unboxed, and [`crate::Error::LensConflict`] if a
    /// rewritten method already carries a prototype change from an earlier layer.
    pub fn fix(mut self, previous: &GraphLens, events: &EventLog) -> Result<TreeFixResult> {
        let mut classes = Vec::new();
        let mut stubs = Vec::new();
        let app = self.app;
        self.renamed = self.plan_method_names();
        for class in app.program_classes() {
            if self.enums.contains(&class.ty) {
                for method in &class.methods {
                    stubs.push(IrCode::throwing(method.method.clone(), method.is_static())?);
                    events
                        .record(EventKind::MethodStubbed)
                        .method(&method.method)
                        .message(format!("{} is unboxed", class.ty));
                }
                continue;
            }
            if let Some(fixed) = self.fix_class(class)? {
                classes.push(fixed);
            }
        }
        for ty in self.enums {
            self.builder.map_type(ty.clone(), DexType::int());
        }
        let lens = self.builder.build(previous)?;
        Ok(TreeFixResult { lens, classes, stubs })
    }

    /// Picks the new signature of every method whose prototype changes.
    fn plan_method_names(&self) -> HashMap<MethodRef, MethodRef> {
        let classes: Vec<&ProgramClass> = self
            .app
            .program_classes()
            .filter(|class| !self.enums.contains(&class.ty))
            .collect();
        let mut taken: HashMap<DexType, HashSet<MethodRef>> = classes
            .iter()
            .map(|class| (class.ty.clone(), class.methods.iter().map(|m| m.method.clone()).collect()))
            .collect();

        let mut groups: BTreeMap<RenameGroup, Vec<MethodRef>> = BTreeMap::new();
        for class in &classes {
            for encoded in &class.methods {
                let method = &encoded.method;
                if method.proto.map_types(|t| self.substitute(t)) == method.proto {
                    continue;
                }
                let group = RenameGroup {
                    holder: (!encoded.is_virtual()).then(|| class.ty.clone()),
                    name: method.name.to_string(),
                    proto: method.proto.clone(),
                };
                groups.entry(group).or_default().push(method.clone());
            }
        }

        let mut renamed = HashMap::new();
        for (group, members) in groups {
            let proto = group.proto.map_types(|t| self.substitute(t));
            let is_free = |name: &str, taken: &HashMap<DexType, HashSet<MethodRef>>| {
                members.iter().all(|m| {
                    let fixed = MethodRef::new(m.holder.clone(), name, proto.clone());
                    !taken.get(&m.holder).is_some_and(|methods| methods.contains(&fixed))
                })
            };
            let mut name = group.name.clone();
            let mut attempt = 0_usize;
            while !is_free(&name, &taken) {
                name = if attempt == 0 {
                    format!("{}{}", group.name, COLLISION_SUFFIX)
                } else {
                    format!("{}{}{}", group.name, COLLISION_SUFFIX, attempt)
                };
                attempt += 1;
            }
            for member in members {
                let fixed = MethodRef::new(member.holder.clone(), &name, proto.clone());
                taken.entry(member.holder.clone()).or_default().insert(fixed.clone());
                renamed.insert(member, fixed);
            }
        }
        renamed
    }

    fn fix_class(&mut self, class: &ProgramClass) -> Result<Option<ProgramClass>> {
        let mut changed = false;
        let mut methods = Vec::with_capacity(class.methods.len());
        for encoded in &class.methods {
            let method = &encoded.method;
            let Some(fixed) = self.renamed.get(method).cloned() else {
                methods.push(encoded.clone());
                continue;
            };
            self.builder.move_method(method.clone(), fixed.clone(), encoded.is_static());
            methods.push(encoded.to_type_substituted(fixed));
            changed = true;
        }

        let mut fields = Vec::with_capacity(class.fields.len());
        for encoded in &class.fields {
            let ty = self.substitute(&encoded.field.ty);
            if ty == encoded.field.ty {
                fields.push(encoded.clone());
                continue;
            }
            let field = encoded.field.with_type(ty);
            let static_value = match &encoded.static_value {
                None => None,
                Some(StaticValue::Null) if field.ty.is_primitive() => Some(StaticValue::INT_DEFAULT),
                Some(StaticValue::Null) => Some(StaticValue::Null),
                Some(other) => {
                    return Err(internal_error!(
                        "Unexpected static value {:?} for {} of unboxed type",
                        other,
                        encoded.field
                    ));
                }
            };
            self.builder.move_field(encoded.field.clone(), field.clone());
            fields.push(EncodedField {
                field,
                access: encoded.access,
                static_value,
            });
            changed = true;
        }

        if !changed {
            return Ok(None);
        }
        let mut fixed = class.clone();
        fixed.methods = methods;
        fixed.fields = fields;
        Ok(Some(fixed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{AccessFlags, ArgumentInfo, ClassKind, EncodedMethod, FieldRef, Proto},
        test::{enum_class, program_with},
    };

    fn color() -> DexType {
        DexType::class("Color")
    }

    fn main_class() -> ProgramClass {
        let main = DexType::class("Main");
        let mut class = ProgramClass::new(main.clone(), ClassKind::Program, AccessFlags::PUBLIC, Some(DexType::object()));
        let static_method = |name: &str, proto: Proto| {
            EncodedMethod::new(MethodRef::new(main.clone(), name, proto), AccessFlags::STATIC)
        };
        class.methods = vec![
            static_method("paint", Proto::new(DexType::void(), vec![color()])),
            static_method("paint", Proto::new(DexType::void(), vec![DexType::int()])),
            static_method("all", Proto::new(color().to_array(1), vec![])),
        ];
        class.fields = vec![EncodedField::new(FieldRef::new(main, "last", color()), AccessFlags::STATIC)
            .with_static_value(StaticValue::Null)];
        class
    }

    #[test]
    fn test_signatures_are_rewritten() -> Result<()> {
        let app = program_with(vec![enum_class("Color", &["RED", "GREEN"]), main_class()]);
        let enums = BTreeSet::from([color()]);
        let events = EventLog::new();
        let result = EnumUnboxingTreeFixer::new(&app, &enums).fix(&GraphLens::identity(), &events)?;

        let Some(lens) = result.lens else {
            panic!("expected a lens");
        };
        assert_eq!(lens.lookup_type(&color()), DexType::int());
        assert_eq!(lens.lookup_type(&color().to_array(2)), DexType::int().to_array(2));

        let main = DexType::class("Main");
        let paint = MethodRef::new(main.clone(), "paint", Proto::new(DexType::void(), vec![color()]));
        let moved = lens.lookup_method_signature(&paint);
        assert_eq!(&*moved.name, "paint$enumunboxing$");
        assert_eq!(moved.proto.params, vec![DexType::int()]);
        let changes = lens.lookup_prototype_changes(&moved);
        assert!(matches!(changes.arguments.get(0), Some(ArgumentInfo::RewrittenType(info)) if info.new_type == DexType::int()));

        let fixed = &result.classes[0];
        assert_eq!(fixed.fields[0].field.ty, DexType::int());
        assert_eq!(fixed.fields[0].static_value, Some(StaticValue::INT_DEFAULT));
        assert_eq!(result.stubs.len(), 4);
        assert_eq!(events.count(EventKind::MethodStubbed), 4);
        Ok(())
    }

    #[test]
    fn test_unexpected_static_value_is_internal_error() {
        let mut main = main_class();
        main.fields[0] = main.fields[0].clone().with_static_value(StaticValue::Int(3));
        let app = program_with(vec![enum_class("Color", &["RED"]), main]);
        let enums = BTreeSet::from([color()]);
        let result = EnumUnboxingTreeFixer::new(&app, &enums).fix(&GraphLens::identity(), &EventLog::new());
        assert!(matches!(result, Err(crate::Error::Internal { .. })));
    }
    #[test]
    fn test_override_is_renamed_with_overridden_method() -> Result<()> {
        let parent = DexType::class("Shape");
        let child = DexType::class("Circle");
        let draw = |holder: &DexType, param: DexType| {
            EncodedMethod::new(
                MethodRef::new(holder.clone(), "draw", Proto::new(DexType::void(), vec![param])),
                AccessFlags::PUBLIC,
            )
        };
        let mut shape = ProgramClass::new(parent.clone(), ClassKind::Program, AccessFlags::PUBLIC, Some(DexType::object()));
        shape.methods = vec![draw(&parent, color()), draw(&parent, DexType::int())];
        let mut circle = ProgramClass::new(child.clone(), ClassKind::Program, AccessFlags::PUBLIC, Some(parent.clone()));
        circle.methods = vec![draw(&child, color())];
        let app = program_with(vec![enum_class("Color", &["RED"]), shape, circle]);
        let enums = BTreeSet::from([color()]);
        let result = EnumUnboxingTreeFixer::new(&app, &enums).fix(&GraphLens::identity(), &EventLog::new())?;

        let Some(lens) = result.lens else {
            panic!("expected a lens");
        };
        let renamed = |holder: &DexType| {
            lens.lookup_method_signature(&MethodRef::new(holder.clone(), "draw", Proto::new(DexType::void(), vec![color()])))
        };
        let (in_parent, in_child) = (renamed(&parent), renamed(&child));
        assert_eq!(&*in_parent.name, "draw$enumunboxing$");
        assert_eq!(in_child.name, in_parent.name);
        assert_eq!(in_child.proto, in_parent.proto);
        assert_eq!(in_child.proto.params, vec![DexType::int()]);
        Ok(())
    }
}
