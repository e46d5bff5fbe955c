//! The type lattice of SSA values.
//!
//! ```text
//!                      Top
//!            ┌──────┬───┴─────────┐
//!         int  long ...     Reference(T, nullability)
//!            └──────┴──────┐      │
//!                          │    Null
//!                          └──┬───┘
//!                          Bottom
//! ```
//!
//! Reference types carry a [`Nullability`]. The join of two reference types is their
//! closest common superclass (arrays of references join element-wise, any other mix of
//! arrays joins to `java.lang.Object`). `Null` joins with any reference type to that
//! type with `Maybe` nullability. Primitives of the 32-bit integral category join to
//! `int`; any other mix of categories is `Top`.

use std::fmt;

use crate::graph::{Application, DexType, GraphLens, PrimitiveType};

/// Whether a reference value may be `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullability {
    /// The value is always `null`.
    DefinitelyNull,
    /// The value is never `null`.
    DefinitelyNotNull,
    /// The value may or may not be `null`.
    Maybe,
}

impl Nullability {
    /// Joins two nullabilities.
    #[must_use]
    pub fn join(self, other: Nullability) -> Nullability {
        if self == other {
            self
        } else {
            Nullability::Maybe
        }
    }
}

/// Element of the value type lattice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeElement {
    /// No information yet (the lattice bottom).
    Bottom,
    /// Conflicting information (the lattice top).
    Top,
    /// A primitive value.
    Primitive(PrimitiveType),
    /// The `null` constant.
    Null,
    /// A class or array reference.
    Reference {
        /// The static type.
        ty: DexType,
        /// Nullability of the value.
        nullability: Nullability,
    },
}

impl TypeElement {
    /// The `int` element.
    pub const INT: TypeElement = TypeElement::Primitive(PrimitiveType::Int);

    /// Creates the element for values declared with `ty`.
    ///
    /// `void` maps to `Bottom`.
    #[must_use]
    pub fn from_dex_type(ty: &DexType, nullability: Nullability) -> TypeElement {
        match ty.as_primitive() {
            Some(PrimitiveType::Void) => TypeElement::Bottom,
            Some(primitive) => TypeElement::Primitive(primitive),
            None => TypeElement::Reference {
                ty: ty.clone(),
                nullability,
            },
        }
    }

    /// Creates a maybe-null reference element (or a primitive element) for `ty`.
    #[must_use]
    pub fn of(ty: &DexType) -> TypeElement {
        Self::from_dex_type(ty, Nullability::Maybe)
    }

    /// Returns the element describing the default (zero) value of `ty`.
    #[must_use]
    pub fn default_value_of(ty: &DexType) -> TypeElement {
        if ty.is_primitive() {
            Self::of(ty)
        } else {
            TypeElement::Null
        }
    }

    /// Returns `true` for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, TypeElement::Null)
    }

    /// Returns `true` for primitive elements.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeElement::Primitive(_))
    }

    /// Returns `true` for `Null` and references.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeElement::Null | TypeElement::Reference { .. })
    }

    /// Returns the static type of a reference element.
    #[must_use]
    pub fn reference_type(&self) -> Option<&DexType> {
        match self {
            TypeElement::Reference { ty, .. } => Some(ty),
            _ => None,
        }
    }

    /// Returns the class type of a reference element or, for arrays, of its base type.
    #[must_use]
    pub fn class_or_base_type(&self) -> Option<DexType> {
        self.reference_type()
            .map(DexType::base_type)
            .filter(DexType::is_class)
    }

    /// Returns the nullability of the element.
    #[must_use]
    pub fn nullability(&self) -> Nullability {
        match self {
            TypeElement::Null => Nullability::DefinitelyNull,
            TypeElement::Reference { nullability, .. } => *nullability,
            _ => Nullability::DefinitelyNotNull,
        }
    }

    /// Returns the same element with `nullability` for references.
    #[must_use]
    pub fn with_nullability(&self, nullability: Nullability) -> TypeElement {
        match self {
            TypeElement::Reference { ty, .. } => TypeElement::Reference {
                ty: ty.clone(),
                nullability,
            },
            other => other.clone(),
        }
    }

    /// Returns `true` if both elements are equal ignoring nullability.
    #[must_use]
    pub fn equal_up_to_nullability(&self, other: &TypeElement) -> bool {
        match (self, other) {
            (TypeElement::Reference { ty: a, .. }, TypeElement::Reference { ty: b, .. }) => a == b,
            (a, b) => a == b,
        }
    }

    /// Returns the descriptor type the element represents, if it has one.
    #[must_use]
    pub fn to_dex_type(&self) -> Option<DexType> {
        match self {
            TypeElement::Primitive(p) => Some(DexType::primitive(*p)),
            TypeElement::Reference { ty, .. } => Some(ty.clone()),
            _ => None,
        }
    }

    /// Rewrites every class type referenced by this element through `lens`.
    ///
    /// A reference whose type maps to a primitive becomes that primitive.
    #[must_use]
    pub fn fixup_class_type_references(&self, lens: &GraphLens) -> TypeElement {
        match self {
            TypeElement::Reference { ty, nullability } => {
                let mapped = lens.lookup_type(ty);
                if mapped == *ty {
                    self.clone()
                } else {
                    TypeElement::from_dex_type(&mapped, *nullability)
                }
            }
            other => other.clone(),
        }
    }

    /// Joins two elements.
    ///
    /// # Arguments
    ///
    /// * `other` - The element to join with
    /// * `app` - Class hierarchy used to find common superclasses
    #[must_use]
    pub fn join(&self, other: &TypeElement, app: &Application) -> TypeElement {
        match (self, other) {
            (TypeElement::Bottom, x) | (x, TypeElement::Bottom) => x.clone(),
            (TypeElement::Top, _) | (_, TypeElement::Top) => TypeElement::Top,
            (TypeElement::Null, TypeElement::Null) => TypeElement::Null,
            (TypeElement::Null, r @ TypeElement::Reference { .. })
            | (r @ TypeElement::Reference { .. }, TypeElement::Null) => {
                r.with_nullability(r.nullability().join(Nullability::DefinitelyNull))
            }
            (TypeElement::Primitive(a), TypeElement::Primitive(b)) => {
                if a == b {
                    TypeElement::Primitive(*a)
                } else if a.value_category() == b.value_category()
                    && a.value_category() == crate::graph::ValueCategory::Int
                {
                    TypeElement::INT
                } else {
                    TypeElement::Top
                }
            }
            (
                TypeElement::Reference { ty: a, nullability: na },
                TypeElement::Reference { ty: b, nullability: nb },
            ) => TypeElement::Reference {
                ty: join_reference_types(a, b, app),
                nullability: na.join(*nb),
            },
            _ => TypeElement::Top,
        }
    }

    /// Returns `true` if a value of this element may flow into a slot declared as `ty`.
    #[must_use]
    pub fn is_assignable_to(&self, ty: &DexType, app: &Application) -> bool {
        match self {
            TypeElement::Bottom => true,
            TypeElement::Top => false,
            TypeElement::Null => ty.is_reference(),
            TypeElement::Primitive(p) => ty
                .as_primitive()
                .is_some_and(|q| q == *p || q.value_category() == p.value_category()),
            TypeElement::Reference { ty: own, .. } => app.is_subtype(own, ty),
        }
    }
}

fn join_reference_types(a: &DexType, b: &DexType, app: &Application) -> DexType {
    if a == b {
        return a.clone();
    }
    if app.is_subtype(a, b) {
        return b.clone();
    }
    if app.is_subtype(b, a) {
        return a.clone();
    }
    match (a.element_type(), b.element_type()) {
        (Some(ea), Some(eb)) if ea.is_reference() && eb.is_reference() => {
            return join_reference_types(&ea, &eb, app).to_array(1);
        }
        (Some(_), _) | (_, Some(_)) => return DexType::object(),
        _ => {}
    }
    for class in app.superclass_chain(a) {
        if app.is_subtype(b, &class.ty) {
            return class.ty.clone();
        }
    }
    DexType::object()
}

impl fmt::Display for TypeElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeElement::Bottom => write!(f, "BOTTOM"),
            TypeElement::Top => write!(f, "TOP"),
            TypeElement::Null => write!(f, "NULL"),
            TypeElement::Primitive(p) => write!(f, "{}", p.source_name()),
            TypeElement::Reference { ty, nullability } => match nullability {
                Nullability::DefinitelyNotNull => write!(f, "@NonNull {}", ty.source_name()),
                Nullability::DefinitelyNull => write!(f, "@Null {}", ty.source_name()),
                Nullability::Maybe => write!(f, "{}", ty.source_name()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AccessFlags, ClassKind, LensBuilder, LensKind, ProgramClass};

    fn app() -> Application {
        let mut app = Application::with_java_lang();
        for (name, sup) in [("Shape", "java/lang/Object"), ("Circle", "Shape"), ("Square", "Shape")] {
            app.add_class(ProgramClass::new(
                DexType::class(name),
                ClassKind::Program,
                AccessFlags::PUBLIC,
                Some(DexType::class(sup)),
            ));
        }
        app
    }

    fn reference(name: &str) -> TypeElement {
        TypeElement::of(&DexType::class(name))
    }

    #[test]
    fn test_join_finds_common_superclass() {
        let app = app();
        let joined = reference("Circle").join(&reference("Square"), &app);
        assert_eq!(joined.reference_type(), Some(&DexType::class("Shape")));

        let arrays = TypeElement::of(&DexType::class("Circle").to_array(1))
            .join(&TypeElement::of(&DexType::class("Square").to_array(1)), &app);
        assert_eq!(arrays.reference_type(), Some(&DexType::class("Shape").to_array(1)));
    }

    #[test]
    fn test_join_with_null_and_bottom() {
        let app = app();
        let not_null = TypeElement::from_dex_type(&DexType::class("Circle"), Nullability::DefinitelyNotNull);
        let joined = not_null.join(&TypeElement::Null, &app);
        assert_eq!(joined.nullability(), Nullability::Maybe);
        assert_eq!(TypeElement::Bottom.join(&TypeElement::INT, &app), TypeElement::INT);
        assert_eq!(TypeElement::INT.join(&TypeElement::Null, &app), TypeElement::Top);
    }

    #[test]
    fn test_integral_primitives_join_to_int() {
        let app = app();
        let boolean = TypeElement::Primitive(PrimitiveType::Boolean);
        assert_eq!(boolean.join(&TypeElement::INT, &app), TypeElement::INT);
        let long = TypeElement::Primitive(PrimitiveType::Long);
        assert_eq!(long.join(&TypeElement::INT, &app), TypeElement::Top);
    }

    #[test]
    fn test_fixup_maps_reference_to_primitive() -> crate::Result<()> {
        let mut builder = LensBuilder::new(LensKind::EnumUnboxing);
        builder.map_type(DexType::class("Color"), DexType::int());
        let lens = builder.build(&GraphLens::identity())?.expect("non-empty builder");

        assert_eq!(reference("Color").fixup_class_type_references(&lens), TypeElement::INT);
        let array = TypeElement::of(&DexType::class("Color").to_array(1));
        assert_eq!(
            array.fixup_class_type_references(&lens).reference_type(),
            Some(&DexType::int().to_array(1))
        );
        assert_eq!(TypeElement::Null.fixup_class_type_references(&lens), TypeElement::Null);
        Ok(())
    }

    #[test]
    fn test_class_or_base_type() {
        let matrix = TypeElement::of(&DexType::class("Color").to_array(2));
        assert_eq!(matrix.class_or_base_type(), Some(DexType::class("Color")));
        assert_eq!(TypeElement::of(&DexType::int().to_array(1)).class_or_base_type(), None);
    }
}
