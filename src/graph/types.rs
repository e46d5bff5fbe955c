//! Descriptor based type references.
//!
//! Types are identified by their JVM descriptor (`I`, `Ljava/lang/Object;`, `[[LColor;`).
//! A [`DexType`] is a cheap, clonable handle around a shared descriptor string; two handles
//! are equal when their descriptors are equal, so types can be used directly as map keys.
//!
//! # Array Types
//!
//! Array types carry their element type in the descriptor. The *base type* of an array is
//! the innermost non-array element (`[[LColor;` has base type `LColor;` and nesting 2).
//! Unboxing an enum substitutes the base type of every array over that enum, so
//! [`DexType::replace_base_type`] preserves the nesting depth.

use std::{fmt, sync::Arc};

use strum::{EnumCount, EnumIter};

/// The primitive JVM types, including `void`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
pub enum PrimitiveType {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `V`
    Void,
}

impl PrimitiveType {
    /// Parses a single-character primitive descriptor.
    #[must_use]
    pub fn from_descriptor_char(c: char) -> Option<Self> {
        Some(match c {
            'Z' => Self::Boolean,
            'B' => Self::Byte,
            'C' => Self::Char,
            'S' => Self::Short,
            'I' => Self::Int,
            'J' => Self::Long,
            'F' => Self::Float,
            'D' => Self::Double,
            'V' => Self::Void,
            _ => return None,
        })
    }

    /// Returns the descriptor character of this primitive.
    #[must_use]
    pub const fn descriptor(self) -> &'static str {
        match self {
            Self::Boolean => "Z",
            Self::Byte => "B",
            Self::Char => "C",
            Self::Short => "S",
            Self::Int => "I",
            Self::Long => "J",
            Self::Float => "F",
            Self::Double => "D",
            Self::Void => "V",
        }
    }

    /// Returns the Java source name of this primitive.
    #[must_use]
    pub const fn source_name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Void => "void",
        }
    }

    /// Returns the register category this primitive occupies.
    #[must_use]
    pub const fn value_category(self) -> ValueCategory {
        match self {
            Self::Long => ValueCategory::Long,
            Self::Float => ValueCategory::Float,
            Self::Double => ValueCategory::Double,
            Self::Void => ValueCategory::Void,
            _ => ValueCategory::Int,
        }
    }
}

/// Register category of a value.
///
/// Sub-word integral types (`boolean`, `byte`, `char`, `short`) share the `Int` category.
/// Two types whose default values are materialized by the same constant instruction have
/// the same category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    /// 32-bit integral values.
    Int,
    /// 64-bit integral values.
    Long,
    /// 32-bit floating point values.
    Float,
    /// 64-bit floating point values.
    Double,
    /// Object and array references.
    Object,
    /// No value.
    Void,
}

/// A type reference identified by its JVM descriptor.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexType(Arc<str>);

impl DexType {
    /// Creates a type from its descriptor.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - A JVM field descriptor such as `I` or `Ljava/lang/String;`
    #[must_use]
    pub fn new(descriptor: &str) -> Self {
        Self(Arc::from(descriptor))
    }

    /// Creates a class type from its internal binary name (`java/lang/Object`).
    #[must_use]
    pub fn class(binary_name: &str) -> Self {
        Self(Arc::from(format!("L{binary_name};")))
    }

    /// Creates the type of a primitive.
    #[must_use]
    pub fn primitive(primitive: PrimitiveType) -> Self {
        Self::new(primitive.descriptor())
    }

    /// The `int` type.
    #[must_use]
    pub fn int() -> Self {
        Self::primitive(PrimitiveType::Int)
    }

    /// The `void` type.
    #[must_use]
    pub fn void() -> Self {
        Self::primitive(PrimitiveType::Void)
    }

    /// `java.lang.Object`.
    #[must_use]
    pub fn object() -> Self {
        Self::new("Ljava/lang/Object;")
    }

    /// `java.lang.String`.
    #[must_use]
    pub fn string() -> Self {
        Self::new("Ljava/lang/String;")
    }

    /// `java.lang.Enum`.
    #[must_use]
    pub fn java_lang_enum() -> Self {
        Self::new("Ljava/lang/Enum;")
    }

    /// `java.lang.Throwable`.
    #[must_use]
    pub fn throwable() -> Self {
        Self::new("Ljava/lang/Throwable;")
    }

    /// Returns the descriptor string.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.0
    }

    /// Returns the primitive kind if this is a primitive type.
    #[must_use]
    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        let mut chars = self.0.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => PrimitiveType::from_descriptor_char(c),
            _ => None,
        }
    }

    /// Returns `true` for primitive types other than `void`.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.as_primitive()
            .is_some_and(|p| p != PrimitiveType::Void)
    }

    /// Returns `true` for `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.as_primitive() == Some(PrimitiveType::Void)
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    /// Returns `true` for class (and interface) types.
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.0.starts_with('L')
    }

    /// Returns `true` for class and array types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.is_class() || self.is_array()
    }

    /// Returns the number of array dimensions (0 for non-arrays).
    #[must_use]
    pub fn nesting(&self) -> usize {
        self.0.bytes().take_while(|b| *b == b'[').count()
    }

    /// Returns the innermost element type of an array, or `self` for non-arrays.
    #[must_use]
    pub fn base_type(&self) -> DexType {
        let nesting = self.nesting();
        if nesting == 0 {
            self.clone()
        } else {
            Self::new(&self.0[nesting..])
        }
    }

    /// Returns the element type of an array (one dimension removed).
    #[must_use]
    pub fn element_type(&self) -> Option<DexType> {
        self.0.strip_prefix('[').map(Self::new)
    }

    /// Returns the array type with `dimensions` over this type.
    #[must_use]
    pub fn to_array(&self, dimensions: usize) -> DexType {
        let mut descriptor = "[".repeat(dimensions);
        descriptor.push_str(&self.0);
        Self(Arc::from(descriptor))
    }

    /// Replaces the base type of an array, preserving its nesting.
    ///
    /// For non-array types this returns `new_base`.
    #[must_use]
    pub fn replace_base_type(&self, new_base: &DexType) -> DexType {
        new_base.to_array(self.nesting())
    }

    /// Returns the register category of values of this type.
    #[must_use]
    pub fn value_category(&self) -> ValueCategory {
        match self.as_primitive() {
            Some(p) => p.value_category(),
            None => ValueCategory::Object,
        }
    }

    /// Returns the Java source name (`java.lang.Object`, `int[]`).
    #[must_use]
    pub fn source_name(&self) -> String {
        let nesting = self.nesting();
        let base = &self.0[nesting..];
        let mut name = if let Some(binary) = base
            .strip_prefix('L')
            .and_then(|b| b.strip_suffix(';'))
        {
            binary.replace('/', ".")
        } else if let Some(p) = base.chars().next().and_then(PrimitiveType::from_descriptor_char) {
            p.source_name().to_string()
        } else {
            base.to_string()
        };
        for _ in 0..nesting {
            name.push_str("[]");
        }
        name
    }

    /// Returns the simple name of a class type (`Color` for `Lcom/example/Color;`).
    #[must_use]
    pub fn simple_name(&self) -> String {
        let source = self.source_name();
        match source.rsplit_once('.') {
            Some((_, simple)) => simple.to_string(),
            None => source,
        }
    }
}

impl fmt::Debug for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PrimitiveType> for DexType {
    fn from(primitive: PrimitiveType) -> Self {
        Self::primitive(primitive)
    }
}
