//! Program entities and the composable graph lens chain.
//!
//! This module holds everything the compiler knows about the program *outside* of
//! method bodies:
//!
//! - [`types`] - Descriptor based [`DexType`] references and primitive categories
//! - [`members`] - [`MethodRef`], [`FieldRef`], [`Proto`] and [`InvokeKind`]
//! - [`program`] - Class definitions and the immutable [`Application`] snapshot
//! - [`lens`] - The [`GraphLens`] chain and its [`LensBuilder`]
//! - [`prototype`] - [`RewrittenPrototypeDescription`] and its argument infos
//! - [`merging`] - The [`VerticallyMergedClasses`] record
//!
//! # Usage
//!
//! ```rust,ignore
//! use bytelens::graph::{DexType, GraphLens, LensBuilder, LensKind};
//!
//! let mut builder = LensBuilder::new(LensKind::EnumUnboxing);
//! builder.map_type(DexType::class("Color"), DexType::int());
//! let lens = builder.build(&GraphLens::identity())?.unwrap_or_default();
//! assert_eq!(lens.lookup_type(&DexType::class("Color")), DexType::int());
//! ```

pub mod lens;
pub mod members;
pub mod merging;
pub mod program;
pub mod prototype;
pub mod types;

pub use lens::{GraphLens, LensBuilder, LensKind, MethodLookupResult};
pub use members::{FieldRef, InvokeKind, MethodRef, Proto, CLASS_INITIALIZER, INSTANCE_INITIALIZER};
pub use merging::VerticallyMergedClasses;
pub use program::{
    enum_methods, java_lang_classes, AccessFlags, Application, ClassKind, EncodedField,
    EncodedMethod, ProgramClass, ResolvedField, ResolvedMethod, StaticValue,
};
pub use prototype::{
    default_value_has_changed, ArgumentInfo, ArgumentInfoCollection, ConstantReturn,
    ReturnChange, RewrittenPrototypeDescription, RewrittenTypeInfo,
};
pub use types::{DexType, PrimitiveType, ValueCategory};
