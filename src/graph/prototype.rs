//! Descriptions of how a method's prototype differs from its declaration.
//!
//! A [`RewrittenPrototypeDescription`] is attached to a method by the lens layer that
//! changed its signature. Call sites consult it to adjust their in-values:
//!
//! | Change | Effect at call sites |
//! |--------|----------------------|
//! | [`ArgumentInfo::Removed`] | The in-value at that position is dropped |
//! | [`ArgumentInfo::RewrittenType`] | The in-value is kept; a default constant is re-materialized if its category changed |
//! | [`ReturnChange::Rewritten`] | The out-value is retyped |
//! | [`ReturnChange::ConstantVoid`] | The call returns `void`; a constant replaces the out-value |
//! | extra null parameter | A `null` constant is appended |
//!
//! Argument indices count in-values, so index 0 is the receiver of instance methods.

use std::{collections::BTreeMap, fmt};

use crate::graph::DexType;

/// A type rewrite of a single argument or of the return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RewrittenTypeInfo {
    /// The type before the rewrite.
    pub old_type: DexType,
    /// The type after the rewrite.
    pub new_type: DexType,
}

impl RewrittenTypeInfo {
    /// Creates a new type rewrite.
    #[must_use]
    pub fn new(old_type: DexType, new_type: DexType) -> Self {
        Self { old_type, new_type }
    }

    /// Returns `true` if the default value of the old type is materialized differently
    /// from the default value of the new type.
    ///
    /// All reference types share `null`; primitives of one register category share `0`.
    #[must_use]
    pub fn default_value_has_changed(&self) -> bool {
        default_value_has_changed(&self.old_type, &self.new_type)
    }
}

/// Returns `true` if the default value of `old_type` must be re-materialized for `new_type`.
#[must_use]
pub fn default_value_has_changed(old_type: &DexType, new_type: &DexType) -> bool {
    match (old_type.is_primitive(), new_type.is_primitive()) {
        (true, true) => old_type.value_category() != new_type.value_category(),
        (false, false) => false,
        _ => true,
    }
}

/// Per-argument change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgumentInfo {
    /// The argument was removed from the signature.
    Removed {
        /// Declared type of the removed argument.
        ty: DexType,
    },
    /// The argument type was rewritten.
    RewrittenType(RewrittenTypeInfo),
}

impl ArgumentInfo {
    /// Returns `true` for removed arguments.
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        matches!(self, ArgumentInfo::Removed { .. })
    }

    /// Returns the type rewrite, if this is one.
    #[must_use]
    pub const fn as_rewritten_type(&self) -> Option<&RewrittenTypeInfo> {
        match self {
            ArgumentInfo::RewrittenType(info) => Some(info),
            ArgumentInfo::Removed { .. } => None,
        }
    }
}

/// Sparse map from in-value index to its [`ArgumentInfo`].
///
/// Indices without an entry are kept unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ArgumentInfoCollection {
    infos: BTreeMap<usize, ArgumentInfo>,
}

impl ArgumentInfoCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the change of the in-value at `index`.
    pub fn add(&mut self, index: usize, info: ArgumentInfo) {
        self.infos.insert(index, info);
    }

    /// Returns the change of the in-value at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ArgumentInfo> {
        self.infos.get(&index)
    }

    /// Returns `true` if no argument changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Returns the number of changed arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns `true` if at least one argument was removed.
    #[must_use]
    pub fn has_removed_arguments(&self) -> bool {
        self.infos.values().any(ArgumentInfo::is_removed)
    }

    /// Returns the number of removed arguments.
    #[must_use]
    pub fn number_of_removed_arguments(&self) -> usize {
        self.infos.values().filter(|i| i.is_removed()).count()
    }

    /// Iterates `(index, info)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ArgumentInfo)> {
        self.infos.iter().map(|(i, info)| (*i, info))
    }
}

/// A constant that call sites materialize in place of a removed return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantReturn {
    /// A numeric constant (or `null` when the old return type is a reference and the
    /// value is 0).
    Number(i64),
}

/// How the return value of a method changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ReturnChange {
    /// The return type is unchanged.
    #[default]
    Unchanged,
    /// The return type was rewritten.
    Rewritten(RewrittenTypeInfo),
    /// The method now returns `void`; callers materialize `value` instead.
    ConstantVoid {
        /// The return type before the change.
        old_type: DexType,
        /// The constant every call returned.
        value: ConstantReturn,
    },
}

/// Complete description of how a method's prototype differs from its declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RewrittenPrototypeDescription {
    /// Per-argument changes.
    pub arguments: ArgumentInfoCollection,
    /// Change of the return value.
    pub return_change: ReturnChange,
    /// Whether a synthetic trailing `null` argument was appended.
    pub extra_null_parameter: bool,
}

impl RewrittenPrototypeDescription {
    /// The description of an unchanged prototype.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a description for a pure retyping of arguments and return value.
    #[must_use]
    pub fn for_rewritten_types(return_info: Option<RewrittenTypeInfo>, arguments: ArgumentInfoCollection) -> Self {
        Self {
            arguments,
            return_change: return_info.map_or(ReturnChange::Unchanged, ReturnChange::Rewritten),
            extra_null_parameter: false,
        }
    }

    /// Returns a copy with the trailing synthetic `null` argument flag set.
    #[must_use]
    pub fn with_extra_null_parameter(mut self) -> Self {
        self.extra_null_parameter = true;
        self
    }

    /// Returns a copy whose return value was dropped in favor of `value`.
    #[must_use]
    pub fn with_constant_return(mut self, old_type: DexType, value: ConstantReturn) -> Self {
        self.return_change = ReturnChange::ConstantVoid { old_type, value };
        self
    }

    /// Returns `true` if the prototype is unchanged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
            && self.return_change == ReturnChange::Unchanged
            && !self.extra_null_parameter
    }

    /// Returns `true` if the return type was changed to `void`.
    #[must_use]
    pub fn has_been_changed_to_return_void(&self) -> bool {
        matches!(self.return_change, ReturnChange::ConstantVoid { .. })
    }

    /// Returns the return type rewrite, if any.
    #[must_use]
    pub fn rewritten_return(&self) -> Option<&RewrittenTypeInfo> {
        match &self.return_change {
            ReturnChange::Rewritten(info) => Some(info),
            _ => None,
        }
    }
}

impl fmt::Display for RewrittenPrototypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut parts = Vec::new();
        for (index, info) in self.arguments.iter() {
            match info {
                ArgumentInfo::Removed { ty } => parts.push(format!("#{index} removed ({ty})")),
                ArgumentInfo::RewrittenType(t) => {
                    parts.push(format!("#{index} {} -> {}", t.old_type, t.new_type));
                }
            }
        }
        match &self.return_change {
            ReturnChange::Unchanged => {}
            ReturnChange::Rewritten(t) => parts.push(format!("return {} -> {}", t.old_type, t.new_type)),
            ReturnChange::ConstantVoid { old_type, value } => {
                parts.push(format!("return {old_type} -> V (constant {value:?})"));
            }
        }
        if self.extra_null_parameter {
            parts.push("extra null".to_string());
        }
        write!(f, "{}", parts.join(", "))
    }
}
