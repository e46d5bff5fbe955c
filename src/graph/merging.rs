//! Record of classes merged into a subtype by vertical class merging.
//!
//! Vertical class merging itself is not performed here. Its lens layer is installed like
//! any other, and this record lets the lens code rewriter recognize code that cannot be
//! rewritten soundly after a merge (a direct constructor call on the merged-away class
//! with a receiver allocated as the subtype).

use std::collections::BTreeMap;

use crate::graph::DexType;

/// Maps each merged-away class to the subtype it was merged into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerticallyMergedClasses {
    merged_into: BTreeMap<DexType, DexType>,
}

impl VerticallyMergedClasses {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `source` was merged into its subtype `target`.
    pub fn record(&mut self, source: DexType, target: DexType) {
        self.merged_into.insert(source, target);
    }

    /// Returns `true` if `ty` was merged into one of its subtypes.
    #[must_use]
    pub fn has_been_merged_into_subtype(&self, ty: &DexType) -> bool {
        self.merged_into.contains_key(ty)
    }

    /// Returns the class `ty` was merged into.
    #[must_use]
    pub fn target_for(&self, ty: &DexType) -> Option<&DexType> {
        self.merged_into.get(ty)
    }

    /// Iterates the merged-away classes.
    pub fn sources(&self) -> impl Iterator<Item = &DexType> {
        self.merged_into.keys()
    }

    /// Returns `true` if no class was merged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merged_into.is_empty()
    }
}
