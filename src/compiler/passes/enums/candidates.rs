//! The shared, shrinking map of enum candidates.
//!
//! Every analyzed method may disqualify candidates or register itself as dependent on
//! one, concurrently with all other methods. The map only ever loses entries: once a
//! candidate is rejected it never comes back, so the outcome does not depend on the
//! order in which methods are scanned.
//!
//! # Thread Safety
//!
//! [`EnumCandidates`] is backed by `DashMap`s. A dependency recorded concurrently with
//! the rejection of its candidate may be dropped or kept; either way it is discarded
//! with the candidate, so the race is benign.

use std::collections::{BTreeMap, BTreeSet};

use dashmap::{DashMap, DashSet};

use crate::{
    compiler::passes::enums::Reason,
    graph::{DexType, MethodRef},
};

/// The first recorded disqualification of an enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Why the enum stays boxed.
    pub reason: Reason,
    /// The method whose code disqualified the enum, `None` for structural reasons.
    pub context: Option<MethodRef>,
}

/// Enum types still considered for unboxing, each with the methods depending on it.
#[derive(Debug, Default)]
pub struct EnumCandidates {
    candidates: DashMap<DexType, DashSet<MethodRef>>,
    rejected: DashMap<DexType, Rejection>,
}

impl EnumCandidates {
    /// Creates an empty candidate map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seeded candidate.
    ///
    /// Types rejected earlier are not added again.
    pub fn add(&self, ty: DexType) {
        if !self.rejected.contains_key(&ty) {
            self.candidates.entry(ty).or_default();
        }
    }

    /// Returns `true` if `ty` is still a candidate.
    #[must_use]
    pub fn contains(&self, ty: &DexType) -> bool {
        self.candidates.contains_key(ty)
    }

    /// Returns `true` if no candidate is left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Returns the number of remaining candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Removes `ty` from the candidates.
    ///
    /// Only the first rejection of a type is recorded.
    ///
    /// # Returns
    ///
    /// `true` if this call removed the candidate.
    pub fn reject(&self, ty: &DexType, reason: Reason, context: Option<&MethodRef>) -> bool {
        let removed = self.candidates.remove(ty).is_some();
        if removed {
            self.rejected.entry(ty.clone()).or_insert_with(|| Rejection {
                reason,
                context: context.cloned(),
            });
            match context {
                Some(method) => log::debug!("Enum {} is not unboxed: {} in {}", ty, reason, method),
                None => log::debug!("Enum {} is not unboxed: {}", ty, reason),
            }
        }
        removed
    }

    /// Records that `method` must be reprocessed if `ty` is unboxed.
    ///
    /// Does nothing if `ty` is no longer a candidate.
    pub fn record_dependency(&self, ty: &DexType, method: &MethodRef) {
        if let Some(dependencies) = self.candidates.get(ty) {
            dependencies.insert(method.clone());
        }
    }

    /// Returns the methods depending on `ty`, sorted.
    #[must_use]
    pub fn dependencies(&self, ty: &DexType) -> Vec<MethodRef> {
        let mut methods: Vec<MethodRef> = self
            .candidates
            .get(ty)
            .map(|deps| deps.iter().map(|m| m.key().clone()).collect())
            .unwrap_or_default();
        methods.sort();
        methods
    }

    /// Returns the remaining candidates, sorted.
    #[must_use]
    pub fn types(&self) -> BTreeSet<DexType> {
        self.candidates.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns the first rejection of `ty`.
    #[must_use]
    pub fn rejection(&self, ty: &DexType) -> Option<Rejection> {
        self.rejected.get(ty).map(|r| r.clone())
    }

    /// Returns every rejected type with its first rejection.
    #[must_use]
    pub fn rejected(&self) -> BTreeMap<DexType, Rejection> {
        self.rejected
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Takes a snapshot of the surviving candidates and their dependencies.
    #[must_use]
    pub fn freeze(&self) -> BTreeMap<DexType, BTreeSet<MethodRef>> {
        self.candidates
            .iter()
            .map(|e| (e.key().clone(), e.value().iter().map(|m| m.key().clone()).collect()))
            .collect()
    }
}
