//! Configuration for the compiler passes.
//!
//! This module provides [`CompilerOptions`], the switches consulted by the enum
//! unboxing pass and the lens code rewriter.

use std::collections::BTreeSet;

use crate::graph::DexType;

/// Configuration for the compiler passes.
///
/// Controls which whole-program optimizations run, how much diagnostic output they
/// produce and whether rewritten bodies are re-verified.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Enable enum unboxing (default: true).
    pub enable_enum_unboxing: bool,

    /// Emit per-enum success and failure reports after the unboxing analysis.
    ///
    /// Also makes the analysis attribute calls of `compareTo`, `name` and `toString`
    /// to dedicated reasons instead of a generic unsupported library call.
    pub enable_enum_unboxing_debug_logs: bool,

    /// Vertical class merging is part of this compilation (default: true).
    ///
    /// Catch guards are only rewritten through the lens when this is set, because no
    /// other transformation maps exception types.
    pub enable_vertical_class_merging: bool,

    /// Types that must keep their identity, for example because keep rules name them.
    pub pinned_types: BTreeSet<DexType>,

    /// Check each rewritten body for SSA consistency and eliminated types (default: true).
    pub verify_after_rewrite: bool,

    /// Number of worker threads for per-method work (`None`: rayon's global pool).
    pub threads: Option<usize>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            enable_enum_unboxing: true,
            enable_enum_unboxing_debug_logs: false,
            enable_vertical_class_merging: true,
            pinned_types: BTreeSet::new(),
            verify_after_rewrite: true,
            threads: None,
        }
    }
}

impl CompilerOptions {
    /// Creates a new configuration with default settings.
    ///
    /// # Returns
    ///
    /// A new `CompilerOptions` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the enum unboxing debug reports.
    #[must_use]
    pub fn with_enum_unboxing_debug_logs(mut self, enabled: bool) -> Self {
        self.enable_enum_unboxing_debug_logs = enabled;
        self
    }

    /// Marks vertical class merging as enabled or disabled.
    #[must_use]
    pub fn with_vertical_class_merging(mut self, enabled: bool) -> Self {
        self.enable_vertical_class_merging = enabled;
        self
    }

    /// Adds a pinned type.
    #[must_use]
    pub fn with_pinned_type(mut self, ty: DexType) -> Self {
        self.pinned_types.insert(ty);
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Returns `true` if `ty` is pinned.
    #[must_use]
    pub fn is_pinned(&self, ty: &DexType) -> bool {
        self.pinned_types.contains(ty)
    }
}
