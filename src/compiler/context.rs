//! Shared mutable state of one compilation.
//!
//! [`CompilerContext`] owns everything that changes per method while passes run:
//! the SSA bodies, the optimization summaries, the event log and the diagnostics.
//! Unlike [`AppView`](crate::compiler::AppView) it is not versioned; passes take it
//! by shared reference and mutate it through concurrent maps.
//!
//! # Thread Safety
//!
//! All fields are safe to use from rayon workers. Per-method work removes the body
//! from [`CompilerContext::codes`], mutates it exclusively, and inserts it again.

use dashmap::{DashMap, DashSet};

use crate::{
    analysis::IrCode,
    compiler::{EventLog, OptimizationFeedback, Reporter},
    graph::{GraphLens, MethodRef},
};

/// Per-compilation state shared by all passes.
#[derive(Debug, Default)]
pub struct CompilerContext {
    /// The SSA body of every method with code, keyed by its current signature.
    pub codes: DashMap<MethodRef, IrCode>,
    /// Optimization summaries published by analyses.
    pub feedback: OptimizationFeedback,
    /// What the passes changed.
    pub events: EventLog,
    /// Messages for the user.
    pub reporter: Reporter,
    /// Methods rewritten at least once after a lens was installed.
    pub reprocessed: DashSet<MethodRef>,
}

impl CompilerContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the body of a method, keyed by [`IrCode::method`].
    pub fn insert_code(&self, code: IrCode) {
        self.codes.insert(code.method().clone(), code);
    }

    /// Returns a copy of the body of `method`.
    #[must_use]
    pub fn code(&self, method: &MethodRef) -> Option<IrCode> {
        self.codes.get(method).map(|code| code.clone())
    }

    /// Returns `true` if `method` has a body.
    #[must_use]
    pub fn has_code(&self, method: &MethodRef) -> bool {
        self.codes.contains_key(method)
    }

    /// Returns all methods with a body, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<MethodRef> {
        let mut methods: Vec<MethodRef> = self.codes.iter().map(|e| e.key().clone()).collect();
        methods.sort();
        methods
    }

    /// Rekeys every body by the signature `lens` gives its method.
    ///
    /// Bodies whose signature changed also get the new signature as their method, so
    /// the rewriter sees the current return and parameter types.
    pub fn rekey_codes(&self, lens: &GraphLens) {
        let moved: Vec<(MethodRef, MethodRef)> = self
            .codes
            .iter()
            .filter_map(|e| {
                let current = lens.lookup_method_signature(e.key());
                (current != *e.key()).then(|| (e.key().clone(), current))
            })
            .collect();
        let bodies: Vec<(MethodRef, IrCode)> = moved
            .into_iter()
            .filter_map(|(old, current)| {
                self.codes.remove(&old).map(|(_, mut code)| {
                    code.set_method(current.clone());
                    (current, code)
                })
            })
            .collect();
        for (method, code) in bodies {
            self.codes.insert(method, code);
        }
    }
}
