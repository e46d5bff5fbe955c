//! Enum unboxing: replacing enum types by the `int` ordinal of their constants.
//!
//! An enum whose values are only ever compared, stored in slots of its own type and
//! asked for their `ordinal()` carries no information beyond that ordinal. This pass
//! finds such enums program-wide, rewrites every declaration mentioning them to use
//! `int` instead, and reprocesses the method bodies that used them.
//!
//! # Architecture
//!
//! The pass runs in stages, each consuming the output of the previous one:
//!
//! 1. [`seed_candidates`] - structural selection from the enum declarations
//! 2. [`EnumUsageAnalysis::analyze`] - a parallel sweep over all bodies that removes
//!    every candidate with a use an `int` cannot represent
//! 3. [`EnumUsageAnalysis::finish`] - initializer checks, freezing the eligible set
//! 4. [`EnumUnboxingTreeFixer`] - signature rewrite, producing a lens layer
//! 5. Installation - a new [`AppView`] with the lens, refreshed summaries and rekeyed
//!    bodies
//! 6. Reprocessing - [`LensCodeRewriter`] with an [`EnumUnboxingRewriter`] over every
//!    method depending on an unboxed enum
//! 7. Pruning - the unboxed enum classes leave the program
//!
//! # Thread Safety
//!
//! Both sweeps run through the [`MethodProcessor`]. The only state shared between the
//! analysis tasks is the [`EnumCandidates`] map, where removal is monotonic, so the
//! final eligible set does not depend on the order methods are analyzed in.
//!
//! # Usage
//!
//! ```rust,ignore
//! let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
//! for ty in &outcome.unboxed {
//!     println!("{} is now an int", ty.source_name());
//! }
//! let view = outcome.view;
//! ```

mod analysis;
mod candidates;
mod reason;
mod rewriter;
mod seed;
mod treefixer;
mod utility;

use std::collections::{BTreeMap, BTreeSet};

pub use analysis::EnumUsageAnalysis;
pub use candidates::{EnumCandidates, Rejection};
pub use reason::Reason;
pub use rewriter::EnumUnboxingRewriter;
pub use seed::{is_expected_direct_method, seed_candidates, VALUES_FIELD_NAME};
pub use treefixer::{EnumUnboxingTreeFixer, TreeFixResult, COLLISION_SUFFIX};
pub use utility::{EnumUnboxingUtility, UTILITY_CLASS_NAME};

use crate::{
    compiler::{AppView, CompilerContext, EventKind, EventLog, LensCodeRewriter, MethodProcessor},
    graph::{DexType, MethodRef},
    Result,
};

/// Result of [`EnumUnboxingPass::run`].
#[derive(Debug)]
pub struct EnumUnboxingOutcome {
    /// The program state after the pass.
    pub view: AppView,
    /// Methods whose bodies were rewritten, by their current signature.
    pub reprocessed: BTreeSet<MethodRef>,
    /// The synthesized utility class, `None` if nothing was unboxed.
    pub utility: Option<EnumUnboxingUtility>,
    /// The enums replaced by `int`.
    pub unboxed: BTreeSet<DexType>,
    /// The first reason each other seeded enum was kept.
    pub rejected: BTreeMap<DexType, Rejection>,
}

impl EnumUnboxingOutcome {
    fn unchanged(view: &AppView, rejected: BTreeMap<DexType, Rejection>) -> Self {
        Self {
            view: view.clone(),
            reprocessed: BTreeSet::new(),
            utility: None,
            unboxed: BTreeSet::new(),
            rejected,
        }
    }
}

/// The enum unboxing pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnumUnboxingPass;

impl EnumUnboxingPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Unboxes every eligible enum of `view`'s program.
    ///
    /// # Arguments
    ///
    /// * `view` - The program state to start from; it is not modified
    /// * `ctx` - The bodies, summaries, events and diagnostics of the compilation
    ///
    /// # Returns
    ///
    /// The new program state together with what changed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Fatal`] if a reprocessed body needs a keep rule,
    /// [`crate::Error::LensConflict`] if the new layer overlaps an earlier one, and
    /// [`crate::Error::Internal`] if a rewritten body is inconsistent.
    pub fn run(&self, view: &AppView, ctx: &CompilerContext) -> Result<EnumUnboxingOutcome> {
        if !view.options().enable_enum_unboxing {
            return Ok(EnumUnboxingOutcome::unchanged(view, BTreeMap::new()));
        }
        let candidates = seed_candidates(view.app(), view.options());
        self.run_with_candidates(view, ctx, &candidates)
    }

    /// Like [`EnumUnboxingPass::run`], starting from a precomputed candidate set.
    ///
    /// # Errors
    ///
    /// See [`EnumUnboxingPass::run`].
    pub fn run_with_candidates(
        &self,
        view: &AppView,
        ctx: &CompilerContext,
        candidates: &EnumCandidates,
    ) -> Result<EnumUnboxingOutcome> {
        let processor = MethodProcessor::new(ctx, view.options())?;
        let analysis = EnumUsageAnalysis::new(view, candidates);
        if !candidates.is_empty() {
            processor.scan(&ctx.methods(), |code| analysis.analyze(code));
        }
        let unboxed = analysis.finish(&ctx.feedback, &ctx.reporter);

        let events = EventLog::new();
        let rejected = candidates.rejected();
        for (ty, rejection) in &rejected {
            let recorder = events.record(EventKind::EnumRejected);
            let recorder = match &rejection.context {
                Some(context) => recorder.method(context),
                None => recorder,
            };
            recorder.message(format!("{}: {}", ty.source_name(), rejection.reason));
        }
        if unboxed.is_empty() {
            ctx.events.merge(events);
            return Ok(EnumUnboxingOutcome::unchanged(view, rejected));
        }

        let enums: BTreeSet<DexType> = unboxed.keys().cloned().collect();
        let rewriter = EnumUnboxingRewriter::new(view.app(), &enums)?;
        let fixed = EnumUnboxingTreeFixer::new(view.app(), &enums).fix(view.lens(), &events)?;
        let lens = fixed
            .lens
            .ok_or_else(|| internal_error!("No lens for unboxed enums {:?}", enums))?;
        let utility = EnumUnboxingUtility::synthesize()?;

        let mut classes = fixed.classes;
        classes.push(utility.class.clone());
        let installed = view
            .with_app(view.app().rewritten_with(classes))
            .with_lens(lens.clone())
            .with_unboxed_enums(&enums);
        ctx.feedback.fixup(&lens, rewriter.ordinals());
        ctx.rekey_codes(&lens);
        for stub in fixed.stubs {
            ctx.insert_code(stub);
        }

        let reprocess: Vec<MethodRef> = unboxed
            .values()
            .flatten()
            .filter(|method| !enums.contains(&method.holder))
            .map(|method| lens.lookup_method_signature(method))
            .filter(|method| ctx.has_code(method))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let code_rewriter = LensCodeRewriter::new(&installed).with_enum_rewriter(&rewriter);
        processor.process(&reprocess, |code| {
            code_rewriter.rewrite(code, ctx)?;
            Ok(true)
        })?;
        for method in &reprocess {
            ctx.reprocessed.insert(method.clone());
            events.record(EventKind::MethodReprocessed).method(method).message("enum unboxing");
        }
        for ty in &enums {
            events
                .record(EventKind::EnumUnboxed)
                .message(format!("{} -> int", ty.source_name()));
        }

        for code in &utility.codes {
            ctx.insert_code(code.clone());
        }
        ctx.codes.retain(|method, _| !enums.contains(&method.holder));
        let view = installed.with_app(installed.app().without_classes(&enums));
        ctx.events.merge(events);

        log::info!(
            "Unboxed {} enums, reprocessed {} methods",
            enums.len(),
            reprocess.len()
        );
        Ok(EnumUnboxingOutcome {
            view,
            reprocessed: reprocess.into_iter().collect(),
            utility: Some(utility),
            unboxed: enums,
            rejected,
        })
    }
}
