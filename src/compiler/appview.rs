//! Versioned, immutable compiler state.
//!
//! An [`AppView`] bundles the program snapshot with the installed lens and the
//! records earlier whole-program passes left behind. It is never mutated: a pass
//! that changes the program returns a new view through one of the `with_*` methods,
//! which bumps [`AppView::version`]. Cloning is cheap since every component is
//! reference counted.
//!
//! # Usage
//!
//! ```rust,ignore
//! let view = AppView::new(app, CompilerOptions::default());
//! let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
//! let view = outcome.view;
//! assert!(view.version() > 0);
//! ```

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    compiler::CompilerOptions,
    graph::{Application, DexType, GraphLens, ProgramClass, VerticallyMergedClasses},
};

/// One version of the compiler's whole-program state.
#[derive(Debug, Clone)]
pub struct AppView {
    app: Arc<Application>,
    lens: GraphLens,
    merged_classes: Arc<VerticallyMergedClasses>,
    unboxed_enums: Arc<BTreeSet<DexType>>,
    options: Arc<CompilerOptions>,
    version: u64,
}

impl AppView {
    /// Creates the initial view with the identity lens.
    #[must_use]
    pub fn new(app: Application, options: CompilerOptions) -> Self {
        Self {
            app: Arc::new(app),
            lens: GraphLens::identity(),
            merged_classes: Arc::new(VerticallyMergedClasses::new()),
            unboxed_enums: Arc::new(BTreeSet::new()),
            options: Arc::new(options),
            version: 0,
        }
    }

    /// Returns the program snapshot.
    #[must_use]
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// Returns the installed lens.
    #[must_use]
    pub fn lens(&self) -> &GraphLens {
        &self.lens
    }

    /// Returns the classes vertical class merging merged into a subtype.
    #[must_use]
    pub fn merged_classes(&self) -> &VerticallyMergedClasses {
        &self.merged_classes
    }

    /// Returns the enums replaced by `int` so far.
    #[must_use]
    pub fn unboxed_enums(&self) -> &BTreeSet<DexType> {
        &self.unboxed_enums
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Returns the version, incremented by every `with_*` method.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Shortcut for `self.app().definition_for(ty)`.
    #[must_use]
    pub fn definition_for(&self, ty: &DexType) -> Option<&ProgramClass> {
        self.app.definition_for(ty)
    }

    /// Returns a view with `lens` installed.
    #[must_use]
    pub fn with_lens(&self, lens: GraphLens) -> Self {
        self.next(|view| view.lens = lens)
    }

    /// Returns a view over another program snapshot.
    #[must_use]
    pub fn with_app(&self, app: Application) -> Self {
        self.next(|view| view.app = Arc::new(app))
    }

    /// Returns a view recording the outcome of vertical class merging.
    #[must_use]
    pub fn with_merged_classes(&self, merged: VerticallyMergedClasses) -> Self {
        self.next(|view| view.merged_classes = Arc::new(merged))
    }

    /// Returns a view that also lists `unboxed` as unboxed enums.
    #[must_use]
    pub fn with_unboxed_enums(&self, unboxed: &BTreeSet<DexType>) -> Self {
        self.next(|view| {
            let mut all = (*view.unboxed_enums).clone();
            all.extend(unboxed.iter().cloned());
            view.unboxed_enums = Arc::new(all);
        })
    }

    fn next(&self, update: impl FnOnce(&mut Self)) -> Self {
        let mut view = self.clone();
        update(&mut view);
        view.version = self.version + 1;
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LensBuilder, LensKind};

    #[test]
    fn test_with_methods_return_new_versions() -> crate::Result<()> {
        let view = AppView::new(Application::with_java_lang(), CompilerOptions::default());
        let color = DexType::class("Color");
        let mut builder = LensBuilder::new(LensKind::EnumUnboxing);
        builder.map_type(color.clone(), DexType::int());
        let lens = builder.build(view.lens())?.unwrap_or_default();

        let next = view.with_lens(lens).with_unboxed_enums(&BTreeSet::from([color.clone()]));
        assert_eq!(view.version(), 0);
        assert_eq!(next.version(), 2);
        assert!(view.lens().is_identity());
        assert_eq!(next.lens().lookup_type(&color), DexType::int());
        assert!(next.unboxed_enums().contains(&color));
        assert!(view.unboxed_enums().is_empty());
        Ok(())
    }
}
