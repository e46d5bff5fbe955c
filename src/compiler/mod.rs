//! Compiler infrastructure for whole-program rewrites.
//!
//! This module sits between the program model and the passes that change it:
//!
//! - [`crate::graph`] - Types, members, classes and the lens chain
//! - [`crate::analysis`] - The SSA IR of method bodies
//! - [`compiler`](self) - Versioned state, per-method processing, the lens code
//!   rewriter and the passes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  AppView                     Immutable, versioned snapshot       │
//! │    ├─ Application             (class definitions)                │
//! │    ├─ GraphLens               (installed lens chain)             │
//! │    └─ Merged / unboxed types  (records of earlier passes)        │
//! │                                                                  │
//! │  CompilerContext             Shared per-method state             │
//! │    ├─ IR bodies               (keyed by current signature)       │
//! │    ├─ OptimizationFeedback    (method and field summaries)       │
//! │    ├─ EventLog                (what changed)                     │
//! │    └─ Reporter                (what the user should know)        │
//! │                                                                  │
//! │  MethodProcessor             One rayon task per method           │
//! │    ├─ scan()                  Read-only analysis sweep           │
//! │    └─ process()               Exclusive rewriting sweep          │
//! │                                                                  │
//! │  LensCodeRewriter            Applies the lens to one body        │
//! │                                                                  │
//! │  Passes                                                          │
//! │    └─ EnumUnboxingPass        Enums → ordinals                   │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod appview;
mod config;
mod context;
mod diagnostics;
mod events;
mod lens_rewriter;
pub mod passes;
mod scheduler;
mod summary;

pub use appview::AppView;
pub use config::CompilerOptions;
pub use context::CompilerContext;
pub use diagnostics::{Diagnostic, DiagnosticLevel, Reporter};
pub use events::{Event, EventKind, EventLog, EventRecorder};
pub use lens_rewriter::LensCodeRewriter;
pub use passes::enums::{
    EnumCandidates, EnumUnboxingOutcome, EnumUnboxingPass, EnumUnboxingRewriter, EnumUnboxingUtility,
    EnumUsageAnalysis, Reason, Rejection,
};
pub use scheduler::MethodProcessor;
pub use summary::{
    AbstractValue, FieldOptimizationInfo, InstanceInitializerInfo, MethodOptimizationInfo, OptimizationFeedback,
};
