//! # bytelens Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from
//! the bytelens library. Import this module to get quick access to the program
//! model, the lens chain, the SSA IR and the enum unboxing pass.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all bytelens operations
pub use crate::Error;

/// The result type used throughout bytelens
pub use crate::Result;

// ================================================================================================
// Program Model
// ================================================================================================

/// Types, member references and class definitions
pub use crate::graph::{
    AccessFlags, Application, ClassKind, DexType, EncodedField, EncodedMethod, FieldRef, InvokeKind, MethodRef,
    ProgramClass, Proto, StaticValue,
};

// ================================================================================================
// Lens Chain
// ================================================================================================

/// Installed lenses, their builder and the prototype changes they describe
pub use crate::graph::{
    ArgumentInfo, GraphLens, LensBuilder, LensKind, MethodLookupResult, ReturnChange,
    RewrittenPrototypeDescription, VerticallyMergedClasses,
};

// ================================================================================================
// SSA IR
// ================================================================================================

/// Method bodies and their construction
pub use crate::analysis::{BlockId, InstrId, IrCode, IrCodeBuilder, IrOp, Position, TypeElement, ValueId};

// ================================================================================================
// Compiler
// ================================================================================================

/// Compiler state, configuration and diagnostics
pub use crate::compiler::{
    AppView, CompilerContext, CompilerOptions, DiagnosticLevel, EventKind, EventLog, LensCodeRewriter,
    OptimizationFeedback, Reporter,
};

/// Enum unboxing
pub use crate::compiler::{EnumUnboxingOutcome, EnumUnboxingPass, Reason};
