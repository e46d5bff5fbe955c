//! Program analysis infrastructure.
//!
//! This module holds the intermediate representation every rewriting pass operates
//! on. See [`ssa`] for the SSA form of method bodies.

pub mod ssa;

// Re-export primary types at module level
pub use ssa::{
    BasicBlock, BinopKind, BlockId, CanonicalPositions, CatchHandler, IfKind, InstrId, Instruction, IrCode,
    IrCodeBuilder, IrOp, Nullability, Phi, PhiTypeUpdater, Position, TypeElement, Value, ValueDefinition,
    ValueId,
};
