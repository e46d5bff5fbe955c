//! Basic blocks, phis and catch handlers.

use std::fmt;

use crate::{
    analysis::ssa::{InstrId, ValueId},
    graph::DexType,
};

/// Identifier of a block within one [`IrCode`](crate::analysis::IrCode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
    /// Creates a block identifier from its arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A phi function at the start of a block.
///
/// Operand `i` flows in from predecessor `i` of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// The value the phi defines.
    pub value: ValueId,
    /// One operand per predecessor.
    pub operands: Vec<ValueId>,
}

/// An exceptional edge: exceptions of type `guard` thrown in the block go to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandler {
    /// The caught type.
    pub guard: DexType,
    /// The handler block.
    pub target: BlockId,
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// The identifier.
    pub id: BlockId,
    /// Phis, evaluated on entry.
    pub phis: Vec<Phi>,
    /// Instructions in execution order; the last one is the terminator.
    pub instructions: Vec<InstrId>,
    /// Normal and exceptional predecessors, in phi operand order.
    pub predecessors: Vec<BlockId>,
    /// Catch handlers guarding the throwing instruction of this block, in match order.
    pub catch_handlers: Vec<CatchHandler>,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId) -> Self {
        Self {
            id,
            phis: Vec::new(),
            instructions: Vec::new(),
            predecessors: Vec::new(),
            catch_handlers: Vec::new(),
        }
    }

    /// Returns `true` if the block has catch handlers.
    #[must_use]
    pub fn has_catch_handlers(&self) -> bool {
        !self.catch_handlers.is_empty()
    }

    /// Returns the last instruction.
    #[must_use]
    pub fn exit(&self) -> Option<InstrId> {
        self.instructions.last().copied()
    }

    /// Returns the phi defining `value`.
    #[must_use]
    pub fn phi(&self, value: ValueId) -> Option<&Phi> {
        self.phis.iter().find(|p| p.value == value)
    }

    /// Returns the position of `instr` in this block.
    #[must_use]
    pub fn index_of(&self, instr: InstrId) -> Option<usize> {
        self.instructions.iter().position(|i| *i == instr)
    }
}
