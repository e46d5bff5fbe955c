//! SSA instructions.

use std::fmt;

use crate::analysis::ssa::{BlockId, IrOp, Position, ValueId};

/// Identifier of an instruction within one [`IrCode`](crate::analysis::IrCode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(usize);

impl InstrId {
    /// Creates an instruction identifier from its arena index.
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

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// An instruction: an operation placed in a block, with an optional out-value and a
/// source position.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// The identifier.
    pub id: InstrId,
    /// The block containing the instruction.
    pub block: BlockId,
    /// The operation and its operands.
    pub op: IrOp,
    /// The defined value, if any.
    pub out: Option<ValueId>,
    /// The source position.
    pub position: Position,
}

impl Instruction {
    /// Returns the in-values.
    #[must_use]
    pub fn in_values(&self) -> Vec<ValueId> {
        self.op.uses()
    }

    /// Returns `true` if the instruction may throw.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        self.op.may_throw()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.out {
            Some(out) => write!(f, "{out} <- {}", self.op),
            None => write!(f, "{}", self.op),
        }
    }
}
