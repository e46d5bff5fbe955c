//! SSA values and their def-use links.
//!
//! Every [`Value`] is defined exactly once, either by an instruction or by a phi, and
//! records the instructions and phis that use it. The def-use links are maintained by
//! [`IrCode`](crate::analysis::IrCode); code outside the IR never edits them directly.

use std::{collections::BTreeSet, fmt, sync::Arc};

use crate::analysis::ssa::{BlockId, InstrId, TypeElement};

/// Identifier of an SSA value within one [`IrCode`](crate::analysis::IrCode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(usize);

impl ValueId {
    /// Creates a value identifier from its arena index.
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

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Where a value is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueDefinition {
    /// Out-value of an instruction.
    Instruction(InstrId),
    /// Result of the phi in a block.
    Phi(BlockId),
    /// Created but not yet attached.
    Unset,
}

/// An SSA value.
#[derive(Debug, Clone)]
pub struct Value {
    /// The identifier.
    pub id: ValueId,
    /// The lattice type.
    pub ty: TypeElement,
    /// The defining instruction or phi.
    pub definition: ValueDefinition,
    /// Instructions using this value.
    pub users: BTreeSet<InstrId>,
    /// Phis using this value, identified by their own value.
    pub phi_users: BTreeSet<ValueId>,
    /// Debug local name, if the value carries one.
    pub local: Option<Arc<str>>,
}

impl Value {
    pub(crate) fn new(id: ValueId, ty: TypeElement) -> Self {
        Self {
            id,
            ty,
            definition: ValueDefinition::Unset,
            users: BTreeSet::new(),
            phi_users: BTreeSet::new(),
            local: None,
        }
    }

    /// Returns `true` if the value is defined by a phi.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self.definition, ValueDefinition::Phi(_))
    }

    /// Returns the defining instruction.
    #[must_use]
    pub fn definition_instruction(&self) -> Option<InstrId> {
        match self.definition {
            ValueDefinition::Instruction(id) => Some(id),
            _ => None,
        }
    }

    /// Returns `true` if nothing uses the value.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.users.is_empty() && self.phi_users.is_empty()
    }

    /// Returns the number of instruction and phi users.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.users.len() + self.phi_users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_value_is_unattached() {
        let value = Value::new(ValueId::new(3), TypeElement::INT);
        assert_eq!(value.definition, ValueDefinition::Unset);
        assert!(value.is_unused());
        assert!(!value.is_phi());
        assert_eq!(value.id.to_string(), "v3");
    }
}
