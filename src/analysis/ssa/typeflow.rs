//! Recomputation of phi types after operand types changed.
//!
//! Rewriting an instruction can change the type of its out-value, for example when an
//! enum reference becomes an `int`. Phis that (transitively) merge such values keep
//! their stale types until [`PhiTypeUpdater::update`] recomputes them: the affected
//! phis and every phi they reach are reset to `Bottom`, then widened to the join of
//! their operands until a fixed point is reached. `assume` instructions aliasing an updated phi follow its type.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{
    analysis::ssa::{IrCode, IrOp, Nullability, TypeElement, ValueId},
    graph::Application,
    Result,
};

/// Recomputes the types of a set of phis and everything depending on them.
pub struct PhiTypeUpdater<'a> {
    app: &'a Application,
}

impl<'a> PhiTypeUpdater<'a> {
    /// Creates an updater joining reference types in `app`'s class hierarchy.
    #[must_use]
    pub fn new(app: &'a Application) -> Self {
        Self { app }
    }

    /// Recomputes the types of `affected` and of the phis they flow into.
    ///
    /// # Returns
    ///
    /// The phi and `assume` values whose type changed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if a value in `affected` is not a phi.
    pub fn update(&self, code: &mut IrCode, affected: &BTreeSet<ValueId>) -> Result<BTreeSet<ValueId>> {
        for phi in affected {
            if code.phi(*phi).is_none() {
                return Err(internal_error!("{} is not a phi of {}", phi, code.method()));
            }
        }

        // Every phi reachable from `affected` may hold a stale type, so all of them
        // restart from Bottom. Widening from a stale operand would otherwise end in Top.
        let (phis, aliases) = dependents(code, affected);
        let mut original = BTreeMap::new();
        for value in phis.iter().chain(&aliases) {
            original.insert(*value, code.value_type(*value));
            code.set_value_type(*value, TypeElement::Bottom)?;
        }

        let mut worklist: VecDeque<ValueId> = phis.iter().copied().collect();
        while let Some(phi) = worklist.pop_front() {
            let Some(operands) = code.phi(phi).map(|p| p.operands.clone()) else {
                continue;
            };
            let joined = operands
                .iter()
                .fold(TypeElement::Bottom, |acc, v| acc.join(&code.value_type(*v), self.app));
            if joined == code.value_type(phi) {
                continue;
            }
            code.set_value_type(phi, joined.clone())?;
            worklist.extend(code.phi_users_of(phi));

            for alias in assume_aliases(code, phi) {
                let refined = joined.with_nullability(Nullability::DefinitelyNotNull);
                if code.value_type(alias) != refined {
                    code.set_value_type(alias, refined)?;
                    worklist.extend(code.phi_users_of(alias));
                }
            }
        }

        let mut changed = BTreeSet::new();
        for (value, ty) in original {
            let current = code.value_type(value);
            if current == TypeElement::Bottom {
                // No operand carried a type; keep the previous one.
                code.set_value_type(value, ty)?;
            } else if current != ty {
                changed.insert(value);
            }
        }
        Ok(changed)
    }
}

/// Collects the phis transitively fed by `roots` and the `assume` aliases in between.
fn dependents(code: &IrCode, roots: &BTreeSet<ValueId>) -> (BTreeSet<ValueId>, BTreeSet<ValueId>) {
    let mut phis = BTreeSet::new();
    let mut aliases = BTreeSet::new();
    let mut pending: Vec<ValueId> = roots.iter().copied().collect();
    while let Some(phi) = pending.pop() {
        if !phis.insert(phi) {
            continue;
        }
        pending.extend(code.phi_users_of(phi));
        for alias in assume_aliases(code, phi) {
            if aliases.insert(alias) {
                pending.extend(code.phi_users_of(alias));
            }
        }
    }
    (phis, aliases)
}

/// Returns the out-values of the `assume` instructions refining `value`.
fn assume_aliases(code: &IrCode, value: ValueId) -> Vec<ValueId> {
    code.users_of(value)
        .into_iter()
        .filter_map(|user| {
            code.instruction(user).and_then(|i| match i.op {
                IrOp::Assume { .. } => i.out,
                _ => None,
            })
        })
        .collect()
}
