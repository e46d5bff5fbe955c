//! The SSA body of one method.
//!
//! [`IrCode`] owns the blocks, instructions and values of a method in three arenas
//! indexed by [`BlockId`], [`InstrId`] and [`ValueId`]. Removed blocks and instructions
//! leave a tombstone so identifiers stay stable for the lifetime of the code.
//!
//! # Invariants
//!
//! Every mutation goes through an `IrCode` method, which keeps these properties:
//!
//! - every value is defined once, and its user sets list exactly its live users
//! - the predecessors of a block are the blocks with a normal or exceptional edge to it,
//!   and every phi of the block has one operand per predecessor
//! - a block guarded by catch handlers contains at most one throwing instruction
//!
//! [`IrCode::is_consistent_ssa`] checks all of them and is run after rewriting when
//! verification is enabled.

use std::{
    collections::{BTreeSet, HashSet, VecDeque},
    fmt,
};

use crate::{
    analysis::ssa::{
        BasicBlock, BlockId, CatchHandler, InstrId, Instruction, IrOp, Phi, Position, TypeElement, Value,
        ValueDefinition, ValueId,
    },
    graph::{DexType, MethodRef},
    Result,
};

/// The SSA body of one method.
#[derive(Debug, Clone)]
pub struct IrCode {
    method: MethodRef,
    is_static: bool,
    blocks: Vec<Option<BasicBlock>>,
    layout: Vec<BlockId>,
    instructions: Vec<Option<Instruction>>,
    values: Vec<Value>,
}

impl IrCode {
    /// Creates an empty body for `method` with a single entry block.
    ///
    /// # Arguments
    ///
    /// * `method` - The current signature of the method
    /// * `is_static` - Whether the method is static (no receiver argument)
    #[must_use]
    pub fn new(method: MethodRef, is_static: bool) -> Self {
        let mut code = Self {
            method,
            is_static,
            blocks: Vec::new(),
            layout: Vec::new(),
            instructions: Vec::new(),
            values: Vec::new(),
        };
        code.create_block();
        code
    }

    /// Creates the body `throw null` used for methods whose code must never run.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the body cannot be assembled.
    pub fn throwing(method: MethodRef, is_static: bool) -> Result<Self> {
        let mut code = Self::new(method.clone(), is_static);
        let entry = code.entry_block();
        let position = Position::synthetic(0, method, None);
        let null = code.create_value(TypeElement::Null);
        code.push_instruction(entry, IrOp::ConstNumber { value: 0 }, Some(null), position.clone())?;
        code.push_instruction(entry, IrOp::Throw { value: null }, None, position)?;
        Ok(code)
    }

    /// Returns the method this body belongs to.
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Updates the signature of the method after its holder or prototype changed.
    pub fn set_method(&mut self, method: MethodRef) {
        self.method = method;
    }

    /// Returns `true` for bodies of static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.layout.first().copied().unwrap_or(BlockId::new(0))
    }

    /// Creates an empty block at the end of the layout.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Some(BasicBlock::new(id)));
        self.layout.push(id);
        id
    }

    /// Returns a live block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    fn block_ref(&self, id: BlockId) -> Result<&BasicBlock> {
        self.block(id)
            .ok_or_else(|| internal_error!("Block {} does not exist in {}", id, self.method))
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock> {
        let method = &self.method;
        self.blocks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| internal_error!("Block {} does not exist in {}", id, method))
    }

    /// Iterates the live blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.layout.iter().filter_map(|id| self.block(*id))
    }

    /// Returns the number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    /// Creates an unattached value of type `ty`.
    pub fn create_value(&mut self, ty: TypeElement) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(Value::new(id, ty));
        id
    }

    /// Returns a value.
    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.index())
    }

    fn value_mut(&mut self, id: ValueId) -> Result<&mut Value> {
        let method = &self.method;
        self.values
            .get_mut(id.index())
            .ok_or_else(|| internal_error!("Value {} does not exist in {}", id, method))
    }

    /// Returns the type of a value, `Bottom` for unknown identifiers.
    #[must_use]
    pub fn value_type(&self, id: ValueId) -> TypeElement {
        self.value(id).map_or(TypeElement::Bottom, |v| v.ty.clone())
    }

    /// Sets the type of a value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for an unknown value.
    pub fn set_value_type(&mut self, id: ValueId, ty: TypeElement) -> Result<()> {
        self.value_mut(id)?.ty = ty;
        Ok(())
    }

    /// Attaches a debug local name to a value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for an unknown value.
    pub fn set_local(&mut self, id: ValueId, name: &str) -> Result<()> {
        self.value_mut(id)?.local = Some(name.into());
        Ok(())
    }

    /// Returns an instruction.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.get(id.index()).and_then(Option::as_ref)
    }

    fn instruction_ref(&self, id: InstrId) -> Result<&Instruction> {
        self.instruction(id)
            .ok_or_else(|| internal_error!("Instruction {} does not exist in {}", id, self.method))
    }

    fn instruction_mut(&mut self, id: InstrId) -> Result<&mut Instruction> {
        let method = &self.method;
        self.instructions
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| internal_error!("Instruction {} does not exist in {}", id, method))
    }

    /// Returns the identifiers of all live instructions in layout order.
    ///
    /// The result is a snapshot, so callers may mutate the code while walking it.
    #[must_use]
    pub fn instruction_ids(&self) -> Vec<InstrId> {
        self.blocks().flat_map(|b| b.instructions.iter().copied()).collect()
    }

    /// Iterates all live instructions in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks()
            .flat_map(|b| b.instructions.iter())
            .filter_map(|id| self.instruction(*id))
    }

    /// Iterates all phis in layout order.
    pub fn phis(&self) -> impl Iterator<Item = &Phi> {
        self.blocks().flat_map(|b| b.phis.iter())
    }

    /// Returns the instruction defining `value`, if it is defined by one.
    #[must_use]
    pub fn definition_of(&self, value: ValueId) -> Option<&Instruction> {
        self.value(value)
            .and_then(Value::definition_instruction)
            .and_then(|id| self.instruction(id))
    }

    /// Returns the phi defining `value`, if it is defined by one.
    #[must_use]
    pub fn phi(&self, value: ValueId) -> Option<&Phi> {
        match self.value(value)?.definition {
            ValueDefinition::Phi(block) => self.block(block)?.phi(value),
            _ => None,
        }
    }

    /// Returns the out-values of the `Argument` instructions, in argument order.
    #[must_use]
    pub fn arguments(&self) -> Vec<ValueId> {
        let mut arguments: Vec<(usize, ValueId)> = self
            .instructions()
            .filter_map(|i| match (&i.op, i.out) {
                (IrOp::Argument { index }, Some(out)) => Some((*index, out)),
                _ => None,
            })
            .collect();
        arguments.sort_unstable();
        arguments.into_iter().map(|(_, v)| v).collect()
    }

    /// Returns the instruction users of a value.
    #[must_use]
    pub fn users_of(&self, value: ValueId) -> Vec<InstrId> {
        self.value(value)
            .map(|v| v.users.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the phi users of a value.
    #[must_use]
    pub fn phi_users_of(&self, value: ValueId) -> Vec<ValueId> {
        self.value(value)
            .map(|v| v.phi_users.iter().copied().collect())
            .unwrap_or_default()
    }

    fn link_uses(&mut self, instr: InstrId, uses: &[ValueId]) -> Result<()> {
        for used in uses {
            self.value_mut(*used)?.users.insert(instr);
        }
        Ok(())
    }

    fn unlink_uses(&mut self, instr: InstrId, uses: &[ValueId]) -> Result<()> {
        for used in uses {
            self.value_mut(*used)?.users.remove(&instr);
        }
        Ok(())
    }

    fn attach_out(&mut self, instr: InstrId, out: Option<ValueId>) -> Result<()> {
        if let Some(out) = out {
            let value = self.value_mut(out)?;
            if value.definition != ValueDefinition::Unset {
                return Err(internal_error!("Value {} is already defined", out));
            }
            value.definition = ValueDefinition::Instruction(instr);
        }
        Ok(())
    }

    fn allocate_instruction(
        &mut self,
        block: BlockId,
        op: IrOp,
        out: Option<ValueId>,
        position: Position,
    ) -> Result<InstrId> {
        self.block_ref(block)?;
        let id = InstrId::new(self.instructions.len());
        let uses = op.uses();
        let targets = op.targets();
        self.instructions.push(Some(Instruction {
            id,
            block,
            op,
            out,
            position,
        }));
        self.link_uses(id, &uses)?;
        self.attach_out(id, out)?;
        for target in targets {
            self.add_edge(block, target)?;
        }
        Ok(id)
    }

    /// Appends an instruction at the end of `block`.
    ///
    /// The instruction registers itself as user of its in-values and as definition of
    /// `out`. A terminator also adds `block` to the predecessors of its targets.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks or values, or if `out` is
    /// already defined.
    pub fn push_instruction(
        &mut self,
        block: BlockId,
        op: IrOp,
        out: Option<ValueId>,
        position: Position,
    ) -> Result<InstrId> {
        let id = self.allocate_instruction(block, op, out, position)?;
        self.block_mut(block)?.instructions.push(id);
        Ok(id)
    }

    /// Inserts a non-terminator instruction immediately before `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if `anchor` is not live or `op` is a terminator.
    pub fn insert_before(
        &mut self,
        anchor: InstrId,
        op: IrOp,
        out: Option<ValueId>,
        position: Position,
    ) -> Result<InstrId> {
        self.insert_relative(anchor, op, out, position, 0)
    }

    /// Inserts a non-terminator instruction immediately after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if `anchor` is not live, `anchor` is a
    /// terminator, or `op` is a terminator.
    pub fn insert_after(
        &mut self,
        anchor: InstrId,
        op: IrOp,
        out: Option<ValueId>,
        position: Position,
    ) -> Result<InstrId> {
        if self.instruction_ref(anchor)?.op.is_terminator() {
            return Err(internal_error!("Cannot insert after terminator {}", anchor));
        }
        self.insert_relative(anchor, op, out, position, 1)
    }

    fn insert_relative(
        &mut self,
        anchor: InstrId,
        op: IrOp,
        out: Option<ValueId>,
        position: Position,
        offset: usize,
    ) -> Result<InstrId> {
        if op.is_terminator() {
            return Err(internal_error!("Cannot insert terminator {} inside a block", op));
        }
        let block = self.instruction_ref(anchor)?.block;
        let index = self
            .block_ref(block)?
            .index_of(anchor)
            .ok_or_else(|| internal_error!("Instruction {} is not in block {}", anchor, block))?;
        let id = self.allocate_instruction(block, op, out, position)?;
        self.block_mut(block)?.instructions.insert(index + offset, id);
        Ok(id)
    }

    /// Inserts a non-terminator instruction at the start of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks or if `op` is a terminator.
    pub fn insert_at_block_start(
        &mut self,
        block: BlockId,
        op: IrOp,
        out: Option<ValueId>,
        position: Position,
    ) -> Result<InstrId> {
        if op.is_terminator() {
            return Err(internal_error!("Cannot insert terminator {} inside a block", op));
        }
        let id = self.allocate_instruction(block, op, out, position)?;
        self.block_mut(block)?.instructions.insert(0, id);
        Ok(id)
    }

    /// Replaces the operation and out-value of an instruction in place.
    ///
    /// Users of the old out-value are moved to `out`. The instruction keeps its
    /// identifier, block and position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the old out-value still has users and `out`
    /// is `None`, or if the replacement changes control flow.
    pub fn replace_instruction(&mut self, id: InstrId, op: IrOp, out: Option<ValueId>) -> Result<()> {
        let (old_uses, old_out, old_targets) = {
            let instr = self.instruction_ref(id)?;
            (instr.op.uses(), instr.out, instr.op.targets())
        };
        if op.targets() != old_targets {
            return Err(internal_error!("Replacement of {} must keep its successors", id));
        }
        if let Some(old) = old_out {
            if Some(old) != out {
                match out {
                    Some(new) => {
                        if self.value(new).is_some_and(|v| v.definition != ValueDefinition::Unset) {
                            return Err(internal_error!("Value {} is already defined", new));
                        }
                        self.replace_users(old, new)?;
                    }
                    None => {
                        if !self.value(old).is_some_and(Value::is_unused) {
                            return Err(internal_error!(
                                "Out-value {} of {} is used but the replacement defines none",
                                old,
                                id
                            ));
                        }
                    }
                }
                self.value_mut(old)?.definition = ValueDefinition::Unset;
            }
        }
        self.unlink_uses(id, &old_uses)?;
        let new_uses = op.uses();
        {
            let instr = self.instruction_mut(id)?;
            instr.op = op;
            instr.out = out;
        }
        self.link_uses(id, &new_uses)?;
        if let Some(new) = out {
            self.value_mut(new)?.definition = ValueDefinition::Instruction(id);
        }
        Ok(())
    }

    /// Replaces every use of `old` by `new`, in instructions and phis.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown values.
    pub fn replace_users(&mut self, old: ValueId, new: ValueId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let (users, phi_users) = {
            let value = self.value_mut(old)?;
            (std::mem::take(&mut value.users), std::mem::take(&mut value.phi_users))
        };
        for user in &users {
            self.instruction_mut(*user)?.op.replace_use(old, new);
        }
        for phi in &phi_users {
            self.rewrite_phi_operands(*phi, old, new)?;
        }
        let value = self.value_mut(new)?;
        value.users.extend(users);
        value.phi_users.extend(phi_users);
        Ok(())
    }

    /// Replaces the in-value `old` of a single instruction by `new`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown instructions or values.
    pub fn replace_use_in(&mut self, instr: InstrId, old: ValueId, new: ValueId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.instruction_mut(instr)?.op.replace_use(old, new);
        self.value_mut(old)?.users.remove(&instr);
        self.value_mut(new)?.users.insert(instr);
        Ok(())
    }

    /// Replaces every occurrence of `old` among the operands of the phi defining `phi` by
    /// `new`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if `phi` is not a phi value.
    pub fn replace_phi_operand(&mut self, phi: ValueId, old: ValueId, new: ValueId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.rewrite_phi_operands(phi, old, new)?;
        self.value_mut(old)?.phi_users.remove(&phi);
        self.value_mut(new)?.phi_users.insert(phi);
        Ok(())
    }

    fn rewrite_phi_operands(&mut self, phi: ValueId, old: ValueId, new: ValueId) -> Result<()> {
        let block = match self.value(phi).map(|v| v.definition) {
            Some(ValueDefinition::Phi(block)) => block,
            _ => return Err(internal_error!("Value {} is not a phi", phi)),
        };
        let phi_entry = self
            .block_mut(block)?
            .phis
            .iter_mut()
            .find(|p| p.value == phi)
            .ok_or_else(|| internal_error!("Phi {} is missing from its block", phi))?;
        for operand in &mut phi_entry.operands {
            if *operand == old {
                *operand = new;
            }
        }
        Ok(())
    }

    /// Adds a phi to `block` and returns the value it defines.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the operand count differs from the number of
    /// predecessors of `block`.
    pub fn add_phi(&mut self, block: BlockId, ty: TypeElement, operands: Vec<ValueId>) -> Result<ValueId> {
        let predecessors = self.block_ref(block)?.predecessors.len();
        if operands.len() != predecessors {
            return Err(internal_error!(
                "Phi in {} has {} operands but the block has {} predecessors",
                block,
                operands.len(),
                predecessors
            ));
        }
        let value = self.create_value(ty);
        self.value_mut(value)?.definition = ValueDefinition::Phi(block);
        for operand in &operands {
            self.value_mut(*operand)?.phi_users.insert(value);
        }
        self.block_mut(block)?.phis.push(Phi { value, operands });
        Ok(value)
    }

    /// Adds an exceptional edge from `block` to `target` for exceptions of type `guard`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks.
    pub fn add_catch_handler(&mut self, block: BlockId, guard: DexType, target: BlockId) -> Result<()> {
        self.block_ref(target)?;
        self.block_mut(block)?.catch_handlers.push(CatchHandler { guard, target });
        self.add_edge(block, target)
    }

    /// Removes the catch handler at `index` of `block`.
    ///
    /// If no other edge leads from `block` to the handler target, `block` is removed from
    /// the target's predecessors together with the matching phi operands.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks or an out-of-range index.
    pub fn remove_catch_handler(&mut self, block: BlockId, index: usize) -> Result<CatchHandler> {
        let handlers = &mut self.block_mut(block)?.catch_handlers;
        if index >= handlers.len() {
            return Err(internal_error!("Block {} has no catch handler #{}", block, index));
        }
        let removed = handlers.remove(index);
        if !self.successors(block).contains(&removed.target) {
            self.remove_edge(block, removed.target)?;
        }
        Ok(removed)
    }

    /// Replaces the guard of the catch handler at `index` of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks or an out-of-range index.
    pub fn set_catch_guard(&mut self, block: BlockId, index: usize, guard: DexType) -> Result<()> {
        let handler = self
            .block_mut(block)?
            .catch_handlers
            .get_mut(index)
            .ok_or_else(|| internal_error!("Block {} has no catch handler #{}", block, index))?;
        handler.guard = guard;
        Ok(())
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let target = self.block_mut(to)?;
        if target.predecessors.contains(&from) {
            return Ok(());
        }
        if !target.phis.is_empty() {
            return Err(internal_error!("Cannot add edge {} -> {} to a block with phis", from, to));
        }
        target.predecessors.push(from);
        Ok(())
    }

    fn remove_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let dropped: Vec<(ValueId, ValueId)> = {
            let target = self.block_mut(to)?;
            let Some(index) = target.predecessors.iter().position(|p| *p == from) else {
                return Ok(());
            };
            target.predecessors.remove(index);
            target
                .phis
                .iter_mut()
                .filter(|phi| index < phi.operands.len())
                .map(|phi| (phi.value, phi.operands.remove(index)))
                .collect()
        };
        for (phi, operand) in dropped {
            let still_used = self.phi(phi).is_some_and(|p| p.operands.contains(&operand));
            if !still_used {
                self.value_mut(operand)?.phi_users.remove(&phi);
            }
        }
        Ok(())
    }

    /// Returns the normal and exceptional successors of a block, without duplicates.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        let Some(data) = self.block(block) else {
            return Vec::new();
        };
        let mut successors: Vec<BlockId> = data
            .exit()
            .and_then(|exit| self.instruction(exit))
            .map(|i| i.op.targets())
            .unwrap_or_default();
        for handler in &data.catch_handlers {
            if !successors.contains(&handler.target) {
                successors.push(handler.target);
            }
        }
        successors
    }

    /// Removes an instruction whose out-value is unused.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the out-value is still used.
    pub fn remove_instruction(&mut self, id: InstrId) -> Result<()> {
        let instr = self.instruction_ref(id)?.clone();
        if let Some(out) = instr.out {
            if !self.value(out).is_some_and(Value::is_unused) {
                return Err(internal_error!("Cannot remove {}: its out-value {} is used", id, out));
            }
            self.value_mut(out)?.definition = ValueDefinition::Unset;
        }
        self.unlink_uses(id, &instr.op.uses())?;
        self.block_mut(instr.block)?.instructions.retain(|i| *i != id);
        self.instructions[id.index()] = None;
        for target in instr.op.targets() {
            if !self.successors(instr.block).contains(&target) {
                self.remove_edge(instr.block, target)?;
            }
        }
        Ok(())
    }

    /// Splits the block of `instr` right after it.
    ///
    /// The instructions following `instr` move to a new block that takes over the
    /// normal successors; the original block keeps its catch handlers and ends with a
    /// `goto` to the new block.
    ///
    /// # Returns
    ///
    /// The new block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if `instr` is a terminator, or if the moved
    /// instructions would throw outside the catch handlers guarding them.
    pub fn split_block_after(&mut self, instr: InstrId) -> Result<BlockId> {
        let block = self.instruction_ref(instr)?.block;
        if self.instruction_ref(instr)?.op.is_terminator() {
            return Err(internal_error!("Cannot split {} after its terminator", block));
        }
        let index = self
            .block_ref(block)?
            .index_of(instr)
            .ok_or_else(|| internal_error!("Instruction {} is not in block {}", instr, block))?;
        let moved: Vec<InstrId> = self.block_mut(block)?.instructions.split_off(index + 1);
        if self.block_ref(block)?.has_catch_handlers()
            && moved
                .iter()
                .any(|id| self.instruction(*id).is_some_and(Instruction::may_throw))
        {
            return Err(internal_error!(
                "Splitting {} would move a throwing instruction out of its catch handlers",
                block
            ));
        }

        let split = self.create_block();
        let targets = moved
            .last()
            .and_then(|exit| self.instruction(*exit))
            .map(|i| i.op.targets())
            .unwrap_or_default();
        for id in &moved {
            self.instruction_mut(*id)?.block = split;
        }
        self.block_mut(split)?.instructions = moved;

        // The new block replaces the original one as predecessor, keeping phi operand order.
        for target in targets {
            let still_reached = self.block_ref(block)?.catch_handlers.iter().any(|h| h.target == target);
            let preds = &mut self.block_mut(target)?.predecessors;
            if still_reached {
                preds.push(split);
                let phis: Vec<(ValueId, ValueId)> = {
                    let target_block = self.block_ref(target)?;
                    let index = target_block
                        .predecessors
                        .iter()
                        .position(|p| *p == block)
                        .ok_or_else(|| internal_error!("{} is not a predecessor of {}", block, target))?;
                    target_block
                        .phis
                        .iter()
                        .filter_map(|p| p.operands.get(index).map(|o| (p.value, *o)))
                        .collect()
                };
                for phi in self.block_mut(target)?.phis.iter_mut() {
                    if let Some((_, operand)) = phis.iter().find(|(v, _)| *v == phi.value) {
                        phi.operands.push(*operand);
                    }
                }
            } else if let Some(slot) = preds.iter_mut().find(|p| **p == block) {
                *slot = split;
            }
        }

        let position = self.instruction_ref(instr)?.position.clone();
        self.push_instruction(block, IrOp::Goto { target: split }, None, position)?;
        Ok(split)
    }

    /// Removes every block unreachable from the entry block.
    ///
    /// # Returns
    ///
    /// The phis of live blocks that lost operands.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the def-use links are inconsistent, for
    /// example when a live instruction uses a value defined in a removed block.
    pub fn remove_unreachable_blocks(&mut self) -> Result<BTreeSet<ValueId>> {
        let reachable = self.reachable_blocks();
        let dead: Vec<BlockId> = self
            .layout
            .iter()
            .copied()
            .filter(|b| !reachable.contains(b))
            .collect();
        let mut affected = BTreeSet::new();
        if dead.is_empty() {
            return Ok(affected);
        }
        for block in &dead {
            for successor in self.successors(*block) {
                if reachable.contains(&successor) {
                    if let Ok(target) = self.block_ref(successor) {
                        affected.extend(target.phis.iter().map(|p| p.value));
                    }
                    self.remove_edge(*block, successor)?;
                }
            }
        }
        for block in &dead {
            let data = self.block_ref(*block)?.clone();
            for phi in &data.phis {
                for operand in &phi.operands {
                    self.value_mut(*operand)?.phi_users.remove(&phi.value);
                }
            }
            for id in &data.instructions {
                if let Some(instr) = self.instruction(*id).cloned() {
                    self.unlink_uses(*id, &instr.op.uses())?;
                }
            }
        }
        for block in &dead {
            let data = self.block_ref(*block)?.clone();
            for phi in &data.phis {
                self.ensure_only_dead_users(phi.value, &reachable)?;
                self.value_mut(phi.value)?.definition = ValueDefinition::Unset;
            }
            for id in &data.instructions {
                if let Some(out) = self.instruction(*id).and_then(|i| i.out) {
                    self.ensure_only_dead_users(out, &reachable)?;
                    self.value_mut(out)?.definition = ValueDefinition::Unset;
                }
                self.instructions[id.index()] = None;
            }
            self.blocks[block.index()] = None;
        }
        self.layout.retain(|b| reachable.contains(b));
        affected.retain(|phi| self.value(*phi).is_some_and(Value::is_phi));
        Ok(affected)
    }

    fn ensure_only_dead_users(&self, value: ValueId, reachable: &HashSet<BlockId>) -> Result<()> {
        let Some(data) = self.value(value) else {
            return Ok(());
        };
        let live_user = data
            .users
            .iter()
            .filter_map(|u| self.instruction(*u))
            .any(|u| reachable.contains(&u.block));
        let live_phi_user = data.phi_users.iter().any(|p| match self.value(*p).map(|v| v.definition) {
            Some(ValueDefinition::Phi(block)) => reachable.contains(&block),
            _ => false,
        });
        if live_user || live_phi_user {
            return Err(internal_error!("Value {} of an unreachable block is used by live code", value));
        }
        Ok(())
    }

    fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut reachable = HashSet::new();
        let mut worklist = VecDeque::from([self.entry_block()]);
        while let Some(block) = worklist.pop_front() {
            if self.block(block).is_none() || !reachable.insert(block) {
                continue;
            }
            worklist.extend(self.successors(block));
        }
        reachable
    }

    /// Returns `true` if any value type, embedded type, member reference or catch guard
    /// of the body mentions `ty` (directly or as array base type).
    #[must_use]
    pub fn references_type(&self, ty: &DexType) -> bool {
        let mentions = |t: &DexType| t.base_type() == *ty;
        let values = self.values.iter().filter(|v| v.definition != ValueDefinition::Unset).any(|v| {
            v.ty.reference_type().is_some_and(mentions)
        });
        let instructions = self.instructions().any(|i| {
            i.op.embedded_type().is_some_and(mentions)
                || i
                    .op
                    .field()
                    .is_some_and(|f| mentions(&f.holder) || mentions(&f.ty))
                || i
                    .op
                    .invoked_method()
                    .is_some_and(|m| mentions(&m.holder) || m.proto.mentions(mentions))
        });
        let guards = self
            .blocks()
            .any(|b| b.catch_handlers.iter().any(|h| mentions(&h.guard)));
        values || instructions || guards
    }

    /// Verifies the structural SSA invariants of the body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] describing the first violated invariant.
    pub fn is_consistent_ssa(&self) -> Result<()> {
        for block in self.blocks() {
            let exit = block
                .exit()
                .and_then(|e| self.instruction(e))
                .ok_or_else(|| internal_error!("Block {} of {} is empty", block.id, self.method))?;
            if !exit.op.is_terminator() {
                return Err(internal_error!("Block {} of {} does not end in a terminator", block.id, self.method));
            }
            let mut throwing = 0;
            for (index, id) in block.instructions.iter().enumerate() {
                let instr = self.instruction_ref(*id)?;
                if instr.block != block.id {
                    return Err(internal_error!("Instruction {} is linked to the wrong block", id));
                }
                if instr.op.is_terminator() && index + 1 != block.instructions.len() {
                    return Err(internal_error!("Terminator {} is not at the end of {}", id, block.id));
                }
                if instr.may_throw() {
                    throwing += 1;
                }
                for used in instr.op.uses() {
                    let value = self
                        .value(used)
                        .ok_or_else(|| internal_error!("{} uses unknown value {}", id, used))?;
                    if !value.users.contains(id) {
                        return Err(internal_error!("{} is not registered as user of {}", id, used));
                    }
                    if value.definition == ValueDefinition::Unset {
                        return Err(internal_error!("{} uses undefined value {}", id, used));
                    }
                }
                if let Some(out) = instr.out {
                    if self.value(out).map(|v| v.definition) != Some(ValueDefinition::Instruction(*id)) {
                        return Err(internal_error!("Out-value {} is not linked to {}", out, id));
                    }
                }
            }
            if block.has_catch_handlers() && throwing > 1 {
                return Err(internal_error!(
                    "Block {} has catch handlers and {} throwing instructions",
                    block.id,
                    throwing
                ));
            }
            for phi in &block.phis {
                if phi.operands.len() != block.predecessors.len() {
                    return Err(internal_error!("Phi {} has the wrong number of operands", phi.value));
                }
                for operand in &phi.operands {
                    let value = self
                        .value(*operand)
                        .ok_or_else(|| internal_error!("Phi {} uses unknown value {}", phi.value, operand))?;
                    if !value.phi_users.contains(&phi.value) {
                        return Err(internal_error!("Phi {} is not registered as user of {}", phi.value, operand));
                    }
                }
            }
            for predecessor in &block.predecessors {
                if !self.successors(*predecessor).contains(&block.id) {
                    return Err(internal_error!("{} is listed as predecessor of {} without an edge", predecessor, block.id));
                }
            }
            for successor in self.successors(block.id) {
                let listed = self.block(successor).is_some_and(|s| s.predecessors.contains(&block.id));
                if !listed {
                    return Err(internal_error!("Edge {} -> {} is missing from predecessors", block.id, successor));
                }
            }
        }
        for value in &self.values {
            for user in &value.users {
                let uses_it = self.instruction(*user).is_some_and(|i| i.op.uses().contains(&value.id));
                if !uses_it {
                    return Err(internal_error!("Stale user {} of {}", user, value.id));
                }
            }
            for phi in &value.phi_users {
                let uses_it = self.phi(*phi).is_some_and(|p| p.operands.contains(&value.id));
                if !uses_it {
                    return Err(internal_error!("Stale phi user {} of {}", phi, value.id));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.method)?;
        for block in self.blocks() {
            let preds: Vec<String> = block.predecessors.iter().map(ToString::to_string).collect();
            writeln!(f, "{}: (preds: {})", block.id, preds.join(", "))?;
            for phi in &block.phis {
                let operands: Vec<String> = phi.operands.iter().map(ToString::to_string).collect();
                writeln!(f, "  {} <- phi({}) : {}", phi.value, operands.join(", "), self.value_type(phi.value))?;
            }
            for instr in block.instructions.iter().filter_map(|id| self.instruction(*id)) {
                match instr.out {
                    Some(out) => writeln!(f, "  {instr} : {}", self.value_type(out))?,
                    None => writeln!(f, "  {instr}")?,
                }
            }
            for handler in &block.catch_handlers {
                writeln!(f, "  catch {} -> {}", handler.guard, handler.target)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Proto;

    fn method() -> MethodRef {
        MethodRef::new(DexType::class("Main"), "run", Proto::new(DexType::void(), vec![]))
    }

    fn diamond() -> Result<(IrCode, ValueId, ValueId, ValueId)> {
        let mut code = IrCode::new(method(), true);
        let entry = code.entry_block();
        let left = code.create_block();
        let right = code.create_block();
        let join = code.create_block();
        let p = Position::none();
        let cond = code.create_value(TypeElement::INT);
        code.push_instruction(entry, IrOp::ConstNumber { value: 1 }, Some(cond), p.clone())?;
        code.push_instruction(
            entry,
            IrOp::If {
                kind: crate::analysis::IfKind::Eq,
                lhs: cond,
                rhs: None,
                then_target: left,
                else_target: right,
            },
            None,
            p.clone(),
        )?;
        let a = code.create_value(TypeElement::INT);
        code.push_instruction(left, IrOp::ConstNumber { value: 1 }, Some(a), p.clone())?;
        code.push_instruction(left, IrOp::Goto { target: join }, None, p.clone())?;
        let b = code.create_value(TypeElement::INT);
        code.push_instruction(right, IrOp::ConstNumber { value: 2 }, Some(b), p.clone())?;
        code.push_instruction(right, IrOp::Goto { target: join }, None, p.clone())?;
        let phi = code.add_phi(join, TypeElement::INT, vec![a, b])?;
        code.push_instruction(join, IrOp::Return { value: None }, None, p)?;
        Ok((code, a, b, phi))
    }

    #[test]
    fn test_diamond_is_consistent() -> Result<()> {
        let (code, a, _, phi) = diamond()?;
        code.is_consistent_ssa()?;
        assert_eq!(code.phi_users_of(a), vec![phi]);
        assert_eq!(code.block_count(), 4);
        Ok(())
    }

    #[test]
    fn test_phi_operand_count_is_checked() {
        let mut code = IrCode::new(method(), true);
        let entry = code.entry_block();
        let v = code.create_value(TypeElement::INT);
        assert!(code.add_phi(entry, TypeElement::INT, vec![v]).is_err());
    }

    #[test]
    fn test_replace_instruction_moves_users() -> Result<()> {
        let (mut code, a, b, phi) = diamond()?;
        let def = code.definition_of(a).map(|i| i.id).expect("defined");
        let replacement = code.create_value(TypeElement::INT);
        code.replace_instruction(def, IrOp::ConstNumber { value: 5 }, Some(replacement))?;
        assert_eq!(code.phi(phi).map(|p| p.operands.clone()), Some(vec![replacement, b]));
        assert!(code.value(a).is_some_and(Value::is_unused));
        code.is_consistent_ssa()
    }

    #[test]
    fn test_replace_with_void_requires_unused_out() -> Result<()> {
        let (mut code, a, _, _) = diamond()?;
        let def = code.definition_of(a).map(|i| i.id).expect("defined");
        assert!(code.replace_instruction(def, IrOp::ConstNumber { value: 5 }, None).is_err());
        Ok(())
    }

    #[test]
    fn test_unreachable_blocks_are_removed() -> Result<()> {
        let mut code = IrCode::new(method(), true);
        let entry = code.entry_block();
        let dead = code.create_block();
        let exit = code.create_block();
        let p = Position::none();
        code.push_instruction(entry, IrOp::Goto { target: exit }, None, p.clone())?;
        let v = code.create_value(TypeElement::INT);
        code.push_instruction(dead, IrOp::ConstNumber { value: 3 }, Some(v), p.clone())?;
        code.push_instruction(dead, IrOp::Goto { target: exit }, None, p.clone())?;
        let c = code.create_value(TypeElement::INT);
        let entry_const = code.insert_at_block_start(entry, IrOp::ConstNumber { value: 4 }, Some(c), p.clone())?;
        assert!(code.instruction(entry_const).is_some());
        let phi = code.add_phi(exit, TypeElement::INT, vec![c, v])?;
        code.push_instruction(exit, IrOp::Return { value: Some(phi) }, None, p)?;

        let affected = code.remove_unreachable_blocks()?;
        assert!(affected.contains(&phi));
        assert_eq!(code.block_count(), 2);
        assert_eq!(code.phi(phi).map(|p| p.operands.clone()), Some(vec![c]));
        code.is_consistent_ssa()
    }

    #[test]
    fn test_split_keeps_handlers_on_throwing_part() -> Result<()> {
        let mut code = IrCode::new(method(), true);
        let entry = code.entry_block();
        let handler = code.create_block();
        let exit = code.create_block();
        let p = Position::none();
        let callee = MethodRef::new(DexType::class("Main"), "f", Proto::new(DexType::int(), vec![]));
        let result = code.create_value(TypeElement::INT);
        let call = code.push_instruction(
            entry,
            IrOp::Invoke {
                kind: crate::graph::InvokeKind::Static,
                method: callee,
                args: vec![],
            },
            Some(result),
            p.clone(),
        )?;
        code.push_instruction(entry, IrOp::Goto { target: exit }, None, p.clone())?;
        code.add_catch_handler(entry, DexType::throwable(), handler)?;
        let exception = code.create_value(TypeElement::of(&DexType::throwable()));
        code.push_instruction(handler, IrOp::MoveException { ty: DexType::throwable() }, Some(exception), p.clone())?;
        code.push_instruction(handler, IrOp::Return { value: None }, None, p.clone())?;
        code.push_instruction(exit, IrOp::Return { value: None }, None, p)?;

        let split = code.split_block_after(call)?;
        assert!(code.block(split).is_some_and(|b| !b.has_catch_handlers()));
        assert_eq!(code.successors(entry), vec![split, handler]);
        assert_eq!(code.block(exit).map(|b| b.predecessors.clone()), Some(vec![split]));
        code.is_consistent_ssa()
    }

    #[test]
    fn test_throwing_body() -> Result<()> {
        let code = IrCode::throwing(method(), true)?;
        code.is_consistent_ssa()?;
        let ops: Vec<String> = code.instructions().map(|i| i.op.mnemonic()).collect();
        assert_eq!(ops, vec!["const", "throw"]);
        Ok(())
    }

    #[test]
    fn test_references_type() -> Result<()> {
        let color = DexType::class("Color");
        let mut code = IrCode::new(method(), true);
        let entry = code.entry_block();
        let v = code.create_value(TypeElement::of(&color.to_array(1)));
        let size = code.create_value(TypeElement::INT);
        let p = Position::none();
        code.push_instruction(entry, IrOp::ConstNumber { value: 2 }, Some(size), p.clone())?;
        code.push_instruction(entry, IrOp::NewArrayEmpty { ty: color.to_array(1), size }, Some(v), p.clone())?;
        code.push_instruction(entry, IrOp::Return { value: None }, None, p)?;
        assert!(code.references_type(&color));
        assert!(!code.references_type(&DexType::class("Shape")));
        Ok(())
    }
}
