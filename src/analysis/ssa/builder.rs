//! Incremental construction of [`IrCode`].
//!
//! [`IrCodeBuilder`] creates the argument preamble of a method and then lets callers
//! append instructions block by block. Positions are interned through
//! [`CanonicalPositions`]; [`IrCodeBuilder::at_line`] sets the source line of the
//! instructions that follow.
//!
//! # Examples
//!
//! ```rust,ignore
//! let mut builder = IrCodeBuilder::new(method, true)?;
//! let entry = builder.entry();
//! let red = builder.value(entry, IrOp::StaticGet { field: red }, TypeElement::of(&color))?;
//! builder.effect(entry, IrOp::Return { value: Some(red) })?;
//! let code = builder.build()?;
//! ```

use crate::{
    analysis::ssa::{BlockId, CanonicalPositions, InstrId, IrCode, IrOp, Nullability, Position, TypeElement, ValueId},
    graph::{DexType, MethodRef},
    Result,
};

/// Builds the SSA body of one method.
pub struct IrCodeBuilder {
    code: IrCode,
    positions: CanonicalPositions,
    current: Position,
    arguments: Vec<ValueId>,
}

impl IrCodeBuilder {
    /// Creates a builder whose entry block already defines one `Argument` per in-value.
    ///
    /// The receiver of an instance method is typed as a non-null reference to the holder.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the preamble cannot be emitted.
    pub fn new(method: MethodRef, is_static: bool) -> Result<Self> {
        let positions = CanonicalPositions::new(None, 16, method.clone());
        let preamble = positions.preamble().clone();
        let mut code = IrCode::new(method.clone(), is_static);
        let entry = code.entry_block();

        let mut types = Vec::with_capacity(method.arity() + 1);
        if !is_static {
            types.push(TypeElement::from_dex_type(&method.holder, Nullability::DefinitelyNotNull));
        }
        types.extend(method.proto.params.iter().map(TypeElement::of));

        let mut arguments = Vec::with_capacity(types.len());
        for (index, ty) in types.into_iter().enumerate() {
            let value = code.create_value(ty);
            code.push_instruction(entry, IrOp::Argument { index }, Some(value), preamble.clone())?;
            arguments.push(value);
        }
        Ok(Self {
            code,
            positions,
            current: preamble,
            arguments,
        })
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.code.entry_block()
    }

    /// Returns the argument values, receiver first.
    #[must_use]
    pub fn arguments(&self) -> Vec<ValueId> {
        self.arguments.clone()
    }

    /// Creates a new empty block.
    pub fn new_block(&mut self) -> BlockId {
        self.code.create_block()
    }

    /// Sets the source line of subsequently emitted instructions.
    pub fn at_line(&mut self, line: u32) -> &mut Self {
        let position = Position::new(line, None, self.code.method().clone(), None);
        self.current = self.positions.canonical(position);
        self
    }

    /// Appends an instruction defining a value of type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks or values.
    pub fn value(&mut self, block: BlockId, op: IrOp, ty: TypeElement) -> Result<ValueId> {
        let out = self.code.create_value(ty);
        self.code.push_instruction(block, op, Some(out), self.current.clone())?;
        Ok(out)
    }

    /// Appends an instruction without out-value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks or values.
    pub fn effect(&mut self, block: BlockId, op: IrOp) -> Result<InstrId> {
        self.code.push_instruction(block, op, None, self.current.clone())
    }

    /// Appends the `null` constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks.
    pub fn null(&mut self, block: BlockId) -> Result<ValueId> {
        self.value(block, IrOp::ConstNumber { value: 0 }, TypeElement::Null)
    }

    /// Appends an `int` constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks.
    pub fn int(&mut self, block: BlockId, value: i64) -> Result<ValueId> {
        self.value(block, IrOp::ConstNumber { value }, TypeElement::INT)
    }

    /// Adds a phi to `block`, whose predecessors must all be connected already.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the operand count does not match.
    pub fn phi(&mut self, block: BlockId, ty: TypeElement, operands: Vec<ValueId>) -> Result<ValueId> {
        self.code.add_phi(block, ty, operands)
    }

    /// Guards `block` with a catch handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown blocks.
    pub fn catch_handler(&mut self, block: BlockId, guard: DexType, target: BlockId) -> Result<()> {
        self.code.add_catch_handler(block, guard, target)
    }

    /// Attaches a debug local name to a value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] for unknown values.
    pub fn local(&mut self, value: ValueId, name: &str) -> Result<()> {
        self.code.set_local(value, name)
    }

    /// Finishes the body, checking its SSA invariants.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the body is not consistent.
    pub fn build(self) -> Result<IrCode> {
        self.code.is_consistent_ssa()?;
        Ok(self.code)
    }

    /// Finishes the body without checking it.
    #[must_use]
    pub fn build_unchecked(self) -> IrCode {
        self.code
    }
}
