//! Static Single Assignment (SSA) form of method bodies.
//!
//! Method bodies are represented as [`IrCode`]: a control-flow graph of basic blocks
//! whose instructions define each value exactly once. Control-flow merges are
//! expressed with phis, exceptional control flow with catch handlers on the block
//! containing the throwing instruction.
//!
//! # Architecture
//!
//! The SSA module is organized into focused sub-modules:
//!
//! - [`position`] - Source positions with inlining caller chains
//! - [`types`] - The value type lattice
//! - [`ops`] - The closed set of SSA operations
//! - [`value`] - SSA values with def-use links
//! - [`instruction`] - Instructions placing an operation in a block
//! - [`block`] - Basic blocks, phis and catch handlers
//! - [`code`] - The per-method arena and its mutation API
//! - [`builder`] - Incremental construction of bodies
//! - [`typeflow`] - Phi type recomputation after rewrites
//!
//! # Usage
//!
//! ```rust,ignore
//! use bytelens::analysis::{IrCodeBuilder, IrOp, TypeElement};
//!
//! let mut builder = IrCodeBuilder::new(method, true)?;
//! let entry = builder.entry();
//! let zero = builder.int(entry, 0)?;
//! builder.effect(entry, IrOp::Return { value: Some(zero) })?;
//! let code = builder.build()?;
//!
//! for instr in code.instructions() {
//!     println!("{instr}");
//! }
//! ```
//!
//! # Thread Safety
//!
//! All types are `Send + Sync`. An [`IrCode`] is owned by exactly one worker while it is
//! rewritten; the scheduler moves bodies in and out of the shared code store.

pub mod block;
pub mod builder;
pub mod code;
pub mod instruction;
pub mod ops;
pub mod position;
pub mod typeflow;
pub mod types;
pub mod value;

pub use block::{BasicBlock, BlockId, CatchHandler, Phi};
pub use builder::IrCodeBuilder;
pub use code::IrCode;
pub use instruction::{InstrId, Instruction};
pub use ops::{BinopKind, IfKind, IrOp};
pub use position::{CanonicalPositions, Position};
pub use typeflow::PhiTypeUpdater;
pub use types::{Nullability, TypeElement};
pub use value::{Value, ValueDefinition, ValueId};
