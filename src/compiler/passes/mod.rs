//! Whole-program optimization passes.
//!
//! Each pass takes the current [`AppView`](crate::compiler::AppView) and the shared
//! [`CompilerContext`](crate::compiler::CompilerContext) and returns a new view; the
//! input view is never modified.

pub mod enums;

pub use enums::{EnumUnboxingOutcome, EnumUnboxingPass};
