// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # bytelens
//!
//! The rewrite substrate of a whole-program Java bytecode optimizer, together with
//! the enum unboxing optimization that rides on it.
//!
//! Whole-program transformations such as class merging, member rebinding and enum
//! unboxing do not eagerly rewrite every method body. Each one records a *delta*
//! describing how types, methods, fields and signatures changed, and installs that
//! delta as a new layer of a [`GraphLens`](crate::graph::GraphLens) chain. The
//! [`LensCodeRewriter`](crate::compiler::LensCodeRewriter) later applies the
//! installed lens to one method's SSA body at a time, keeping the IR well typed.
//!
//! ## Features
//!
//! - **Program model** - Descriptor based types, method and field references, class
//!   definitions with access flags and a whole-program [`Application`](crate::graph::Application)
//! - **Composable lenses** - Immutable, `Arc`-shared layers with a builder that derives
//!   prototype changes from signature diffs
//! - **SSA IR** - Arena based basic blocks, instructions, values, phis and canonical
//!   source positions
//! - **Lens code rewriting** - Per-opcode instruction rewriting, argument removal and
//!   retyping, constant materialization and catch handler unlinking
//! - **Enum unboxing** - A concurrent, monotonic whole-program analysis that replaces
//!   enum types by their ordinal `int`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bytelens::prelude::*;
//!
//! let view = AppView::new(application, CompilerOptions::default());
//! let ctx = CompilerContext::new();
//! // register IR for every method with ctx.insert_code(...)
//!
//! let outcome = EnumUnboxingPass::new().run(&view, &ctx)?;
//! println!("unboxed {} enums", outcome.unboxed.len());
//! let view = outcome.view;
//! # Ok::<(), bytelens::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`graph`] - Program entities, the lens chain and prototype changes
//! - [`analysis`] - The SSA IR model and type lattice
//! - [`compiler`] - Versioned compiler state, the lens code rewriter and passes
//!
//! ## Thread Safety
//!
//! Installed lenses and [`Application`](crate::graph::Application) snapshots are
//! immutable and shared through `Arc`. Per-method state lives in `DashMap`s owned by
//! [`CompilerContext`](crate::compiler::CompilerContext), so method bodies can be
//! analyzed and rewritten in parallel with `rayon`.

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,ignore
/// use bytelens::prelude::*;
/// ```
pub mod prelude;

/// SSA intermediate representation and the type lattice used to type its values.
pub mod analysis;

/// Versioned compiler state, the lens code rewriter and the optimization passes.
pub mod compiler;

/// Program entities (types, members, classes) and the composable graph lens chain.
pub mod graph;

/// `bytelens` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `bytelens` Error type
///
/// The main error type for all operations in this crate. Provides detailed error information
/// for internal invariant violations, user-actionable fatal diagnostics and failed lookups.
pub use error::Error;
