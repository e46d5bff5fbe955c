//! Source positions and their canonicalization.
//!
//! Every instruction carries a [`Position`]: a source line, an optional file, the method
//! the line belongs to and, for code inlined from another method, the position of the
//! call site in the caller. The caller link makes a position a chain that reproduces
//! the inlined call stack.
//!
//! Positions are immutable. Structurally equal positions compare equal, and
//! [`CanonicalPositions`] hands out one shared instance per distinct position within a
//! compilation unit, so position chains built during IR construction share their tails.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::graph::MethodRef;

#[derive(Debug, PartialEq, Eq, Hash)]
struct PositionData {
    line: u32,
    file: Option<Arc<str>>,
    method: Option<MethodRef>,
    caller: Option<Position>,
    synthetic: bool,
}

/// An immutable source position with an optional caller chain.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Position(Arc<PositionData>);

impl Position {
    /// Creates a position.
    ///
    /// # Arguments
    ///
    /// * `line` - The source line (0 when unknown)
    /// * `file` - The source file, if known
    /// * `method` - The method the line belongs to
    /// * `caller` - The call site position if this code was inlined
    #[must_use]
    pub fn new(line: u32, file: Option<Arc<str>>, method: MethodRef, caller: Option<Position>) -> Self {
        Self(Arc::new(PositionData {
            line,
            file,
            method: Some(method),
            caller,
            synthetic: false,
        }))
    }

    /// Creates a compiler-synthesized position in `method`.
    #[must_use]
    pub fn synthetic(line: u32, method: MethodRef, caller: Option<Position>) -> Self {
        Self(Arc::new(PositionData {
            line,
            file: None,
            method: Some(method),
            caller,
            synthetic: true,
        }))
    }

    /// The absent position.
    #[must_use]
    pub fn none() -> Self {
        Self(Arc::new(PositionData {
            line: 0,
            file: None,
            method: None,
            caller: None,
            synthetic: false,
        }))
    }

    /// An absent line inside a known method, keeping the caller chain.
    #[must_use]
    pub fn none_with_method(method: MethodRef, caller: Option<Position>) -> Self {
        Self(Arc::new(PositionData {
            line: 0,
            file: None,
            method: Some(method),
            caller,
            synthetic: false,
        }))
    }

    /// Returns `true` for the absent position.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.line == 0 && self.0.file.is_none() && !self.0.synthetic
    }

    /// Returns `true` for synthesized positions.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.0.synthetic
    }

    /// Returns the source line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line
    }

    /// Returns the source file.
    #[must_use]
    pub fn file(&self) -> Option<&str> {
        self.0.file.as_deref()
    }

    /// Returns the method the line belongs to.
    #[must_use]
    pub fn method(&self) -> Option<&MethodRef> {
        self.0.method.as_ref()
    }

    /// Returns the call site position of inlined code.
    #[must_use]
    pub fn caller(&self) -> Option<&Position> {
        self.0.caller.as_ref()
    }

    /// Returns the outermost position of the caller chain.
    #[must_use]
    pub fn outermost_caller(&self) -> &Position {
        let mut current = self;
        while let Some(caller) = current.caller() {
            current = caller;
        }
        current
    }

    /// Returns the number of positions in the chain, including this one.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        1 + self.caller().map_or(0, Position::chain_len)
    }

    /// Returns `true` if both handles point to the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Position) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn with_caller(&self, caller: Option<Position>) -> Position {
        Position(Arc::new(PositionData {
            line: self.0.line,
            file: self.0.file.clone(),
            method: self.0.method.clone(),
            caller,
            synthetic: self.0.synthetic,
        }))
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = self.file() {
            write!(f, "{file}:")?;
        }
        write!(f, "{}", self.line())?;
        if let Some(method) = self.method() {
            write!(f, ":{}", method.name)?;
        }
        if let Some(caller) = self.caller() {
            write!(f, " <- {caller}")?;
        }
        Ok(())
    }
}

/// Interns positions for one compilation unit and appends a caller to position chains.
///
/// When a method body is built for inlining into a caller, every position it creates is
/// re-rooted below that caller's call site position.
pub struct CanonicalPositions {
    caller: Option<Position>,
    canonical: HashMap<Position, Position>,
    preamble: Position,
}

impl CanonicalPositions {
    /// Creates a canonicalizer for code of `method`.
    ///
    /// # Arguments
    ///
    /// * `caller` - The call site in the caller if the code is being inlined
    /// * `expected` - Expected number of distinct positions
    /// * `method` - The method whose code is built
    #[must_use]
    pub fn new(caller: Option<Position>, expected: usize, method: MethodRef) -> Self {
        let mut canonical = HashMap::with_capacity(2 + expected);
        if let Some(caller) = &caller {
            canonical.insert(caller.clone(), caller.clone());
        }
        let preamble = match &caller {
            None => Position::synthetic(0, method, None),
            Some(caller) => Position::new(0, None, method, Some(caller.clone())),
        };
        canonical.insert(preamble.clone(), preamble.clone());
        Self {
            caller,
            canonical,
            preamble,
        }
    }

    /// Returns the position of the method preamble (argument instructions).
    #[must_use]
    pub fn preamble(&self) -> &Position {
        &self.preamble
    }

    /// Returns the canonical instance equal to `position`, interning it if unseen.
    pub fn canonical(&mut self, position: Position) -> Position {
        self.canonical
            .entry(position.clone())
            .or_insert(position)
            .clone()
    }

    /// Appends this unit's caller to the end of `position`'s caller chain and returns
    /// the canonical instance of the result.
    pub fn canonicalize_caller_position(&mut self, position: Option<&Position>) -> Option<Position> {
        let Some(position) = position else {
            return self.caller.clone();
        };
        if position.caller().is_none() && self.caller.is_none() {
            return Some(self.canonical(position.clone()));
        }
        let caller_of_caller = self.canonicalize_caller_position(position.caller());
        let rebuilt = if position.is_none() {
            match position.method() {
                Some(method) => Position::none_with_method(method.clone(), caller_of_caller),
                None => position.with_caller(caller_of_caller),
            }
        } else {
            position.with_caller(caller_of_caller)
        };
        Some(self.canonical(rebuilt))
    }

    /// Returns the number of interned positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    /// Returns `true` if no position was interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}
