//! Structured event log for what the passes changed.
//!
//! Every rewrite that alters a method body records an [`Event`]. Passes collect
//! events for one method into a local [`EventLog`] and merge it into the shared log
//! of the [`CompilerContext`](crate::compiler::CompilerContext) once the method is
//! done, so the shared log only ever sees whole per-method batches.
//!
//! # Thread Safety
//!
//! [`EventLog`] is backed by an append-only `boxcar::Vec`; recording and merging take
//! `&self` and can run concurrently from rayon workers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let changes = EventLog::new();
//! changes
//!     .record(EventKind::ConstantMaterialized)
//!     .at(&method, instr)
//!     .message(format!("{value} <- const 0"));
//! if !changes.is_empty() {
//!     ctx.events.merge(changes);
//! }
//! ```

use std::fmt;

use strum::Display;

use crate::{analysis::InstrId, graph::MethodRef};

/// The kind of change an [`Event`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EventKind {
    /// An invoke was retargeted through the lens.
    InvokeRetargeted,
    /// A field access was retargeted or replaced by an accessor call.
    FieldRewritten,
    /// An instruction was rebuilt with a lens-mapped embedded type.
    TypeRewritten,
    /// A constant was materialized for a removed return value or a changed default.
    ConstantMaterialized,
    /// A duplicate catch handler was unlinked.
    CatchHandlerUnlinked,
    /// A block was split to keep a constant outside catch handler coverage.
    BlockSplit,
    /// An enum constant read was replaced by its ordinal.
    EnumConstantUnboxed,
    /// A call of `ordinal()` was redirected to the unboxing utility.
    OrdinalCallRewritten,
    /// A `null` flowing into an unboxed enum slot was replaced by `0`.
    NullUnboxed,
    /// An enum was disqualified from unboxing.
    EnumRejected,
    /// An enum was unboxed.
    EnumUnboxed,
    /// A method body was replaced by a throwing stub.
    MethodStubbed,
    /// A method body was rewritten after a lens was installed.
    MethodReprocessed,
    /// Something unexpected that did not abort compilation.
    Warning,
}

/// One recorded change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The method in which it happened.
    pub method: Option<MethodRef>,
    /// The instruction that was affected.
    pub location: Option<InstrId>,
    /// Free-form detail.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(method) = &self.method {
            write!(f, " {method}")?;
        }
        if let Some(location) = self.location {
            write!(f, " @{location}")?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// An append-only, concurrently writable list of events.
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Starts recording an event; it is appended when the returned recorder drops.
    pub fn record(&self, kind: EventKind) -> EventRecorder<'_> {
        EventRecorder {
            log: self,
            event: Some(Event {
                kind,
                method: None,
                location: None,
                message: String::new(),
            }),
        }
    }

    /// Records a [`EventKind::Warning`] and forwards it to the `log` facade.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.record(EventKind::Warning).message(message);
    }

    /// Appends all events of `other`.
    pub fn merge(&self, other: EventLog) {
        for (_, event) in other.events.iter() {
            self.events.push(event.clone());
        }
    }

    /// Removes and returns all events, leaving this log empty.
    pub fn take(&mut self) -> EventLog {
        std::mem::take(self)
    }

    /// Iterates the events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, event)| event)
    }

    /// Returns the number of events of `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.iter().filter(|e| e.kind == kind).count()
    }

    /// Returns `true` if at least one event of `kind` was recorded.
    #[must_use]
    pub fn has_any(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Fills in an event before it is appended to its log.
pub struct EventRecorder<'a> {
    log: &'a EventLog,
    event: Option<Event>,
}

impl EventRecorder<'_> {
    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: &MethodRef) -> Self {
        if let Some(event) = &mut self.event {
            event.method = Some(method.clone());
        }
        self
    }

    /// Sets the method and the affected instruction.
    #[must_use]
    pub fn at(mut self, method: &MethodRef, location: InstrId) -> Self {
        if let Some(event) = &mut self.event {
            event.method = Some(method.clone());
            event.location = Some(location);
        }
        self
    }

    /// Sets the message and appends the event.
    pub fn message(mut self, message: impl Into<String>) {
        if let Some(event) = &mut self.event {
            event.message = message.into();
        }
    }
}

impl Drop for EventRecorder<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.log.events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DexType, Proto};

    #[test]
    fn test_record_merge_take() {
        let method = MethodRef::new(DexType::class("Main"), "f", Proto::new(DexType::void(), vec![]));
        let local = EventLog::new();
        local
            .record(EventKind::ConstantMaterialized)
            .at(&method, InstrId::new(3))
            .message("v1 <- const 0");
        let _ = local.record(EventKind::TypeRewritten).method(&method);

        let mut shared = EventLog::new();
        shared.merge(local);
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.count(EventKind::ConstantMaterialized), 1);
        assert!(shared.has_any(EventKind::TypeRewritten));
        let first = shared.iter().next().map(ToString::to_string);
        assert_eq!(first.as_deref(), Some("[ConstantMaterialized] LMain;->f()V @i3: v1 <- const 0"));

        let taken = shared.take();
        assert!(shared.is_empty());
        assert_eq!(taken.len(), 2);
    }
}
