//! User-facing diagnostics.
//!
//! [`Reporter`] collects the messages meant for the person running the compiler:
//! the enum unboxing debug reports, warnings about suspicious input and fatal
//! problems that need a keep rule. Events in [`EventLog`](crate::compiler::EventLog)
//! describe what the compiler did; diagnostics describe what the user should know.

use std::fmt;

use strum::Display;

use crate::{graph::MethodRef, Error};

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Informational output, such as debug reports.
    Info,
    /// Suspicious input that did not stop compilation.
    Warning,
    /// A problem that stopped compilation.
    Fatal,
}

/// A message for the user, optionally attributed to a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The severity.
    pub level: DiagnosticLevel,
    /// The message text.
    pub message: String,
    /// The method the message is about.
    pub origin: Option<MethodRef>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{}: {origin}: {}", self.level, self.message),
            None => write!(f, "{}: {}", self.level, self.message),
        }
    }
}

/// Collects diagnostics from concurrent workers.
pub struct Reporter {
    diagnostics: boxcar::Vec<Diagnostic>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Reporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            diagnostics: boxcar::Vec::new(),
        }
    }

    /// Reports an informational message.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{message}");
        self.push(DiagnosticLevel::Info, message, None);
    }

    /// Reports a warning about `origin`.
    pub fn warning(&self, message: impl Into<String>, origin: Option<&MethodRef>) {
        let message = message.into();
        log::warn!("{message}");
        self.push(DiagnosticLevel::Warning, message, origin.cloned());
    }

    /// Reports a fatal problem in `origin`.
    ///
    /// # Returns
    ///
    /// The [`Error::Fatal`] the caller propagates to stop compilation.
    pub fn fatal(&self, message: impl Into<String>, origin: &MethodRef) -> Error {
        let message = message.into();
        log::error!("{origin}: {message}");
        self.push(DiagnosticLevel::Fatal, message.clone(), Some(origin.clone()));
        Error::Fatal {
            message,
            origin: origin.clone(),
        }
    }

    /// Iterates the diagnostics in reporting order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().map(|(_, d)| d)
    }

    /// Returns the messages of all diagnostics of `level`.
    #[must_use]
    pub fn messages(&self, level: DiagnosticLevel) -> Vec<String> {
        self.iter()
            .filter(|d| d.level == level)
            .map(|d| d.message.clone())
            .collect()
    }

    /// Returns `true` if a fatal diagnostic was reported.
    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.iter().any(|d| d.level == DiagnosticLevel::Fatal)
    }

    fn push(&self, level: DiagnosticLevel, message: String, origin: Option<MethodRef>) {
        self.diagnostics.push(Diagnostic { level, message, origin });
    }
}
