use thiserror::Error;

use crate::graph::{DexType, MethodRef};

macro_rules! internal_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Disqualifying an enum from unboxing is *not* an error. That outcome is expressed as a
/// [`Reason`](crate::compiler::Reason) and never aborts compilation. The variants below are
/// reserved for conditions that stop the current compilation.
///
/// # Error Categories
///
/// ## Compiler Defects
/// - [`Error::Internal`] - A lens or rewriter invariant was violated
/// - [`Error::LensConflict`] - Two lens layers describe the same prototype change
///
/// ## User-actionable Failures
/// - [`Error::Fatal`] - The program shape cannot be rewritten without a keep rule
///
/// ## Lookup Errors
/// - [`Error::MissingDefinition`] - A class definition is absent from the application
///
/// # Examples
///
/// ```rust,ignore
/// use bytelens::Error;
///
/// match rewriter.rewrite(&mut code, &ctx) {
///     Ok(()) => {}
///     Err(Error::Fatal { message, origin }) => eprintln!("{origin}: {message}"),
///     Err(Error::Internal { message, file, line }) => {
///         eprintln!("internal error: {message} ({file}:{line})")
///     }
///     Err(e) => eprintln!("error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An internal compiler invariant was violated.
    ///
    /// These errors are never caused by the input program. They indicate a defect in a
    /// transformation, for example a rewritten call whose actual return type disagrees with
    /// the type expected through the lens.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the violated invariant
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Internal compiler error - {file}:{line}: {message}")]
    Internal {
        /// The message to be printed for the Internal error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A fatal, user-actionable diagnostic.
    ///
    /// Raised when a program shape is only detected as unrepresentable while rewriting,
    /// such as a direct constructor call on a class that was vertically merged into the
    /// instantiated subtype. The message names the keep rule that avoids the problem.
    #[error("{origin}: {message}")]
    Fatal {
        /// The user-facing message
        message: String,
        /// The method in which the problem was detected
        origin: MethodRef,
    },

    /// A method's prototype change is already described by an earlier lens layer.
    ///
    /// Each prototype change is recorded in exactly one layer. Building a layer that
    /// describes the change again would make the change apply twice.
    #[error("Prototype change for {0} is already recorded by a previous lens")]
    LensConflict(MethodRef),

    /// The application has no definition for this type.
    #[error("Missing class definition - {0}")]
    MissingDefinition(DexType),
}
