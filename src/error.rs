use thiserror::Error;

use crate::emulation::EmulationError;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors produced while weaving are always scoped to a single method. The
/// [`crate::weaver::ModuleWeaver`] records them per method and continues with the
/// remaining targets, so none of these variants is fatal for a whole module.
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::TypeNotFound`] - A required type does not exist in the runtime library or module
/// - [`Error::MemberNotFound`] - A required member does not exist on the resolved type
///
/// ## Structural Errors
/// - [`Error::InvalidMethodShape`] - The method body violates a precondition of the transform
/// - [`Error::Malformed`] - A method body failed structural verification
///
/// ## Context
/// - [`Error::WeaveFailed`] - Wraps any of the above with the name of the method being woven
///
/// ## Execution Errors
/// - [`Error::Emulation`] - The emulation harness could not execute a body
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::{Error, prelude::*};
///
/// # fn example(module: &mut Module) {
/// let report = ModuleWeaver::new(WeaverConfig::default()).execute(module);
/// for (token, error) in &report.failed {
///     match error {
///         Error::WeaveFailed { method, source } => {
///             eprintln!("{token}: could not weave {method}: {source}");
///         }
///         other => eprintln!("{token}: {other}"),
///     }
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A method body is structurally invalid.
    ///
    /// Raised by [`crate::metadata::method::MethodBody::verify`] and by the
    /// instruction assembler. Carries the source location where the problem was
    /// detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A type could not be resolved.
    ///
    /// The associated value is the full name (or token) of the missing type.
    #[error("Failed to resolve type - {0}")]
    TypeNotFound(String),

    /// A member could not be found on its declaring type.
    ///
    /// The weave of the current method cannot proceed without it.
    #[error("Failed to resolve member `{member}` on `{host}`")]
    MemberNotFound {
        /// Full name of the type that was searched
        host: String,
        /// Description of the member that was requested
        member: String,
    },

    /// The method does not satisfy a structural precondition of the transform.
    ///
    /// Examples are bodies without instructions, or constructors that lack the
    /// base constructor call the prologue is anchored after.
    #[error("Invalid method shape for `{method}` - {reason}")]
    InvalidMethodShape {
        /// Full name of the offending method
        method: String,
        /// What precondition was violated
        reason: String,
    },

    /// Weaving a specific method failed.
    ///
    /// Wraps the underlying resolution or structural error with the full name of
    /// the method that was being transformed.
    #[error("Failed to weave `{method}` - {source}")]
    WeaveFailed {
        /// Full name of the method being woven
        method: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The requested operation is not supported.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// The emulation harness failed to execute a method body.
    #[error("{0}")]
    Emulation(#[from] EmulationError),
}
