//! Errors raised by hosted transform backends.

use thiserror::Error;

/// Errors a scripting backend can raise while compiling or running a
/// hosted transform.
///
/// Grounded on the shape of the embedded-engine error enum this crate's
/// teacher used for its own scripting abstraction: a syntax/compile error
/// is distinguished from a runtime failure, and a runtime failure carries
/// whatever diagnostic text the host language produced.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The transform source failed to parse or compile.
    #[error("script failed to compile: {0}")]
    CompileError(String),

    /// The transform raised or returned an error while executing.
    #[error("script runtime error: {message}")]
    RuntimeError {
        /// The host engine's rendered error message.
        message: String,
        /// A backtrace/traceback string, if the host engine provided one.
        backtrace: Option<String>,
    },

    /// A value crossing the Rust/script boundary could not be converted.
    #[error("type conversion error: {0}")]
    TypeConversionError(String),

    /// The underlying scripting engine could not be initialized.
    #[error("backend initialization error: {0}")]
    BackendError(String),
}

impl ScriptError {
    /// Renders this error as the plain message [`dataflow_core::HostedTransform::call`]
    /// returns on failure.
    #[must_use]
    pub fn into_message(self) -> String {
        self.to_string()
    }
}
