//! Error types for the serialization engine

use miette::Diagnostic;
use thiserror::Error;

/// Error type for serialization operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading or writing a state stream
    #[error("I/O {operation} failed at stream offset {position}")]
    #[diagnostic(
        code(trellis::serialize::io),
        help("The state file may be truncated or the underlying stream was closed early")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Operation that failed (e.g. "read", "write", "flush")
        operation: String,
        /// Stream offset at which the operation failed
        position: u64,
    },

    /// Structural corruption detected in a state stream
    #[error("corrupt state file: {message}")]
    #[diagnostic(
        code(trellis::serialize::corrupt),
        help("The cache entry will be discarded and the configuration re-run")
    )]
    Corrupt {
        /// Description of the structural problem
        message: String,
    },

    /// A value kind that is not legal in the active codec set
    #[error("value of kind {kind} is not supported by the {codec} codec")]
    #[diagnostic(code(trellis::serialize::unsupported_value))]
    UnsupportedValue {
        /// The offending value kind
        kind: &'static str,
        /// The codec set that rejected it
        codec: &'static str,
    },

    /// A shared-value reference pointing outside the current isolate
    #[error("shared reference {id} is not present in the current isolate")]
    #[diagnostic(
        code(trellis::serialize::dangling_reference),
        help("Write and read isolate scopes must match exactly")
    )]
    DanglingReference {
        /// The unresolved reference id
        id: u32,
    },
}

impl Error {
    /// Create an I/O error with stream position context
    #[must_use]
    pub fn io(source: std::io::Error, operation: impl Into<String>, position: u64) -> Self {
        Self::Io {
            source,
            operation: operation.into(),
            position,
        }
    }

    /// Create a corruption error
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// Result type for serialization operations
pub type Result<T> = std::result::Result<T, Error>;
