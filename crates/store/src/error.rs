//! Error types for the store crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for state-store operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during store operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(trellis::store::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "lock")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Store configuration error: {message}")]
    #[diagnostic(code(trellis::store::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Operation not available on this handle
    #[error("Operation not supported: {operation}")]
    #[diagnostic(
        code(trellis::store::unsupported),
        help("Load handles are read-only; writing requires use_for_store")
    )]
    UnsupportedOperation {
        /// The rejected operation
        operation: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an unsupported-operation error
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;
