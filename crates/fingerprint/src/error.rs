//! Error types for the fingerprint crate

use miette::Diagnostic;
use thiserror::Error;

/// Error type for fingerprint operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Failure encoding or decoding a fingerprint stream
    #[error("fingerprint serialization failed")]
    #[diagnostic(code(trellis::fingerprint::serialize))]
    Serialize {
        /// The underlying serialization error
        #[source]
        source: trellis_serialize::Error,
    },

    /// Failure accessing fingerprint state files
    #[error("fingerprint storage failed")]
    #[diagnostic(code(trellis::fingerprint::store))]
    Store {
        /// The underlying store error
        #[source]
        source: trellis_store::Error,
    },

    /// Operation invalid for the controller's current state
    #[error("invalid fingerprint controller state: {message}")]
    #[diagnostic(code(trellis::fingerprint::state))]
    InvalidState {
        /// What was attempted and why it is invalid
        message: String,
    },
}

impl Error {
    /// Create an invalid-state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

impl From<trellis_serialize::Error> for Error {
    fn from(source: trellis_serialize::Error) -> Self {
        Self::Serialize { source }
    }
}

impl From<trellis_store::Error> for Error {
    fn from(source: trellis_store::Error) -> Self {
        Self::Store { source }
    }
}

/// Result type for fingerprint operations
pub type Result<T> = std::result::Result<T, Error>;
