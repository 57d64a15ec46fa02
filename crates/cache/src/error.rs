//! Error types for the cache crate

use miette::Diagnostic;
use thiserror::Error;

/// Error type for configuration cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Failure encoding or decoding a state file
    #[error("state serialization failed")]
    #[diagnostic(
        code(trellis::cache::serialize),
        help("The entry will be discarded and recreated on the next invocation")
    )]
    Serialize {
        /// The underlying serialization error
        #[source]
        source: trellis_serialize::Error,
    },

    /// Failure accessing the state store
    #[error("cache storage failed")]
    #[diagnostic(code(trellis::cache::store))]
    Store {
        /// The underlying store error
        #[source]
        source: trellis_store::Error,
    },

    /// Failure recording or checking the configuration fingerprint
    #[error("fingerprint handling failed")]
    #[diagnostic(code(trellis::cache::fingerprint))]
    Fingerprint {
        /// The underlying fingerprint error
        #[source]
        source: trellis_fingerprint::Error,
    },

    /// A restored build failed model validation
    #[error("restored state is inconsistent")]
    #[diagnostic(code(trellis::cache::model))]
    Model {
        /// The underlying model error
        #[source]
        source: trellis_model::Error,
    },

    /// Failure reading or writing the entry metadata document
    #[error("entry metadata is unreadable: {message}")]
    #[diagnostic(
        code(trellis::cache::entry),
        help("Delete the cache entry directory to recover")
    )]
    EntryMetadata {
        /// What went wrong with the metadata document
        message: String,
    },

    /// Operation invalid for the controller's current phase
    #[error("invalid configuration cache state: {message}")]
    #[diagnostic(code(trellis::cache::state))]
    InvalidState {
        /// What was attempted and why it is invalid
        message: String,
    },
}

impl Error {
    /// Create an entry-metadata error
    #[must_use]
    pub fn entry_metadata(message: impl Into<String>) -> Self {
        Self::EntryMetadata {
            message: message.into(),
        }
    }

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

impl From<trellis_fingerprint::Error> for Error {
    fn from(source: trellis_fingerprint::Error) -> Self {
        Self::Fingerprint { source }
    }
}

impl From<trellis_model::Error> for Error {
    fn from(source: trellis_model::Error) -> Self {
        Self::Model { source }
    }
}

/// Result type for configuration cache operations
pub type Result<T> = std::result::Result<T, Error>;
