//! Error types for the model crate

use miette::Diagnostic;
use thiserror::Error;

/// Error type for model validation and construction
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A project identity path that does not follow the `:a:b` form
    #[error("invalid project path: {path}")]
    #[diagnostic(
        code(trellis::model::invalid_path),
        help("Project paths are colon-separated and start with ':'")
    )]
    InvalidProjectPath {
        /// The offending path string
        path: String,
    },

    /// A work node referencing a project absent from every cached build
    #[error("work node '{node}' references unknown project '{project}'")]
    #[diagnostic(
        code(trellis::model::dangling_project),
        help("Cached work graphs may only reference projects captured in the same entry")
    )]
    DanglingProjectReference {
        /// Task path of the offending node
        node: String,
        /// The unknown project path
        project: String,
    },

    /// A work node depending on a node id that was never scheduled
    #[error("work node '{node}' depends on unknown node id {dependency}")]
    #[diagnostic(code(trellis::model::missing_dependency))]
    MissingDependency {
        /// Task path of the offending node
        node: String,
        /// The unresolved dependency id
        dependency: u64,
    },

    /// A dependency cycle in the scheduled work graph
    #[error("scheduled work graph contains a dependency cycle")]
    #[diagnostic(code(trellis::model::cycle))]
    CycleDetected,
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, Error>;
