//! Configuration caching for trellis builds.
//!
//! Stores the fully configured build tree (projects, work graph, services,
//! listeners) keyed by the requested tasks, together with the configuration
//! inputs it depends on. A later invocation with the same key and unchanged
//! inputs skips configuration and restores the work graph directly; when
//! only some projects' inputs changed, their state is recomputed and the
//! rest of the entry is carried over.

mod cache;
mod entry;
mod error;
mod events;
mod models;
mod problems;
mod state;

pub use cache::{ConfigurationCache, ProjectUsageStats, WorkGraphResult};
pub use entry::EntryDetails;
pub use error::{Error, Result};
pub use events::{BuildOperationListener, NoOpListener};
pub use models::{
    IntermediateModelController, ModelKey, ProjectMetadataController, ValueKey, ValuesController,
};
pub use problems::{ConfigurationTimeBarrier, Problems};
pub use state::{StateIo, StoredWorkGraph};
