//! Data model for the trellis configuration cache.
//!
//! Defines the vocabulary shared by the store, fingerprint and cache crates:
//! identity paths, start parameters and the cache key derived from them, the
//! typed state files of an entry, the live build-tree model captured at
//! configuration time and the cached shape restored from an entry.

pub mod cache_key;
pub mod cached_state;
mod error;
pub mod paths;
pub mod start_parameter;
pub mod state;
pub mod tree;
pub mod work_graph;

pub use cache_key::CacheKey;
pub use cached_state::{CachedBuildState, CachedProjectState};
pub use error::{Error, Result};
pub use paths::{is_relative_task_name, ProjectPath, PATH_SEPARATOR};
pub use start_parameter::StartParameter;
pub use state::{CacheAction, CheckedFingerprint, InvalidationReason, StateType};
pub use tree::{
    BuildCacheConfiguration, BuildEventListener, BuildModel, BuildServiceRegistration,
    BuildTreeModel, EnvironmentSnapshot, ProjectModel,
};
pub use work_graph::{fill_the_gaps_of, ScheduledWork, WorkNode};
