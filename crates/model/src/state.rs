//! State-file typing and the cache decision vocabulary.

use crate::paths::ProjectPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The typed state files making up one cache entry.
///
/// Fingerprint files are deliberately separate from the heavyweight work and
/// model files: validity is checked before committing to a full load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    /// Serialized build tree and task/work graph.
    Work,
    /// Serialized tooling model object.
    Model,
    /// Cache-entry metadata; written last, read first.
    Entry,
    /// Build-global recorded inputs.
    BuildFingerprint,
    /// Per-project recorded inputs.
    ProjectFingerprint,
    /// Per-project cached tooling-model fragments.
    IntermediateModels,
    /// Per-project dependency-resolution metadata.
    ProjectMetadata,
}

impl StateType {
    /// All state types, in entry-layout order.
    pub const ALL: [Self; 7] = [
        Self::Work,
        Self::Model,
        Self::Entry,
        Self::BuildFingerprint,
        Self::ProjectFingerprint,
        Self::IntermediateModels,
        Self::ProjectMetadata,
    ];

    /// File name within the cache-key directory.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Work => "work.bin",
            Self::Model => "model.bin",
            Self::Entry => "entry.bin",
            Self::BuildFingerprint => "buildfingerprint.bin",
            Self::ProjectFingerprint => "projectfingerprint.bin",
            Self::IntermediateModels => "intermediatemodels.bin",
            Self::ProjectMetadata => "projectmetadata.bin",
        }
    }

    /// Whether the byte stream of this state type passes through the
    /// configured stream transform when encryption is enabled.
    #[must_use]
    pub fn encryptable(self) -> bool {
        match self {
            Self::Work
            | Self::Model
            | Self::BuildFingerprint
            | Self::ProjectFingerprint
            | Self::IntermediateModels => true,
            Self::Entry | Self::ProjectMetadata => false,
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// The code path an invocation takes, decided once from the fingerprint
/// verdict and invocation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Run configuration and write a fresh entry.
    Store,
    /// Skip configuration and deserialize stored state.
    Load,
    /// Reuse unaffected projects, reconfigure invalidated ones.
    Update,
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Store => "store",
            Self::Load => "load",
            Self::Update => "update",
        })
    }
}

/// Human-readable reason a recorded input no longer matches the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReason(String);

impl InvalidationReason {
    /// Wrap a rendered reason message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The rendered message.
    #[must_use]
    pub fn render(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for InvalidationReason {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Terminal states of fingerprint validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckedFingerprint {
    /// No entry file exists for the cache key.
    NotFound,
    /// Every recorded input still matches; the entry is fully reusable.
    Valid,
    /// A build-scoped input changed; the whole entry is unusable.
    EntryInvalid {
        /// Why the entry cannot be reused.
        reason: InvalidationReason,
    },
    /// Only some projects' inputs changed; the rest of the entry is
    /// reusable.
    ProjectsInvalid {
        /// The first invalidation observed, used for reporting.
        reason: InvalidationReason,
        /// Identity paths of the projects that must be reconfigured.
        invalid_projects: BTreeSet<ProjectPath>,
    },
}

impl CheckedFingerprint {
    /// Whether the whole entry can be loaded as-is.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}
