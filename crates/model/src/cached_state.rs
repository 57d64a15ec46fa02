//! The restored shape of a build, as reconstructed from a cache entry.

use crate::paths::ProjectPath;
use crate::work_graph::ScheduledWork;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A project as restored from the cache.
///
/// Projects that own scheduled work carry everything needed to execute it;
/// projects restored only to complete the tree carry identity and layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedProjectState {
    /// Project with at least one scheduled work node.
    WithWork {
        /// Identity path within the build.
        path: ProjectPath,
        /// Project directory.
        project_dir: PathBuf,
        /// Build script file.
        build_file: PathBuf,
        /// Output directory for build artifacts.
        build_dir: PathBuf,
    },
    /// Ancestor project restored only so the tree has no gaps.
    WithNoWork {
        /// Identity path within the build.
        path: ProjectPath,
        /// Project directory.
        project_dir: PathBuf,
        /// Build script file.
        build_file: PathBuf,
    },
}

impl CachedProjectState {
    /// The project's identity path.
    #[must_use]
    pub fn path(&self) -> &ProjectPath {
        match self {
            Self::WithWork { path, .. } | Self::WithNoWork { path, .. } => path,
        }
    }

    /// Whether the project owns scheduled work.
    #[must_use]
    pub fn has_work(&self) -> bool {
        matches!(self, Self::WithWork { .. })
    }
}

/// A build as restored from a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedBuildState {
    /// Build whose projects were never registered (settings-only).
    BuildWithNoProjects {
        /// Identity path of the build within the tree.
        identity_path: ProjectPath,
    },
    /// Build with registered projects but no scheduled work of its own.
    BuildWithNoWork {
        /// Identity path of the build within the tree.
        identity_path: ProjectPath,
        /// Name of the root project.
        root_project_name: String,
        /// Restored projects.
        projects: Vec<CachedProjectState>,
    },
    /// Build contributing scheduled work.
    BuildWithWork {
        /// Identity path of the build within the tree.
        identity_path: ProjectPath,
        /// Name of the root project.
        root_project_name: String,
        /// Restored projects.
        projects: Vec<CachedProjectState>,
        /// The restored work graph.
        work_graph: ScheduledWork,
    },
}

impl CachedBuildState {
    /// Identity path of the build.
    #[must_use]
    pub fn identity_path(&self) -> &ProjectPath {
        match self {
            Self::BuildWithNoProjects { identity_path }
            | Self::BuildWithNoWork { identity_path, .. }
            | Self::BuildWithWork { identity_path, .. } => identity_path,
        }
    }

    /// Restored projects, empty for settings-only builds.
    #[must_use]
    pub fn projects(&self) -> &[CachedProjectState] {
        match self {
            Self::BuildWithNoProjects { .. } => &[],
            Self::BuildWithNoWork { projects, .. } | Self::BuildWithWork { projects, .. } => {
                projects
            }
        }
    }

    /// The restored work graph, if this build contributes work.
    #[must_use]
    pub fn work_graph(&self) -> Option<&ScheduledWork> {
        match self {
            Self::BuildWithWork { work_graph, .. } => Some(work_graph),
            _ => None,
        }
    }

    /// Check that every work node naming a project refers to one of the
    /// restored projects, and that the graph itself is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DanglingProjectReference`] for a node whose owning
    /// project was not restored, or the graph's own validation error.
    pub fn validate(&self) -> Result<()> {
        let Some(work) = self.work_graph() else {
            return Ok(());
        };
        work.validate()?;
        let known: BTreeSet<&ProjectPath> = self.projects().iter().map(|p| p.path()).collect();
        for node in &work.nodes {
            if let Some(project) = &node.project
                && !known.contains(project)
            {
                return Err(Error::DanglingProjectReference {
                    node: node.task_path.clone(),
                    project: project.as_str().to_string(),
                });
            }
        }
        Ok(())
    }
}
