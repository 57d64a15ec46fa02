//! The live build-tree model handed to the cache for storing.
//!
//! This is the host-side view: the embedding tool assembles one of these
//! after configuration, and the cache serializes it. Loading produces
//! [`crate::CachedBuildState`] values instead, which carry only what
//! execution needs.

use crate::paths::ProjectPath;
use crate::work_graph::ScheduledWork;
use std::collections::BTreeMap;
use std::path::PathBuf;
use trellis_serialize::Value;

/// Snapshot of the host environment taken at configuration time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentSnapshot {
    /// Environment variables read during configuration.
    pub env_vars: BTreeMap<String, String>,
    /// Tool properties in effect during configuration.
    pub properties: BTreeMap<String, String>,
}

/// Build cache configuration captured at configuration time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildCacheConfiguration {
    /// Whether the local build cache is enabled.
    pub local_enabled: bool,
    /// Local cache directory override, if any.
    pub local_directory: Option<PathBuf>,
    /// Remote cache endpoint, if any.
    pub remote_url: Option<String>,
    /// Whether pushing to the remote cache is allowed.
    pub remote_push: bool,
}

/// A build service registered by some build in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildServiceRegistration {
    /// Identity path of the registering build.
    pub build: ProjectPath,
    /// Service name, unique within the registering build.
    pub name: String,
    /// User-provided service parameters.
    pub parameters: Value,
}

/// A build-event listener subscription.
///
/// Service-backed listeners are recorded by reference so the restored build
/// re-resolves the service; ad-hoc listeners are captured by value.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEventListener {
    /// Listener backed by a registered build service.
    Service {
        /// Identity path of the build owning the service.
        build: ProjectPath,
        /// Name of the service within that build.
        name: String,
    },
    /// Listener captured as a plain value.
    Instance(Value),
}

/// One project of a build, as known at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectModel {
    /// Identity path within the build.
    pub path: ProjectPath,
    /// Project directory.
    pub project_dir: PathBuf,
    /// Build script file.
    pub build_file: PathBuf,
    /// Output directory for build artifacts.
    pub build_dir: PathBuf,
}

/// One build of the tree, with its included builds nested inside.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildModel {
    /// Identity path of the build within the tree.
    pub identity_path: ProjectPath,
    /// Build name, used to suffix this build's sibling state files.
    pub name: String,
    /// Build root directory.
    pub root_dir: PathBuf,
    /// Name of the root project.
    pub root_project_name: String,
    /// Whether this build exists only to provide plugins.
    pub is_plugin_build: bool,
    /// Registered projects.
    pub projects: Vec<ProjectModel>,
    /// Builds included by this build.
    pub included_builds: Vec<BuildModel>,
    /// Directories registered for cleanup on cache misses.
    pub cleanup_registrations: Vec<PathBuf>,
    /// Build services this build requires at execution time.
    pub required_services: Vec<BuildServiceRegistration>,
    /// Whether the build declares source dependencies.
    pub has_source_dependencies: bool,
    /// Scheduled work, if any tasks were requested from this build.
    pub scheduled_work: Option<ScheduledWork>,
}

impl BuildModel {
    /// Projects relevant to the scheduled work: the owners of work nodes
    /// plus every ancestor needed to complete the tree.
    #[must_use]
    pub fn relevant_projects(&self) -> Vec<ProjectPath> {
        let owners = self
            .scheduled_work
            .as_ref()
            .map(ScheduledWork::relevant_projects)
            .unwrap_or_default();
        crate::work_graph::fill_the_gaps_of(&owners)
    }

    /// Look up a registered project by identity path.
    #[must_use]
    pub fn project(&self, path: &ProjectPath) -> Option<&ProjectModel> {
        self.projects.iter().find(|p| &p.path == path)
    }
}

/// The whole build tree as assembled at configuration time.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTreeModel {
    /// The root build, with included builds nested inside it.
    pub root_build: BuildModel,
    /// Environment snapshot shared by the whole tree.
    pub environment: EnvironmentSnapshot,
    /// Build cache configuration shared by the whole tree.
    pub build_cache: BuildCacheConfiguration,
    /// Build-event listener subscriptions.
    pub event_listeners: Vec<BuildEventListener>,
}
