//! Build operation notifications fired while restoring state.
//!
//! A restored build must look like a configured build to the rest of the
//! tool, so loading fires the same notifications configuration would.

use trellis_model::ProjectPath;

/// Receives the notifications a non-cached run would emit during
/// configuration.
pub trait BuildOperationListener: Send + Sync {
    /// All projects of a build are known.
    fn projects_loaded(&self, build: &ProjectPath, project_count: usize);

    /// One project's state has been restored.
    fn project_restored(&self, project: &ProjectPath);
}

/// Listener that drops all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpListener;

impl BuildOperationListener for NoOpListener {
    fn projects_loaded(&self, _build: &ProjectPath, _project_count: usize) {}

    fn project_restored(&self, _project: &ProjectPath) {}
}
