//! Invocation parameters consumed by the configuration cache.
//!
//! These are handed in by the embedding tool; no command line is parsed here.

use std::path::PathBuf;

/// The subset of start parameters the configuration cache depends on.
#[derive(Debug, Clone)]
pub struct StartParameter {
    /// Version of the build tool creating or reading entries.
    pub tool_version: String,
    /// Requested task names, in invocation order.
    pub requested_task_names: Vec<String>,
    /// Excluded task names.
    pub excluded_task_names: Vec<String>,
    /// Invocation directory relative to the build root. Relative task names
    /// resolve against this directory.
    pub invocation_dir: PathBuf,
    /// Directory containing the settings script and tool properties.
    pub settings_dir: PathBuf,
    /// Explicit request to discard and recreate the cache entry.
    pub recreate_cache: bool,
    /// Dependency refresh requested; recorded configuration state is stale.
    pub refresh_dependencies: bool,
    /// Dependency lock writing requested.
    pub write_dependency_locks: bool,
    /// Dependency lock updating requested.
    pub update_dependency_locks: bool,
    /// Offline mode; remote inputs cannot be revalidated.
    pub offline: bool,
}

impl StartParameter {
    /// Whether any invocation flag forces a full store regardless of the
    /// fingerprint verdict.
    #[must_use]
    pub fn forces_store(&self) -> Option<&'static str> {
        if self.recreate_cache {
            Some("--recreate-cache")
        } else if self.refresh_dependencies {
            Some("--refresh-dependencies")
        } else if self.write_dependency_locks {
            Some("--write-locks")
        } else if self.update_dependency_locks {
            Some("--update-locks")
        } else {
            None
        }
    }
}

impl Default for StartParameter {
    fn default() -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            requested_task_names: Vec::new(),
            excluded_task_names: Vec::new(),
            invocation_dir: PathBuf::new(),
            settings_dir: PathBuf::new(),
            recreate_cache: false,
            refresh_dependencies: false,
            write_dependency_locks: false,
            update_dependency_locks: false,
            offline: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_flags_force_store() {
        let mut p = StartParameter::default();
        assert_eq!(p.forces_store(), None);
        p.write_dependency_locks = true;
        assert_eq!(p.forces_store(), Some("--write-locks"));
        p.recreate_cache = true;
        // Recreate wins over lock flags.
        assert_eq!(p.forces_store(), Some("--recreate-cache"));
    }
}
