//! Colon-separated identity paths for builds and projects.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker that distinguishes absolute task paths from relative task names.
pub const PATH_SEPARATOR: char = ':';

/// Identity path of a project (or build) within the build tree, such as
/// `:` for the root or `:app:core` for a nested project.
///
/// Paths are ordered lexicographically, which places every ancestor before
/// its descendants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectPath(String);

impl ProjectPath {
    /// The root path `:`.
    #[must_use]
    pub fn root() -> Self {
        Self(String::from(":"))
    }

    /// Parse a path string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProjectPath`] if the string does not start
    /// with `:` or contains empty segments.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let valid = path == ":"
            || (path.starts_with(PATH_SEPARATOR)
                && !path.ends_with(PATH_SEPARATOR)
                && path[1..].split(PATH_SEPARATOR).all(|s| !s.is_empty()));
        if valid {
            Ok(Self(path))
        } else {
            Err(Error::InvalidProjectPath { path })
        }
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ":"
    }

    /// The parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(PATH_SEPARATOR) {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// The last path segment, or the empty string for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        if self.is_root() {
            ""
        } else {
            self.0
                .rsplit(PATH_SEPARATOR)
                .next()
                .unwrap_or_default()
        }
    }

    /// Append a child segment.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        if self.is_root() {
            Self(format!(":{name}"))
        } else {
            Self(format!("{}:{name}", self.0))
        }
    }

    /// The path as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a requested task name is relative, i.e. resolved against the
/// invocation directory rather than the build root.
#[must_use]
pub fn is_relative_task_name(name: &str) -> bool {
    !name.starts_with(PATH_SEPARATOR)
}
