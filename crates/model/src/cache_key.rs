//! Cache-key computation.
//!
//! The key selects the on-disk entry for an invocation. It is a pure
//! function of the start parameters: tool version, requested task names
//! (order-sensitive, count-prefixed) and excluded task names. The relative
//! invocation directory participates only when at least one task name is
//! relative, since unqualified names resolve differently per directory while
//! absolute task paths do not.

use crate::paths::is_relative_task_name;
use crate::start_parameter::StartParameter;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Memoized cache key for one invocation.
#[derive(Debug)]
pub struct CacheKey {
    tool_version: String,
    requested_task_names: Vec<String>,
    excluded_task_names: Vec<String>,
    relative_dir: Option<String>,
    string: OnceLock<String>,
}

impl CacheKey {
    /// Capture the key inputs from the start parameters.
    #[must_use]
    pub fn new(start_parameter: &StartParameter) -> Self {
        let any_relative = start_parameter
            .requested_task_names
            .iter()
            .chain(&start_parameter.excluded_task_names)
            .any(|name| is_relative_task_name(name));
        Self {
            tool_version: start_parameter.tool_version.clone(),
            requested_task_names: start_parameter.requested_task_names.clone(),
            excluded_task_names: start_parameter.excluded_task_names.clone(),
            relative_dir: any_relative
                .then(|| start_parameter.invocation_dir.to_string_lossy().into_owned()),
            string: OnceLock::new(),
        }
    }

    /// The key string, computed on first access and memoized.
    #[must_use]
    pub fn string(&self) -> &str {
        self.string.get_or_init(|| self.compute())
    }

    fn compute(&self) -> String {
        let mut hasher = Sha256::new();
        hash_str(&mut hasher, &self.tool_version);
        hash_names(&mut hasher, &self.requested_task_names);
        hash_names(&mut hasher, &self.excluded_task_names);
        match &self.relative_dir {
            Some(dir) => {
                hasher.update([1u8]);
                hash_str(&mut hasher, dir);
            }
            None => hasher.update([0u8]),
        }
        hex::encode(hasher.finalize())
    }
}

fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn hash_names(hasher: &mut Sha256, names: &[String]) {
    hasher.update((names.len() as u64).to_le_bytes());
    for name in names {
        hash_str(hasher, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn params(tasks: &[&str], dir: &str) -> StartParameter {
        StartParameter {
            requested_task_names: tasks.iter().map(ToString::to_string).collect(),
            invocation_dir: PathBuf::from(dir),
            ..StartParameter::default()
        }
    }

    #[test]
    fn key_is_deterministic() {
        let p = params(&["build", "check"], "sub");
        let a = CacheKey::new(&p);
        let b = CacheKey::new(&p);
        assert_eq!(a.string(), b.string());
        // Memoized: repeated access yields the same value.
        assert_eq!(a.string(), a.string());
    }

    #[test]
    fn key_changes_with_task_names_and_order() {
        let base = CacheKey::new(&params(&["build"], ""));
        assert_ne!(
            base.string(),
            CacheKey::new(&params(&["check"], "")).string()
        );
        assert_ne!(
            CacheKey::new(&params(&["build", "check"], "")).string(),
            CacheKey::new(&params(&["check", "build"], "")).string()
        );
    }

    #[test]
    fn key_changes_with_excluded_tasks() {
        let mut p = params(&["build"], "");
        let base = CacheKey::new(&p).string().to_string();
        p.excluded_task_names = vec!["test".to_string()];
        assert_ne!(base, CacheKey::new(&p).string());
    }

    #[test]
    fn relative_tasks_bind_the_invocation_directory() {
        // Relative task name: directory participates in the key.
        assert_ne!(
            CacheKey::new(&params(&["build"], "a")).string(),
            CacheKey::new(&params(&["build"], "b")).string()
        );
        // Absolute task path: directory is irrelevant.
        assert_eq!(
            CacheKey::new(&params(&[":app:build"], "a")).string(),
            CacheKey::new(&params(&[":app:build"], "b")).string()
        );
    }

    #[test]
    fn task_list_shape_cannot_collide() {
        // Count-prefixing keeps ["a", "b"] distinct from ["ab"] and ["a b"].
        assert_ne!(
            CacheKey::new(&params(&["a", "b"], "")).string(),
            CacheKey::new(&params(&["ab"], "")).string()
        );
    }

    #[test]
    fn key_changes_with_tool_version() {
        let mut p = params(&[":build"], "");
        let base = CacheKey::new(&p).string().to_string();
        p.tool_version = "999.0.0".to_string();
        assert_ne!(base, CacheKey::new(&p).string());
    }
}
