//! Validation of recorded fingerprints against the current environment.
//!
//! Build-scoped checking stops at the first mismatch: one stale build-scoped
//! input makes the whole entry unusable. Project-scoped checking reads the
//! entire stream, collecting the set of invalid projects and propagating
//! invalidation to projects that consumed them.

use crate::environment::BuildEnvironment;
use crate::inputs::{read_build_input, read_project_input, BuildInput, ProjectInput};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use tracing::debug;
use trellis_model::{InvalidationReason, ProjectPath};
use trellis_serialize::ReadContext;

/// Compare one recorded input against the current environment.
/// Returns the rendered reason when it no longer matches.
fn invalid_reason(
    input: &BuildInput,
    env: &dyn BuildEnvironment,
    current_key_hash: Option<&str>,
) -> Option<String> {
    match input {
        BuildInput::InputFile { path, hash } => {
            let current = env.hash_file(path);
            if current == *hash {
                None
            } else if current.is_none() {
                Some(format!("file '{}' has been removed", path.display()))
            } else {
                Some(format!("file '{}' has changed", path.display()))
            }
        }
        BuildInput::DirectoryContent { path, hash } => {
            (env.hash_directory_content(path) != *hash)
                .then(|| format!("directory '{}' has changed", path.display()))
        }
        BuildInput::EnvVar { name, value } => (env.env_var(name) != *value)
            .then(|| format!("environment variable '{name}' has changed")),
        BuildInput::BuildProperty { name, value } => (env.build_property(name) != *value)
            .then(|| format!("build property '{name}' has changed")),
        BuildInput::ValueSource {
            description,
            obtained,
        } => (env.obtain_value_source(description) != *obtained)
            .then(|| format!("value source '{description}' has changed")),
        BuildInput::InitScripts { hashes } => {
            let current = env.init_script_hashes();
            if current.len() != hashes.len() {
                return Some("init scripts have been added or removed".to_string());
            }
            for ((path, hash), (cur_path, cur_hash)) in hashes.iter().zip(&current) {
                if path != cur_path {
                    return Some("init scripts have been added or removed".to_string());
                }
                if hash != cur_hash {
                    return Some(format!("init script '{}' has changed", path.display()));
                }
            }
            None
        }
        BuildInput::ToolEnvironment {
            version,
            properties_hash,
        } => {
            if *version != env.tool_version() {
                Some("the version of the build tool has changed".to_string())
            } else if *properties_hash != env.tool_properties_hash() {
                Some("tool start properties have changed".to_string())
            } else {
                None
            }
        }
        BuildInput::EncryptionKeyHash { hash } => (hash.as_deref() != current_key_hash)
            .then(|| "the encryption key has changed".to_string()),
    }
}

/// Check the build-scoped stream; `Some(reason)` at the first stale input.
pub(crate) fn check_build_inputs<R: Read>(
    ctx: &mut ReadContext<R>,
    env: &dyn BuildEnvironment,
    current_key_hash: Option<&str>,
) -> Result<Option<InvalidationReason>> {
    while let Some(input) = read_build_input(ctx)? {
        if let Some(reason) = invalid_reason(&input, env, current_key_hash) {
            debug!(%reason, "build-scoped input invalidated");
            return Ok(Some(InvalidationReason::new(reason)));
        }
    }
    Ok(None)
}

/// Outcome of checking the project-scoped stream.
#[derive(Debug)]
pub(crate) struct ProjectCheck {
    /// First invalidation observed, for reporting.
    pub first_reason: Option<InvalidationReason>,
    /// All projects that must be reconfigured.
    pub invalid_projects: BTreeSet<ProjectPath>,
}

impl ProjectCheck {
    pub(crate) fn all_valid(&self) -> bool {
        self.invalid_projects.is_empty()
    }
}

/// Check the project-scoped stream, propagating invalidation to consumers.
pub(crate) fn check_project_inputs<R: Read>(
    ctx: &mut ReadContext<R>,
    env: &dyn BuildEnvironment,
    current_key_hash: Option<&str>,
) -> Result<ProjectCheck> {
    let mut invalid: BTreeMap<ProjectPath, String> = BTreeMap::new();
    let mut first_reason: Option<InvalidationReason> = None;
    let mut edges: Vec<(ProjectPath, ProjectPath)> = Vec::new();

    while let Some(entry) = read_project_input(ctx)? {
        match entry {
            ProjectInput::Input { project, input } => {
                if invalid.contains_key(&project) {
                    continue;
                }
                if let Some(reason) = invalid_reason(&input, env, current_key_hash) {
                    debug!(project = %project, %reason, "project-scoped input invalidated");
                    if first_reason.is_none() {
                        first_reason = Some(InvalidationReason::new(reason.clone()));
                    }
                    invalid.insert(project, reason);
                }
            }
            ProjectInput::ProjectDependency { consumer, target } => {
                edges.push((consumer, target));
            }
        }
    }

    // Invalidation flows from consumed project to consumer, transitively.
    let mut changed = true;
    while changed {
        changed = false;
        for (consumer, target) in &edges {
            if invalid.contains_key(target) && !invalid.contains_key(consumer) {
                invalid.insert(
                    consumer.clone(),
                    format!("the configuration of project '{target}' has changed"),
                );
                changed = true;
            }
        }
    }

    Ok(ProjectCheck {
        first_reason,
        invalid_projects: invalid.into_keys().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::write_end;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use trellis_serialize::{Codecs, Value, WriteContext};

    #[derive(Default)]
    struct FakeEnvironment {
        files: HashMap<PathBuf, String>,
        env: HashMap<String, String>,
    }

    impl BuildEnvironment for FakeEnvironment {
        fn hash_file(&self, path: &Path) -> Option<String> {
            self.files.get(path).cloned()
        }

        fn hash_directory_content(&self, _path: &Path) -> Option<String> {
            None
        }

        fn env_var(&self, name: &str) -> Option<String> {
            self.env.get(name).cloned()
        }

        fn build_property(&self, _name: &str) -> Option<String> {
            None
        }

        fn obtain_value_source(&self, _description: &str) -> Value {
            Value::String("obtained".to_string())
        }

        fn init_script_hashes(&self) -> Vec<(PathBuf, Option<String>)> {
            Vec::new()
        }

        fn tool_version(&self) -> String {
            "0.9.2".to_string()
        }

        fn tool_properties_hash(&self) -> String {
            "props".to_string()
        }
    }

    fn build_stream(inputs: &[BuildInput]) -> Vec<u8> {
        let mut ctx = WriteContext::new(Vec::new(), Codecs::new());
        for input in inputs {
            input.encode(&mut ctx).unwrap();
        }
        write_end(&mut ctx).unwrap();
        ctx.finish().unwrap()
    }

    fn project_stream(entries: &[ProjectInput]) -> Vec<u8> {
        let mut ctx = WriteContext::new(Vec::new(), Codecs::new());
        for entry in entries {
            entry.encode(&mut ctx).unwrap();
        }
        write_end(&mut ctx).unwrap();
        ctx.finish().unwrap()
    }

    fn path(s: &str) -> ProjectPath {
        ProjectPath::new(s).unwrap()
    }

    #[test]
    fn matching_build_inputs_are_valid() {
        let mut env = FakeEnvironment::default();
        env.files
            .insert(PathBuf::from("settings.trellis"), "h1".to_string());
        let stream = build_stream(&[BuildInput::InputFile {
            path: PathBuf::from("settings.trellis"),
            hash: Some("h1".to_string()),
        }]);
        let mut ctx = ReadContext::new(stream.as_slice(), Codecs::new());
        assert!(check_build_inputs(&mut ctx, &env, None).unwrap().is_none());
    }

    #[test]
    fn changed_file_invalidates_with_message() {
        let mut env = FakeEnvironment::default();
        env.files
            .insert(PathBuf::from("settings.trellis"), "h2".to_string());
        let stream = build_stream(&[BuildInput::InputFile {
            path: PathBuf::from("settings.trellis"),
            hash: Some("h1".to_string()),
        }]);
        let mut ctx = ReadContext::new(stream.as_slice(), Codecs::new());
        let reason = check_build_inputs(&mut ctx, &env, None).unwrap().unwrap();
        assert_eq!(reason.render(), "file 'settings.trellis' has changed");
    }

    #[test]
    fn removed_file_reports_removal() {
        let env = FakeEnvironment::default();
        let stream = build_stream(&[BuildInput::InputFile {
            path: PathBuf::from("deps.lock"),
            hash: Some("h1".to_string()),
        }]);
        let mut ctx = ReadContext::new(stream.as_slice(), Codecs::new());
        let reason = check_build_inputs(&mut ctx, &env, None).unwrap().unwrap();
        assert_eq!(reason.render(), "file 'deps.lock' has been removed");
    }

    #[test]
    fn encryption_key_change_invalidates() {
        let env = FakeEnvironment::default();
        let stream = build_stream(&[BuildInput::EncryptionKeyHash {
            hash: Some("old-key".to_string()),
        }]);
        let mut ctx = ReadContext::new(stream.as_slice(), Codecs::new());
        let reason = check_build_inputs(&mut ctx, &env, Some("new-key"))
            .unwrap()
            .unwrap();
        assert_eq!(reason.render(), "the encryption key has changed");
    }

    #[test]
    fn invalidation_propagates_to_consumers() {
        let mut env = FakeEnvironment::default();
        env.env.insert("CC".to_string(), "clang".to_string());
        let stream = project_stream(&[
            ProjectInput::Input {
                project: path(":lib"),
                input: BuildInput::EnvVar {
                    name: "CC".to_string(),
                    value: Some("gcc".to_string()),
                },
            },
            ProjectInput::Input {
                project: path(":other"),
                input: BuildInput::EnvVar {
                    name: "CC".to_string(),
                    value: Some("clang".to_string()),
                },
            },
            ProjectInput::ProjectDependency {
                consumer: path(":app"),
                target: path(":lib"),
            },
            ProjectInput::ProjectDependency {
                consumer: path(":cli"),
                target: path(":app"),
            },
        ]);
        let mut ctx = ReadContext::new(stream.as_slice(), Codecs::new());
        let check = check_project_inputs(&mut ctx, &env, None).unwrap();
        assert_eq!(
            check.invalid_projects,
            [path(":app"), path(":cli"), path(":lib")].into_iter().collect()
        );
        assert_eq!(
            check.first_reason.as_ref().unwrap().render(),
            "environment variable 'CC' has changed"
        );
        assert!(!check.all_valid());
    }

    #[test]
    fn valid_projects_stay_valid() {
        let env = FakeEnvironment::default();
        let stream = project_stream(&[ProjectInput::ProjectDependency {
            consumer: path(":app"),
            target: path(":lib"),
        }]);
        let mut ctx = ReadContext::new(stream.as_slice(), Codecs::new());
        let check = check_project_inputs(&mut ctx, &env, None).unwrap();
        assert!(check.all_valid());
    }
}
