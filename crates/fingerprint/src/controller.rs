//! Lifecycle of fingerprint collection and checking for one invocation.
//!
//! The controller moves through `Idle -> Collecting -> Stopped -> Committed`.
//! Collection starts at most once, stopping is idempotent and inputs
//! observed while not collecting are ignored. Checking never requires
//! collection to be active.

use crate::checker::{check_build_inputs, check_project_inputs};
use crate::environment::BuildEnvironment;
use crate::inputs::{read_project_input, BuildInput, ProjectInput};
use crate::writer::FingerprintWriter;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};
use trellis_model::{CheckedFingerprint, ProjectPath, StateType};
use trellis_serialize::{Codecs, ReadContext, StreamTransform};
use trellis_store::{EntryLayout, SpoolFile, Store};

enum State {
    Idle,
    Collecting(Box<Collecting>),
    Stopped {
        build_spool: SpoolFile,
        project_spool: SpoolFile,
    },
    Committed,
}

struct Collecting {
    writer: FingerprintWriter,
    build_spool: SpoolFile,
    project_spool: SpoolFile,
}

/// Records configuration inputs while configuration runs and validates
/// recorded inputs before an entry is reused.
pub struct FingerprintController<E> {
    environment: E,
    transform: Arc<dyn StreamTransform>,
    codecs: Codecs,
    state: Mutex<State>,
}

impl<E: BuildEnvironment> FingerprintController<E> {
    /// Create an idle controller.
    pub fn new(environment: E, transform: Arc<dyn StreamTransform>) -> Self {
        Self {
            environment,
            transform,
            codecs: Codecs::new(),
            state: Mutex::new(State::Idle),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::invalid_state("fingerprint state lock poisoned"))
    }

    /// Start collecting into fresh spool files if not already started.
    ///
    /// The tool environment and encryption-key fingerprint are recorded
    /// first, so every entry is bound to the tool that wrote it.
    ///
    /// # Errors
    ///
    /// Propagates spool-creation and encoding failures.
    pub fn maybe_start_collecting(&self, store: &Store) -> Result<()> {
        let mut state = self.state()?;
        if !matches!(*state, State::Idle) {
            return Ok(());
        }
        let build_spool = store.assign_spool_file(StateType::BuildFingerprint)?;
        let project_spool = store.assign_spool_file(StateType::ProjectFingerprint)?;
        let mut writer = FingerprintWriter::new(
            self.transform.wrap_write(Box::new(build_spool.reopen()?)),
            self.transform.wrap_write(Box::new(project_spool.reopen()?)),
            self.codecs,
        );
        writer.write_build_input(&BuildInput::ToolEnvironment {
            version: self.environment.tool_version(),
            properties_hash: self.environment.tool_properties_hash(),
        })?;
        writer.write_build_input(&BuildInput::EncryptionKeyHash {
            hash: self.transform.key_hash(),
        })?;
        debug!("started collecting configuration fingerprint");
        *state = State::Collecting(Box::new(Collecting {
            writer,
            build_spool,
            project_spool,
        }));
        Ok(())
    }

    /// Whether collection is currently active.
    ///
    /// # Errors
    ///
    /// Fails only when the state lock is poisoned.
    pub fn is_collecting(&self) -> Result<bool> {
        Ok(matches!(*self.state()?, State::Collecting(_)))
    }

    /// Record a build-scoped input. Ignored while not collecting.
    ///
    /// # Errors
    ///
    /// Propagates encoding failures.
    pub fn record_build_input(&self, input: &BuildInput) -> Result<()> {
        match &mut *self.state()? {
            State::Collecting(collecting) => collecting.writer.write_build_input(input),
            _ => {
                trace!("build input observed outside collection, ignored");
                Ok(())
            }
        }
    }

    /// Record a project-scoped input. Ignored while not collecting.
    ///
    /// # Errors
    ///
    /// Propagates encoding failures.
    pub fn record_project_input(&self, project: &ProjectPath, input: &BuildInput) -> Result<()> {
        match &mut *self.state()? {
            State::Collecting(collecting) => {
                collecting.writer.write_project_input(project, input)
            }
            _ => {
                trace!("project input observed outside collection, ignored");
                Ok(())
            }
        }
    }

    /// Record that `consumer` consumed the configured state of `target`.
    /// Ignored while not collecting.
    ///
    /// # Errors
    ///
    /// Propagates encoding failures.
    pub fn record_project_dependency(
        &self,
        consumer: &ProjectPath,
        target: &ProjectPath,
    ) -> Result<()> {
        match &mut *self.state()? {
            State::Collecting(collecting) => {
                collecting.writer.write_project_dependency(consumer, target)
            }
            _ => Ok(()),
        }
    }

    /// Copy the recorded inputs of `reused` projects from the existing
    /// entry into the fingerprint being collected.
    ///
    /// On a partial update the reused projects are not reconfigured, so
    /// their inputs would otherwise be lost from the fresh fingerprint.
    ///
    /// # Errors
    ///
    /// Fails unless collection is active; propagates decode and I/O errors.
    pub fn collect_for_reused_projects(
        &self,
        store: &Store,
        reused: &BTreeSet<ProjectPath>,
    ) -> Result<()> {
        let mut state = self.state()?;
        let State::Collecting(collecting) = &mut *state else {
            return Err(Error::invalid_state(
                "reused-project inputs can only be merged while collecting",
            ));
        };
        let entries = store.use_for_state_load(|layout| {
            let file = layout.file_for(StateType::ProjectFingerprint);
            if !file.exists() {
                return Ok(Vec::new());
            }
            let reader = self.transform.wrap_read(Box::new(file.input()?));
            read_all_project_entries(reader, self.codecs).map_err(into_store_error)
        })?;
        let mut copied = 0usize;
        for entry in entries {
            let keep = match &entry {
                ProjectInput::Input { project, .. } => reused.contains(project),
                ProjectInput::ProjectDependency { consumer, .. } => reused.contains(consumer),
            };
            if keep {
                collecting.writer.write_project_entry(&entry)?;
                copied += 1;
            }
        }
        debug!(copied, reused = reused.len(), "merged reused-project fingerprint entries");
        Ok(())
    }

    /// Stop collecting: terminate and flush both streams. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn stop_collecting(&self) -> Result<()> {
        let mut state = self.state()?;
        match std::mem::replace(&mut *state, State::Idle) {
            State::Collecting(collecting) => {
                let Collecting {
                    writer,
                    build_spool,
                    project_spool,
                } = *collecting;
                writer.finish()?;
                debug!("stopped collecting configuration fingerprint");
                *state = State::Stopped {
                    build_spool,
                    project_spool,
                };
            }
            other => *state = other,
        }
        Ok(())
    }

    /// Move the finished fingerprint spools into the entry.
    ///
    /// Collection is stopped first if still active.
    ///
    /// # Errors
    ///
    /// Fails when nothing was collected; propagates move failures.
    pub fn commit(&self, layout: &EntryLayout<'_>) -> Result<()> {
        self.stop_collecting()?;
        let mut state = self.state()?;
        match std::mem::replace(&mut *state, State::Committed) {
            State::Stopped {
                build_spool,
                project_spool,
            } => {
                layout.move_in(build_spool, None)?;
                layout.move_in(project_spool, None)?;
                debug!("committed configuration fingerprint");
                Ok(())
            }
            other => {
                *state = other;
                Err(Error::invalid_state("no collected fingerprint to commit"))
            }
        }
    }

    /// Validate the entry's recorded fingerprints against the current
    /// environment.
    ///
    /// The build-scoped stream is checked first; project-scoped inputs are
    /// only consulted when every build-scoped input still matches.
    ///
    /// # Errors
    ///
    /// Propagates decode and I/O errors; a missing or unreadable stream is
    /// an error, not an invalidation.
    pub fn check(&self, store: &Store) -> Result<CheckedFingerprint> {
        let key_hash = self.transform.key_hash();
        store.use_for_state_load(|layout| {
            let build_file = layout.file_for(StateType::BuildFingerprint);
            if !build_file.exists() {
                return Ok(CheckedFingerprint::NotFound);
            }
            let reader = self.transform.wrap_read(Box::new(build_file.input()?));
            let mut ctx = ReadContext::new(reader, self.codecs);
            if let Some(reason) =
                check_build_inputs(&mut ctx, &self.environment, key_hash.as_deref())
                    .map_err(into_store_error)?
            {
                return Ok(CheckedFingerprint::EntryInvalid { reason });
            }

            let project_file = layout.file_for(StateType::ProjectFingerprint);
            if !project_file.exists() {
                return Ok(CheckedFingerprint::Valid);
            }
            let reader = self.transform.wrap_read(Box::new(project_file.input()?));
            let mut ctx = ReadContext::new(reader, self.codecs);
            let check = check_project_inputs(&mut ctx, &self.environment, key_hash.as_deref())
                .map_err(into_store_error)?;
            if check.all_valid() {
                Ok(CheckedFingerprint::Valid)
            } else {
                Ok(CheckedFingerprint::ProjectsInvalid {
                    reason: check
                        .first_reason
                        .unwrap_or_else(|| "project state has changed".to_string().into()),
                    invalid_projects: check.invalid_projects,
                })
            }
        })
        .map_err(Into::into)
    }
}

fn read_all_project_entries(
    reader: Box<dyn Read + Send + '_>,
    codecs: Codecs,
) -> Result<Vec<ProjectInput>> {
    let mut ctx = ReadContext::new(reader, codecs);
    let mut entries = Vec::new();
    while let Some(entry) = read_project_input(&mut ctx)? {
        entries.push(entry);
    }
    Ok(entries)
}

// Closures handed to the store return store errors; fingerprint failures
// inside them travel as opaque configuration errors.
fn into_store_error(e: Error) -> trellis_store::Error {
    trellis_store::Error::configuration(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use trellis_serialize::{Passthrough, Value};
    use trellis_store::CacheRepository;

    #[derive(Default, Clone)]
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
            Value::Null
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

    fn controller(env: FakeEnvironment) -> FingerprintController<FakeEnvironment> {
        FingerprintController::new(env, Arc::new(Passthrough))
    }

    fn store() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheRepository::new(tmp.path()).for_key("k");
        (tmp, store)
    }

    fn path(s: &str) -> ProjectPath {
        ProjectPath::new(s).unwrap()
    }

    #[test]
    fn collect_then_check_is_valid() {
        let mut env = FakeEnvironment::default();
        env.files
            .insert(PathBuf::from("settings.trellis"), "h1".to_string());
        let (_tmp, store) = store();
        let ctrl = controller(env);

        ctrl.maybe_start_collecting(&store).unwrap();
        assert!(ctrl.is_collecting().unwrap());
        ctrl.record_build_input(&BuildInput::InputFile {
            path: PathBuf::from("settings.trellis"),
            hash: Some("h1".to_string()),
        })
        .unwrap();
        ctrl.stop_collecting().unwrap();
        ctrl.stop_collecting().unwrap(); // idempotent
        store
            .use_for_store(|layout| ctrl.commit(layout).map_err(|e| {
                trellis_store::Error::configuration(e.to_string())
            }))
            .unwrap();

        assert!(matches!(ctrl.check(&store).unwrap(), CheckedFingerprint::Valid));
    }

    #[test]
    fn missing_fingerprint_is_not_found() {
        let (_tmp, store) = store();
        let ctrl = controller(FakeEnvironment::default());
        assert!(matches!(
            ctrl.check(&store).unwrap(),
            CheckedFingerprint::NotFound
        ));
    }

    #[test]
    fn stale_build_input_invalidates_entry() {
        let mut env = FakeEnvironment::default();
        env.files
            .insert(PathBuf::from("settings.trellis"), "h1".to_string());
        let (_tmp, store) = store();
        let ctrl = controller(env);
        ctrl.maybe_start_collecting(&store).unwrap();
        ctrl.record_build_input(&BuildInput::InputFile {
            path: PathBuf::from("settings.trellis"),
            hash: Some("h1".to_string()),
        })
        .unwrap();
        store
            .use_for_store(|layout| {
                ctrl.commit(layout)
                    .map_err(|e| trellis_store::Error::configuration(e.to_string()))
            })
            .unwrap();

        // Same recorded state, different current environment.
        let mut changed = FakeEnvironment::default();
        changed
            .files
            .insert(PathBuf::from("settings.trellis"), "h2".to_string());
        let checker = controller(changed);
        let verdict = checker.check(&store).unwrap();
        let CheckedFingerprint::EntryInvalid { reason } = verdict else {
            panic!("expected EntryInvalid, got {verdict:?}");
        };
        assert_eq!(reason.render(), "file 'settings.trellis' has changed");
    }

    #[test]
    fn stale_project_input_invalidates_only_that_project() {
        let mut env = FakeEnvironment::default();
        env.env.insert("CC".to_string(), "gcc".to_string());
        let (_tmp, store) = store();
        let ctrl = controller(env);
        ctrl.maybe_start_collecting(&store).unwrap();
        ctrl.record_project_input(
            &path(":lib"),
            &BuildInput::EnvVar {
                name: "CC".to_string(),
                value: Some("gcc".to_string()),
            },
        )
        .unwrap();
        store
            .use_for_store(|layout| {
                ctrl.commit(layout)
                    .map_err(|e| trellis_store::Error::configuration(e.to_string()))
            })
            .unwrap();

        let mut changed = FakeEnvironment::default();
        changed.env.insert("CC".to_string(), "clang".to_string());
        let checker = controller(changed);
        let verdict = checker.check(&store).unwrap();
        let CheckedFingerprint::ProjectsInvalid {
            invalid_projects, ..
        } = verdict
        else {
            panic!("expected ProjectsInvalid, got {verdict:?}");
        };
        assert_eq!(invalid_projects, [path(":lib")].into_iter().collect());
    }

    #[test]
    fn reused_project_inputs_are_carried_forward() {
        let mut env = FakeEnvironment::default();
        env.env.insert("CC".to_string(), "gcc".to_string());
        let (_tmp, store) = store();

        // First run records inputs for two projects.
        let ctrl = controller(env.clone());
        ctrl.maybe_start_collecting(&store).unwrap();
        for project in [":lib", ":app"] {
            ctrl.record_project_input(
                &path(project),
                &BuildInput::EnvVar {
                    name: "CC".to_string(),
                    value: Some("gcc".to_string()),
                },
            )
            .unwrap();
        }
        store
            .use_for_store(|layout| {
                ctrl.commit(layout)
                    .map_err(|e| trellis_store::Error::configuration(e.to_string()))
            })
            .unwrap();

        // Second run reconfigures :app only and merges :lib's entries.
        let ctrl = controller(env);
        ctrl.maybe_start_collecting(&store).unwrap();
        ctrl.collect_for_reused_projects(&store, &[path(":lib")].into_iter().collect())
            .unwrap();
        store
            .use_for_store(|layout| {
                ctrl.commit(layout)
                    .map_err(|e| trellis_store::Error::configuration(e.to_string()))
            })
            .unwrap();

        // The merged fingerprint still guards :lib's input.
        let mut changed = FakeEnvironment::default();
        changed.env.insert("CC".to_string(), "clang".to_string());
        let checker = controller(changed);
        let verdict = checker.check(&store).unwrap();
        let CheckedFingerprint::ProjectsInvalid {
            invalid_projects, ..
        } = verdict
        else {
            panic!("expected ProjectsInvalid, got {verdict:?}");
        };
        assert!(invalid_projects.contains(&path(":lib")));
    }
}
