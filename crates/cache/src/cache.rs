//! The top-level configuration cache controller.
//!
//! One controller serves one invocation. It decides the cache action once,
//! loads or schedules the requested tasks, hands out cached models and
//! metadata, and finalizes the entry after execution. The fingerprint and
//! value controllers are constructed lazily and only finalized when they
//! were actually used.

use crate::entry::EntryDetails;
use crate::events::BuildOperationListener;
use crate::models::{IntermediateModelController, ModelKey, ProjectMetadataController};
use crate::problems::{ConfigurationTimeBarrier, Problems};
use crate::state::{StateIo, StoredWorkGraph};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info, warn};
use trellis_fingerprint::{BuildEnvironment, FingerprintController};
use trellis_model::{
    BuildModel, BuildTreeModel, CacheAction, CacheKey, CheckedFingerprint, ProjectPath,
    StartParameter, StateType,
};
use trellis_serialize::{
    CodecKind, Codecs, Error as SerializeError, IsolateOwner, ReadContext, StreamTransform, Value,
    WriteContext,
};
use trellis_store::{CacheRepository, SpoolFile, Store};
use uuid::Uuid;

const MODEL_SENTINEL: u32 = 0x1ec_ac8e;

/// Outcome of [`ConfigurationCache::load_or_schedule_requested_tasks`].
#[derive(Debug)]
pub enum WorkGraphResult {
    /// The stored state was reused; configuration was skipped.
    Loaded(StoredWorkGraph),
    /// Configuration ran (fully or partially) and its result is pending
    /// storage at [`ConfigurationCache::finalize_cache_entry`].
    Scheduled {
        /// The freshly configured build tree.
        model: BuildTreeModel,
        /// Projects that had to be reconfigured; empty for a full store.
        invalid_projects: BTreeSet<ProjectPath>,
    },
}

/// How many project states the finalized entry reused versus recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectUsageStats {
    /// Project states carried over from the previous entry.
    pub reused: usize,
    /// Project states recomputed this invocation.
    pub updated: usize,
}

struct PendingStore {
    work_spool: SpoolFile,
    reused_projects: BTreeSet<ProjectPath>,
    updated_projects: usize,
    root_build_dirs: Vec<PathBuf>,
}

/// The configuration cache for one invocation.
pub struct ConfigurationCache<E> {
    start_parameter: StartParameter,
    store: Store,
    key: CacheKey,
    invocation_id: Uuid,
    environment: E,
    transform: Arc<dyn StreamTransform>,
    state_io: StateIo,
    codecs: Codecs,
    problems: Problems,
    barrier: ConfigurationTimeBarrier,
    fingerprint: OnceLock<FingerprintController<E>>,
    intermediate_models: OnceLock<IntermediateModelController>,
    project_metadata: OnceLock<ProjectMetadataController>,
    action: Mutex<Option<CacheAction>>,
    invalid_projects: Mutex<BTreeSet<ProjectPath>>,
    model_value: Mutex<Option<(Value, bool)>>,
    pending: Mutex<Option<PendingStore>>,
}

impl<E: BuildEnvironment + Clone> ConfigurationCache<E> {
    /// Create the cache for one invocation.
    pub fn new(
        start_parameter: StartParameter,
        repository: &CacheRepository,
        environment: E,
        transform: Arc<dyn StreamTransform>,
        listener: Arc<dyn BuildOperationListener>,
    ) -> Self {
        let key = CacheKey::new(&start_parameter);
        let store = repository.for_key(key.string());
        Self {
            start_parameter,
            store,
            key,
            invocation_id: Uuid::new_v4(),
            environment,
            transform,
            state_io: StateIo::new(listener),
            codecs: Codecs::new(),
            problems: Problems::new(),
            barrier: ConfigurationTimeBarrier::new(),
            fingerprint: OnceLock::new(),
            intermediate_models: OnceLock::new(),
            project_metadata: OnceLock::new(),
            action: Mutex::new(None),
            invalid_projects: Mutex::new(BTreeSet::new()),
            model_value: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    /// The cache key selecting this invocation's entry.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        self.key.string()
    }

    /// Id of this invocation, recorded in stored entries.
    #[must_use]
    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    /// Problem collector for this invocation.
    #[must_use]
    pub fn problems(&self) -> &Problems {
        &self.problems
    }

    /// The configuration-time barrier.
    #[must_use]
    pub fn barrier(&self) -> &ConfigurationTimeBarrier {
        &self.barrier
    }

    /// The fingerprint controller, constructed on first use.
    pub fn fingerprint_controller(&self) -> &FingerprintController<E> {
        self.fingerprint.get_or_init(|| {
            FingerprintController::new(self.environment.clone(), self.transform.clone())
        })
    }

    fn intermediate_model_controller(&self) -> &IntermediateModelController {
        self.intermediate_models
            .get_or_init(IntermediateModelController::new)
    }

    fn project_metadata_controller(&self) -> &ProjectMetadataController {
        self.project_metadata
            .get_or_init(ProjectMetadataController::new)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        mutex
            .lock()
            .map_err(|_| Error::invalid_state("configuration cache lock poisoned"))
    }

    /// Decide the cache action for this invocation. Idempotent: the first
    /// decision sticks.
    ///
    /// # Errors
    ///
    /// Propagates store, fingerprint and decode failures.
    pub fn determine_cache_action(&self) -> Result<CacheAction> {
        if let Some(action) = *self.lock(&self.action)? {
            return Ok(action);
        }
        let action = self.compute_action()?;
        *self.lock(&self.action)? = Some(action);
        Ok(action)
    }

    fn compute_action(&self) -> Result<CacheAction> {
        if let Some(flag) = self.start_parameter.forces_store() {
            info!(
                "calculating task graph as configuration cache cannot be reused due to {flag}"
            );
            self.purge_stale_entry()?;
            return Ok(CacheAction::Store);
        }
        let details = self
            .store
            .use_for_state_load(|layout| EntryDetails::read(layout).map_err(store_err))?;
        let Some(details) = details else {
            info!(
                key = self.key.string(),
                "calculating task graph as no cached configuration is available"
            );
            self.purge_stale_entry()?;
            return Ok(CacheAction::Store);
        };
        debug!(
            watched_dirs = details.root_build_dirs.len(),
            "registering build directories before fingerprint check"
        );
        match self.fingerprint_controller().check(&self.store)? {
            CheckedFingerprint::NotFound => {
                info!("calculating task graph as no cached configuration is available");
                self.purge_stale_entry()?;
                Ok(CacheAction::Store)
            }
            CheckedFingerprint::EntryInvalid { reason } => {
                info!(%reason, "calculating task graph as configuration cache cannot be reused");
                self.purge_stale_entry()?;
                Ok(CacheAction::Store)
            }
            CheckedFingerprint::ProjectsInvalid {
                reason,
                invalid_projects,
            } => {
                info!(
                    %reason,
                    invalid = invalid_projects.len(),
                    "updating configuration cache for out-of-date projects"
                );
                self.restore_values(&invalid_projects)?;
                *self.lock(&self.invalid_projects)? = invalid_projects;
                Ok(CacheAction::Update)
            }
            CheckedFingerprint::Valid => {
                info!("reusing configuration cache");
                self.restore_values(&BTreeSet::new())?;
                Ok(CacheAction::Load)
            }
        }
    }

    /// Load the stored work graph, or run configuration and schedule its
    /// result for storage.
    ///
    /// The `configure` closure receives the fingerprint controller so build
    /// logic can record the inputs it reads.
    ///
    /// # Errors
    ///
    /// Propagates configuration, serialization and store failures. A
    /// serialization failure is also recorded as a fatal problem so the
    /// entry is discarded.
    pub fn load_or_schedule_requested_tasks<F>(&self, configure: F) -> Result<WorkGraphResult>
    where
        F: FnOnce(&FingerprintController<E>) -> Result<BuildTreeModel>,
    {
        match self.determine_cache_action()? {
            CacheAction::Load => Ok(WorkGraphResult::Loaded(self.load_work_state()?)),
            CacheAction::Store => self.schedule_and_store(configure, BTreeSet::new()),
            CacheAction::Update => {
                let invalid = self.lock(&self.invalid_projects)?.clone();
                self.schedule_and_store(configure, invalid)
            }
        }
    }

    // A full store must not inherit state files from the entry it
    // replaces: whatever this invocation does not rewrite would otherwise
    // be restored by the next load as if it were still valid.
    fn purge_stale_entry(&self) -> Result<()> {
        self.store.use_for_store(|layout| {
            for state in StateType::ALL {
                layout.remove(state)?;
            }
            Ok(())
        })?;
        debug!("removed state files of the invalidated entry");
        Ok(())
    }

    fn schedule_and_store<F>(
        &self,
        configure: F,
        invalid_projects: BTreeSet<ProjectPath>,
    ) -> Result<WorkGraphResult>
    where
        F: FnOnce(&FingerprintController<E>) -> Result<BuildTreeModel>,
    {
        self.barrier.prepare();
        let fingerprint = self.fingerprint_controller();
        fingerprint.maybe_start_collecting(&self.store)?;
        let configured = configure(fingerprint);
        self.barrier.cross();
        let model = match configured {
            Ok(model) => model,
            Err(e) => {
                self.abandon_collection(fingerprint);
                return Err(e);
            }
        };

        let spool = match self.spool_work_state(&model) {
            Ok(spool) => spool,
            Err(e) => {
                self.problems
                    .failing_build_due_to_serialization_error(e.to_string());
                self.abandon_collection(fingerprint);
                return Err(e);
            }
        };

        let all_projects = collect_project_paths(&model.root_build);
        let reused_projects: BTreeSet<ProjectPath> = if invalid_projects.is_empty() {
            BTreeSet::new()
        } else {
            all_projects
                .iter()
                .filter(|p| !invalid_projects.contains(p))
                .cloned()
                .collect()
        };
        let updated_projects = all_projects.len() - reused_projects.len();
        *self.lock(&self.pending)? = Some(PendingStore {
            work_spool: spool,
            reused_projects,
            updated_projects,
            root_build_dirs: collect_root_dirs(&model.root_build),
        });
        Ok(WorkGraphResult::Scheduled {
            model,
            invalid_projects,
        })
    }

    fn spool_work_state(&self, model: &BuildTreeModel) -> Result<SpoolFile> {
        let spool = self.store.assign_spool_file(StateType::Work)?;
        let out = self.transform.wrap_write(Box::new(spool.reopen()?));
        self.state_io
            .write_work_state(out, model, &self.start_parameter, self.invocation_id)?;
        Ok(spool)
    }

    // Collection must never outlive a failed configuration; a later
    // finalize would otherwise commit half-recorded fingerprints.
    fn abandon_collection(&self, fingerprint: &FingerprintController<E>) {
        if let Err(e) = fingerprint.stop_collecting() {
            warn!(error = %e, "failed to stop fingerprint collection after a failed configuration");
        }
    }

    fn load_work_state(&self) -> Result<StoredWorkGraph> {
        self.store
            .use_for_state_load(|layout| {
                let file = layout.file_for(StateType::Work);
                let reader = self.transform.wrap_read(Box::new(file.input()?));
                self.state_io.read_work_state(reader).map_err(store_err)
            })
            .map_err(Into::into)
    }

    /// Return the cached build-tree model, creating it when this entry has
    /// none.
    ///
    /// # Errors
    ///
    /// Propagates creation, decode and store failures.
    pub fn load_or_create_model(&self, create: impl FnOnce() -> Result<Value>) -> Result<Value> {
        if let Some((value, _)) = &*self.lock(&self.model_value)? {
            return Ok(value.clone());
        }
        // A Store decision means any model file still on disk belongs to an
        // invalidated entry and must not be served.
        let action = self.determine_cache_action()?;
        if action != CacheAction::Store && self.store.has_state_file(StateType::Model) {
            let value = self.store.use_for_state_load(|layout| {
                let file = layout.file_for(StateType::Model);
                let reader = self.transform.wrap_read(Box::new(file.input()?));
                read_model_value(reader, self.codecs).map_err(store_err)
            })?;
            *self.lock(&self.model_value)? = Some((value.clone(), false));
            return Ok(value);
        }
        let value = create()?;
        *self.lock(&self.model_value)? = Some((value.clone(), true));
        Ok(value)
    }

    /// Return a cached intermediate model, creating it when absent.
    ///
    /// # Errors
    ///
    /// Propagates the creation failure.
    pub fn load_or_create_intermediate_model(
        &self,
        project: Option<&ProjectPath>,
        model_name: &str,
        create: impl FnOnce() -> Result<Value>,
    ) -> Result<Value> {
        self.intermediate_model_controller().load_or_create(
            ModelKey {
                project: project.cloned(),
                model_name: model_name.to_string(),
            },
            create,
        )
    }

    /// Return cached dependency-resolution metadata for a project,
    /// creating it when absent.
    ///
    /// # Errors
    ///
    /// Propagates the creation failure.
    pub fn load_or_create_project_metadata(
        &self,
        project: &ProjectPath,
        create: impl FnOnce() -> Result<Value>,
    ) -> Result<Value> {
        self.project_metadata_controller()
            .load_or_create(project.clone(), create)
    }

    fn restore_values(&self, invalid: &BTreeSet<ProjectPath>) -> Result<()> {
        self.store
            .use_for_state_load(|layout| {
                let models_file = layout.file_for(StateType::IntermediateModels);
                if models_file.exists() {
                    let reader = self.transform.wrap_read(Box::new(models_file.input()?));
                    self.intermediate_model_controller()
                        .restore(reader, invalid)
                        .map_err(store_err)?;
                }
                let metadata_file = layout.file_for(StateType::ProjectMetadata);
                if metadata_file.exists() {
                    self.project_metadata_controller()
                        .restore(metadata_file.input()?, invalid)
                        .map_err(store_err)?;
                }
                Ok(())
            })
            .map_err(Into::into)
    }

    /// Commit or discard the entry after execution.
    ///
    /// A loaded entry needs no finalization. A scheduled entry is discarded
    /// when problems were reported; otherwise the state files are moved
    /// into place, fingerprints are committed (merging reused projects'
    /// recorded inputs), the entry metadata is written last, and the
    /// action flips to [`CacheAction::Load`] for the rest of the
    /// invocation.
    ///
    /// # Errors
    ///
    /// Propagates store and encoding failures.
    pub fn finalize_cache_entry(&self) -> Result<ProjectUsageStats> {
        let Some(pending) = self.lock(&self.pending)?.take() else {
            return Ok(ProjectUsageStats::default());
        };

        if self.problems.should_discard_entry() {
            // Only controllers that were actually started need stopping.
            if let Some(fingerprint) = self.fingerprint.get() {
                fingerprint.stop_collecting()?;
            }
            self.store
                .use_for_store(|layout| layout.remove(StateType::Entry))?;
            info!(
                problems = self.problems.count(),
                "configuration cache entry discarded"
            );
            return Ok(ProjectUsageStats {
                reused: 0,
                updated: pending.updated_projects,
            });
        }

        let fingerprint = self.fingerprint_controller();
        if !pending.reused_projects.is_empty() {
            fingerprint.collect_for_reused_projects(&self.store, &pending.reused_projects)?;
        }
        fingerprint.stop_collecting()?;

        let stats = ProjectUsageStats {
            reused: pending.reused_projects.len(),
            updated: pending.updated_projects,
        };
        let details = EntryDetails {
            tool_version: self.start_parameter.tool_version.clone(),
            created_at: Utc::now(),
            root_build_dirs: pending.root_build_dirs.clone(),
            intermediate_model_keys: self
                .intermediate_model_controller()
                .keys()?
                .iter()
                .map(ModelKey::render)
                .collect(),
            project_metadata_paths: self.project_metadata_controller().keys()?,
        };

        self.store.use_for_store(|layout| {
            layout.move_in(pending.work_spool, None)?;

            if let Some((value, created)) = &*self.lock(&self.model_value).map_err(store_err)? {
                if *created {
                    let file = layout.file_for(StateType::Model);
                    let out = self.transform.wrap_write(Box::new(file.output()?));
                    write_model_value(out, value, self.codecs).map_err(store_err)?;
                }
            }

            let models = self.intermediate_model_controller();
            if !models.is_empty().map_err(store_err)? {
                let file = layout.file_for(StateType::IntermediateModels);
                let out = self.transform.wrap_write(Box::new(file.output()?));
                models.write(out).map_err(store_err)?;
            }
            let metadata = self.project_metadata_controller();
            if !metadata.is_empty().map_err(store_err)? {
                let file = layout.file_for(StateType::ProjectMetadata);
                metadata.write(file.output()?).map_err(store_err)?;
            }

            fingerprint
                .commit(layout)
                .map_err(|e| store_err(e.into()))?;

            // Written last: its presence marks the entry as complete.
            details.write(layout).map_err(store_err)
        })?;

        *self.lock(&self.action)? = Some(CacheAction::Load);
        info!(
            reused = stats.reused,
            updated = stats.updated,
            "configuration cache entry stored"
        );
        Ok(stats)
    }
}

fn collect_project_paths(build: &BuildModel) -> Vec<ProjectPath> {
    let mut paths: Vec<ProjectPath> = build.projects.iter().map(|p| p.path.clone()).collect();
    for included in &build.included_builds {
        paths.extend(collect_project_paths(included));
    }
    paths
}

fn collect_root_dirs(build: &BuildModel) -> Vec<PathBuf> {
    let mut dirs = vec![build.root_dir.clone()];
    for included in &build.included_builds {
        dirs.extend(collect_root_dirs(included));
    }
    dirs
}

fn write_model_value<W: Write>(out: W, value: &Value, codecs: Codecs) -> Result<()> {
    let mut ctx = WriteContext::new(out, codecs);
    ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::UserTypes, |ctx| {
        ctx.write_value(value)
    })?;
    ctx.write_u32(MODEL_SENTINEL)?;
    ctx.finish()?;
    Ok(())
}

fn read_model_value<R: Read>(input: R, codecs: Codecs) -> Result<Value> {
    let mut ctx = ReadContext::new(input, codecs);
    let value = ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::UserTypes, |ctx| {
        ctx.read_value()
    })?;
    if ctx.read_u32()? != MODEL_SENTINEL {
        return Err(SerializeError::corrupt("corrupt state file").into());
    }
    Ok(value)
}

// Closures handed to the store must return store errors; cache failures
// inside them travel as opaque configuration errors.
pub(crate) fn store_err(e: Error) -> trellis_store::Error {
    trellis_store::Error::configuration(e.to_string())
}
