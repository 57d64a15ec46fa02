//! The work-state protocol: how a configured build tree is written to and
//! restored from the work state file.
//!
//! Writing and reading are strictly paired: every write has a byte-exact
//! read in the same relative order, and the stream ends with a sentinel
//! checked on read. Builds are serialized depth-first with their included
//! builds nested inside; a build included by more than one other build is
//! written once and referenced by root directory afterwards.

use crate::events::BuildOperationListener;
use crate::{Error, Result};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_model::{
    BuildEventListener, BuildModel, BuildTreeModel, CachedBuildState, CachedProjectState,
    ProjectPath, ScheduledWork, StartParameter, WorkNode,
};
use trellis_serialize::{
    CodecKind, Codecs, Error as SerializeError, IsolateOwner, ReadContext, WriteContext,
};
use uuid::Uuid;

/// Trailing marker of every work state stream.
const STATE_SENTINEL: u32 = 0x1ec_ac8e;

const PROJECTS_NONE: u8 = 0;
const PROJECTS_NO_WORK: u8 = 1;
const PROJECTS_WITH_WORK: u8 = 2;

const BUILD_INLINE: u8 = 1;
const BUILD_REFERENCE: u8 = 0;

const LISTENER_SERVICE: u8 = 1;
const LISTENER_INSTANCE: u8 = 2;

/// The restored contents of a work state file.
#[derive(Debug)]
pub struct StoredWorkGraph {
    /// Invocation that originally stored the entry.
    pub origin_invocation_id: Uuid,
    /// All builds of the tree, depth-first, root first.
    pub builds: Vec<CachedBuildState>,
    /// Restored build-event listener subscriptions.
    pub event_listeners: Vec<BuildEventListener>,
}

/// Serializes and deserializes the work state file.
pub struct StateIo {
    codecs: Codecs,
    listener: Arc<dyn BuildOperationListener>,
}

impl StateIo {
    /// Create the protocol over a listener for restore-time notifications.
    pub fn new(listener: Arc<dyn BuildOperationListener>) -> Self {
        Self {
            codecs: Codecs::new(),
            listener,
        }
    }

    /// Write the configured build tree to a work state stream.
    ///
    /// # Errors
    ///
    /// Propagates encoding and I/O failures; any error invalidates the
    /// stream being written.
    pub fn write_work_state<W: Write>(
        &self,
        out: W,
        model: &BuildTreeModel,
        start_parameter: &StartParameter,
        invocation_id: Uuid,
    ) -> Result<()> {
        let mut ctx = WriteContext::new(out, self.codecs);
        ctx.write_string(&invocation_id.to_string())?;
        ctx.write_string(&model.root_build.root_project_name)?;

        ctx.with_debug_frame("build tree state", |ctx| {
            ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::InternalTypes, |ctx| {
                write_environment(ctx, model)?;
                write_build_cache(ctx, model)
            })
        })?;

        let mut stored = StoredBuilds::default();
        self.write_build(&mut ctx, &model.root_build, Some(start_parameter), &mut stored)?;

        self.write_event_listeners(&mut ctx, &model.event_listeners)?;

        ctx.write_u32(STATE_SENTINEL)?;
        ctx.finish()?;
        debug!(builds = stored.len(), "work state written");
        Ok(())
    }

    /// Read a work state stream written by [`Self::write_work_state`].
    ///
    /// Fires the projects-loaded and project-restored notifications a
    /// non-cached run would fire, and validates every restored build.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for a malformed or truncated stream,
    /// including a missing trailing sentinel.
    pub fn read_work_state<R: Read>(&self, input: R) -> Result<StoredWorkGraph> {
        let mut ctx = ReadContext::new(input, self.codecs);
        let raw_id = ctx.read_string()?;
        let origin_invocation_id = Uuid::parse_str(&raw_id)
            .map_err(|_| SerializeError::corrupt(format!("invalid invocation id {raw_id:?}")))?;
        let _root_project_name = ctx.read_string()?;

        ctx.with_debug_frame("build tree state", |ctx| {
            ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::InternalTypes, |ctx| {
                read_environment(ctx)?;
                read_build_cache(ctx)
            })
        })?;

        let mut restored = StoredBuilds::default();
        let mut builds = Vec::new();
        self.read_build(&mut ctx, &mut restored, &mut builds)?;

        let event_listeners = self.read_event_listeners(&mut ctx)?;

        if ctx.read_u32()? != STATE_SENTINEL {
            return Err(SerializeError::corrupt("corrupt state file").into());
        }

        for build in &builds {
            build.validate()?;
        }
        debug!(builds = builds.len(), "work state restored");
        Ok(StoredWorkGraph {
            origin_invocation_id,
            builds,
            event_listeners,
        })
    }

    fn write_build<W: Write>(
        &self,
        ctx: &mut WriteContext<W>,
        build: &BuildModel,
        start_parameter: Option<&StartParameter>,
        stored: &mut StoredBuilds,
    ) -> Result<()> {
        stored.mark(&build.root_dir);
        ctx.write_string(build.identity_path.as_str())?;
        let owner = IsolateOwner::Build(build.identity_path.as_str().to_string());
        ctx.with_isolate(owner, CodecKind::InternalTypes, |ctx| {
            ctx.write_string(&build.name)?;
            ctx.write_file(&build.root_dir)?;
            ctx.write_string(&build.root_project_name)?;
            ctx.write_bool(build.is_plugin_build)?;
            // Only the root build carries the invocation's task names.
            match start_parameter {
                Some(p) => {
                    ctx.write_strings(&p.requested_task_names)?;
                    ctx.write_strings(&p.excluded_task_names)?;
                }
                None => {
                    ctx.write_strings(&[])?;
                    ctx.write_strings(&[])?;
                }
            }
            Ok(())
        })?;

        ctx.write_len(build.included_builds.len())?;
        for included in &build.included_builds {
            if stored.contains(&included.root_dir) {
                ctx.write_u8(BUILD_REFERENCE)?;
                ctx.write_file(&included.root_dir)?;
            } else {
                ctx.write_u8(BUILD_INLINE)?;
                self.write_build(ctx, included, None, stored)?;
            }
        }

        ctx.write_len(build.cleanup_registrations.len())?;
        for dir in &build.cleanup_registrations {
            ctx.write_file(dir)?;
        }

        ctx.write_bool(build.has_source_dependencies)?;
        if build.has_source_dependencies {
            warn!(
                build = %build.identity_path,
                "source dependency mappings are not yet implemented and are not tracked by the configuration cache"
            );
        }

        self.write_projects_section(ctx, build)?;
        Ok(())
    }

    fn write_projects_section<W: Write>(
        &self,
        ctx: &mut WriteContext<W>,
        build: &BuildModel,
    ) -> Result<()> {
        let has_work = build
            .scheduled_work
            .as_ref()
            .is_some_and(|w| !w.is_empty());
        if has_work {
            ctx.write_u8(PROJECTS_WITH_WORK)?;
            return ctx.with_debug_frame("work graph", |ctx| {
                self.write_work_section(ctx, build)
                    .map_err(|e| SerializeError::corrupt(e.to_string()))
            })
            .map_err(Into::into);
        }
        if build.projects.is_empty() {
            ctx.write_u8(PROJECTS_NONE)?;
            return Ok(());
        }
        ctx.write_u8(PROJECTS_NO_WORK)?;
        ctx.write_len(build.projects.len())?;
        for project in &build.projects {
            ctx.write_string(project.path.as_str())?;
            ctx.write_file(&project.project_dir)?;
            ctx.write_file(&project.build_file)?;
        }
        Ok(())
    }

    fn write_work_section<W: Write>(
        &self,
        ctx: &mut WriteContext<W>,
        build: &BuildModel,
    ) -> Result<()> {
        let Some(work) = &build.scheduled_work else {
            return Err(Error::invalid_state("work section without scheduled work"));
        };
        work.validate()?;

        // Scheduled projects plus every ancestor, so the restored tree has
        // no gaps.
        let relevant = build.relevant_projects();
        let owners: HashSet<&ProjectPath> = work
            .nodes
            .iter()
            .filter_map(|n| n.project.as_ref())
            .collect();
        ctx.write_len(relevant.len())?;
        for path in &relevant {
            let Some(project) = build.project(path) else {
                return Err(Error::invalid_state(format!(
                    "project '{path}' is scheduled but was never registered"
                )));
            };
            ctx.write_string(project.path.as_str())?;
            ctx.write_file(&project.project_dir)?;
            ctx.write_file(&project.build_file)?;
            let project_has_work = owners.contains(path);
            ctx.write_bool(project_has_work)?;
            if project_has_work {
                ctx.write_file(&project.build_dir)?;
            }
        }

        // Build services carry user-provided parameters, so they live in a
        // user-codec isolate owned by this build.
        let owner = IsolateOwner::Build(build.identity_path.as_str().to_string());
        ctx.with_isolate(owner, CodecKind::UserTypes, |ctx| {
            ctx.write_len(build.required_services.len())?;
            for service in &build.required_services {
                ctx.write_string(service.build.as_str())?;
                ctx.write_shared_string(&service.name)?;
                ctx.write_value(&service.parameters)?;
            }
            Ok(())
        })?;

        ctx.write_len(work.nodes.len())?;
        for node in &work.nodes {
            ctx.write_u64(node.id)?;
            ctx.write_string(&node.task_path)?;
            match &node.project {
                Some(p) => {
                    ctx.write_bool(true)?;
                    ctx.write_string(p.as_str())?;
                }
                None => ctx.write_bool(false)?,
            }
            ctx.write_len(node.dependencies.len())?;
            for dep in &node.dependencies {
                ctx.write_u64(*dep)?;
            }
        }
        ctx.write_len(work.entry_node_ids.len())?;
        for id in &work.entry_node_ids {
            ctx.write_u64(*id)?;
        }
        Ok(())
    }

    fn write_event_listeners<W: Write>(
        &self,
        ctx: &mut WriteContext<W>,
        listeners: &[BuildEventListener],
    ) -> Result<()> {
        ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::UserTypes, |ctx| {
            ctx.write_len(listeners.len())?;
            for listener in listeners {
                match listener {
                    BuildEventListener::Service { build, name } => {
                        ctx.write_u8(LISTENER_SERVICE)?;
                        ctx.write_string(build.as_str())?;
                        ctx.write_shared_string(name)?;
                    }
                    BuildEventListener::Instance(value) => {
                        ctx.write_u8(LISTENER_INSTANCE)?;
                        ctx.write_value(value)?;
                    }
                }
            }
            Ok(())
        })
        .map_err(Into::into)
    }

    fn read_build<R: Read>(
        &self,
        ctx: &mut ReadContext<R>,
        restored: &mut StoredBuilds,
        builds: &mut Vec<CachedBuildState>,
    ) -> Result<()> {
        struct BuildHeader {
            identity_path: ProjectPath,
            root_dir: PathBuf,
            root_project_name: String,
        }

        let header = {
            // The owner is not known until the identity path is read; the
            // isolate is keyed by position in the protocol, which is the
            // same on both sides.
            let identity_path = read_project_path(ctx)?;
            let owner = IsolateOwner::Build(identity_path.as_str().to_string());
            ctx.with_isolate(owner, CodecKind::InternalTypes, |ctx| {
                let _name = ctx.read_string()?;
                let root_dir = ctx.read_file()?;
                let root_project_name = ctx.read_string()?;
                let _is_plugin_build = ctx.read_bool()?;
                let _requested = ctx.read_strings()?;
                let _excluded = ctx.read_strings()?;
                Ok((root_dir, root_project_name))
            })
            .map(|(root_dir, root_project_name)| BuildHeader {
                identity_path,
                root_dir,
                root_project_name,
            })?
        };
        restored.mark(&header.root_dir);

        let included_count = ctx.read_len()?;
        // The build's own state follows its included builds in the stream,
        // but the restored list keeps parents before children. Reserve the
        // slot by remembering the index.
        let own_index = builds.len();
        builds.push(CachedBuildState::BuildWithNoProjects {
            identity_path: header.identity_path.clone(),
        });
        for _ in 0..included_count {
            match ctx.read_u8()? {
                BUILD_INLINE => self.read_build(ctx, restored, builds)?,
                BUILD_REFERENCE => {
                    let _root_dir = ctx.read_file()?;
                }
                other => {
                    return Err(SerializeError::corrupt(format!(
                        "invalid included-build marker {other:#04x}"
                    ))
                    .into())
                }
            }
        }

        let cleanup_count = ctx.read_len()?;
        for _ in 0..cleanup_count {
            let _dir = ctx.read_file()?;
        }

        let _has_source_dependencies = ctx.read_bool()?;

        builds[own_index] = self.read_projects_section(ctx, &header.identity_path, header.root_project_name)?;
        Ok(())
    }

    fn read_projects_section<R: Read>(
        &self,
        ctx: &mut ReadContext<R>,
        identity_path: &ProjectPath,
        root_project_name: String,
    ) -> Result<CachedBuildState> {
        match ctx.read_u8()? {
            PROJECTS_NONE => Ok(CachedBuildState::BuildWithNoProjects {
                identity_path: identity_path.clone(),
            }),
            PROJECTS_NO_WORK => {
                let count = ctx.read_len()?;
                let mut projects = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let path = read_project_path(ctx)?;
                    let project_dir = ctx.read_file()?;
                    let build_file = ctx.read_file()?;
                    projects.push(CachedProjectState::WithNoWork {
                        path,
                        project_dir,
                        build_file,
                    });
                }
                self.fire_project_events(identity_path, &projects);
                Ok(CachedBuildState::BuildWithNoWork {
                    identity_path: identity_path.clone(),
                    root_project_name,
                    projects,
                })
            }
            PROJECTS_WITH_WORK => ctx
                .with_debug_frame("work graph", |ctx| {
                    self.read_work_section(ctx, identity_path, root_project_name)
                        .map_err(|e| SerializeError::corrupt(e.to_string()))
                })
                .map_err(Into::into),
            other => Err(SerializeError::corrupt(format!(
                "invalid projects marker {other:#04x}"
            ))
            .into()),
        }
    }

    fn read_work_section<R: Read>(
        &self,
        ctx: &mut ReadContext<R>,
        identity_path: &ProjectPath,
        root_project_name: String,
    ) -> Result<CachedBuildState> {
        let project_count = ctx.read_len()?;
        let mut projects = Vec::with_capacity(project_count.min(1024));
        for _ in 0..project_count {
            let path = read_project_path(ctx)?;
            let project_dir = ctx.read_file()?;
            let build_file = ctx.read_file()?;
            let has_work = ctx.read_bool()?;
            projects.push(if has_work {
                let build_dir = ctx.read_file()?;
                CachedProjectState::WithWork {
                    path,
                    project_dir,
                    build_file,
                    build_dir,
                }
            } else {
                CachedProjectState::WithNoWork {
                    path,
                    project_dir,
                    build_file,
                }
            });
        }
        self.fire_project_events(identity_path, &projects);

        let owner = IsolateOwner::Build(identity_path.as_str().to_string());
        ctx.with_isolate(owner, CodecKind::UserTypes, |ctx| {
            let count = ctx.read_len()?;
            for _ in 0..count {
                let _build = ctx.read_string()?;
                let _name = ctx.read_shared_string()?;
                let _parameters = ctx.read_value()?;
            }
            Ok(())
        })?;

        let node_count = ctx.read_len()?;
        let mut nodes = Vec::with_capacity(node_count.min(1024));
        for _ in 0..node_count {
            let id = ctx.read_u64()?;
            let task_path = ctx.read_string()?;
            let project = if ctx.read_bool()? {
                Some(read_project_path(ctx)?)
            } else {
                None
            };
            let dep_count = ctx.read_len()?;
            let mut dependencies = Vec::with_capacity(dep_count.min(1024));
            for _ in 0..dep_count {
                dependencies.push(ctx.read_u64()?);
            }
            nodes.push(WorkNode {
                id,
                task_path,
                project,
                dependencies,
            });
        }
        let entry_count = ctx.read_len()?;
        let mut entry_node_ids = Vec::with_capacity(entry_count.min(1024));
        for _ in 0..entry_count {
            entry_node_ids.push(ctx.read_u64()?);
        }

        Ok(CachedBuildState::BuildWithWork {
            identity_path: identity_path.clone(),
            root_project_name,
            projects,
            work_graph: ScheduledWork {
                nodes,
                entry_node_ids,
            },
        })
    }

    fn read_event_listeners<R: Read>(
        &self,
        ctx: &mut ReadContext<R>,
    ) -> Result<Vec<BuildEventListener>> {
        ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::UserTypes, |ctx| {
            let count = ctx.read_len()?;
            let mut listeners = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                listeners.push(match ctx.read_u8()? {
                    LISTENER_SERVICE => {
                        let build = ctx.read_string()?;
                        let name = ctx.read_shared_string()?;
                        BuildEventListener::Service {
                            build: ProjectPath::new(build)
                                .map_err(|e| SerializeError::corrupt(e.to_string()))?,
                            name,
                        }
                    }
                    LISTENER_INSTANCE => BuildEventListener::Instance(ctx.read_value()?),
                    other => {
                        return Err(SerializeError::corrupt(format!(
                            "invalid listener marker {other:#04x}"
                        )))
                    }
                });
            }
            Ok(listeners)
        })
        .map_err(Into::into)
    }

    fn fire_project_events(&self, build: &ProjectPath, projects: &[CachedProjectState]) {
        self.listener.projects_loaded(build, projects.len());
        for project in projects {
            self.listener.project_restored(project.path());
        }
    }
}

fn write_environment<W: Write>(
    ctx: &mut WriteContext<W>,
    model: &BuildTreeModel,
) -> trellis_serialize::Result<()> {
    let env = &model.environment;
    ctx.write_len(env.env_vars.len())?;
    for (key, value) in &env.env_vars {
        ctx.write_string(key)?;
        ctx.write_string(value)?;
    }
    ctx.write_len(env.properties.len())?;
    for (key, value) in &env.properties {
        ctx.write_string(key)?;
        ctx.write_string(value)?;
    }
    Ok(())
}

fn read_environment<R: Read>(ctx: &mut ReadContext<R>) -> trellis_serialize::Result<()> {
    for _ in 0..2 {
        let count = ctx.read_len()?;
        for _ in 0..count {
            let _key = ctx.read_string()?;
            let _value = ctx.read_string()?;
        }
    }
    Ok(())
}

fn write_build_cache<W: Write>(
    ctx: &mut WriteContext<W>,
    model: &BuildTreeModel,
) -> trellis_serialize::Result<()> {
    let cache = &model.build_cache;
    ctx.write_bool(cache.local_enabled)?;
    match &cache.local_directory {
        Some(dir) => {
            ctx.write_bool(true)?;
            ctx.write_file(dir)?;
        }
        None => ctx.write_bool(false)?,
    }
    match &cache.remote_url {
        Some(url) => {
            ctx.write_bool(true)?;
            ctx.write_string(url)?;
        }
        None => ctx.write_bool(false)?,
    }
    ctx.write_bool(cache.remote_push)
}

fn read_build_cache<R: Read>(ctx: &mut ReadContext<R>) -> trellis_serialize::Result<()> {
    let _local_enabled = ctx.read_bool()?;
    if ctx.read_bool()? {
        let _dir = ctx.read_file()?;
    }
    if ctx.read_bool()? {
        let _url = ctx.read_string()?;
    }
    let _remote_push = ctx.read_bool()?;
    Ok(())
}

fn read_project_path<R: Read>(ctx: &mut ReadContext<R>) -> Result<ProjectPath> {
    let raw = ctx.read_string()?;
    ProjectPath::new(raw.clone())
        .map_err(|_| SerializeError::corrupt(format!("invalid project path {raw:?}")).into())
}

/// Tracks which builds have been written (or restored), keyed by root
/// directory, so a build included twice is only serialized once.
#[derive(Debug, Default)]
struct StoredBuilds {
    root_dirs: HashSet<PathBuf>,
}

impl StoredBuilds {
    fn mark(&mut self, root_dir: &std::path::Path) {
        self.root_dirs.insert(root_dir.to_path_buf());
    }

    fn contains(&self, root_dir: &std::path::Path) -> bool {
        self.root_dirs.contains(root_dir)
    }

    fn len(&self) -> usize {
        self.root_dirs.len()
    }
}
