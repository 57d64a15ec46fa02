//! End-to-end tests over a real on-disk store: store, load, partial
//! update, discard and corruption handling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use trellis_cache::{
    ConfigurationCache, Error, NoOpListener, StateIo, WorkGraphResult,
};
use trellis_fingerprint::{BuildEnvironment, BuildInput};
use trellis_model::{
    BuildCacheConfiguration, BuildEventListener, BuildModel, BuildServiceRegistration,
    BuildTreeModel, CacheAction, EnvironmentSnapshot, ProjectModel, ProjectPath, ScheduledWork,
    StartParameter, WorkNode,
};
use trellis_serialize::{Passthrough, Value};
use trellis_store::CacheRepository;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct FakeEnvironment {
    env_vars: BTreeMap<String, String>,
}

impl FakeEnvironment {
    fn with_var(name: &str, value: &str) -> Self {
        let mut env = Self::default();
        env.env_vars.insert(name.to_string(), value.to_string());
        env
    }

    fn var(mut self, name: &str, value: &str) -> Self {
        self.env_vars.insert(name.to_string(), value.to_string());
        self
    }
}

impl BuildEnvironment for FakeEnvironment {
    fn hash_file(&self, _path: &Path) -> Option<String> {
        None
    }

    fn hash_directory_content(&self, _path: &Path) -> Option<String> {
        None
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env_vars.get(name).cloned()
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
        "9.1.0".to_string()
    }

    fn tool_properties_hash(&self) -> String {
        "tool-props".to_string()
    }
}

fn path(s: &str) -> ProjectPath {
    ProjectPath::new(s).unwrap()
}

fn start_parameter() -> StartParameter {
    StartParameter {
        tool_version: "9.1.0".to_string(),
        requested_task_names: vec!["build".to_string()],
        ..StartParameter::default()
    }
}

fn project(p: &str, root: &Path) -> ProjectModel {
    let dir = root.join(p.trim_start_matches(':'));
    ProjectModel {
        path: path(p),
        project_dir: dir.clone(),
        build_file: dir.join("build.trellis"),
        build_dir: dir.join("build"),
    }
}

fn tree_model(root: &Path) -> BuildTreeModel {
    let work = ScheduledWork {
        nodes: vec![
            WorkNode {
                id: 1,
                task_path: ":app:compile".to_string(),
                project: Some(path(":app")),
                dependencies: vec![],
            },
            WorkNode {
                id: 2,
                task_path: ":app:build".to_string(),
                project: Some(path(":app")),
                dependencies: vec![1],
            },
        ],
        entry_node_ids: vec![2],
    };
    let mut environment = EnvironmentSnapshot::default();
    environment
        .env_vars
        .insert("CI".to_string(), "true".to_string());
    BuildTreeModel {
        root_build: BuildModel {
            identity_path: path(":"),
            name: "demo".to_string(),
            root_dir: root.to_path_buf(),
            root_project_name: "demo".to_string(),
            is_plugin_build: false,
            projects: vec![
                ProjectModel {
                    path: path(":"),
                    project_dir: root.to_path_buf(),
                    build_file: root.join("build.trellis"),
                    build_dir: root.join("build"),
                },
                project(":app", root),
                project(":lib", root),
            ],
            included_builds: vec![],
            cleanup_registrations: vec![root.join(".trellis/tmp")],
            required_services: vec![BuildServiceRegistration {
                build: path(":"),
                name: "countingService".to_string(),
                parameters: Value::String("max=4".to_string()),
            }],
            has_source_dependencies: false,
            scheduled_work: Some(work),
        },
        environment,
        build_cache: BuildCacheConfiguration::default(),
        event_listeners: vec![BuildEventListener::Instance(Value::String(
            "profiler".to_string(),
        ))],
    }
}

fn new_cache(
    repository: &CacheRepository,
    env: FakeEnvironment,
) -> ConfigurationCache<FakeEnvironment> {
    ConfigurationCache::new(
        start_parameter(),
        repository,
        env,
        Arc::new(Passthrough),
        Arc::new(NoOpListener),
    )
}

#[test]
fn first_run_stores_and_second_run_loads() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());
    let env = FakeEnvironment::with_var("TOOLCHAIN", "jdk-17");

    let first = new_cache(&repository, env.clone());
    let result = first
        .load_or_schedule_requested_tasks(|fingerprint| {
            fingerprint.record_build_input(&BuildInput::EnvVar {
                name: "TOOLCHAIN".to_string(),
                value: Some("jdk-17".to_string()),
            })?;
            Ok(tree_model(build_dir.path()))
        })
        .unwrap();
    assert!(matches!(result, WorkGraphResult::Scheduled { .. }));
    let stats = first.finalize_cache_entry().unwrap();
    assert_eq!(stats.reused, 0);
    assert_eq!(stats.updated, 3);

    let entry_dir = cache_dir.path().join(first.cache_key());
    for file in [
        "work.bin",
        "entry.bin",
        "buildfingerprint.bin",
        "projectfingerprint.bin",
    ] {
        let path = entry_dir.join(file);
        assert!(path.exists(), "missing {file}");
        assert!(path.metadata().unwrap().len() > 0, "empty {file}");
    }

    let second = new_cache(&repository, env);
    assert_eq!(
        second.determine_cache_action().unwrap(),
        CacheAction::Load
    );
    let result = second
        .load_or_schedule_requested_tasks(|_| panic!("configuration must not run"))
        .unwrap();
    let WorkGraphResult::Loaded(stored) = result else {
        panic!("expected a loaded work graph");
    };
    assert_eq!(stored.origin_invocation_id, first.invocation_id());
    assert_eq!(stored.builds.len(), 1);
    let graph = stored.builds[0].work_graph().unwrap();
    let task_paths: Vec<&str> = graph.nodes.iter().map(|n| n.task_path.as_str()).collect();
    assert_eq!(task_paths, [":app:compile", ":app:build"]);
    assert_eq!(graph.entry_node_ids, [2]);
    assert_eq!(stored.event_listeners.len(), 1);
}

#[test]
fn changed_build_input_recomputes_everything() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());

    let first = new_cache(&repository, FakeEnvironment::with_var("TOOLCHAIN", "jdk-17"));
    first
        .load_or_schedule_requested_tasks(|fingerprint| {
            fingerprint.record_build_input(&BuildInput::EnvVar {
                name: "TOOLCHAIN".to_string(),
                value: Some("jdk-17".to_string()),
            })?;
            Ok(tree_model(build_dir.path()))
        })
        .unwrap();
    first.finalize_cache_entry().unwrap();

    let second = new_cache(&repository, FakeEnvironment::with_var("TOOLCHAIN", "jdk-21"));
    assert_eq!(
        second.determine_cache_action().unwrap(),
        CacheAction::Store
    );
}

#[test]
fn changed_project_input_updates_only_that_project() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());
    let first_env = FakeEnvironment::default()
        .var("APP_FLAG", "on")
        .var("LIB_FLAG", "v1");

    let first = new_cache(&repository, first_env);
    first
        .load_or_schedule_requested_tasks(|fingerprint| {
            fingerprint.record_project_input(
                &path(":app"),
                &BuildInput::EnvVar {
                    name: "APP_FLAG".to_string(),
                    value: Some("on".to_string()),
                },
            )?;
            fingerprint.record_project_input(
                &path(":lib"),
                &BuildInput::EnvVar {
                    name: "LIB_FLAG".to_string(),
                    value: Some("v1".to_string()),
                },
            )?;
            Ok(tree_model(build_dir.path()))
        })
        .unwrap();
    first
        .load_or_create_project_metadata(&path(":app"), || {
            Ok(Value::String("app-deps".to_string()))
        })
        .unwrap();
    first
        .load_or_create_project_metadata(&path(":lib"), || {
            Ok(Value::String("lib-deps".to_string()))
        })
        .unwrap();
    first.finalize_cache_entry().unwrap();

    // Only :lib's recorded input changed.
    let second_env = FakeEnvironment::default()
        .var("APP_FLAG", "on")
        .var("LIB_FLAG", "v2");
    let second = new_cache(&repository, second_env.clone());
    assert_eq!(
        second.determine_cache_action().unwrap(),
        CacheAction::Update
    );
    let result = second
        .load_or_schedule_requested_tasks(|fingerprint| {
            fingerprint.record_project_input(
                &path(":lib"),
                &BuildInput::EnvVar {
                    name: "LIB_FLAG".to_string(),
                    value: Some("v2".to_string()),
                },
            )?;
            Ok(tree_model(build_dir.path()))
        })
        .unwrap();
    let WorkGraphResult::Scheduled {
        invalid_projects, ..
    } = result
    else {
        panic!("expected a scheduled work graph");
    };
    assert_eq!(
        invalid_projects.iter().collect::<Vec<_>>(),
        [&path(":lib")]
    );

    // :app's metadata survives the update, :lib's is recomputed.
    let app_meta = second
        .load_or_create_project_metadata(&path(":app"), || panic!("metadata must be cached"))
        .unwrap();
    assert_eq!(app_meta, Value::String("app-deps".to_string()));
    let lib_meta = second
        .load_or_create_project_metadata(&path(":lib"), || {
            Ok(Value::String("lib-deps-v2".to_string()))
        })
        .unwrap();
    assert_eq!(lib_meta, Value::String("lib-deps-v2".to_string()));

    let stats = second.finalize_cache_entry().unwrap();
    assert_eq!(stats.reused, 2);
    assert_eq!(stats.updated, 1);

    // With :app's fingerprint carried over, the updated entry is reusable.
    let third = new_cache(&repository, second_env);
    assert_eq!(third.determine_cache_action().unwrap(), CacheAction::Load);
}

#[test]
fn reported_problems_discard_the_entry() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());
    let env = FakeEnvironment::default();

    let first = new_cache(&repository, env.clone());
    first
        .load_or_schedule_requested_tasks(|_| Ok(tree_model(build_dir.path())))
        .unwrap();
    first
        .problems()
        .report("build logic read an undeclared system property");
    let stats = first.finalize_cache_entry().unwrap();
    assert_eq!(stats.reused, 0);

    assert!(!cache_dir
        .path()
        .join(first.cache_key())
        .join("entry.bin")
        .exists());
    let second = new_cache(&repository, env);
    assert_eq!(
        second.determine_cache_action().unwrap(),
        CacheAction::Store
    );
}

#[test]
fn truncated_work_state_is_corrupt() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());
    let env = FakeEnvironment::default();

    let first = new_cache(&repository, env.clone());
    first
        .load_or_schedule_requested_tasks(|_| Ok(tree_model(build_dir.path())))
        .unwrap();
    first.finalize_cache_entry().unwrap();

    // Strip the trailing sentinel.
    let work_file = cache_dir.path().join(first.cache_key()).join("work.bin");
    let bytes = std::fs::read(&work_file).unwrap();
    std::fs::write(&work_file, &bytes[..bytes.len() - 4]).unwrap();

    let second = new_cache(&repository, env);
    let err = second
        .load_or_schedule_requested_tasks(|_| panic!("configuration must not run"))
        .unwrap_err();
    assert!(matches!(err, Error::Serialize { .. } | Error::Store { .. }));
}

#[test]
fn recreate_flag_forces_a_fresh_store() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());
    let env = FakeEnvironment::default();

    let first = new_cache(&repository, env.clone());
    first
        .load_or_schedule_requested_tasks(|_| Ok(tree_model(build_dir.path())))
        .unwrap();
    first.finalize_cache_entry().unwrap();

    let mut parameter = start_parameter();
    parameter.recreate_cache = true;
    let second = ConfigurationCache::new(
        parameter,
        &repository,
        env,
        Arc::new(Passthrough),
        Arc::new(NoOpListener),
    );
    assert_eq!(
        second.determine_cache_action().unwrap(),
        CacheAction::Store
    );
}

#[test]
fn invalidated_entry_does_not_serve_its_model() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());

    let first = new_cache(&repository, FakeEnvironment::with_var("TOOLCHAIN", "jdk-17"));
    first
        .load_or_schedule_requested_tasks(|fingerprint| {
            fingerprint.record_build_input(&BuildInput::EnvVar {
                name: "TOOLCHAIN".to_string(),
                value: Some("jdk-17".to_string()),
            })?;
            Ok(tree_model(build_dir.path()))
        })
        .unwrap();
    first
        .load_or_create_model(|| Ok(Value::String("model-for-jdk-17".to_string())))
        .unwrap();
    first.finalize_cache_entry().unwrap();

    // The recorded input changed, so the whole entry is stale.
    let second = new_cache(&repository, FakeEnvironment::with_var("TOOLCHAIN", "jdk-21"));
    assert_eq!(
        second.determine_cache_action().unwrap(),
        CacheAction::Store
    );
    let model = second
        .load_or_create_model(|| Ok(Value::String("model-for-jdk-21".to_string())))
        .unwrap();
    assert_eq!(model, Value::String("model-for-jdk-21".to_string()));
}

#[test]
fn full_store_purges_state_files_of_the_invalidated_entry() {
    let cache_dir = TempDir::new().unwrap();
    let build_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());

    let first = new_cache(&repository, FakeEnvironment::with_var("TOOLCHAIN", "jdk-17"));
    first
        .load_or_schedule_requested_tasks(|fingerprint| {
            fingerprint.record_build_input(&BuildInput::EnvVar {
                name: "TOOLCHAIN".to_string(),
                value: Some("jdk-17".to_string()),
            })?;
            Ok(tree_model(build_dir.path()))
        })
        .unwrap();
    first
        .load_or_create_intermediate_model(Some(&path(":app")), "ide-model", || {
            Ok(Value::String("ide-model-for-jdk-17".to_string()))
        })
        .unwrap();
    first.finalize_cache_entry().unwrap();

    // Full re-store without requesting any intermediate model.
    let new_env = FakeEnvironment::with_var("TOOLCHAIN", "jdk-21");
    let second = new_cache(&repository, new_env.clone());
    second
        .load_or_schedule_requested_tasks(|fingerprint| {
            fingerprint.record_build_input(&BuildInput::EnvVar {
                name: "TOOLCHAIN".to_string(),
                value: Some("jdk-21".to_string()),
            })?;
            Ok(tree_model(build_dir.path()))
        })
        .unwrap();
    second.finalize_cache_entry().unwrap();
    assert!(!cache_dir
        .path()
        .join(second.cache_key())
        .join("intermediatemodels.bin")
        .exists());

    // The reusable entry must not resurrect the invalidated entry's models.
    let third = new_cache(&repository, new_env);
    assert_eq!(third.determine_cache_action().unwrap(), CacheAction::Load);
    let model = third
        .load_or_create_intermediate_model(Some(&path(":app")), "ide-model", || {
            Ok(Value::String("ide-model-for-jdk-21".to_string()))
        })
        .unwrap();
    assert_eq!(model, Value::String("ide-model-for-jdk-21".to_string()));
}

#[test]
fn failed_configuration_stops_fingerprint_collection() {
    let cache_dir = TempDir::new().unwrap();
    let repository = CacheRepository::new(cache_dir.path());
    let cache = new_cache(&repository, FakeEnvironment::default());

    let err = cache
        .load_or_schedule_requested_tasks(|_| {
            Err(trellis_cache::Error::invalid_state("configuration failed"))
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert!(!cache.fingerprint_controller().is_collecting().unwrap());
    assert!(!cache.barrier().is_at_configuration_time());
}

#[test]
fn work_state_serialization_is_deterministic() {
    let build_dir = TempDir::new().unwrap();
    let model = tree_model(build_dir.path());
    let parameter = start_parameter();
    let invocation_id = Uuid::new_v4();
    let io = StateIo::new(Arc::new(NoOpListener));

    let mut first = Vec::new();
    io.write_work_state(&mut first, &model, &parameter, invocation_id)
        .unwrap();
    let mut second = Vec::new();
    io.write_work_state(&mut second, &model, &parameter, invocation_id)
        .unwrap();
    assert_eq!(first, second);
}
