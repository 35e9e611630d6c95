//! Task Lifecycle Hooks
//!
//! The workflow engine calls into [`LifecycleHookDispatcher`] as a step is
//! initialised and as each of its task attempts moves from creation to
//! completion. Step- and run-scoped collaborators live on the dispatcher;
//! each attempt carries its own [`TaskLifecycle`] state machine:
//!
//! ```text
//! Init -> PackageReady -> Dispatched ----> PreStepRegistered -> Finished
//!                      \-> LocalFallback -/                      /
//!                                       \-----------------------/
//! ```
//!
//! Hooks invoked out of order fail with [`Error::LifecycleOrdering`].

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::cache::{PackageArtifact, PackageCache, PackageReference};
use super::invocation::{InvocationBuilder, InvocationSpec};
use crate::datastore::{BlobStore, TaskDatastore};
use crate::environment::{ExecutionMode, RemoteConfig};
use crate::error::{ConfigurationError, Error, Result};
use crate::metadata::{sync_to_datastore, MetadataEntry, MetadataKind, MetadataStore, SyncReport};
use crate::monitoring::{best_effort, LogSidecar};
use crate::workflow::{validate_step, ExecutionOutcome, StepContext, StepDefinition, Workflow};

/// Lifecycle position of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Attempt created by the engine, nothing done yet
    Init,
    /// Package reference resolved (or skipped for clones)
    PackageReady,
    /// Command rewritten to run on Armada
    Dispatched,
    /// Remote budget exhausted; the attempt runs locally
    LocalFallback,
    /// Baseline metadata recorded
    PreStepRegistered,
    /// Attempt complete
    Finished,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::PackageReady => write!(f, "package_ready"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::LocalFallback => write!(f, "local_fallback"),
            Self::PreStepRegistered => write!(f, "pre_step_registered"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// State carried by one task attempt across its hooks.
pub struct TaskLifecycle {
    state: LifecycleState,
    package: Option<PackageReference>,
    task_datastore: Option<Arc<dyn TaskDatastore>>,
    metadata: Option<Arc<dyn MetadataStore>>,
    sidecar: Option<LogSidecar>,
}

impl TaskLifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Init,
            package: None,
            task_datastore: None,
            metadata: None,
            sidecar: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Package reference used by this attempt, if resolved.
    pub fn package(&self) -> Option<&PackageReference> {
        self.package.as_ref()
    }

    fn ordering_error(&self, hook: &'static str, requires: &'static str) -> Error {
        Error::LifecycleOrdering {
            hook,
            state: self.state,
            requires,
        }
    }
}

impl Default for TaskLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLifecycle")
            .field("state", &self.state)
            .field("package", &self.package)
            .field("sidecar", &self.sidecar.is_some())
            .finish()
    }
}

/// Collaborators known once the step is initialised.
struct StepScope {
    step_name: String,
    blob_store: Arc<dyn BlobStore>,
}

/// Collaborators known once the run starts.
struct RuntimeScope {
    run_id: String,
    graph: Arc<Workflow>,
    package: PackageArtifact,
    cache: Arc<PackageCache>,
}

/// Hook entry points for one step running on Armada.
///
/// `on_step_init` and `on_runtime_init` run once per step; the remaining
/// hooks run per attempt and may be called concurrently from several
/// threads, each with its own [`TaskLifecycle`].
pub struct LifecycleHookDispatcher {
    config: RemoteConfig,
    mode: ExecutionMode,
    builder: InvocationBuilder,
    step: Option<StepScope>,
    runtime: Option<RuntimeScope>,
}

impl LifecycleHookDispatcher {
    pub fn new(config: RemoteConfig, mode: ExecutionMode) -> Self {
        Self {
            builder: InvocationBuilder::new(config.clone()),
            config,
            mode,
            step: None,
            runtime: None,
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    /// Validates the step's modifiers and records step-scoped collaborators.
    ///
    /// # Errors
    ///
    /// Any [`ConfigurationError`]; the run must not start.
    pub fn on_step_init(
        &mut self,
        step: &StepDefinition,
        blob_store: Arc<dyn BlobStore>,
    ) -> Result<()> {
        validate_step(&step.with_backend_capability(&self.config.modifier()))?;

        let kind = blob_store.kind();
        if !kind.is_shared() {
            if self.config.require_remote_datastore {
                return Err(ConfigurationError::LocalDatastore {
                    step: step.name.clone(),
                    kind: kind.to_string(),
                }
                .into());
            }
            warn!(
                "Step '{}' runs on Armada with the '{}' datastore; remote tasks may not be able to read the package",
                step.name, kind
            );
        }

        debug!("on_step_init: step '{}' ready for Armada", step.name);
        self.step = Some(StepScope {
            step_name: step.name.clone(),
            blob_store,
        });
        Ok(())
    }

    /// Records run-scoped collaborators.
    pub fn on_runtime_init(
        &mut self,
        graph: Arc<Workflow>,
        package: PackageArtifact,
        run_id: &str,
        cache: Arc<PackageCache>,
    ) -> Result<()> {
        let Some(step) = &self.step else {
            return Err(Error::LifecycleOrdering {
                hook: "on_runtime_init",
                state: LifecycleState::Init,
                requires: "on_step_init",
            });
        };

        if graph.get_step(&step.step_name).is_none() {
            return Err(ConfigurationError::UnknownStep(step.step_name.clone()).into());
        }
        if cache.run_id() != run_id {
            return Err(ConfigurationError::Invalid(format!(
                "package cache for run '{}' handed to run '{}'",
                cache.run_id(),
                run_id
            ))
            .into());
        }

        debug!("on_runtime_init: run '{}' for step '{}'", run_id, step.step_name);
        self.runtime = Some(RuntimeScope {
            run_id: run_id.to_string(),
            graph,
            package,
            cache,
        });
        Ok(())
    }

    /// Resolves the package for a new attempt, uploading it on first use.
    ///
    /// Cloned attempts reuse a previous attempt's outputs and never upload;
    /// they take whatever reference is already cached.
    pub fn on_task_created(
        &self,
        task: &mut TaskLifecycle,
        ctx: &StepContext<'_>,
        is_cloned: bool,
    ) -> Result<()> {
        const HOOK: &str = "on_task_created";
        if task.state != LifecycleState::Init {
            return Err(task.ordering_error(HOOK, "a fresh task attempt"));
        }
        let (Some(step), Some(runtime)) = (&self.step, &self.runtime) else {
            return Err(task.ordering_error(HOOK, "on_step_init and on_runtime_init"));
        };
        if runtime.graph.get_step(ctx.step_name).is_none() {
            return Err(ConfigurationError::UnknownStep(ctx.step_name.to_string()).into());
        }

        task.package = if is_cloned {
            debug!("Task {}/{} is cloned; skipping package upload", ctx.step_name, ctx.task_id);
            runtime.cache.cached()
        } else {
            Some(
                runtime
                    .cache
                    .acquire_reference(ctx.run_id, &runtime.package, step.blob_store.as_ref())?,
            )
        };

        task.state = LifecycleState::PackageReady;
        debug!(
            "Task {}/{}/{} -> {}",
            runtime.run_id, ctx.step_name, ctx.task_id, task.state
        );
        Ok(())
    }

    /// Replaces the task's local command with the Armada command.
    ///
    /// Once the attempt is past the remote retry budget this is a no-op and
    /// the attempt runs locally, so fallback handlers (e.g. a catch
    /// modifier) get to run on the local machine. Returns true if the
    /// command was rewritten.
    pub fn on_build_remote_command(
        &self,
        task: &mut TaskLifecycle,
        ctx: &StepContext<'_>,
        spec: &mut InvocationSpec,
    ) -> Result<bool> {
        const HOOK: &str = "on_build_remote_command";
        if task.state != LifecycleState::PackageReady {
            return Err(task.ordering_error(HOOK, "on_task_created"));
        }

        if !ctx.within_remote_budget() {
            info!(
                "Task {}/{} attempt {} exceeds remote budget ({}); running locally",
                ctx.step_name, ctx.task_id, ctx.retry_count, ctx.max_user_code_retries
            );
            task.state = LifecycleState::LocalFallback;
            return Ok(false);
        }

        let Some(reference) = &task.package else {
            return Err(task.ordering_error(HOOK, "a package reference was cached"));
        };

        self.builder.build(ctx, reference, spec)?;
        task.state = LifecycleState::Dispatched;
        info!(
            "Task {}/{} attempt {} dispatched to Armada",
            ctx.step_name, ctx.task_id, ctx.retry_count
        );
        Ok(true)
    }

    /// Records baseline metadata for the attempt and starts log forwarding.
    pub fn on_pre_step(
        &self,
        task: &mut TaskLifecycle,
        ctx: &StepContext<'_>,
        metadata: Arc<dyn MetadataStore>,
        task_datastore: Arc<dyn TaskDatastore>,
    ) -> Result<()> {
        const HOOK: &str = "on_pre_step";
        if !matches!(
            task.state,
            LifecycleState::PackageReady
                | LifecycleState::Dispatched
                | LifecycleState::LocalFallback
        ) {
            return Err(task.ordering_error(HOOK, "on_task_created"));
        }

        let entries = self.baseline_entries(ctx);
        metadata.register(ctx.run_id, ctx.step_name, ctx.task_id, &entries)?;

        if self.config.log_sidecar {
            task.sidecar = Some(LogSidecar::start(
                Arc::clone(&task_datastore),
                self.config.log_files.clone(),
                self.config.sidecar_interval(),
            )?);
        }

        task.metadata = Some(metadata);
        task.task_datastore = Some(task_datastore);
        task.state = LifecycleState::PreStepRegistered;
        debug!(
            "Task {}/{} registered {} metadata entries",
            ctx.step_name,
            ctx.task_id,
            entries.len()
        );
        Ok(())
    }

    /// Bridges metadata out of the remote workload and stops log forwarding.
    ///
    /// Metadata is bridged only when running inside Armada with the local
    /// metadata store. Stopping the log sidecar is best-effort: its failure
    /// never changes the result. Returns the sync report when bridging ran.
    pub fn on_task_finished(
        &self,
        task: &mut TaskLifecycle,
        ctx: &StepContext<'_>,
        outcome: ExecutionOutcome,
    ) -> Result<Option<SyncReport>> {
        const HOOK: &str = "on_task_finished";
        let result = match task.state {
            LifecycleState::PreStepRegistered => self.bridge_metadata(task),
            // Ran locally without registering; nothing to bridge.
            LifecycleState::LocalFallback => Ok(None),
            _ => Err(task.ordering_error(HOOK, "on_pre_step")),
        };

        let sidecar = task.sidecar.take();
        best_effort("stop log sidecar", || match sidecar {
            Some(sidecar) => sidecar.terminate(),
            None => Err(Error::Sidecar("log sidecar was never started".to_string())),
        });

        let report = result?;
        task.state = LifecycleState::Finished;

        match outcome {
            ExecutionOutcome::Succeeded => info!(
                "Task {}/{} attempt {} succeeded",
                ctx.step_name, ctx.task_id, ctx.retry_count
            ),
            ExecutionOutcome::FailedRetryable if ctx.retry_count >= ctx.max_user_code_retries => {
                warn!(
                    "Task {}/{} attempt {} failed; remote budget exhausted, next attempt runs locally",
                    ctx.step_name, ctx.task_id, ctx.retry_count
                )
            }
            other => warn!(
                "Task {}/{} attempt {} finished: {}",
                ctx.step_name, ctx.task_id, ctx.retry_count, other
            ),
        }
        Ok(report)
    }

    fn bridge_metadata(&self, task: &TaskLifecycle) -> Result<Option<SyncReport>> {
        if !self.mode.is_remote() {
            return Ok(None);
        }
        let (Some(metadata), Some(task_datastore)) = (&task.metadata, &task.task_datastore) else {
            return Err(task.ordering_error("on_task_finished", "on_pre_step"));
        };
        if metadata.kind() != MetadataKind::Local {
            return Ok(None);
        }

        let report = sync_to_datastore(&self.config.metadata_dir(), task_datastore.as_ref())?;
        Ok(Some(report))
    }

    fn baseline_entries(&self, ctx: &StepContext<'_>) -> Vec<MetadataEntry> {
        let tags = vec![ctx.attempt_tag()];
        let mut entries = vec![
            MetadataEntry::new("attempt-id", ctx.retry_count.to_string(), tags.clone()),
            MetadataEntry::new("armada-namespace", self.builder.namespace(ctx), tags.clone()),
            MetadataEntry::new("armada-job-set", self.builder.job_set(ctx), tags.clone()),
        ];
        if let Some(job_id) = self.mode.job_id() {
            entries.push(MetadataEntry::new("armada-job-id", job_id, tags));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{DatastoreKind, LocalBlobStore, LocalTaskDatastore, StoredBlob};
    use crate::metadata::LocalMetadataStore;
    use crate::workflow::Modifier;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    struct CountingBlobStore {
        calls: AtomicUsize,
    }

    impl BlobStore for CountingBlobStore {
        fn store(&self, blobs: &[&[u8]], _len_hint: usize) -> Result<Vec<StoredBlob>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(blobs
                .iter()
                .map(|_| StoredBlob {
                    address: "s3://bucket/r1".to_string(),
                    digest: "abc123".to_string(),
                })
                .collect())
        }

        fn kind(&self) -> DatastoreKind {
            DatastoreKind::S3
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        store: Arc<CountingBlobStore>,
        node: StepDefinition,
        dispatcher: LifecycleHookDispatcher,
    }

    fn graph() -> Workflow {
        let mut workflow = Workflow::new("TrainFlow");
        workflow.add_step(StepDefinition::new("start")).unwrap();
        workflow
            .add_step(
                StepDefinition::new("train")
                    .with_modifier(Modifier::new("armada"))
                    .depends_on("start"),
            )
            .unwrap();
        workflow
    }

    fn fixture(mode: ExecutionMode) -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let mut config = RemoteConfig::new("test", "{run_id}-{step}", "job-file.dummy");
        config.entrypoint = Some("armada-step".to_string());
        config.local_metadata_dir = Some(root.join("meta"));

        let graph = graph();
        let node = graph.get_step("train").unwrap().clone();
        let store = Arc::new(CountingBlobStore {
            calls: AtomicUsize::new(0),
        });

        let mut dispatcher = LifecycleHookDispatcher::new(config, mode);
        dispatcher.on_step_init(&node, store.clone()).unwrap();
        dispatcher
            .on_runtime_init(
                Arc::new(graph),
                PackageArtifact::new(b"code".to_vec()),
                "R1",
                Arc::new(PackageCache::new("R1")),
            )
            .unwrap();

        Fixture {
            _dir: dir,
            root,
            store,
            node,
            dispatcher,
        }
    }

    fn context<'a>(
        node: &'a StepDefinition,
        task_id: &'a str,
        retry_count: u32,
    ) -> StepContext<'a> {
        StepContext {
            run_id: "R1",
            step_name: "train",
            task_id,
            retry_count,
            max_user_code_retries: 1,
            node,
        }
    }

    fn stores(root: &Path, task_id: &str) -> (Arc<LocalMetadataStore>, Arc<LocalTaskDatastore>) {
        (
            Arc::new(LocalMetadataStore::new(root.join("meta"))),
            Arc::new(LocalTaskDatastore::new(root.join("ds"), "R1", "train", task_id)),
        )
    }

    #[test]
    fn test_full_remote_lifecycle() {
        let f = fixture(ExecutionMode::Remote {
            job_id: Some("job-42".to_string()),
        });
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();
        let mut spec = InvocationSpec::local("python", "train");

        f.dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        assert_eq!(task.state(), LifecycleState::PackageReady);

        assert!(f.dispatcher.on_build_remote_command(&mut task, &ctx, &mut spec).unwrap());
        assert_eq!(task.state(), LifecycleState::Dispatched);
        assert_eq!(
            spec.command_args,
            vec!["abc123", "s3://bucket/r1", "test", "R1-train", "job-file.dummy"]
        );

        let (metadata, ds) = stores(&f.root, "1");
        f.dispatcher
            .on_pre_step(&mut task, &ctx, metadata, ds.clone())
            .unwrap();
        assert_eq!(task.state(), LifecycleState::PreStepRegistered);

        let report = f
            .dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::Succeeded)
            .unwrap();
        assert_eq!(task.state(), LifecycleState::Finished);
        assert_eq!(report, Some(SyncReport { copied: 4, skipped: 0 }));
        assert!(ds.has_metadata("0_armada-job-id.json").unwrap());
        assert!(ds.has_metadata("0_attempt-id.json").unwrap());
    }

    #[test]
    fn test_retry_reuses_reference_without_upload() {
        let f = fixture(ExecutionMode::Local);

        let mut first = TaskLifecycle::new();
        f.dispatcher
            .on_task_created(&mut first, &context(&f.node, "1", 0), false)
            .unwrap();
        let mut retry = TaskLifecycle::new();
        f.dispatcher
            .on_task_created(&mut retry, &context(&f.node, "1", 1), false)
            .unwrap();

        assert_eq!(f.store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.package(), retry.package());
        assert_eq!(first.package().unwrap().digest, "abc123");
    }

    #[test]
    fn test_concurrent_attempts_upload_once() {
        let f = fixture(ExecutionMode::Local);
        let barrier = Barrier::new(8);
        let task_ids: Vec<String> = (0..8).map(|i| i.to_string()).collect();

        let packages: Vec<Option<PackageReference>> = thread::scope(|scope| {
            let handles: Vec<_> = task_ids
                .iter()
                .map(|task_id| {
                    let f = &f;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let mut task = TaskLifecycle::new();
                        barrier.wait();
                        f.dispatcher
                            .on_task_created(&mut task, &context(&f.node, task_id, 0), false)
                            .unwrap();
                        task.package().cloned()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(f.store.calls.load(Ordering::SeqCst), 1);
        assert!(packages.iter().all(|p| p.is_some() && *p == packages[0]));
    }

    #[test]
    fn test_clone_never_uploads() {
        let f = fixture(ExecutionMode::Local);

        let mut cloned = TaskLifecycle::new();
        f.dispatcher
            .on_task_created(&mut cloned, &context(&f.node, "1", 0), true)
            .unwrap();
        assert_eq!(cloned.state(), LifecycleState::PackageReady);
        assert!(cloned.package().is_none());

        let mut fresh = TaskLifecycle::new();
        f.dispatcher
            .on_task_created(&mut fresh, &context(&f.node, "2", 0), false)
            .unwrap();
        let mut cloned_after = TaskLifecycle::new();
        f.dispatcher
            .on_task_created(&mut cloned_after, &context(&f.node, "3", 0), true)
            .unwrap();

        assert_eq!(f.store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cloned_after.package(), fresh.package());
    }

    #[test]
    fn test_over_budget_falls_back_locally() {
        let f = fixture(ExecutionMode::Local);
        let ctx = context(&f.node, "1", 2);
        let mut task = TaskLifecycle::new();
        let mut spec = InvocationSpec::local("python", "train");
        let original = spec.clone();

        f.dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        let dispatched = f
            .dispatcher
            .on_build_remote_command(&mut task, &ctx, &mut spec)
            .unwrap();

        assert!(!dispatched);
        assert_eq!(task.state(), LifecycleState::LocalFallback);
        assert_eq!(spec, original);

        let (metadata, ds) = stores(&f.root, "1");
        f.dispatcher.on_pre_step(&mut task, &ctx, metadata, ds).unwrap();
        let report = f
            .dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::FailedTerminal)
            .unwrap();
        assert_eq!(report, None);
        assert_eq!(task.state(), LifecycleState::Finished);
    }

    #[test]
    fn test_local_fallback_finishes_without_pre_step() {
        let f = fixture(ExecutionMode::Remote { job_id: None });
        let ctx = context(&f.node, "1", 5);
        let mut task = TaskLifecycle::new();
        let mut spec = InvocationSpec::local("python", "train");

        f.dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        assert!(!f.dispatcher.on_build_remote_command(&mut task, &ctx, &mut spec).unwrap());

        let report = f
            .dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::Succeeded)
            .unwrap();
        assert_eq!(report, None);
        assert_eq!(task.state(), LifecycleState::Finished);
    }

    #[test]
    fn test_pre_step_without_task_created_is_ordering_error() {
        let f = fixture(ExecutionMode::Remote { job_id: None });
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();
        let (metadata, ds) = stores(&f.root, "1");

        let err = f.dispatcher.on_pre_step(&mut task, &ctx, metadata, ds).unwrap_err();
        match err {
            Error::LifecycleOrdering { hook, state, .. } => {
                assert_eq!(hook, "on_pre_step");
                assert_eq!(state, LifecycleState::Init);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(task.state(), LifecycleState::Init);
    }

    #[test]
    fn test_finish_without_pre_step_is_ordering_error() {
        let f = fixture(ExecutionMode::Remote { job_id: None });
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();

        let err = f
            .dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::Succeeded)
            .unwrap_err();
        assert!(matches!(err, Error::LifecycleOrdering { hook: "on_task_finished", .. }));
    }

    #[test]
    fn test_build_before_task_created_is_ordering_error() {
        let f = fixture(ExecutionMode::Local);
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();
        let mut spec = InvocationSpec::local("python", "train");

        let err = f
            .dispatcher
            .on_build_remote_command(&mut task, &ctx, &mut spec)
            .unwrap_err();
        assert!(matches!(err, Error::LifecycleOrdering { .. }));
    }

    #[test]
    fn test_build_for_clone_without_cached_package_is_ordering_error() {
        let f = fixture(ExecutionMode::Local);
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();
        let mut spec = InvocationSpec::local("python", "train");

        f.dispatcher.on_task_created(&mut task, &ctx, true).unwrap();
        let err = f
            .dispatcher
            .on_build_remote_command(&mut task, &ctx, &mut spec)
            .unwrap_err();
        assert!(matches!(err, Error::LifecycleOrdering { .. }));
    }

    #[test]
    fn test_task_created_twice_is_ordering_error() {
        let f = fixture(ExecutionMode::Local);
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();

        f.dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        assert!(f.dispatcher.on_task_created(&mut task, &ctx, false).is_err());
    }

    #[test]
    fn test_task_created_before_runtime_init() {
        let node = graph().get_step("train").unwrap().clone();
        let dispatcher = LifecycleHookDispatcher::new(
            RemoteConfig::new("ns", "set", "file"),
            ExecutionMode::Local,
        );
        let mut task = TaskLifecycle::new();

        let err = dispatcher
            .on_task_created(&mut task, &context(&node, "1", 0), false)
            .unwrap_err();
        assert!(matches!(err, Error::LifecycleOrdering { hook: "on_task_created", .. }));
    }

    #[test]
    fn test_finish_swallows_sidecar_never_started() {
        let f = fixture(ExecutionMode::Local);
        assert!(!f.dispatcher.config().log_sidecar);
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();
        let (metadata, ds) = stores(&f.root, "1");

        f.dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        f.dispatcher.on_pre_step(&mut task, &ctx, metadata, ds).unwrap();

        let result = f
            .dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::FailedRetryable);
        assert!(result.is_ok());
    }

    #[test]
    fn test_sidecar_started_and_stopped() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("stdout.log");
        fs::write(&log_path, "hello").unwrap();

        let mut config = RemoteConfig::new("ns", "set", "file");
        config.entrypoint = Some("armada-step".to_string());
        config.log_sidecar = true;
        config.log_files = vec![log_path];
        config.local_metadata_dir = Some(dir.path().join("meta"));

        let graph = graph();
        let node = graph.get_step("train").unwrap().clone();
        let mut dispatcher = LifecycleHookDispatcher::new(config, ExecutionMode::Local);
        dispatcher
            .on_step_init(&node, Arc::new(LocalBlobStore::new(dir.path().join("blobs"))))
            .unwrap();
        dispatcher
            .on_runtime_init(
                Arc::new(graph),
                PackageArtifact::new(b"code".to_vec()),
                "R1",
                Arc::new(PackageCache::new("R1")),
            )
            .unwrap();

        let ctx = context(&node, "1", 0);
        let mut task = TaskLifecycle::new();
        let (metadata, ds) = stores(dir.path(), "1");

        dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        dispatcher.on_pre_step(&mut task, &ctx, metadata, ds.clone()).unwrap();
        dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::Succeeded)
            .unwrap();

        assert_eq!(ds.read_log("stdout.log").unwrap(), b"hello");
    }

    #[test]
    fn test_remote_mode_with_service_metadata_skips_bridge() {
        struct ServiceMetadata;

        impl MetadataStore for ServiceMetadata {
            fn register(&self, _: &str, _: &str, _: &str, _: &[MetadataEntry]) -> Result<()> {
                Ok(())
            }

            fn kind(&self) -> MetadataKind {
                MetadataKind::Service
            }
        }

        let f = fixture(ExecutionMode::Remote { job_id: None });
        let ctx = context(&f.node, "1", 0);
        let mut task = TaskLifecycle::new();
        let (_, ds) = stores(&f.root, "1");

        f.dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        f.dispatcher
            .on_pre_step(&mut task, &ctx, Arc::new(ServiceMetadata), ds.clone())
            .unwrap();
        let report = f
            .dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::Succeeded)
            .unwrap();

        assert_eq!(report, None);
        assert!(ds.metadata_names().unwrap().is_empty());
    }

    #[test]
    fn test_step_init_rejects_conflicting_backends() {
        let node = StepDefinition::new("train")
            .with_modifier(Modifier::new("armada"))
            .with_modifier(Modifier::new("kubernetes"));
        let mut dispatcher = LifecycleHookDispatcher::new(
            RemoteConfig::new("ns", "set", "file"),
            ExecutionMode::Local,
        );
        let store = Arc::new(CountingBlobStore {
            calls: AtomicUsize::new(0),
        });

        let err = dispatcher.on_step_init(&node, store).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::ConflictingBackends { .. })
        ));
    }

    #[test]
    fn test_step_init_uses_configured_parallel_capability() {
        let node = StepDefinition::new("train")
            .with_modifier(Modifier::new("armada"))
            .with_parallel(true);
        let store = Arc::new(CountingBlobStore {
            calls: AtomicUsize::new(0),
        });

        let mut config = RemoteConfig::new("ns", "set", "file");
        config.supports_parallel = true;
        let mut dispatcher = LifecycleHookDispatcher::new(config, ExecutionMode::Local);
        assert!(dispatcher.on_step_init(&node, store.clone()).is_ok());

        let mut dispatcher = LifecycleHookDispatcher::new(
            RemoteConfig::new("ns", "set", "file"),
            ExecutionMode::Local,
        );
        let err = dispatcher.on_step_init(&node, store).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnsupportedParallelism { .. })
        ));
    }

    #[test]
    fn test_finish_at_max_retry_count() {
        let f = fixture(ExecutionMode::Local);
        let mut ctx = context(&f.node, "1", u32::MAX);
        ctx.max_user_code_retries = u32::MAX;
        let mut task = TaskLifecycle::new();
        let mut spec = InvocationSpec::local("python", "train");
        let (metadata, ds) = stores(&f.root, "1");

        f.dispatcher.on_task_created(&mut task, &ctx, false).unwrap();
        assert!(f.dispatcher.on_build_remote_command(&mut task, &ctx, &mut spec).unwrap());
        f.dispatcher.on_pre_step(&mut task, &ctx, metadata, ds).unwrap();

        let report = f
            .dispatcher
            .on_task_finished(&mut task, &ctx, ExecutionOutcome::FailedRetryable)
            .unwrap();
        assert_eq!(report, None);
        assert_eq!(task.state(), LifecycleState::Finished);
    }

    #[test]
    fn test_step_init_rejects_local_datastore_when_required() {
        let dir = tempdir().unwrap();
        let node = graph().get_step("train").unwrap().clone();
        let mut config = RemoteConfig::new("ns", "set", "file");
        config.require_remote_datastore = true;
        let mut dispatcher = LifecycleHookDispatcher::new(config, ExecutionMode::Local);

        let err = dispatcher
            .on_step_init(&node, Arc::new(LocalBlobStore::new(dir.path())))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::LocalDatastore { .. })
        ));
    }

    #[test]
    fn test_runtime_init_rejects_unknown_step() {
        let dir = tempdir().unwrap();
        let node = StepDefinition::new("evaluate").with_modifier(Modifier::new("armada"));
        let mut dispatcher = LifecycleHookDispatcher::new(
            RemoteConfig::new("ns", "set", "file"),
            ExecutionMode::Local,
        );
        dispatcher
            .on_step_init(&node, Arc::new(LocalBlobStore::new(dir.path())))
            .unwrap();

        let err = dispatcher
            .on_runtime_init(
                Arc::new(graph()),
                PackageArtifact::new(b"code".to_vec()),
                "R1",
                Arc::new(PackageCache::new("R1")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownStep(_))
        ));
    }

    #[test]
    fn test_runtime_init_rejects_foreign_cache() {
        let dir = tempdir().unwrap();
        let node = graph().get_step("train").unwrap().clone();
        let mut dispatcher = LifecycleHookDispatcher::new(
            RemoteConfig::new("ns", "set", "file"),
            ExecutionMode::Local,
        );
        dispatcher
            .on_step_init(&node, Arc::new(LocalBlobStore::new(dir.path())))
            .unwrap();

        let err = dispatcher
            .on_runtime_init(
                Arc::new(graph()),
                PackageArtifact::new(b"code".to_vec()),
                "R1",
                Arc::new(PackageCache::new("R0")),
            )
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
