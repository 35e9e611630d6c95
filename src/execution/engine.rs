//! Local Step Driver
//!
//! Drives the lifecycle hooks for the task attempts of one step the way a
//! workflow engine would:
//! - Step and runtime initialisation (validation, package cache setup)
//! - Parallel task creation and command building on worker threads
//! - Optional pre-step/finish pass against local stores (record mode)
//!
//! The result is the list of commands each attempt would run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{error, info};

use super::cache::{PackageArtifact, PackageCache, PackageReference};
use super::invocation::InvocationSpec;
use super::lifecycle::{LifecycleHookDispatcher, LifecycleState, TaskLifecycle};
use crate::datastore::{LocalBlobStore, LocalTaskDatastore};
use crate::environment::{ExecutionMode, RemoteConfig, DATASTORE_LOCAL_DIR};
use crate::error::{ConfigurationError, Result};
use crate::metadata::{LocalMetadataStore, MetadataStore, SyncReport};
use crate::workflow::{ExecutionOutcome, StepContext, StepDefinition, Workflow};

/// Program name in the local step command before it is rewritten.
const LOCAL_ENTRYPOINT: &str = "armada-step";

/// Default maximum parallel workers.
const DEFAULT_MAX_PARALLEL: usize = 4;

/// What one task attempt resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAttempt {
    pub task_id: String,
    pub retry_count: u32,
    /// True if the command was rewritten to run on Armada
    pub dispatched: bool,
    pub package: Option<PackageReference>,
    pub command: InvocationSpec,
    pub state: LifecycleState,
    /// Classified outcome, record mode only
    pub outcome: Option<ExecutionOutcome>,
    /// Metadata bridge result, record mode only
    pub sync: Option<SyncReport>,
}

/// Local driver for one step's task attempts.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use armada_step::environment::RemoteConfig;
/// use armada_step::execution::Engine;
/// use armada_step::load_workflow;
///
/// fn main() -> armada_step::Result<()> {
///     let workflow = load_workflow("flow.yaml")?;
///     let config = RemoteConfig::load("armada.yaml")?;
///
///     let mut engine = Engine::new(Arc::new(workflow), "train", config);
///     engine.set_splits(4);
///     for attempt in engine.run()? {
///         println!("{}", attempt.command);
///     }
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Arc<Workflow>,
    step_name: String,
    config: RemoteConfig,
    mode: ExecutionMode,
    run_id: String,
    package: PackageArtifact,
    datastore_root: PathBuf,
    splits: usize,
    retry_count: u32,
    max_retries: u32,
    max_parallel: usize,
    record: bool,
    task_ok: bool,
}

impl Engine {
    /// Creates a driver for `step_name` of `workflow`.
    pub fn new(
        workflow: Arc<Workflow>,
        step_name: impl Into<String>,
        config: RemoteConfig,
    ) -> Self {
        Self {
            workflow,
            step_name: step_name.into(),
            config,
            mode: ExecutionMode::Local,
            run_id: format!("local-{}", chrono::Utc::now().timestamp_millis()),
            package: PackageArtifact::new(Vec::new()),
            datastore_root: DATASTORE_LOCAL_DIR.clone(),
            splits: 1,
            retry_count: 0,
            max_retries: 0,
            max_parallel: DEFAULT_MAX_PARALLEL,
            record: false,
            task_ok: true,
        }
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn set_run_id(&mut self, run_id: impl Into<String>) {
        self.run_id = run_id.into();
    }

    pub fn set_package(&mut self, package: PackageArtifact) {
        self.package = package;
    }

    /// Sets where blobs and task datastores are written.
    pub fn set_datastore_root(&mut self, root: impl Into<PathBuf>) {
        self.datastore_root = root.into();
    }

    /// Sets the number of task attempts (one per split).
    pub fn set_splits(&mut self, splits: usize) {
        self.splits = splits.max(1);
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    /// Sets how many retries may still run remotely.
    pub fn set_max_retries(&mut self, max_retries: u32) {
        self.max_retries = max_retries;
    }

    /// Sets the maximum number of worker threads.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Enables the pre-step/finish pass against local stores.
    pub fn set_record(&mut self, record: bool) {
        self.record = record;
    }

    /// Sets whether recorded attempts count as having run successfully.
    pub fn set_task_ok(&mut self, task_ok: bool) {
        self.task_ok = task_ok;
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Runs every task attempt through the lifecycle hooks.
    ///
    /// # Returns
    ///
    /// * `Ok(attempts)` - One entry per split, ordered by task id
    /// * `Err` - Initialisation failed, or the first failing attempt's error
    pub fn run(&self) -> Result<Vec<PlannedAttempt>> {
        let start_time = Instant::now();
        self.config.validate()?;

        let node = self
            .workflow
            .get_step(&self.step_name)
            .ok_or_else(|| ConfigurationError::UnknownStep(self.step_name.clone()))?;

        let mut dispatcher = LifecycleHookDispatcher::new(self.config.clone(), self.mode.clone());
        dispatcher.on_step_init(node, Arc::new(LocalBlobStore::new(&self.datastore_root)))?;
        dispatcher.on_runtime_init(
            Arc::clone(&self.workflow),
            self.package.clone(),
            &self.run_id,
            Arc::new(PackageCache::new(self.run_id.clone())),
        )?;

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(LocalMetadataStore::new(self.config.metadata_dir()));
        let workers = self.max_parallel.min(self.splits);

        info!(
            "Starting {} task attempt(s) of step '{}' (run: {}, workers: {}, mode: {})",
            self.splits, self.step_name, self.run_id, workers, self.mode
        );

        let next = AtomicUsize::new(0);
        let (tx, rx) = channel();

        let mut results: Vec<(usize, Result<PlannedAttempt>)> = thread::scope(|scope| {
            for _ in 0..workers {
                let tx: Sender<(usize, Result<PlannedAttempt>)> = tx.clone();
                let (dispatcher, next, metadata) = (&dispatcher, &next, &metadata);
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= self.splits {
                        break;
                    }
                    let result = self.run_attempt(dispatcher, node, index, metadata);
                    if let Err(e) = tx.send((index, result)) {
                        error!("Failed to send completion signal: {}", e);
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        });

        results.sort_by_key(|(index, _)| *index);

        let mut attempts = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (index, result) in results {
            match result {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => {
                    error!("Task {}/{} failed: {}", self.step_name, index, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Step '{}': {} attempt(s) planned in {:.2?}",
            self.step_name,
            attempts.len(),
            start_time.elapsed()
        );
        Ok(attempts)
    }

    fn run_attempt(
        &self,
        dispatcher: &LifecycleHookDispatcher,
        node: &StepDefinition,
        index: usize,
        metadata: &Arc<dyn MetadataStore>,
    ) -> Result<PlannedAttempt> {
        let task_id = index.to_string();
        let ctx = StepContext {
            run_id: &self.run_id,
            step_name: &self.step_name,
            task_id: &task_id,
            retry_count: self.retry_count,
            max_user_code_retries: self.max_retries,
            node,
        };

        let mut task = TaskLifecycle::new();
        let mut command = InvocationSpec::local(LOCAL_ENTRYPOINT, &self.step_name)
            .with_option("run-id", &self.run_id)
            .with_option("task-id", &task_id)
            .with_option("retry-count", self.retry_count.to_string());

        dispatcher.on_task_created(&mut task, &ctx, false)?;
        let dispatched = dispatcher.on_build_remote_command(&mut task, &ctx, &mut command)?;

        let mut outcome = None;
        let mut sync = None;
        if self.record {
            let task_datastore = Arc::new(LocalTaskDatastore::new(
                &self.datastore_root,
                &self.run_id,
                &self.step_name,
                &task_id,
            ));
            dispatcher.on_pre_step(&mut task, &ctx, Arc::clone(metadata), task_datastore)?;
            let classified =
                ExecutionOutcome::classify(self.task_ok, self.retry_count, self.max_retries);
            sync = dispatcher.on_task_finished(&mut task, &ctx, classified)?;
            outcome = Some(classified);
        }

        Ok(PlannedAttempt {
            task_id,
            retry_count: self.retry_count,
            dispatched,
            package: task.package().cloned(),
            command,
            state: task.state(),
            outcome,
            sync,
        })
    }
}
