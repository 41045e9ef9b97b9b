//! The system runner: stages, topology, and a shared recorder in one place.
//!
//! A [`SystemRunner`] is opened via [`SystemBuilder`], which registers
//! policies as stages, wires them with pipes, and hands every stage the same
//! recorder. The runner services all stages cooperatively, round-robin over
//! the topology's edges, and is the entry point for command submission.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::config::RunnerConfig;
use crate::error::{ExecuteError, LookupError, PolicyError, StageError, StoreError};
use crate::notification::NotificationLog;
use crate::policy::{Policy, Repository};
use crate::recorder::{DeadLetter, MemoryRecorder, Recorder, Transaction};
use crate::retry::{RetryError, with_backoff};
use crate::stage::{ProcessStage, StageState, StepOutcome};
use crate::topology::{Topology, TopologyError};

/// Summary of one or more service passes.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Notifications handled (reactions committed or ignored).
    pub processed: usize,
    /// Notifications whose reaction failed permanently.
    pub dead_lettered: usize,
    /// Steps that gave up; their cursors were not advanced.
    pub failures: Vec<StageError>,
}

impl RunReport {
    /// Whether any cursor moved.
    pub fn progressed(&self) -> bool {
        self.processed > 0 || self.dead_lettered > 0
    }

    fn absorb(&mut self, other: RunReport) {
        self.processed += other.processed;
        self.dead_lettered += other.dead_lettered;
        self.failures.extend(other.failures);
    }
}

/// Registered stages, wired by a topology, sharing one recorder.
pub struct SystemRunner {
    recorder: Arc<dyn Recorder>,
    topology: Topology,
    /// Indexed like the topology's stage arena.
    stages: Vec<Mutex<ProcessStage>>,
    config: RunnerConfig,
    pub(crate) wake: Notify,
}

// Manual `Debug` because stages sit behind async mutexes.
impl std::fmt::Debug for SystemRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRunner")
            .field("stages", &self.topology.stages())
            .field("edges", &self.topology.edges().len())
            .finish()
    }
}

impl SystemRunner {
    pub fn builder() -> SystemBuilder {
        SystemBuilder::new()
    }

    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Names of all registered applications.
    pub fn applications(&self) -> Vec<String> {
        self.topology.stages().to_vec()
    }

    fn check_application(&self, application: &str) -> Result<(), LookupError> {
        match self.topology.index_of(application) {
            Some(_) => Ok(()),
            None => Err(LookupError::UnknownApplication(application.to_string())),
        }
    }

    /// The notification log of a registered application.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownApplication`] for unregistered names.
    pub fn notification_log(&self, application: &str) -> Result<NotificationLog, LookupError> {
        self.check_application(application)?;
        Ok(NotificationLog::new(Arc::clone(&self.recorder), application))
    }

    /// Read access to a registered application's aggregates.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownApplication`] for unregistered names.
    pub fn repository(&self, application: &str) -> Result<Repository, LookupError> {
        self.check_application(application)?;
        Ok(Repository::new(Arc::clone(&self.recorder), application))
    }

    /// Dead letters committed by a stage, including those from earlier
    /// runs over the same recorder.
    pub fn dead_letters(&self, stage: &str) -> Result<Vec<DeadLetter>, LookupError> {
        self.check_application(stage)?;
        Ok(self.recorder.dead_letters(stage)?)
    }

    /// Current state of a stage, or `None` for unknown names.
    pub async fn stage_state(&self, stage: &str) -> Option<StageState> {
        let index = self.topology.index_of(stage)?;
        Some(self.stages[index].lock().await.state())
    }

    /// Whether any stage has unprocessed upstream notifications.
    pub fn has_work(&self) -> Result<bool, StoreError> {
        for edge in self.topology.edges() {
            let (Some(upstream), Some(downstream)) = (
                self.topology.name(edge.upstream),
                self.topology.name(edge.downstream),
            ) else {
                continue;
            };
            let cursor = self
                .recorder
                .last_tracked(downstream, upstream)?
                .map_or(0, |last| last + 1);
            if cursor < self.recorder.next_position(upstream)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// One service pass: every edge gets up to `batch_size` steps.
    pub async fn run_once(&self) -> RunReport {
        let mut report = RunReport::default();
        for edge in self.topology.edges() {
            let Some(upstream) = self.topology.name(edge.upstream) else {
                continue;
            };
            let mut stage = self.stages[edge.downstream].lock().await;
            for _ in 0..self.config.batch_size {
                match stage.step(upstream).await {
                    Ok(StepOutcome::Idle) => break,
                    Ok(StepOutcome::Processed { .. }) => report.processed += 1,
                    Ok(StepOutcome::DeadLettered { .. }) => report.dead_lettered += 1,
                    Err(e) => {
                        report.failures.push(e);
                        break;
                    }
                }
            }
        }
        report
    }

    /// Service all stages until a pass moves no cursor.
    pub async fn run_until_quiescent(&self) -> RunReport {
        let mut total = RunReport::default();
        loop {
            let pass = self.run_once().await;
            let progressed = pass.progressed();
            total.absorb(pass);
            if !progressed {
                break;
            }
        }
        tracing::debug!(
            processed = total.processed,
            dead_lettered = total.dead_lettered,
            failures = total.failures.len(),
            "runner quiescent"
        );
        total
    }

    /// Create a new aggregate in `application` from its creation command.
    ///
    /// Transient storage failures are retried with the configured backoff.
    /// Wakes the background service loop on success.
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::UnknownApplication`] for unregistered applications.
    /// - [`ExecuteError::Domain`] if the aggregate rejects the command.
    /// - [`ExecuteError::RetryExhausted`] if every attempt failed transiently.
    /// - [`ExecuteError::Store`] on a non-retryable storage failure.
    pub async fn create<A: Aggregate>(
        &self,
        application: &str,
        cmd: A::Command,
    ) -> Result<Uuid, ExecuteError<A::Error>> {
        self.check_known::<A>(application)?;
        let change = AggregateRoot::<A>::create(cmd).map_err(ExecuteError::Domain)?;
        let write = change.to_stream_write()?;
        let id = change.id();

        let result = with_backoff(&self.config.retry, StoreError::is_retryable, |_| {
            self.recorder
                .commit(Transaction::new(application).write(write.clone()))
        })
        .await;
        finish::<_, A::Error>(result)?;

        tracing::info!(application, aggregate_type = A::AGGREGATE_TYPE, %id, "aggregate created");
        self.wake.notify_one();
        Ok(id)
    }

    /// Run a command against an existing aggregate of `application`.
    ///
    /// Each attempt reloads the aggregate, so a version conflict is resolved
    /// by deciding the command again against fresh state. Returns the new
    /// version.
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::UnknownAggregate`] if the application owns no such
    ///   aggregate.
    /// - [`ExecuteError::Domain`] if the aggregate rejects the command.
    /// - [`ExecuteError::RetryExhausted`] if every attempt conflicted.
    /// - [`ExecuteError::Store`] on a non-retryable storage failure.
    pub async fn execute<A>(
        &self,
        application: &str,
        id: Uuid,
        cmd: A::Command,
    ) -> Result<u64, ExecuteError<A::Error>>
    where
        A: Aggregate,
        A::Command: Clone,
    {
        self.check_known::<A>(application)?;
        let repository = Repository::new(Arc::clone(&self.recorder), application);

        let result = with_backoff(&self.config.retry, StoreError::is_retryable, |_| {
            let root = match repository.get::<A>(id) {
                Ok(root) => root,
                Err(PolicyError::Store(e)) => return Err(e),
                Err(PolicyError::Codec(e)) => return Ok(Err(ExecuteError::Encode(e))),
                Err(_) => return Ok(Err(ExecuteError::UnknownAggregate(id))),
            };
            let change = match root.execute(cmd.clone()) {
                Ok(change) => change,
                Err(e) => return Ok(Err(ExecuteError::Domain(e))),
            };
            let write = match change.to_stream_write() {
                Ok(write) => write,
                Err(e) => return Ok(Err(ExecuteError::Encode(e))),
            };
            self.recorder
                .commit(Transaction::new(application).write(write))?;
            Ok(Ok(change.root.version()))
        })
        .await;
        let version = finish::<_, A::Error>(result)??;

        tracing::info!(application, aggregate_type = A::AGGREGATE_TYPE, %id, version, "command executed");
        self.wake.notify_one();
        Ok(version)
    }

    fn check_known<A: Aggregate>(&self, application: &str) -> Result<(), ExecuteError<A::Error>> {
        match self.topology.index_of(application) {
            Some(_) => Ok(()),
            None => Err(ExecuteError::UnknownApplication(application.to_string())),
        }
    }
}

/// Map a backoff outcome onto the command error type.
fn finish<T, E>(result: Result<T, RetryError<StoreError>>) -> Result<T, ExecuteError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(value),
        Err(RetryError::Exhausted { attempts, last }) => {
            tracing::error!(attempts, error = %last, "command retries exhausted");
            Err(ExecuteError::RetryExhausted { attempts, last })
        }
        Err(RetryError::Fatal(e)) => Err(ExecuteError::Store(e)),
    }
}

/// Factory for a stage, run once the recorder and config are known.
type StageFactory = Box<dyn FnOnce(Arc<dyn Recorder>) -> ProcessStage + Send>;

/// Builder for configuring and opening a [`SystemRunner`].
///
/// # Examples
///
/// ```
/// use choreo_es::SystemRunner;
/// use choreo_es::domain::{Commands, Orders, Payments, Reservations};
///
/// let runner = SystemRunner::builder()
///     .stage(Commands)
///     .stage(Orders)
///     .stage(Reservations)
///     .stage(Payments)
///     .pipe(&["commands", "orders", "commands"])
///     .pipe(&["orders", "reservations", "orders"])
///     .pipe(&["orders", "payments", "orders"])
///     .build()
///     .expect("valid topology");
/// assert_eq!(runner.applications().len(), 4);
/// ```
pub struct SystemBuilder {
    recorder: Option<Arc<dyn Recorder>>,
    stage_factories: Vec<(&'static str, StageFactory)>,
    pipes: Vec<Vec<String>>,
    config: RunnerConfig,
}

impl SystemBuilder {
    /// Create a builder with an in-memory recorder and default config.
    pub fn new() -> Self {
        Self {
            recorder: None,
            stage_factories: Vec::new(),
            pipes: Vec::new(),
            config: RunnerConfig::default(),
        }
    }

    /// Use a specific recorder (e.g. a [`FileRecorder`](crate::FileRecorder)).
    ///
    /// Defaults to a fresh [`MemoryRecorder`].
    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Register a policy as a stage named `P::NAME`.
    pub fn stage<P: Policy>(mut self, policy: P) -> Self {
        self.stage_factories.push((
            P::NAME,
            Box::new(move |recorder: Arc<dyn Recorder>| ProcessStage::new(policy, recorder)),
        ));
        self
    }

    /// Wire consecutive stages: each reads the one before it.
    pub fn pipe(mut self, stages: &[&str]) -> Self {
        self.pipes
            .push(stages.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// Set the runner configuration.
    ///
    /// If not called, [`RunnerConfig::default()`] is used.
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the topology and the stages.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] for duplicate stage names, pipes naming
    /// unregistered stages, or pipes shorter than two stages.
    pub fn build(self) -> Result<SystemRunner, TopologyError> {
        let recorder = self
            .recorder
            .unwrap_or_else(|| Arc::new(MemoryRecorder::new()) as Arc<dyn Recorder>);

        let mut topology = Topology::new();
        for (name, _) in &self.stage_factories {
            topology.add_stage(*name)?;
        }
        for pipe in &self.pipes {
            let names: Vec<&str> = pipe.iter().map(String::as_str).collect();
            topology.pipe(&names)?;
        }

        let stages = self
            .stage_factories
            .into_iter()
            .map(|(name, factory)| {
                let mut stage = factory(Arc::clone(&recorder)).with_retry(self.config.retry.clone());
                for upstream in topology.upstreams_of(name) {
                    stage.subscribe(upstream);
                }
                Mutex::new(stage)
            })
            .collect();

        tracing::info!(
            stages = topology.stages().len(),
            edges = topology.edges().len(),
            "system runner built"
        );

        Ok(SystemRunner {
            recorder,
            topology,
            stages,
            config: self.config,
            wake: Notify::new(),
        })
    }
}

impl Default for SystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
