//! Process stages: drive a policy over upstream notification logs.
//!
//! A stage reads the next unprocessed notification of one upstream,
//! hands it to its policy, and commits the resulting events together with
//! the advanced cursor in one transaction. Conflicts and transient storage
//! failures are retried with bounded backoff; every attempt re-reads the
//! cursor and the aggregate state.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::Instrument;

use crate::error::{PolicyError, StageError, StoreError};
use crate::event::Notification;
use crate::policy::{DynPolicy, Policy, Repository, TypedPolicy};
use crate::recorder::{DeadLetter, Recorder, Transaction};
use crate::retry::{RetryError, RetryPolicy, with_backoff};

/// Where a stage is in its processing cycle.
///
/// `Idle -> Reading -> Reacting -> Committing -> Idle`; a transient failure
/// moves to `Retrying` and back to `Reading`, exhausted retries end in
/// `Failed` until the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Reading,
    Reacting,
    Committing,
    Retrying { attempt: u32 },
    Failed,
}

/// Result of a single [`ProcessStage::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The upstream has no unprocessed notifications.
    Idle,
    /// The notification was handled and the cursor advanced.
    Processed { position: u64 },
    /// The reaction failed permanently; the cursor advanced past it.
    DeadLettered { position: u64 },
}

/// One named stage of the system: a policy plus its upstream cursors.
pub struct ProcessStage {
    name: &'static str,
    upstreams: Vec<String>,
    policy: Box<dyn DynPolicy>,
    recorder: Arc<dyn Recorder>,
    repository: Repository,
    retry: RetryPolicy,
    state: StageState,
}

// Manual `Debug` because the policy is a trait object.
impl std::fmt::Debug for ProcessStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStage")
            .field("name", &self.name)
            .field("upstreams", &self.upstreams)
            .field("state", &self.state)
            .finish()
    }
}

impl ProcessStage {
    /// Create a stage for `policy` with no upstreams.
    pub fn new<P: Policy>(policy: P, recorder: Arc<dyn Recorder>) -> Self {
        let policy: Box<dyn DynPolicy> = Box::new(TypedPolicy(policy));
        let name = policy.name();
        Self {
            name,
            upstreams: Vec::new(),
            policy,
            repository: Repository::new(Arc::clone(&recorder), name),
            recorder,
            retry: RetryPolicy::default(),
            state: StageState::Idle,
        }
    }

    /// Use a different retry policy for commits.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start reading `upstream`'s log. Subscribing twice is a no-op.
    pub fn subscribe(&mut self, upstream: impl Into<String>) {
        let upstream = upstream.into();
        if !self.upstreams.contains(&upstream) {
            self.upstreams.push(upstream);
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn upstreams(&self) -> &[String] {
        &self.upstreams
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Notifications this stage stepped past after a permanent failure.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.recorder.dead_letters(self.name)
    }

    /// The next position this stage will read from `upstream`.
    pub fn cursor(&self, upstream: &str) -> Result<u64, StoreError> {
        Ok(self
            .recorder
            .last_tracked(self.name, upstream)?
            .map_or(0, |last| last + 1))
    }

    /// Whether `upstream` has notifications this stage has not processed.
    pub fn has_work(&self, upstream: &str) -> Result<bool, StoreError> {
        Ok(self.cursor(upstream)? < self.recorder.next_position(upstream)?)
    }

    /// Process at most one notification from `upstream`.
    ///
    /// # Errors
    ///
    /// - [`StageError::UnknownUpstream`] if the stage does not read `upstream`.
    /// - [`StageError::RetryExhausted`] if every attempt hit a conflict or
    ///   storage failure. The cursor is left where it was.
    /// - [`StageError::Store`] on a non-retryable storage failure.
    pub async fn step(&mut self, upstream: &str) -> Result<StepOutcome, StageError> {
        if !self.upstreams.iter().any(|u| u == upstream) {
            return Err(StageError::UnknownUpstream {
                stage: self.name.to_string(),
                upstream: upstream.to_string(),
            });
        }

        let span = tracing::debug_span!("stage_step", stage = self.name, upstream);
        let retry = self.retry.clone();
        let result = with_backoff(&retry, StoreError::is_retryable, |attempt| {
            let outcome = self.attempt(upstream);
            if let Err(e) = &outcome
                && e.is_retryable()
            {
                self.state = StageState::Retrying { attempt };
            }
            outcome
        })
        .instrument(span)
        .await;

        match result {
            Ok(outcome) => {
                self.state = StageState::Idle;
                Ok(outcome)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                self.state = StageState::Failed;
                tracing::error!(
                    stage = self.name,
                    upstream,
                    attempts,
                    error = %last,
                    "stage retries exhausted, cursor not advanced"
                );
                Err(StageError::RetryExhausted {
                    stage: self.name.to_string(),
                    upstream: upstream.to_string(),
                    attempts,
                    last,
                })
            }
            Err(RetryError::Fatal(e)) => {
                self.state = StageState::Failed;
                tracing::error!(stage = self.name, upstream, error = %e, "stage step failed");
                Err(StageError::Store(e))
            }
        }
    }

    /// One read-react-commit attempt.
    fn attempt(&mut self, upstream: &str) -> Result<StepOutcome, StoreError> {
        self.state = StageState::Reading;
        let position = self.cursor(upstream)?;
        let Some(notification) = self.recorder.notifications(upstream, position, 1)?.pop() else {
            return Ok(StepOutcome::Idle);
        };

        self.state = StageState::Reacting;
        let reaction = match self.policy.react(&self.repository, &notification) {
            Ok(reaction) => reaction,
            Err(PolicyError::Store(e)) => return Err(e),
            Err(e) => {
                self.state = StageState::Committing;
                return self.dead_letter(upstream, &notification, e.to_string());
            }
        };

        self.state = StageState::Committing;
        let tx = Transaction::new(self.name).track(upstream, position);
        let Some(reaction) = reaction else {
            self.recorder.commit(tx)?;
            tracing::debug!(stage = self.name, upstream, position, "notification ignored");
            return Ok(StepOutcome::Processed { position });
        };

        let mut write = reaction.write;
        write.events = write
            .events
            .into_iter()
            .map(|event| event.caused_by(upstream, position))
            .collect();
        let originator_id = write.originator_id;
        let events = write.events.len();

        match self.recorder.commit(tx.write(write)) {
            Ok(_) => {
                tracing::info!(
                    stage = self.name,
                    upstream,
                    position,
                    %originator_id,
                    events,
                    "reaction committed"
                );
                Ok(StepOutcome::Processed { position })
            }
            Err(e) if e.is_retryable() => Err(e),
            // A malformed write would wedge the stage; park it instead.
            Err(e) => self.dead_letter(upstream, &notification, e.to_string()),
        }
    }

    /// Advance the cursor past a failed notification, recording it in the
    /// same transaction.
    fn dead_letter(
        &mut self,
        upstream: &str,
        notification: &Notification,
        error: String,
    ) -> Result<StepOutcome, StoreError> {
        let position = notification.position;
        let letter = DeadLetter {
            upstream: upstream.to_string(),
            position,
            topic: notification.event.topic.clone(),
            originator_id: notification.event.originator_id,
            error,
            ts: SystemTime::UNIX_EPOCH
                .elapsed()
                .map_or(0, |d| d.as_secs()),
        };
        self.recorder.commit(
            Transaction::new(self.name)
                .track(upstream, position)
                .dead_letter(letter.clone()),
        )?;

        tracing::error!(
            stage = self.name,
            upstream,
            position,
            topic = %letter.topic,
            error = %letter.error,
            "reaction failed, dead-lettering"
        );
        Ok(StepOutcome::DeadLettered { position })
    }
}
