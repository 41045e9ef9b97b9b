//! Crate-level error types for storage, command execution, and stage processing.

use std::io;

use uuid::Uuid;

/// Error returned by a [`Recorder`](crate::Recorder) when committing or
/// reading fails.
///
/// Conflicts and unavailability are retryable (see
/// [`is_retryable`](StoreError::is_retryable)); the remaining variants
/// describe malformed transactions and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed.
    ///
    /// The stream's stored version did not match the version the writer
    /// based its decision on. Nothing from the transaction was persisted.
    #[error(
        "concurrency conflict on {originator_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The stream whose version check failed.
        originator_id: Uuid,
        /// Version the writer expected to append at.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// The tracking record is not exactly one past the last tracked position.
    ///
    /// Raised when two writers race to process the same upstream
    /// notification. The loser re-reads its cursor on retry.
    #[error(
        "tracking conflict for {application} <- {upstream}: position {position} does not follow {last:?}"
    )]
    TrackingConflict {
        /// The stage committing the reaction.
        application: String,
        /// The upstream log being tracked.
        upstream: String,
        /// The position the writer tried to record.
        position: u64,
        /// The last position already recorded, if any.
        last: Option<u64>,
    },

    /// A transaction tried to write a stream owned by another application.
    #[error("stream {originator_id} is owned by '{owner}', not '{application}'")]
    ForeignStream {
        /// The stream being written.
        originator_id: Uuid,
        /// The application that created the stream.
        owner: String,
        /// The application attempting the write.
        application: String,
    },

    /// A transaction named the same stream more than once.
    #[error("transaction writes stream {0} more than once")]
    DuplicateWrite(Uuid),

    /// Transient I/O failure in the storage backend.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] io::Error),
}

impl StoreError {
    /// Returns `true` for errors that a fresh attempt may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. }
                | Self::TrackingConflict { .. }
                | Self::StorageUnavailable(_)
        )
    }
}

/// Error returned when executing a command at the submission boundary.
///
/// Generic over `E`, the domain error the aggregate's command handler may
/// produce (e.g. "order already reserved").
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E: std::error::Error + Send + Sync + 'static> {
    /// Command rejected by aggregate logic (invalid state transition).
    #[error(transparent)]
    Domain(E),

    /// Optimistic concurrency retries exhausted.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: StoreError,
    },

    /// Non-retryable storage failure.
    #[error(transparent)]
    Store(StoreError),

    /// No application with this name is registered.
    #[error("unknown application '{0}'")]
    UnknownApplication(String),

    /// The target aggregate does not exist in the application.
    #[error("unknown aggregate {0}")]
    UnknownAggregate(Uuid),

    /// A domain event could not be serialized or a stored one decoded.
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error returned by a [`Policy`](crate::Policy) while reacting to an event.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The event referenced an aggregate that does not exist in this
    /// application.
    #[error("unknown aggregate {0}")]
    UnknownAggregate(Uuid),

    /// The aggregate rejected the command the policy invoked.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// The event payload (or a stored event of a loaded aggregate) could not
    /// be decoded or encoded.
    #[error("event payload codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// Reading an aggregate from the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PolicyError {
    /// Wrap a domain error as an invalid state transition.
    pub fn rejected(err: impl std::error::Error) -> Self {
        Self::InvalidStateTransition(err.to_string())
    }
}

/// Error returned by a [`ProcessStage`](crate::ProcessStage) step.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Bounded retries ran out. The cursor was not advanced, so the same
    /// notification is picked up again on the next service pass.
    #[error("stage '{stage}' exhausted {attempts} attempts reading '{upstream}': {last}")]
    RetryExhausted {
        /// The stage that gave up.
        stage: String,
        /// The upstream log it was reading.
        upstream: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: StoreError,
    },

    /// The stage is not subscribed to the given upstream.
    #[error("stage '{stage}' does not read '{upstream}'")]
    UnknownUpstream {
        /// The stage asked to step.
        stage: String,
        /// The upstream it does not subscribe to.
        upstream: String,
    },

    /// Non-retryable storage failure (malformed transaction).
    #[error(transparent)]
    Store(StoreError),
}

/// Error returned by read-side lookups (notifications, aggregates, events).
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// No application with this name is registered.
    #[error("unknown application '{0}'")]
    UnknownApplication(String),

    /// The application owns no aggregate with this id.
    #[error("unknown aggregate {originator_id} in '{application}'")]
    UnknownAggregate {
        /// The application that was searched.
        application: String,
        /// The aggregate id that was not found.
        originator_id: Uuid,
    },

    /// The position is at or past the application's next position.
    #[error("unknown notification position {position} in '{application}'")]
    UnknownNotificationPosition {
        /// The application whose log was searched.
        application: String,
        /// The requested position.
        position: u64,
    },

    /// Reading from the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
