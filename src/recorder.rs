//! The event store contract and the in-memory backend.
//!
//! A [`Recorder`] persists [`Transaction`]s: aggregate stream writes plus
//! an optional tracking record and an optional dead letter, all checked
//! before anything is mutated. Every appended event also receives the next position in its
//! application's notification log.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::{NewEvent, Notification, StoredEvent};

/// Smallest gap between two store-assigned timestamps.
const TIMESTAMP_STEP: f64 = 1e-6;

/// Events to append to one aggregate stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamWrite {
    pub originator_id: Uuid,
    /// The number of events the writer saw in the stream.
    pub expected_version: u64,
    pub events: Vec<NewEvent>,
}

/// Records that `application` has consumed `upstream`'s log up to and
/// including `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracking {
    pub upstream: String,
    pub position: u64,
}

/// A notification whose reaction failed permanently.
///
/// Committed together with the tracking record that steps past it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub upstream: String,
    pub position: u64,
    pub topic: String,
    pub originator_id: Uuid,
    /// Human-readable error message.
    pub error: String,
    /// Unix timestamp (seconds since epoch) of the failure.
    pub ts: u64,
}

/// An atomic unit of writes issued by one application.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub application: String,
    pub writes: Vec<StreamWrite>,
    pub tracking: Option<Tracking>,
    pub dead_letter: Option<DeadLetter>,
}

impl Transaction {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            writes: Vec::new(),
            tracking: None,
            dead_letter: None,
        }
    }

    pub fn write(mut self, write: StreamWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn track(mut self, upstream: impl Into<String>, position: u64) -> Self {
        self.tracking = Some(Tracking {
            upstream: upstream.into(),
            position,
        });
        self
    }

    pub fn dead_letter(mut self, letter: DeadLetter) -> Self {
        self.dead_letter = Some(letter);
        self
    }
}

/// Range selection for [`Recorder::read`] over `originator_version`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Only versions strictly greater than this.
    pub gt: Option<u64>,
    /// Only versions strictly less than this.
    pub lt: Option<u64>,
    pub limit: Option<usize>,
    /// Newest first when `true`.
    pub descending: bool,
}

impl EventQuery {
    /// Every event of the stream, oldest first.
    pub fn all() -> Self {
        Self::default()
    }
}

/// Durable, append-only storage of aggregate streams and notification logs.
///
/// Implementations serialize commits internally; callers may share one
/// recorder across tasks behind an `Arc`.
pub trait Recorder: Send + Sync + fmt::Debug {
    /// Atomically persist a transaction.
    ///
    /// Returns the notification positions assigned to the appended events,
    /// in write order.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrencyConflict`] if a stream's stored version
    ///   differs from its `expected_version`.
    /// - [`StoreError::TrackingConflict`] if the tracking position is not
    ///   one past the last tracked position.
    /// - [`StoreError::ForeignStream`] / [`StoreError::DuplicateWrite`] for
    ///   malformed transactions.
    /// - [`StoreError::StorageUnavailable`] on I/O failure.
    fn commit(&self, tx: Transaction) -> Result<Vec<u64>, StoreError>;

    /// Read a range of one stream's events.
    fn read(&self, originator_id: Uuid, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError>;

    /// The application that created the stream, if it exists.
    fn owner(&self, originator_id: Uuid) -> Result<Option<String>, StoreError>;

    /// One past the last position in the application's notification log.
    fn next_position(&self, application: &str) -> Result<u64, StoreError>;

    /// Up to `limit` contiguous notifications starting at `start`.
    fn notifications(
        &self,
        application: &str,
        start: u64,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError>;

    /// The last upstream position tracked for the application, if any.
    fn last_tracked(&self, application: &str, upstream: &str) -> Result<Option<u64>, StoreError>;

    /// Dead letters committed by the application, oldest first.
    fn dead_letters(&self, application: &str) -> Result<Vec<DeadLetter>, StoreError>;

    /// The newest event of a stream.
    fn latest(&self, originator_id: Uuid) -> Result<Option<StoredEvent>, StoreError> {
        let query = EventQuery {
            limit: Some(1),
            descending: true,
            ..EventQuery::default()
        };
        Ok(self.read(originator_id, &query)?.pop())
    }

    /// Append events to a single stream without tracking.
    fn append(
        &self,
        application: &str,
        originator_id: Uuid,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<u64>, StoreError> {
        self.commit(Transaction::new(application).write(StreamWrite {
            originator_id,
            expected_version,
            events,
        }))
    }
}

/// A validated transaction with every event stamped, ready to persist.
///
/// This is also the line format of the file-backed transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TransactionRecord {
    pub application: String,
    pub events: Vec<StoredEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<Tracking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<DeadLetter>,
}

#[derive(Debug)]
struct Stream {
    owner: String,
    events: Vec<StoredEvent>,
}

/// In-memory index shared by the storage backends.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    streams: HashMap<Uuid, Stream>,
    /// Per application, each notification points at `(originator, version)`.
    logs: HashMap<String, Vec<(Uuid, u64)>>,
    tracking: HashMap<(String, String), u64>,
    dead_letters: HashMap<String, Vec<DeadLetter>>,
    last_timestamp: f64,
}

impl Ledger {
    /// Check a transaction against the current state and stamp its events.
    ///
    /// Does not mutate the ledger.
    pub(crate) fn prepare(&self, tx: Transaction) -> Result<TransactionRecord, StoreError> {
        let mut seen = HashSet::new();
        for write in &tx.writes {
            if !seen.insert(write.originator_id) {
                return Err(StoreError::DuplicateWrite(write.originator_id));
            }
            let actual = match self.streams.get(&write.originator_id) {
                Some(stream) if stream.owner != tx.application => {
                    return Err(StoreError::ForeignStream {
                        originator_id: write.originator_id,
                        owner: stream.owner.clone(),
                        application: tx.application.clone(),
                    });
                }
                Some(stream) => stream.events.len() as u64,
                None => 0,
            };
            if actual != write.expected_version {
                return Err(StoreError::ConcurrencyConflict {
                    originator_id: write.originator_id,
                    expected: write.expected_version,
                    actual,
                });
            }
        }

        if let Some(tracking) = &tx.tracking {
            let last = self
                .tracking
                .get(&(tx.application.clone(), tracking.upstream.clone()))
                .copied();
            let expected = last.map_or(0, |l| l + 1);
            if tracking.position != expected {
                return Err(StoreError::TrackingConflict {
                    application: tx.application,
                    upstream: tracking.upstream.clone(),
                    position: tracking.position,
                    last,
                });
            }
        }

        let mut timestamp = self.last_timestamp;
        let now = SystemTime::UNIX_EPOCH
            .elapsed()
            .map_or(0.0, |d| d.as_secs_f64());
        let mut events = Vec::new();
        for write in tx.writes {
            for (offset, new) in write.events.into_iter().enumerate() {
                timestamp = now.max(timestamp + TIMESTAMP_STEP);
                events.push(StoredEvent {
                    originator_id: write.originator_id,
                    originator_version: write.expected_version + offset as u64,
                    topic: new.topic,
                    state: new.state,
                    timestamp,
                    causal_dependencies: new.causal_dependencies,
                });
            }
        }

        Ok(TransactionRecord {
            application: tx.application,
            events,
            tracking: tx.tracking,
            dead_letter: tx.dead_letter,
        })
    }

    /// Apply a prepared (or replayed) record, returning assigned positions.
    pub(crate) fn apply(&mut self, record: TransactionRecord) -> Vec<u64> {
        let log = self.logs.entry(record.application.clone()).or_default();
        let mut positions = Vec::with_capacity(record.events.len());
        for event in record.events {
            positions.push(log.len() as u64);
            log.push((event.originator_id, event.originator_version));
            self.last_timestamp = self.last_timestamp.max(event.timestamp);
            self.streams
                .entry(event.originator_id)
                .or_insert_with(|| Stream {
                    owner: record.application.clone(),
                    events: Vec::new(),
                })
                .events
                .push(event);
        }
        if let Some(letter) = record.dead_letter {
            self.dead_letters
                .entry(record.application.clone())
                .or_default()
                .push(letter);
        }
        if let Some(tracking) = record.tracking {
            self.tracking
                .insert((record.application, tracking.upstream), tracking.position);
        }
        positions
    }

    pub(crate) fn read(&self, originator_id: Uuid, query: &EventQuery) -> Vec<StoredEvent> {
        let Some(stream) = self.streams.get(&originator_id) else {
            return Vec::new();
        };
        let in_range = |e: &&StoredEvent| {
            query.gt.is_none_or(|gt| e.originator_version > gt)
                && query.lt.is_none_or(|lt| e.originator_version < lt)
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        if query.descending {
            stream.events.iter().rev().filter(in_range).take(limit).cloned().collect()
        } else {
            stream.events.iter().filter(in_range).take(limit).cloned().collect()
        }
    }

    pub(crate) fn owner(&self, originator_id: Uuid) -> Option<String> {
        self.streams.get(&originator_id).map(|s| s.owner.clone())
    }

    pub(crate) fn next_position(&self, application: &str) -> u64 {
        self.logs.get(application).map_or(0, |log| log.len() as u64)
    }

    pub(crate) fn notifications(&self, application: &str, start: u64, limit: usize) -> Vec<Notification> {
        let Some(log) = self.logs.get(application) else {
            return Vec::new();
        };
        log.iter()
            .enumerate()
            .skip(usize::try_from(start).unwrap_or(usize::MAX))
            .take(limit)
            .filter_map(|(position, (id, version))| {
                let event = self.streams.get(id)?.events.get(*version as usize)?;
                Some(Notification {
                    position: position as u64,
                    application_name: application.to_string(),
                    event: event.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn last_tracked(&self, application: &str, upstream: &str) -> Option<u64> {
        self.tracking
            .get(&(application.to_string(), upstream.to_string()))
            .copied()
    }

    pub(crate) fn dead_letters(&self, application: &str) -> Vec<DeadLetter> {
        self.dead_letters.get(application).cloned().unwrap_or_default()
    }
}

/// Lock a backend mutex, surfacing poisoning as a storage failure.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::StorageUnavailable(io::Error::other("recorder lock poisoned")))
}

/// A recorder that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    ledger: Mutex<Ledger>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for MemoryRecorder {
    fn commit(&self, tx: Transaction) -> Result<Vec<u64>, StoreError> {
        let mut ledger = lock(&self.ledger)?;
        let record = ledger.prepare(tx)?;
        Ok(ledger.apply(record))
    }

    fn read(&self, originator_id: Uuid, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(lock(&self.ledger)?.read(originator_id, query))
    }

    fn owner(&self, originator_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.ledger)?.owner(originator_id))
    }

    fn next_position(&self, application: &str) -> Result<u64, StoreError> {
        Ok(lock(&self.ledger)?.next_position(application))
    }

    fn notifications(
        &self,
        application: &str,
        start: u64,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        Ok(lock(&self.ledger)?.notifications(application, start, limit))
    }

    fn last_tracked(&self, application: &str, upstream: &str) -> Result<Option<u64>, StoreError> {
        Ok(lock(&self.ledger)?.last_tracked(application, upstream))
    }

    fn dead_letters(&self, application: &str) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(lock(&self.ledger)?.dead_letters(application))
    }
}
