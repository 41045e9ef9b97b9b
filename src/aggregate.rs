//! Aggregate trait, versioned roots, and explicit change values.

use std::fmt;

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::event::{NewEvent, StoredEvent, decode_domain_event, encode_domain_event};
use crate::recorder::StreamWrite;

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself serves as the aggregate's state.
/// State is built by folding domain events through the [`apply`](Aggregate::apply) method.
///
/// # Contract
///
/// - [`handle`](Aggregate::handle) must be a pure decision function: no I/O, no side effects.
///   It validates a command against the current state and returns zero or more events.
/// - [`apply`](Aggregate::apply) must be a pure, total function. It takes ownership of
///   the current state and a reference to a domain event, returning the next state.
pub trait Aggregate: Default + Clone + fmt::Debug + Send + Sync + 'static {
    /// Identifies this aggregate type (e.g. "order"). Used as the topic prefix.
    const AGGREGATE_TYPE: &'static str;

    /// The set of commands this aggregate can handle.
    type Command: Send + 'static;

    /// The set of events this aggregate can produce and apply.
    ///
    /// Must use `#[serde(tag = "type", content = "data")]`.
    type DomainEvent: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + Clone + 'static;

    /// Command rejection / validation error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate a command against the current state and produce events.
    ///
    /// Returns `Ok(vec![])` if the command is a no-op.
    /// Returns `Err` to reject the command.
    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error>;

    /// Apply a single event to produce the next state.
    fn apply(self, event: &Self::DomainEvent) -> Self;
}

/// An aggregate's state together with its identity and version.
///
/// `version` is the number of events folded so far, so a fresh root is at
/// version 0 and the next event it emits is stored at that version.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRoot<A: Aggregate> {
    id: Uuid,
    version: u64,
    state: A,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// A root with no history.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            state: A::default(),
        }
    }

    /// Start a new aggregate with a random id and run its creation command.
    ///
    /// # Errors
    ///
    /// Returns `A::Error` if the aggregate rejects the command.
    pub fn create(cmd: A::Command) -> Result<Change<A>, A::Error> {
        Self::new(Uuid::new_v4()).execute(cmd)
    }

    /// Rebuild a root by folding its stored events in version order.
    ///
    /// Events of other aggregate types or unknown variants are skipped but
    /// still count towards the version.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if a known event carries a malformed payload.
    pub fn replay(id: Uuid, events: &[StoredEvent]) -> serde_json::Result<Self> {
        let mut root = Self::new(id);
        for stored in events {
            if let Some(event) = decode_domain_event::<A>(stored)? {
                root.state = root.state.apply(&event);
            }
            root.version = stored.originator_version + 1;
        }
        Ok(root)
    }

    /// Decide a command against the current state.
    ///
    /// The root itself is untouched; the returned [`Change`] carries the
    /// evolved root, the emitted events, and the version to append at.
    ///
    /// # Errors
    ///
    /// Returns `A::Error` if the aggregate rejects the command.
    pub fn execute(&self, cmd: A::Command) -> Result<Change<A>, A::Error> {
        let events = self.state.handle(cmd)?;
        let state = events
            .iter()
            .fold(self.state.clone(), |state, event| state.apply(event));
        Ok(Change {
            root: AggregateRoot {
                id: self.id,
                version: self.version + events.len() as u64,
                state,
            },
            events,
            expected_version: self.version,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn into_state(self) -> A {
        self.state
    }
}

/// The outcome of executing a command: what to append and where.
#[derive(Debug, Clone)]
pub struct Change<A: Aggregate> {
    /// The root after folding `events`.
    pub root: AggregateRoot<A>,
    /// Events emitted by the command, in order.
    pub events: Vec<A::DomainEvent>,
    /// The stream version the events must be appended at.
    pub expected_version: u64,
}

impl<A: Aggregate> Change<A> {
    pub fn id(&self) -> Uuid {
        self.root.id
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Encode the emitted events for storage.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if an event cannot be serialized.
    pub fn encode(&self) -> serde_json::Result<Vec<NewEvent>> {
        self.events.iter().map(encode_domain_event::<A>).collect()
    }

    /// Encode the change as a single stream write for a transaction.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if an event cannot be serialized.
    pub fn to_stream_write(&self) -> serde_json::Result<StreamWrite> {
        Ok(StreamWrite {
            originator_id: self.root.id,
            expected_version: self.expected_version,
            events: self.encode()?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::{Counter, CounterCommand, CounterError, CounterEvent};
    use super::*;
    use crate::event::StoredEvent;

    fn store(change: &Change<Counter>) -> Vec<StoredEvent> {
        change
            .encode()
            .expect("encode should succeed")
            .into_iter()
            .enumerate()
            .map(|(i, new)| StoredEvent {
                originator_id: change.id(),
                originator_version: change.expected_version + i as u64,
                topic: new.topic,
                state: new.state,
                timestamp: i as f64,
                causal_dependencies: new.causal_dependencies,
            })
            .collect()
    }

    #[test]
    fn handle_decrement_at_zero() {
        let result = Counter::default().handle(CounterCommand::Decrement);
        let err = result.expect_err("zero counter cannot decrement");
        assert!(
            matches!(err, CounterError::AlreadyZero),
            "expected AlreadyZero, got: {err}"
        );
    }

    #[test]
    fn execute_advances_version_by_event_count() {
        let root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        let change = root.execute(CounterCommand::Add(5)).expect("add should succeed");

        assert_eq!(change.expected_version, 0);
        assert_eq!(change.root.version(), 1);
        assert_eq!(change.root.state().value, 5);
        assert_eq!(change.events, vec![CounterEvent::Added { amount: 5 }]);
        // The original root is untouched.
        assert_eq!(root.version(), 0);
        assert_eq!(root.state().value, 0);
    }

    #[test]
    fn create_uses_fresh_id_at_version_one() {
        let a = AggregateRoot::<Counter>::create(CounterCommand::Increment).expect("create");
        let b = AggregateRoot::<Counter>::create(CounterCommand::Increment).expect("create");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.root.version(), 1);
        assert_eq!(a.expected_version, 0);
    }

    #[test]
    fn rejected_command_yields_domain_error() {
        let root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        assert!(root.execute(CounterCommand::Decrement).is_err());
    }

    #[test]
    fn replay_rebuilds_state_and_version() {
        let first = AggregateRoot::<Counter>::create(CounterCommand::Add(3)).expect("create");
        let second = first.root.execute(CounterCommand::Increment).expect("increment");
        let mut history = store(&first);
        history.extend(store(&second));

        let root = AggregateRoot::<Counter>::replay(first.id(), &history).expect("replay");
        assert_eq!(root.version(), 2);
        assert_eq!(root.state().value, 4);

        // Replaying the same history again yields identical state.
        let again = AggregateRoot::<Counter>::replay(first.id(), &history).expect("replay");
        assert_eq!(again, root);
    }

    #[test]
    fn replay_skips_unknown_topics_but_counts_them() {
        let change = AggregateRoot::<Counter>::create(CounterCommand::Increment).expect("create");
        let mut history = store(&change);
        let mut unknown = history[0].clone();
        unknown.originator_version = 1;
        unknown.topic = crate::event::topic("counter", "Renamed");
        history.push(unknown);

        let root = AggregateRoot::<Counter>::replay(change.id(), &history).expect("replay");
        assert_eq!(root.version(), 2);
        assert_eq!(root.state().value, 1);
    }

    #[test]
    fn to_stream_write_targets_expected_version() {
        let change = AggregateRoot::<Counter>::create(CounterCommand::Increment).expect("create");
        let next = change.root.execute(CounterCommand::Add(2)).expect("add");
        let write = next.to_stream_write().expect("encode");
        assert_eq!(write.originator_id, change.id());
        assert_eq!(write.expected_version, 1);
        assert_eq!(write.events.len(), 1);
        assert_eq!(write.events[0].topic, "counter.Added");
    }
}
