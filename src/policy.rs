//! Policies: pure reactions from upstream events to aggregate changes.
//!
//! A policy reads decoded events from the notification logs it subscribes
//! to and decides, per event, whether to create an aggregate or invoke one
//! command on an existing aggregate owned by its own application. Policies
//! never write; the owning [`ProcessStage`](crate::ProcessStage) commits the
//! reaction together with the cursor.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot, Change};
use crate::error::PolicyError;
use crate::event::{Notification, StoredEvent};
use crate::recorder::{EventQuery, Recorder, StreamWrite};

/// A sum type of all upstream events a policy can recognise.
///
/// Decoding is by topic; events a policy does not know decode to `None` and
/// are treated as no-ops.
pub trait TopicEvent: fmt::Debug + Send + Sync + Sized + 'static {
    /// Decode a stored event.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the topic is recognised but the
    /// payload is malformed.
    fn decode(event: &StoredEvent) -> serde_json::Result<Option<Self>>;
}

/// A decoded upstream event together with its coordinates.
#[derive(Debug, Clone)]
pub struct Inbound<E> {
    /// The application whose log carried the event.
    pub upstream: String,
    /// Position of the notification in that log.
    pub position: u64,
    pub originator_id: Uuid,
    pub originator_version: u64,
    pub event: E,
}

/// Events to append as the result of one reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub write: StreamWrite,
}

impl Reaction {
    /// Wrap an aggregate change as a reaction.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Codec`] if an event cannot be serialized.
    pub fn from_change<A: Aggregate>(change: &Change<A>) -> Result<Self, PolicyError> {
        Ok(Self {
            write: change.to_stream_write()?,
        })
    }
}

/// A process stage's behaviour.
///
/// # Contract
///
/// - [`react`](Policy::react) must be deterministic given the repository
///   contents and the inbound event. It may be invoked several times for
///   the same event when commits conflict; each attempt sees fresh state.
/// - Unknown events should be ignored by returning `Ok(None)`.
pub trait Policy: Send + Sync + 'static {
    /// Stage name. Also the application name under which this stage's
    /// aggregates and notification log are stored.
    const NAME: &'static str;

    /// Upstream events this policy understands.
    type Event: TopicEvent;

    /// React to one upstream event.
    fn react(
        &self,
        repository: &Repository,
        inbound: &Inbound<Self::Event>,
    ) -> Result<Option<Reaction>, PolicyError>;
}

/// Read access to the aggregates owned by one application.
#[derive(Debug, Clone)]
pub struct Repository {
    recorder: Arc<dyn Recorder>,
    application: String,
}

impl Repository {
    pub fn new(recorder: Arc<dyn Recorder>, application: impl Into<String>) -> Self {
        Self {
            recorder,
            application: application.into(),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Load an aggregate by replaying its full stream.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::UnknownAggregate`] if no stream with this id is owned
    ///   by this application.
    /// - [`PolicyError::Codec`] if a stored event cannot be decoded.
    /// - [`PolicyError::Store`] if reading fails.
    pub fn get<A: Aggregate>(&self, id: Uuid) -> Result<AggregateRoot<A>, PolicyError> {
        match self.recorder.owner(id)? {
            Some(owner) if owner == self.application => {}
            _ => return Err(PolicyError::UnknownAggregate(id)),
        }
        let events = self.recorder.read(id, &EventQuery::all())?;
        Ok(AggregateRoot::replay(id, &events)?)
    }
}

// --- Type-erased trait for stage integration ---

/// Trait object interface for policies.
///
/// Lets a stage hold heterogeneous policies without knowing each concrete
/// `P` type.
pub(crate) trait DynPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode the notification and react to it.
    fn react(
        &self,
        repository: &Repository,
        notification: &Notification,
    ) -> Result<Option<Reaction>, PolicyError>;
}

pub(crate) struct TypedPolicy<P>(pub(crate) P);

impl<P: Policy> DynPolicy for TypedPolicy<P> {
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn react(
        &self,
        repository: &Repository,
        notification: &Notification,
    ) -> Result<Option<Reaction>, PolicyError> {
        let Some(event) = P::Event::decode(&notification.event)? else {
            return Ok(None);
        };
        let inbound = Inbound {
            upstream: notification.application_name.clone(),
            position: notification.position,
            originator_id: notification.event.originator_id,
            originator_version: notification.event.originator_version,
            event,
        };
        self.0.react(repository, &inbound)
    }
}
