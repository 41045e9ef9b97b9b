//! Event records, notifications, and the domain-event codec.
//!
//! This module provides the data types every other module passes around and
//! the pure functions that turn adjacently tagged domain events into stored
//! records and back. No I/O occurs here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;

/// Separator between the aggregate type and the event type in a topic.
const TOPIC_SEPARATOR: char = '.';

/// Build the fully-qualified topic for an event kind.
///
/// # Examples
///
/// ```
/// assert_eq!(choreo_es::topic("order", "Created"), "order.Created");
/// ```
pub fn topic(aggregate_type: &str, event_type: &str) -> String {
    format!("{aggregate_type}{TOPIC_SEPARATOR}{event_type}")
}

/// A recorded link from a produced event back to the notification that
/// triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalDependency {
    /// The application whose log carried the triggering notification.
    pub application_name: String,
    /// Position of the triggering notification in that log.
    pub notification_id: u64,
}

/// An event proposed for append, before the store assigns its stream
/// coordinates and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Fully-qualified event kind (`"<aggregate_type>.<Variant>"`).
    pub topic: String,
    /// Serialized JSON payload.
    pub state: Vec<u8>,
    /// Notifications that caused this event, if any.
    pub causal_dependencies: Vec<CausalDependency>,
}

impl NewEvent {
    /// Attach a causal dependency on an upstream notification.
    pub fn caused_by(mut self, application_name: impl Into<String>, notification_id: u64) -> Self {
        self.causal_dependencies.push(CausalDependency {
            application_name: application_name.into(),
            notification_id,
        });
        self
    }
}

/// An immutable event as persisted in an aggregate stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// The aggregate this event belongs to.
    pub originator_id: Uuid,
    /// Zero-based version within the aggregate's stream.
    pub originator_version: u64,
    /// Fully-qualified event kind.
    pub topic: String,
    /// Serialized JSON payload.
    #[serde(with = "payload_bytes")]
    pub state: Vec<u8>,
    /// Store-assigned timestamp (seconds since the Unix epoch), strictly
    /// increasing across the store.
    pub timestamp: f64,
    /// Notifications that caused this event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causal_dependencies: Vec<CausalDependency>,
}

impl StoredEvent {
    /// The aggregate type half of the topic (e.g. `"order"`).
    pub fn aggregate_type(&self) -> &str {
        self.topic
            .rsplit_once(TOPIC_SEPARATOR)
            .map_or("", |(aggregate_type, _)| aggregate_type)
    }

    /// The event type half of the topic (e.g. `"Created"`).
    pub fn event_type(&self) -> &str {
        self.topic
            .rsplit_once(TOPIC_SEPARATOR)
            .map_or(self.topic.as_str(), |(_, event_type)| event_type)
    }

    /// Parse the payload bytes as JSON. Empty payloads decode to `null`.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        if self.state.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&self.state)
    }
}

/// An event wrapped with its position in an application's notification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Zero-based, contiguous position within the application's log.
    pub position: u64,
    /// The application that appended the event.
    pub application_name: String,
    /// The event itself.
    pub event: StoredEvent,
}

/// Encode a domain event into a [`NewEvent`].
///
/// The `DomainEvent` must use `#[serde(tag = "type", content = "data")]`
/// adjacently tagged serialization. The `"type"` field becomes the topic
/// suffix and the `"data"` field (absent for unit variants) the payload.
///
/// # Errors
///
/// Returns `serde_json::Error` if the event cannot be serialized or does not
/// serialize to an adjacently tagged object.
pub fn encode_domain_event<A: Aggregate>(event: &A::DomainEvent) -> serde_json::Result<NewEvent> {
    use serde::ser::Error as _;

    let value = serde_json::to_value(event)?;
    let obj = value.as_object().ok_or_else(|| {
        serde_json::Error::custom("adjacently tagged enum must serialize to a JSON object")
    })?;
    let event_type = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| serde_json::Error::custom("adjacently tagged enum must have a 'type' field"))?;

    // Unit variants carry no "data"; store an empty payload for them.
    let state = match obj.get("data") {
        Some(data) => serde_json::to_vec(data)?,
        None => Vec::new(),
    };

    Ok(NewEvent {
        topic: topic(A::AGGREGATE_TYPE, event_type),
        state,
        causal_dependencies: Vec::new(),
    })
}

/// Decode a stored event into `A::DomainEvent`.
///
/// Returns `Ok(None)` when the event belongs to a different aggregate type or
/// names a variant `A` does not know (forward compatibility).
///
/// # Errors
///
/// Returns `serde_json::Error` if the topic is known but the payload is
/// malformed.
pub fn decode_domain_event<A: Aggregate>(
    event: &StoredEvent,
) -> serde_json::Result<Option<A::DomainEvent>> {
    if event.aggregate_type() != A::AGGREGATE_TYPE {
        return Ok(None);
    }

    // Rebuild the adjacently tagged object from topic and payload.
    let tagged = if event.state.is_empty() {
        serde_json::json!({ "type": event.event_type() })
    } else {
        serde_json::json!({
            "type": event.event_type(),
            "data": event.payload()?,
        })
    };

    match serde_json::from_value::<A::DomainEvent>(tagged) {
        Ok(domain_event) => Ok(Some(domain_event)),
        Err(e) if is_unknown_variant(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_unknown_variant(err: &serde_json::Error) -> bool {
    err.is_data() && err.to_string().starts_with("unknown variant")
}

/// Serde adapter storing payload bytes as base64 text in JSON records.
mod payload_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
