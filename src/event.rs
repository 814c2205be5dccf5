//! Events and the reducers that fold them into entity snapshots
//!
//! An [`Event`] is the unit the store persists: an immutable, content-addressed
//! payload filed under the entity it affects. A reducer turns a chain of events
//! into a snapshot of that entity. Action logs and prompt states are the one
//! instance this crate ships, but nothing here knows about prompts.

use crate::addressing::{AddressingError, ContentAddressable, ContentId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type EventId = ContentId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReduceError {
    #[error("Event {event_id} refers to unknown entity {entity_id}")]
    UnknownEntity { entity_id: String, event_id: EventId },

    #[error("Event {event_id} carries parameters unsupported by {entity_id}: {reason}")]
    UnsupportedParameters {
        entity_id: String,
        event_id: EventId,
        reason: String,
    },

    #[error("Invalid event {event_id}: {reason}")]
    InvalidEvent { event_id: EventId, reason: String },

    #[error("Addressing error: {0}")]
    Addressing(#[from] AddressingError),
}

impl ReduceError {
    /// True when the error only means the snapshot lacks history the full
    /// event set may supply, so a replay can still succeed.
    pub fn requires_replay(&self) -> bool {
        matches!(self, ReduceError::UnknownEntity { .. })
    }
}

/// What the store and the reconciler need to know about a payload
pub trait EventPayload: ContentAddressable {
    fn entity_id(&self) -> String;
    fn event_type(&self) -> &'static str;
    fn timestamp_millis(&self) -> i64;

    /// Events this one supersedes; empty for roots
    fn parent_ids(&self) -> &[EventId];

    /// Secondary sort key between events sharing a timestamp; lower replays first
    fn replay_rank(&self) -> u8 {
        1
    }
}

/// A persisted event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<P> {
    pub id: EventId,
    #[serde(rename = "entityID")]
    pub entity_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp_millis: i64,
    pub payload: P,
}

impl<P: EventPayload> Event<P> {
    /// Wrap a payload, computing its ID and index fields
    pub fn new(payload: P) -> Result<Self, AddressingError> {
        Ok(Self {
            id: payload.content_id()?,
            entity_id: payload.entity_id(),
            event_type: payload.event_type().to_string(),
            timestamp_millis: payload.timestamp_millis(),
            payload,
        })
    }

    /// Check that the ID and index fields agree with the payload
    pub fn verify(&self) -> Result<(), AddressingError> {
        self.payload.verify_content_id(&self.id)?;
        if self.entity_id != self.payload.entity_id()
            || self.event_type != self.payload.event_type()
            || self.timestamp_millis != self.payload.timestamp_millis()
        {
            return Err(AddressingError::Encoding(format!(
                "event {} index fields disagree with its payload",
                self.id
            )));
        }
        Ok(())
    }

    pub fn parent_ids(&self) -> &[EventId] {
        self.payload.parent_ids()
    }

    /// Replay order: timestamp, then rank, then ID
    pub fn sort_key(&self) -> (i64, u8, &EventId) {
        (self.timestamp_millis, self.payload.replay_rank(), &self.id)
    }
}

/// A snapshot plus the last event folded into it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord<E> {
    #[serde(rename = "entityID")]
    pub entity_id: String,
    pub entity: E,
    #[serde(rename = "lastEventID")]
    pub last_event_id: EventId,
    pub last_event_timestamp_millis: i64,
}

/// Folds events into snapshots
pub trait EventReducer {
    type Payload: EventPayload + Clone + Serialize + DeserializeOwned;
    type Entity: Clone + Serialize + DeserializeOwned;

    /// Apply one event. `entity` is `None` when nothing has been folded yet.
    fn apply(
        &self,
        entity: Option<&Self::Entity>,
        event: &Event<Self::Payload>,
    ) -> Result<Self::Entity, ReduceError>;

    fn head_ids<'a>(&self, entity: &'a Self::Entity) -> &'a [EventId];

    /// Replace the head set, used after a replay recomputes it from the DAG
    fn with_head_ids(&self, entity: Self::Entity, head_ids: Vec<EventId>) -> Self::Entity;

    /// Key for the due index; `None` keeps the entity out of it
    fn due_timestamp_millis(&self, entity: &Self::Entity) -> Option<i64>;
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_event_carries_payload_index_fields() {
        let root = bump("c", 10, 1, &[]);
        assert_eq!(root.entity_id, "c");
        assert_eq!(root.event_type, "bump");
        assert_eq!(root.timestamp_millis, 10);
        assert!(root.verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_events() {
        let mut event = bump("c", 10, 1, &[]);
        event.payload.by = 2;
        assert!(matches!(
            event.verify(),
            Err(AddressingError::IdMismatch { .. })
        ));

        let mut event = bump("c", 10, 1, &[]);
        event.entity_id = "d".into();
        assert!(event.verify().is_err());
    }

    #[test]
    fn test_only_unknown_entity_requires_replay() {
        let id = bump("c", 0, 0, &[]).id;
        assert!(ReduceError::UnknownEntity {
            entity_id: "c".into(),
            event_id: id.clone()
        }
        .requires_replay());
        assert!(!ReduceError::InvalidEvent {
            event_id: id,
            reason: "x".into()
        }
        .requires_replay());
    }

    #[test]
    fn test_event_json_shape() {
        let event = bump("c", 10, 1, &[]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entityID"], "c");
        assert_eq!(json["type"], "bump");
        assert_eq!(json["timestampMillis"], 10);
        let back: Event<Bump> = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
