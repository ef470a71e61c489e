//! Comment Mutation Event V1 Contract Types
//!
//! IMPORTANT: Field names are the wire format shared with every producer and
//! consumer of the comments exchange. They must not be renamed.
//!
//! The routing key is the only dispatch signal: a payload is decoded as the
//! kind its routing key names, never by inspecting its shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const COMMENT_CREATED: &str = "comment.created";
pub const COMMENT_UPDATED: &str = "comment.updated";
pub const COMMENT_DELETED: &str = "comment.deleted";

/// Routing key for events that could not be applied and need inspection
pub const COMMENT_DEAD_LETTER: &str = "comment.dlq";

/// The three mutation kinds, one per routing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Created, EventKind::Updated, EventKind::Deleted];

    pub fn routing_key(self) -> &'static str {
        match self {
            EventKind::Created => COMMENT_CREATED,
            EventKind::Updated => COMMENT_UPDATED,
            EventKind::Deleted => COMMENT_DELETED,
        }
    }

    pub fn from_routing_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.routing_key() == key)
    }

    /// Short label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload published on `comment.created`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentCreatedV1 {
    pub ticket_id: i64,

    /// Verified identity of the caller; never taken from the request body
    pub author_id: i64,

    pub comment_text: String,

    /// ISO 8601 timestamp assigned by the producer
    pub creation_date: DateTime<Utc>,

    /// Producer-assigned idempotency key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
}

/// Payload published on `comment.updated`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentUpdatedV1 {
    pub id: i64,

    pub comment_text: String,

    /// Verified identity of the caller, checked against the owner when applied
    pub requesting_user: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
}

/// Payload published on `comment.deleted`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentDeletedV1 {
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
}

/// A decoded mutation event
#[derive(Debug, Clone, PartialEq)]
pub enum CommentEvent {
    Created(CommentCreatedV1),
    Updated(CommentUpdatedV1),
    Deleted(CommentDeletedV1),
}

/// Reasons a delivery cannot be turned into a [`CommentEvent`]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown routing key: {0}")]
    UnknownRoutingKey(String),

    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {kind} payload: {reason}")]
    Invalid { kind: EventKind, reason: &'static str },
}

impl CommentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CommentEvent::Created(_) => EventKind::Created,
            CommentEvent::Updated(_) => EventKind::Updated,
            CommentEvent::Deleted(_) => EventKind::Deleted,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        self.kind().routing_key()
    }

    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            CommentEvent::Created(e) => e.event_id,
            CommentEvent::Updated(e) => e.event_id,
            CommentEvent::Deleted(e) => e.event_id,
        }
    }

    /// Serialize the payload as UTF-8 JSON
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            CommentEvent::Created(e) => serde_json::to_vec(e),
            CommentEvent::Updated(e) => serde_json::to_vec(e),
            CommentEvent::Deleted(e) => serde_json::to_vec(e),
        }
    }

    /// Decode a payload as the kind named by its routing key
    pub fn decode(routing_key: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        let kind = EventKind::from_routing_key(routing_key)
            .ok_or_else(|| DecodeError::UnknownRoutingKey(routing_key.to_string()))?;
        let wrap = |source| DecodeError::Payload { kind, source };

        let event = match kind {
            EventKind::Created => CommentEvent::Created(serde_json::from_slice(payload).map_err(wrap)?),
            EventKind::Updated => CommentEvent::Updated(serde_json::from_slice(payload).map_err(wrap)?),
            EventKind::Deleted => CommentEvent::Deleted(serde_json::from_slice(payload).map_err(wrap)?),
        };

        let blank_text = match &event {
            CommentEvent::Created(e) => e.comment_text.trim().is_empty(),
            CommentEvent::Updated(e) => e.comment_text.trim().is_empty(),
            CommentEvent::Deleted(_) => false,
        };
        if blank_text {
            return Err(DecodeError::Invalid {
                kind,
                reason: "comment_text must not be empty",
            });
        }

        Ok(event)
    }
}
