use chrono::Utc;
use event_bus::{BusError, BusMessage, EventBus};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::VerifiedUser;
use crate::contracts::{
    CommentCreatedV1, CommentDeletedV1, CommentEvent, CommentUpdatedV1, EventKind,
};
use crate::events::limiter::{PublishLimiter, Saturated};
use crate::metrics::Metrics;

/// A validated mutation request, before it becomes an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationIntent {
    Create { ticket_id: i64, comment_text: String },
    Update { id: i64, comment_text: String },
    Delete { id: i64 },
}

/// Receipt for an event the broker accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submitted {
    pub event_id: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("too many publishes in flight: {0}")]
    Saturated(#[from] Saturated),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker rejected event: {0}")]
    Bus(#[from] BusError),
}

impl PublishError {
    fn label(&self) -> &'static str {
        match self {
            PublishError::Saturated(_) => "saturated",
            PublishError::Encode(_) => "encode_error",
            PublishError::Bus(_) => "error",
        }
    }
}

#[derive(Clone)]
pub struct CommentEventPublisher {
    bus: Arc<dyn EventBus>,
    exchange: String,
    limiter: PublishLimiter,
    metrics: Metrics,
}

impl CommentEventPublisher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        exchange: impl Into<String>,
        limiter: PublishLimiter,
        metrics: Metrics,
    ) -> Self {
        Self {
            bus,
            exchange: exchange.into(),
            limiter,
            metrics,
        }
    }

    /// Build the event for `intent` on behalf of `caller` and publish it once
    ///
    /// Identity fields come from `caller`, never from the request.
    pub async fn submit(
        &self,
        caller: &VerifiedUser,
        intent: MutationIntent,
    ) -> Result<Submitted, PublishError> {
        let event_id = Uuid::new_v4();
        let event = build_event(caller, intent, event_id);
        let kind = event.kind();

        match self.publish(&event, event_id).await {
            Ok(()) => {
                self.metrics.record_publish(kind.as_str(), "ok");
                tracing::info!(
                    event_id = %event_id,
                    routing_key = kind.routing_key(),
                    user_id = caller.id,
                    "Published comment event"
                );
                Ok(Submitted { event_id, kind })
            }
            Err(e) => {
                self.metrics.record_publish(kind.as_str(), e.label());
                tracing::error!(
                    event_id = %event_id,
                    routing_key = kind.routing_key(),
                    error = %e,
                    "Failed to publish comment event"
                );
                Err(e)
            }
        }
    }

    async fn publish(&self, event: &CommentEvent, event_id: Uuid) -> Result<(), PublishError> {
        let _permit = self.limiter.acquire().await?;

        let message = BusMessage::new(event.routing_key(), event.encode()?)
            .with_header("content-type", "application/json")
            .with_message_id(event_id.to_string());

        self.bus.publish(&self.exchange, message).await?;
        Ok(())
    }
}

pub fn build_event(caller: &VerifiedUser, intent: MutationIntent, event_id: Uuid) -> CommentEvent {
    match intent {
        MutationIntent::Create {
            ticket_id,
            comment_text,
        } => CommentEvent::Created(CommentCreatedV1 {
            ticket_id,
            author_id: caller.id,
            comment_text,
            creation_date: Utc::now(),
            event_id: Some(event_id),
        }),
        MutationIntent::Update { id, comment_text } => CommentEvent::Updated(CommentUpdatedV1 {
            id,
            comment_text,
            requesting_user: caller.id,
            event_id: Some(event_id),
        }),
        MutationIntent::Delete { id } => CommentEvent::Deleted(CommentDeletedV1 {
            id,
            event_id: Some(event_id),
        }),
    }
}
