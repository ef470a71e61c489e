//! Comment mutation business logic
//!
//! Turns one delivered event into at most one committed store mutation.
//! Updates and deletes read the current owner and mutate the row inside the
//! same store transaction, so no other delivery for that id can interleave.

use std::time::Duration;

use crate::contracts::{
    CommentCreatedV1, CommentDeletedV1, CommentEvent, CommentUpdatedV1, DecodeError, EventKind,
};
use crate::repos::{CommentStore, InsertOutcome, NewComment, StoreError};

/// Successful outcome of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created { id: i64 },
    /// The create was applied by an earlier delivery of the same event
    DuplicateCreate { id: i64 },
    Updated { id: i64 },
    Deleted { id: i64 },
}

impl Applied {
    pub fn id(self) -> i64 {
        match self {
            Applied::Created { id }
            | Applied::DuplicateCreate { id }
            | Applied::Updated { id }
            | Applied::Deleted { id } => id,
        }
    }
}

/// Errors that can occur while processing a comment event
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("malformed event: {0}")]
    Malformed(#[from] DecodeError),

    #[error("comment {0} not found")]
    NotFound(i64),

    #[error("user {requesting_user} is not the author of comment {id} (author {author_id})")]
    Unauthorized {
        id: i64,
        requesting_user: i64,
        author_id: i64,
    },

    #[error("store rejected the mutation: {0}")]
    StoreRejected(String),

    #[error("store error: {0}")]
    Store(#[source] StoreError),

    #[error("apply timed out after {0:?}")]
    Timeout(Duration),
}

impl From<StoreError> for ProcessingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Constraint(reason) => ProcessingError::StoreRejected(reason),
            other => ProcessingError::Store(other),
        }
    }
}

impl ProcessingError {
    /// Whether a later redelivery of the same event could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessingError::Store(_) | ProcessingError::Timeout(_))
    }

    /// Business rejections are dropped; the event itself was well formed
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            ProcessingError::NotFound(_) | ProcessingError::Unauthorized { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessingError::Malformed(_) => "malformed",
            ProcessingError::NotFound(_) => "not_found",
            ProcessingError::Unauthorized { .. } => "unauthorized",
            ProcessingError::StoreRejected(_) => "store_rejected",
            ProcessingError::Store(_) => "store_error",
            ProcessingError::Timeout(_) => "timeout",
        }
    }
}

/// Decode and apply one delivered event
///
/// The whole store interaction is bounded by `apply_timeout`; when it
/// elapses the open transaction is dropped, which rolls it back.
pub async fn process_event(
    store: &dyn CommentStore,
    routing_key: &str,
    payload: &[u8],
    apply_timeout: Duration,
) -> Result<Applied, ProcessingError> {
    let event = CommentEvent::decode(routing_key, payload)?;

    match tokio::time::timeout(apply_timeout, apply_event(store, &event)).await {
        Ok(result) => result,
        Err(_) => Err(ProcessingError::Timeout(apply_timeout)),
    }
}

/// Apply an already decoded event
pub async fn apply_event(
    store: &dyn CommentStore,
    event: &CommentEvent,
) -> Result<Applied, ProcessingError> {
    match event {
        CommentEvent::Created(created) => apply_created(store, created).await,
        CommentEvent::Updated(updated) => apply_updated(store, updated).await,
        CommentEvent::Deleted(deleted) => apply_deleted(store, deleted).await,
    }
}

async fn apply_created(
    store: &dyn CommentStore,
    event: &CommentCreatedV1,
) -> Result<Applied, ProcessingError> {
    let mut tx = store.begin().await?;

    let outcome = tx
        .insert(&NewComment {
            comment_text: event.comment_text.clone(),
            author_id: event.author_id,
            ticket_id: event.ticket_id,
            creation_date: event.creation_date,
            idempotency_key: event.event_id,
        })
        .await?;

    tx.commit().await?;

    match outcome {
        InsertOutcome::Inserted(id) => {
            tracing::info!(
                comment_id = id,
                ticket_id = event.ticket_id,
                author_id = event.author_id,
                "Comment created"
            );
            Ok(Applied::Created { id })
        }
        InsertOutcome::Duplicate(id) => {
            tracing::info!(
                comment_id = id,
                event_id = ?event.event_id,
                "Duplicate create ignored (already applied)"
            );
            Ok(Applied::DuplicateCreate { id })
        }
    }
}

async fn apply_updated(
    store: &dyn CommentStore,
    event: &CommentUpdatedV1,
) -> Result<Applied, ProcessingError> {
    let mut tx = store.begin().await?;

    let author_id = tx
        .owner_for_update(event.id)
        .await?
        .ok_or(ProcessingError::NotFound(event.id))?;

    if author_id != event.requesting_user {
        return Err(ProcessingError::Unauthorized {
            id: event.id,
            requesting_user: event.requesting_user,
            author_id,
        });
    }

    tx.update_text(event.id, &event.comment_text).await?;
    tx.commit().await?;

    tracing::info!(comment_id = event.id, "Comment updated");
    Ok(Applied::Updated { id: event.id })
}

async fn apply_deleted(
    store: &dyn CommentStore,
    event: &CommentDeletedV1,
) -> Result<Applied, ProcessingError> {
    let mut tx = store.begin().await?;

    if tx.owner_for_update(event.id).await?.is_none() {
        return Err(ProcessingError::NotFound(event.id));
    }

    tx.delete(event.id).await?;
    tx.commit().await?;

    tracing::info!(comment_id = event.id, "Comment deleted");
    Ok(Applied::Deleted { id: event.id })
}

/// Kind named by a routing key, if it names one
pub fn kind_label(routing_key: &str) -> &'static str {
    EventKind::from_routing_key(routing_key)
        .map(EventKind::as_str)
        .unwrap_or("unknown")
}
