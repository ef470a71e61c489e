//! HTTP API contract types for the comments gateway

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::repos::CommentRecord;

/// Body of `POST /api/comments`
///
/// Fields are optional so a missing field becomes a validation error with a
/// useful message instead of a generic deserialization rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCommentRequest {
    pub ticket_id: Option<i64>,
    pub comment_text: Option<String>,
}

/// Body of `PUT /api/comments/{comment_id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCommentRequest {
    pub comment_text: Option<String>,
}

/// Acknowledgement that a mutation was queued (not that it was applied)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedResponse {
    pub message: String,
    pub event_id: Uuid,
    pub routing_key: String,
}

/// A comment as returned by the read path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentView {
    pub id: i64,
    pub ticket_id: i64,
    pub author_id: i64,
    pub comment_text: String,
    /// Formatted as `YYYY-MM-DD HH:MM` (UTC)
    pub creation_date: String,
}

impl From<CommentRecord> for CommentView {
    fn from(record: CommentRecord) -> Self {
        Self {
            id: record.id,
            ticket_id: record.ticket_id,
            author_id: record.author_id,
            comment_text: record.comment_text,
            creation_date: record.creation_date.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Error response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
