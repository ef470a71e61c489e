//! Validation of mutation requests at the HTTP boundary
//!
//! Everything rejected here is answered with 400 before anything is
//! published.

use thiserror::Error;

use crate::contracts::{CreateCommentRequest, UpdateCommentRequest};
use crate::events::MutationIntent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticket_id is required")]
    MissingTicketId,

    #[error("comment_text is required")]
    MissingCommentText,
}

fn required_text(text: Option<String>) -> Result<String, ValidationError> {
    text.filter(|t| !t.trim().is_empty())
        .ok_or(ValidationError::MissingCommentText)
}

pub fn validate_create(request: CreateCommentRequest) -> Result<MutationIntent, ValidationError> {
    let ticket_id = request.ticket_id.ok_or(ValidationError::MissingTicketId)?;
    let comment_text = required_text(request.comment_text)?;
    Ok(MutationIntent::Create {
        ticket_id,
        comment_text,
    })
}

pub fn validate_update(
    id: i64,
    request: UpdateCommentRequest,
) -> Result<MutationIntent, ValidationError> {
    let comment_text = required_text(request.comment_text)?;
    Ok(MutationIntent::Update { id, comment_text })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_ticket_and_text() {
        assert_eq!(
            validate_create(CreateCommentRequest {
                ticket_id: None,
                comment_text: Some("hi".into()),
            }),
            Err(ValidationError::MissingTicketId)
        );
        assert_eq!(
            validate_create(CreateCommentRequest {
                ticket_id: Some(7),
                comment_text: Some("   ".into()),
            }),
            Err(ValidationError::MissingCommentText)
        );
        assert_eq!(
            validate_create(CreateCommentRequest {
                ticket_id: Some(7),
                comment_text: Some("hi".into()),
            }),
            Ok(MutationIntent::Create {
                ticket_id: 7,
                comment_text: "hi".into(),
            })
        );
    }

    #[test]
    fn test_update_requires_text() {
        assert_eq!(
            validate_update(5, UpdateCommentRequest { comment_text: None }),
            Err(ValidationError::MissingCommentText)
        );
        assert!(validate_update(5, UpdateCommentRequest { comment_text: Some("bye".into()) }).is_ok());
    }
}
