use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Extension, Json,
};

use super::{ApiError, AppState};
use crate::auth::VerifiedUser;
use crate::contracts::{CommentView, CreateCommentRequest, SubmittedResponse, UpdateCommentRequest};
use crate::events::{MutationIntent, Submitted};
use crate::validation::{validate_create, validate_update};

type Accepted = (StatusCode, Json<SubmittedResponse>);

fn accepted(submitted: Submitted, message: &str) -> Accepted {
    (
        StatusCode::ACCEPTED,
        Json(SubmittedResponse {
            message: message.to_string(),
            event_id: submitted.event_id,
            routing_key: submitted.kind.routing_key().to_string(),
        }),
    )
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// POST /api/comments
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(caller): Extension<VerifiedUser>,
    body: Result<Json<CreateCommentRequest>, JsonRejection>,
) -> Result<Accepted, ApiError> {
    let intent = validate_create(json_body(body)?)?;
    let submitted = state.publisher.submit(&caller, intent).await?;
    Ok(accepted(submitted, "Comment submitted"))
}

/// PUT /api/comments/{comment_id}
pub async fn update_comment(
    State(state): State<AppState>,
    Extension(caller): Extension<VerifiedUser>,
    comment_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateCommentRequest>, JsonRejection>,
) -> Result<Accepted, ApiError> {
    let intent = validate_update(path_id(comment_id)?, json_body(body)?)?;
    let submitted = state.publisher.submit(&caller, intent).await?;
    Ok(accepted(submitted, "Comment update submitted"))
}

/// DELETE /api/comments/{comment_id}
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(caller): Extension<VerifiedUser>,
    comment_id: Result<Path<i64>, PathRejection>,
) -> Result<Accepted, ApiError> {
    let id = path_id(comment_id)?;
    let submitted = state
        .publisher
        .submit(&caller, MutationIntent::Delete { id })
        .await?;
    Ok(accepted(submitted, "Comment delete submitted"))
}

/// GET /api/tickets/{ticket_id}/comments
pub async fn list_ticket_comments(
    State(state): State<AppState>,
    ticket_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<CommentView>>, ApiError> {
    let records = state.store.list_for_ticket(path_id(ticket_id)?).await?;
    Ok(Json(records.into_iter().map(CommentView::from).collect()))
}
