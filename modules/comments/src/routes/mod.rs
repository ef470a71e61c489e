pub mod comments;
pub mod health;
pub mod metrics;

use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{AuthError, IdentityVerifier};
use crate::contracts::ErrorResponse;
use crate::events::{CommentEventPublisher, PublishError};
use crate::metrics::Metrics;
use crate::middleware::{caller::require_caller, metrics::metrics_middleware};
use crate::repos::{CommentStore, StoreError};
use crate::validation::ValidationError;

/// Shared state of the HTTP gateway
#[derive(Clone)]
pub struct AppState {
    pub publisher: CommentEventPublisher,
    pub store: Arc<dyn CommentStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub metrics: Metrics,
    /// Broker connection to report in readiness; `None` for the in-memory bus
    pub nats: Option<async_nats::Client>,
    /// Consumer workers started in this process; readiness requires at least
    /// one of them to still be running
    pub consumer_workers: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(AuthError::MissingToken | AuthError::InvalidToken) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Auth(AuthError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Publish(_) | ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let error = match &self {
            // Infra details stay in the logs
            ApiError::Publish(_) => "comment events are temporarily unavailable".to_string(),
            ApiError::Store(_) => "comment store is temporarily unavailable".to_string(),
            ApiError::Auth(AuthError::Unavailable(_)) => {
                "identity service is unavailable".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Build the gateway router
pub fn app(state: AppState) -> Router {
    let mutations = Router::new()
        .route("/api/comments", post(comments::create_comment))
        .route(
            "/api/comments/{comment_id}",
            put(comments::update_comment).delete(comments::delete_comment),
        )
        .route_layer(from_fn_with_state(state.clone(), require_caller));

    let reads = Router::new()
        .route(
            "/api/tickets/{ticket_id}/comments",
            get(comments::list_ticket_comments),
        )
        .route("/health", get(health::health))
        .route("/health/ready", get(health::health_ready))
        .route("/metrics", get(metrics::metrics));

    let metrics = state.metrics.clone();

    Router::new()
        .merge(mutations)
        .merge(reads)
        .with_state(state)
        .layer(from_fn_with_state(metrics, metrics_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http())
}
