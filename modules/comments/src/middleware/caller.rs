use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use crate::auth::{bearer_token, AuthError};
use crate::routes::{ApiError, AppState};

/// Resolve the caller's identity and attach it as a `VerifiedUser` extension
pub async fn require_caller(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingToken)?
        .to_string();

    let user = state.verifier.verify(&token).await.map_err(|e| {
        tracing::warn!(error = %e, "Caller verification failed");
        e
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
