//! Caller identity
//!
//! The gateway never checks credentials itself: it hands the bearer token to
//! an [`IdentityVerifier`] and trusts the identity it returns.

pub mod http_verifier;

pub use http_verifier::HttpIdentityVerifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of an authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedUser {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token is missing")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
