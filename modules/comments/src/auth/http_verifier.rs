//! Identity verification against the auth service's `/verify-token` endpoint

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{AuthError, IdentityVerifier, VerifiedUser};

#[derive(Debug, Deserialize)]
struct VerifyTokenResponse {
    #[serde(default)]
    valid: bool,
    user: Option<VerifiedUser>,
}

#[derive(Clone)]
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(auth_service_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            verify_url: format!("{}/verify-token", auth_service_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let response = self
            .client
            .get(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthError::Unavailable(format!("auth service returned {}", status)));
        }
        if !status.is_success() {
            tracing::debug!(status = %status, "Token rejected by auth service");
            return Err(AuthError::InvalidToken);
        }

        let body: VerifyTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("unreadable verify-token response: {}", e)))?;

        match body {
            VerifyTokenResponse {
                valid: true,
                user: Some(user),
            } => Ok(user),
            _ => Err(AuthError::InvalidToken),
        }
    }
}
