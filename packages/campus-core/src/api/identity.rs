//! Identity service client: the authoritative session check plus the
//! sign-in, registration, refresh and account endpoints.

use crate::auth::{Credential, TokenSet, UserIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::{ClientError, ServiceClient};

/// Why an identity check did not produce a user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The server answered with a non-2xx status
    #[error("identity service rejected the session ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("identity service unreachable: {0}")]
    Transport(String),
    #[error("identity check timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed identity payload: {0}")]
    Malformed(String),
}

impl IdentityError {
    /// An explicit answer from the server, as opposed to not reaching it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, IdentityError::Rejected { .. })
    }

    /// The server refused the credential itself (401/403), not just this request.
    pub fn is_credential_refused(&self) -> bool {
        matches!(self, IdentityError::Rejected { status: 401 | 403, .. })
    }
}

impl From<ClientError> for IdentityError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Status { status, message, .. } => IdentityError::Rejected { status, message },
            ClientError::Decode { reason, .. } => IdentityError::Malformed(reason),
            other => IdentityError::Transport(other.to_string()),
        }
    }
}

/// The single authoritative "who is signed in" question.
#[async_trait]
pub trait IdentityCheck: Send + Sync {
    async fn fetch_identity(&self) -> Result<UserIdentity, IdentityError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// e.g. `["STUDENT"]`, `["TEACHER"]`
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordRequest<'a> {
    email: &'a str,
    old_password: &'a str,
    new_password: &'a str,
}

/// A server-side sign-in session. Token values are never read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub access_token_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refresh_token_expiry: Option<DateTime<Utc>>,
}

impl AuthSession {
    /// Whether the session can still be refreshed at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expiry.map_or(true, |at| at > now)
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticationResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    /// Seconds until the access token expires
    #[serde(default)]
    expires_in: Option<u64>,
}

impl AuthenticationResponse {
    fn into_token_set(self) -> TokenSet {
        let expires_at = self.expires_in.and_then(|secs| {
            let at = i64::try_from(secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl));
            if at.is_none() {
                tracing::warn!("Ignoring out-of-range token lifetime: {}s", secs);
            }
            at
        });
        TokenSet {
            access_token: Credential::new(self.access_token),
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
        }
    }
}

/// Typed calls against the identity service client.
#[derive(Debug, Clone)]
pub struct IdentityApi {
    client: Arc<ServiceClient>,
}

impl IdentityApi {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ServiceClient> {
        &self.client
    }

    /// `GET /me` with whatever credential the identity client currently holds.
    pub async fn me(&self) -> Result<UserIdentity, ClientError> {
        self.client.get_json("/me").await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenSet, ClientError> {
        let request = self.client.post("/login").json(&LoginRequest { username, password });
        let resp: AuthenticationResponse = self.client.send_json(request).await?;
        tracing::debug!("Login accepted for {}", username);
        Ok(resp.into_token_set())
    }

    pub async fn register(&self, payload: &RegisterRequest) -> Result<(), ClientError> {
        let request = self.client.post("/register").json(payload);
        let _: serde_json::Value = self.client.send_json(request).await?;
        Ok(())
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ClientError> {
        let request = self
            .client
            .post("/refresh")
            .json(&RefreshTokenRequest { refresh_token });
        let resp: AuthenticationResponse = self.client.send_json(request).await?;
        Ok(resp.into_token_set())
    }

    /// Tokens are stateless JWTs; this only lets the server drop its refresh token.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ClientError> {
        let body = match refresh_token {
            Some(refresh_token) => serde_json::json!({ "refreshToken": refresh_token }),
            None => serde_json::json!({}),
        };
        let request = self.client.post("/logout").json(&body);
        let _: serde_json::Value = self.client.send_json(request).await?;
        Ok(())
    }

    /// Verifies `old_password` server-side before replacing it.
    pub async fn reset_password(
        &self,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ClientError> {
        let request = self.client.post("/reset-password").json(&ResetPasswordRequest {
            email,
            old_password,
            new_password,
        });
        let _: serde_json::Value = self.client.send_json(request).await?;
        tracing::debug!("Password reset accepted for {}", email);
        Ok(())
    }

    pub async fn list_sessions(&self, username: &str) -> Result<Vec<AuthSession>, ClientError> {
        self.client.get_json(&format!("/sessions/{}", username)).await
    }

    pub async fn revoke_session(&self, id: i64) -> Result<(), ClientError> {
        let request = self.client.request(Method::DELETE, &format!("/sessions/{}", id));
        let _: serde_json::Value = self.client.send_json(request).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityCheck for IdentityApi {
    async fn fetch_identity(&self) -> Result<UserIdentity, IdentityError> {
        self.me().await.map_err(IdentityError::from)
    }
}
