use crate::api::{IdentityApi, IdentityCheck, IdentityError};
use async_trait::async_trait;
use std::sync::Arc;

use super::sync::TokenSynchronizer;
use super::UserIdentity;

const UNAUTHORIZED: u16 = 401;

/// Identity check that trades a stored refresh token for a new access token
/// when the first answer is 401, then asks once more.
///
/// Runs inside the caller's resolution cycle, so a refresh never produces a
/// second state transition.
pub struct RefreshingIdentityCheck {
    inner: Arc<dyn IdentityCheck>,
    api: IdentityApi,
    sync: Arc<TokenSynchronizer>,
}

impl RefreshingIdentityCheck {
    pub fn new(inner: Arc<dyn IdentityCheck>, api: IdentityApi, sync: Arc<TokenSynchronizer>) -> Self {
        Self { inner, api, sync }
    }

    fn stored_refresh_token(&self) -> Option<String> {
        match self.sync.store().refresh_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Could not read refresh token: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl IdentityCheck for RefreshingIdentityCheck {
    async fn fetch_identity(&self) -> Result<UserIdentity, IdentityError> {
        let rejection = match self.inner.fetch_identity().await {
            Err(IdentityError::Rejected { status, message }) if status == UNAUTHORIZED => {
                IdentityError::Rejected { status, message }
            }
            other => return other,
        };

        let Some(refresh_token) = self.stored_refresh_token() else {
            return Err(rejection);
        };

        tracing::info!("Access token rejected, attempting refresh");
        let tokens = match self.api.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                return Err(rejection);
            }
        };

        if let Err(e) = self.sync.apply(&tokens) {
            tracing::error!("Failed to apply refreshed credential: {}", e);
            return Err(rejection);
        }

        tracing::info!("Access token refreshed, re-checking session");
        self.inner.fetch_identity().await
    }
}
