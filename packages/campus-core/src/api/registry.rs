//! Registry of independently authorized API clients.
//!
//! Adding a downstream service means registering one more handle here; the
//! token synchronizer iterates the registry and never names clients itself.

use crate::auth::Credential;
use std::sync::Arc;
use thiserror::Error;

use super::ClientError;

/// A client whose outbound bearer token can be set or cleared.
pub trait AuthorizedClient: Send + Sync {
    fn name(&self) -> &str;

    /// Only mutates local client state; requests built afterwards carry the token.
    fn set_auth_token(&self, credential: &Credential) -> Result<(), ClientError>;

    fn clear_auth_token(&self) -> Result<(), ClientError>;

    fn auth_token(&self) -> Option<Credential>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to apply credential to '{client}': {source}")]
    Apply {
        client: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to clear credential on {} client(s): {}", .failed.len(), .failed.join(", "))]
    Clear { failed: Vec<String> },
}

#[derive(Clone, Default)]
pub struct ClientRegistry {
    handles: Vec<Arc<dyn AuthorizedClient>>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: Arc<dyn AuthorizedClient>) {
        tracing::debug!("Registered API client '{}'", handle.name());
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AuthorizedClient>> {
        self.handles.iter().find(|h| h.name() == name)
    }

    /// Apply `credential` to every handle, or to none.
    ///
    /// The first failing handle aborts the broadcast and every handle is
    /// cleared again before the error is returned.
    pub fn broadcast(&self, credential: &Credential) -> Result<usize, RegistryError> {
        for handle in &self.handles {
            if let Err(source) = handle.set_auth_token(credential) {
                let client = handle.name().to_string();
                tracing::error!("Failed to apply credential to '{}': {}, rolling back", client, source);
                if let Err(e) = self.clear_all() {
                    tracing::error!("Rollback after failed broadcast was incomplete: {}", e);
                }
                return Err(RegistryError::Apply { client, source });
            }
        }
        Ok(self.handles.len())
    }

    /// Clear the credential on every handle, attempting all of them even if some fail.
    pub fn clear_all(&self) -> Result<(), RegistryError> {
        let failed: Vec<String> = self
            .handles
            .iter()
            .filter_map(|h| match h.clear_auth_token() {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!("Failed to clear credential on '{}': {}", h.name(), e);
                    Some(h.name().to_string())
                }
            })
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Clear { failed })
        }
    }

    /// The credential shared by every handle, `None` if no handle has one.
    ///
    /// Returns `Err` with the names of the handles that disagree when the
    /// registry is partially authorized.
    pub fn shared_credential(&self) -> Result<Option<Credential>, Vec<String>> {
        let first = match self.handles.first() {
            Some(h) => h.auth_token(),
            None => return Ok(None),
        };
        let diverged: Vec<String> = self
            .handles
            .iter()
            .filter(|h| h.auth_token() != first)
            .map(|h| h.name().to_string())
            .collect();
        if diverged.is_empty() {
            Ok(first)
        } else {
            Err(diverged)
        }
    }
}
