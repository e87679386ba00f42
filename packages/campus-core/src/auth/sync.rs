//! Token synchronization between the credential store and every API client.
//!
//! Hydration runs once per mount, before any request is built. Sign-in and
//! sign-out reuse [`TokenSynchronizer::apply`] and [`TokenSynchronizer::revoke`]
//! so there is exactly one code path that writes client tokens.

use crate::api::{ClientRegistry, RegistryError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use super::credentials::{CredentialStore, StoreError, TokenSet};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("credential store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// Stored credential applied to this many clients
    Hydrated { clients: usize },
    /// Nothing stored; every client stays anonymous
    Anonymous,
    /// An earlier call already hydrated this mount
    AlreadyHydrated,
}

pub struct TokenSynchronizer {
    store: Arc<dyn CredentialStore>,
    registry: ClientRegistry,
    hydrated: AtomicBool,
}

impl std::fmt::Debug for TokenSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSynchronizer")
            .field("store", &self.store.describe())
            .field("registry", &self.registry)
            .field("hydrated", &self.hydrated.load(Ordering::Relaxed))
            .finish()
    }
}

impl TokenSynchronizer {
    pub fn new(store: Arc<dyn CredentialStore>, registry: ClientRegistry) -> Self {
        Self {
            store,
            registry,
            hydrated: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated.load(Ordering::SeqCst)
    }

    /// Push the stored credential into every client. Runs once; later calls
    /// return [`HydrationOutcome::AlreadyHydrated`].
    ///
    /// A failing client is fatal: every client is rolled back to anonymous
    /// and the error is returned. A failed hydration may be retried.
    pub fn hydrate(&self) -> Result<HydrationOutcome, SyncError> {
        if self
            .hydrated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Clients already hydrated for this mount");
            return Ok(HydrationOutcome::AlreadyHydrated);
        }

        let result = self.hydrate_from_store();
        if result.is_err() {
            self.hydrated.store(false, Ordering::SeqCst);
        }
        result
    }

    fn hydrate_from_store(&self) -> Result<HydrationOutcome, SyncError> {
        match self.store.get()? {
            Some(credential) => {
                let clients = self.registry.broadcast(&credential)?;
                tracing::info!("Initialized API tokens from storage for {} clients", clients);
                Ok(HydrationOutcome::Hydrated { clients })
            }
            None => {
                tracing::debug!("No stored credential, clients stay anonymous");
                Ok(HydrationOutcome::Anonymous)
            }
        }
    }

    /// Broadcast a fresh token set and persist it. Clients are rolled back if
    /// persisting fails, so store and clients never disagree.
    pub fn apply(&self, tokens: &TokenSet) -> Result<usize, SyncError> {
        let clients = self.registry.broadcast(&tokens.access_token)?;
        if let Err(e) = self.store.save(tokens) {
            tracing::error!("Failed to persist credentials: {}, clearing clients", e);
            if let Err(clear_err) = self.registry.clear_all() {
                tracing::error!("Rollback after failed save was incomplete: {}", clear_err);
            }
            return Err(e.into());
        }
        tracing::debug!("Applied new credential to {} clients", clients);
        Ok(clients)
    }

    /// Delete the stored credential and clear every client, attempting both.
    pub fn revoke(&self) -> Result<(), SyncError> {
        let cleared = self.registry.clear_all();
        let deleted = self.store.clear();
        cleared?;
        deleted?;
        tracing::debug!("Credential revoked from store and clients");
        Ok(())
    }
}
