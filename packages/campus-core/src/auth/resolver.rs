//! Session resolution: one authoritative identity check per cycle.

use crate::api::{IdentityCheck, IdentityError};
use std::sync::Arc;
use std::time::Duration;

use super::guard::{Navigator, Route};
use super::session::{CycleId, SessionContext, SessionState};

/// What happened to one resolution cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// This cycle's result became the current state
    Settled {
        cycle: CycleId,
        state: SessionState,
        /// Why the check failed, when it did
        failure: Option<IdentityError>,
        redirected: bool,
    },
    /// A newer cycle started before this one finished; its result was dropped
    Superseded { cycle: CycleId },
}

impl Resolution {
    pub fn state(&self) -> Option<&SessionState> {
        match self {
            Resolution::Settled { state, .. } => Some(state),
            Resolution::Superseded { .. } => None,
        }
    }

    /// Settled because the server explicitly refused the credential.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Resolution::Settled { failure: Some(failure), .. } if failure.is_rejection()
        )
    }

    /// Settled because the server refused the credential (401/403).
    pub fn credential_refused(&self) -> bool {
        matches!(
            self,
            Resolution::Settled { failure: Some(failure), .. } if failure.is_credential_refused()
        )
    }
}

/// Drives `Pending -> {Authenticated, Unauthenticated}` against the identity service.
///
/// Transport errors, timeouts and malformed payloads all settle as
/// `Unauthenticated`; the failure is kept on the [`Resolution`] for logging
/// but never reaches the navigation guard.
pub struct SessionResolver {
    identity: Arc<dyn IdentityCheck>,
    navigator: Arc<dyn Navigator>,
    context: SessionContext,
    timeout: Duration,
}

impl SessionResolver {
    pub fn new(
        identity: Arc<dyn IdentityCheck>,
        navigator: Arc<dyn Navigator>,
        context: SessionContext,
        timeout: Duration,
    ) -> Self {
        Self {
            identity,
            navigator,
            context,
            timeout,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Start a new cycle for `route` and resolve it.
    pub async fn resolve(&self, route: &Route) -> Resolution {
        let cycle = self.context.begin_cycle();
        self.resolve_cycle(cycle, route).await
    }

    /// Resolve an already-started cycle. The result is committed only if
    /// `cycle` is still current when the check returns.
    pub async fn resolve_cycle(&self, cycle: CycleId, route: &Route) -> Resolution {
        let outcome = match tokio::time::timeout(self.timeout, self.identity.fetch_identity()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(IdentityError::Timeout(self.timeout)),
        };

        let (state, failure) = match outcome {
            Ok(user) => (SessionState::Authenticated(user), None),
            Err(e) => {
                if e.is_rejection() {
                    tracing::info!("Session check rejected on {}: {}", route, e);
                } else {
                    tracing::warn!("Session check failed on {}: {}", route, e);
                }
                (SessionState::Unauthenticated, Some(e))
            }
        };

        if !self.context.commit(cycle, state.clone()) {
            return Resolution::Superseded { cycle };
        }

        let redirected = state == SessionState::Unauthenticated && !route.is_auth_entry();
        if redirected {
            self.navigator.redirect(&Route::login());
        }

        if let SessionState::Authenticated(user) = &state {
            tracing::debug!("Session authenticated as {} <{}>", user.name, user.email);
        }

        Resolution::Settled {
            cycle,
            state,
            failure,
            redirected,
        }
    }
}
