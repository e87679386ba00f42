//! Session coordinator: wires the credential store, the service clients, the
//! resolver and the guard into the one object a dashboard shell talks to.

use crate::api::{ApiEndpointConfig, IdentityApi, IdentityCheck, RegisterRequest, ServiceClients};
use crate::auth::{
    evaluate, CredentialStore, GuardAction, Navigator, RefreshingIdentityCheck, Resolution, Route,
    SessionContext, SessionResolver, SessionState, SyncError, TokenSynchronizer, HOME_ROUTE,
};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Role assigned to accounts created from the sign-up page.
const DEFAULT_SIGNUP_ROLE: &str = "STUDENT";

pub struct SessionCoordinator {
    clients: ServiceClients,
    identity: IdentityApi,
    sync: Arc<TokenSynchronizer>,
    resolver: SessionResolver,
    navigator: Arc<dyn Navigator>,
    route: Mutex<Route>,
}

impl SessionCoordinator {
    /// Build the coordinator against real service endpoints. The identity check
    /// refreshes an expired access token once before giving up.
    pub fn new(
        config: ApiEndpointConfig,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let clients = ServiceClients::new(&config).context("Failed to build service clients")?;
        let identity = IdentityApi::new(clients.identity().clone());
        let sync = Arc::new(TokenSynchronizer::new(store, clients.registry()));
        let check = Arc::new(RefreshingIdentityCheck::new(
            Arc::new(identity.clone()),
            identity.clone(),
            sync.clone(),
        ));

        tracing::info!(
            "Session layer ready (api: {}, source: {})",
            config.base_url,
            config.source
        );
        Ok(Self::with_identity_check(
            clients,
            sync,
            check,
            navigator,
            config.request_timeout,
        ))
    }

    /// Build with a caller-supplied identity check. `sync` must wrap the
    /// registry of `clients`.
    pub fn with_identity_check(
        clients: ServiceClients,
        sync: Arc<TokenSynchronizer>,
        check: Arc<dyn IdentityCheck>,
        navigator: Arc<dyn Navigator>,
        timeout: Duration,
    ) -> Self {
        let identity = IdentityApi::new(clients.identity().clone());
        let resolver = SessionResolver::new(check, navigator.clone(), SessionContext::new(), timeout);
        Self {
            clients,
            identity,
            sync,
            resolver,
            navigator,
            route: Mutex::new(Route::new("/")),
        }
    }

    pub fn context(&self) -> &SessionContext {
        self.resolver.context()
    }

    pub fn state(&self) -> SessionState {
        self.context().state()
    }

    pub fn clients(&self) -> &ServiceClients {
        &self.clients
    }

    pub fn synchronizer(&self) -> &Arc<TokenSynchronizer> {
        &self.sync
    }

    /// Account endpoints on the identity service (password, sessions).
    pub fn identity(&self) -> &IdentityApi {
        &self.identity
    }

    pub fn current_route(&self) -> Route {
        match self.route.lock() {
            Ok(route) => route.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_route(&self, route: Route) {
        match self.route.lock() {
            Ok(mut current) => *current = route,
            Err(poisoned) => *poisoned.into_inner() = route,
        }
    }

    /// First mount: hydrate every client from the store, then resolve the
    /// session for `route`. No identity request is built before hydration
    /// has finished.
    pub async fn mount(&self, route: &str) -> Result<Resolution, SyncError> {
        let outcome = self.sync.hydrate()?;
        tracing::info!("Mounted on {} ({:?})", Route::new(route), outcome);
        Ok(self.navigate(route).await)
    }

    /// Route change: start a new resolution cycle for `route`.
    ///
    /// A 401/403 from the identity service also clears the stored credential
    /// and every client. Transport failures and timeouts leave both alone.
    pub async fn navigate(&self, route: &str) -> Resolution {
        let route = Route::new(route);
        self.set_route(route.clone());
        let resolution = self.resolver.resolve(&route).await;

        if resolution.credential_refused() {
            tracing::info!("Stored credential refused, signing out locally");
            if let Err(e) = self.sync.revoke() {
                tracing::error!("Failed to clear refused credential: {}", e);
            }
        }
        resolution
    }

    /// What the shell should show for the current route right now.
    pub fn guard(&self) -> GuardAction {
        evaluate(&self.state(), &self.current_route())
    }

    /// Exchange username and password for tokens, push them to every client
    /// and persist them, then land on the dashboard home.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<Resolution> {
        let tokens = self
            .identity
            .login(username, password)
            .await
            .context("Sign in failed")?;
        let clients = self
            .sync
            .apply(&tokens)
            .context("Failed to store credentials")?;
        tracing::info!("Signed in as {} ({} clients updated)", username, clients);

        Ok(self.navigate(HOME_ROUTE).await)
    }

    /// Register a student account, then sign in with the same credentials.
    pub async fn sign_up(&self, username: &str, email: &str, password: &str) -> Result<Resolution> {
        let request = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            roles: vec![DEFAULT_SIGNUP_ROLE.to_string()],
        };
        self.identity
            .register(&request)
            .await
            .context("Sign up failed")?;
        tracing::info!("Registered account {}", username);

        self.sign_in(username, password).await
    }

    /// Tell the server (best effort), then drop the credential everywhere,
    /// settle as `Unauthenticated` and send the user to the login page.
    pub async fn sign_out(&self) -> Result<()> {
        let refresh_token = match self.sync.store().refresh_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Could not read stored tokens before logout: {}", e);
                None
            }
        };
        if let Err(e) = self.identity.logout(refresh_token.as_deref()).await {
            tracing::warn!("Logout request failed: {}, clearing local session anyway", e);
        }

        let revoked = self.sync.revoke();
        self.context().replace(SessionState::Unauthenticated);
        self.navigator.redirect(&Route::login());

        revoked.context("Failed to clear stored credentials")?;
        tracing::info!("Signed out");
        Ok(())
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("sync", &self.sync)
            .field("route", &self.current_route())
            .field("state", &self.state())
            .finish()
    }
}
