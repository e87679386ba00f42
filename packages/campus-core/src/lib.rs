//! Campus Dashboard Core Library
//!
//! This crate provides the session layer shared by every Campus dashboard shell:
//! - Credential storage (file-based, keyring with file fallback)
//! - Service API clients and the registry that keeps their bearer tokens in step
//! - Session resolution against the identity service, with stale-cycle rejection
//! - The navigation guard that turns session state into render/redirect decisions
//!
//! # Features
//!
//! - `keyring-storage`: Use the platform keyring for credential storage (file fallback)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use campus_core::{api, auth, SessionCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = api::load_api_config();
//!     let store = Arc::new(auth::FileCredentialStore::default_location()?);
//!     let navigator = Arc::new(auth::RecordingNavigator::new());
//!
//!     let app = SessionCoordinator::new(config, store, navigator)?;
//!     app.mount("/dashboard").await?;
//!     println!("session: {:?} -> {:?}", app.state(), app.guard());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
mod coordinator;

// Re-export commonly used types
pub use api::{ApiEndpointConfig, ClientRegistry, ConfigSource, ServiceClient, ServiceClients, ServiceName};
pub use auth::{
    Credential, CredentialStore, GuardAction, Route, SessionContext, SessionResolver, SessionState,
    TokenSet, TokenSynchronizer, UserIdentity,
};
pub use coordinator::SessionCoordinator;
