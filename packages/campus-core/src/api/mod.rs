//! Backend API module.
//!
//! Provides the per-service HTTP clients, the registry that keeps their bearer
//! tokens in step, and the identity service calls.

mod client;
pub mod config;
mod identity;
mod registry;

pub use client::{error_message, unwrap_envelope, ClientError, ServiceClient, ServiceClients, ServiceName};
pub use config::{load_api_config, ApiEndpointConfig, ConfigSource};
pub use identity::{AuthSession, IdentityApi, IdentityCheck, IdentityError, RegisterRequest};
pub use registry::{AuthorizedClient, ClientRegistry, RegistryError};

#[cfg(test)]
pub(crate) use registry::tests::FakeClient;
