//! Authentication module for the Campus dashboard.
//!
//! Provides credential storage, token synchronization across API clients,
//! session resolution and the navigation guard.

mod credentials;
pub mod guard;
mod refresh;
mod resolver;
mod session;
mod sync;

#[cfg(feature = "keyring-storage")]
pub use credentials::KeyringCredentialStore;
pub use credentials::{
    default_credential_store, Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore,
    StoreError, TokenSet,
};
pub use guard::{evaluate, GuardAction, Navigator, RecordingNavigator, Route, HOME_ROUTE, LOGIN_ROUTE, SIGNUP_ROUTE};
pub use refresh::RefreshingIdentityCheck;
pub use resolver::{Resolution, SessionResolver};
pub use session::{CycleId, SessionContext, SessionSnapshot, SessionState, UserIdentity};
pub use sync::{HydrationOutcome, SyncError, TokenSynchronizer};

#[cfg(test)]
pub(crate) use resolver::tests::{rejected, student, FixedCheck};
