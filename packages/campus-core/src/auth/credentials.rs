//! Credential storage with file-based persistence and optional platform keyring.
//!
//! Storage priority:
//! 1. Platform keyring (if `keyring-storage` feature enabled and available)
//! 2. File-based storage (owner read/write only on Unix)
//!
//! Reads never suspend: the store must be readable before the first request.
//! There is no cross-process coordination, the last write wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

/// Service name used for keyring storage
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "campus-dashboard";
/// Username used for keyring entry
#[cfg(feature = "keyring-storage")]
const KEYRING_USER: &str = "session";

const CREDENTIALS_FILE: &str = ".credentials";

/// Opaque bearer token. Never validated locally.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for placing in an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Everything persisted for one signed-in profile.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: Credential,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &self.access_token)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl TokenSet {
    /// A bare access token with no refresh token and no known expiry.
    pub fn bearer(access_token: Credential) -> Self {
        Self {
            access_token,
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to find config directory")]
    NoConfigDir,
    #[error("credential file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse stored credentials: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("credential store lock poisoned")]
    Poisoned,
}

/// Persisted single-credential storage.
pub trait CredentialStore: Send + Sync {
    /// Raw stored token set, expired or not.
    fn load(&self) -> Result<Option<TokenSet>, StoreError>;

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Human-readable location, for status output.
    fn describe(&self) -> String;

    /// Stored access credential, absent once it has expired. The token set
    /// itself stays so the refresh token can still be exchanged.
    fn get(&self) -> Result<Option<Credential>, StoreError> {
        match self.load()? {
            Some(tokens) if tokens.is_expired_at(Utc::now()) => {
                tracing::debug!("Stored access token expired");
                Ok(None)
            }
            other => Ok(other.map(|t| t.access_token)),
        }
    }

    /// Stored refresh token, whether or not the access token has expired.
    fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.and_then(|t| t.refresh_token))
    }

    /// Overwrite whatever is stored with a bare credential.
    fn set(&self, credential: Credential) -> Result<(), StoreError> {
        self.save(&TokenSet::bearer(credential))
    }
}

// ============================================================================
// File-based credential storage (always available)
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/campus-dashboard/.credentials`
    pub fn default_location() -> Result<Self, StoreError> {
        let dir = crate::api::config::get_config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(Self::new(dir.join(CREDENTIALS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let tokens: TokenSet = serde_json::from_str(&content)?;
        tracing::debug!("Credentials loaded from file");
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
            }
        }
        let json = serde_json::to_string(tokens)?;

        // Set restrictive permissions on Unix before writing
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600) // Owner read/write only
                .open(&self.path)
                .map_err(|e| self.io_error(e))?;
            let mut file = std::io::BufWriter::new(file);
            file.write_all(json.as_bytes()).map_err(|e| self.io_error(e))?;
            file.flush().map_err(|e| self.io_error(e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, &json).map_err(|e| self.io_error(e))?;
        }

        tracing::debug!("Credentials saved to file: {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| self.io_error(e))?;
            tracing::debug!("Credentials file removed");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("File-based storage: {}", self.path.display())
    }
}

// ============================================================================
// In-memory storage (ephemeral sessions, tests)
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<Option<TokenSet>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>, StoreError> {
        Ok(self.tokens.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        *self.tokens.lock().map_err(|_| StoreError::Poisoned)? = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.tokens.lock().map_err(|_| StoreError::Poisoned)? = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "In-memory storage (not persisted)".to_string()
    }
}

// ============================================================================
// Keyring-based credential storage (optional, platform-specific)
// ============================================================================

/// Platform keyring with the file store as fallback and backup.
#[cfg(feature = "keyring-storage")]
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    fallback: FileCredentialStore,
}

#[cfg(feature = "keyring-storage")]
impl KeyringCredentialStore {
    pub fn new(fallback: FileCredentialStore) -> Self {
        Self { fallback }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Entry::new(KEYRING_SERVICE, KEYRING_USER).map_err(|e| {
            tracing::error!(
                "Failed to create keyring entry (service='{}', user='{}'): {}",
                KEYRING_SERVICE,
                KEYRING_USER,
                e
            );
            StoreError::Keyring(e.to_string())
        })
    }
}

#[cfg(feature = "keyring-storage")]
impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<TokenSet>, StoreError> {
        let entry = match self.entry() {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Keyring unavailable for reading: {}, trying file fallback", e);
                return self.fallback.load();
            }
        };

        match entry.get_password() {
            Ok(json) => {
                tracing::debug!("Credentials loaded from keyring");
                Ok(Some(serde_json::from_str(&json)?))
            }
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("No credentials in keyring, trying file fallback");
                self.fallback.load()
            }
            Err(e) => {
                tracing::warn!("Failed to load credentials from keyring: {}, trying file fallback", e);
                self.fallback.load()
            }
        }
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        let entry = match self.entry() {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Keyring unavailable for saving: {}, using file storage", e);
                return self.fallback.save(tokens);
            }
        };

        let json = serde_json::to_string(tokens)?;
        if let Err(e) = entry.set_password(&json) {
            tracing::warn!("Failed to save credentials to keyring: {}, using file storage", e);
            return self.fallback.save(tokens);
        }

        // Keep a file copy so a locked keyring does not log the user out
        if let Err(e) = self.fallback.save(tokens) {
            tracing::debug!("Failed to save backup credentials to file: {}", e);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.fallback.clear()?;

        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Keyring(e.to_string())),
        }
    }

    fn describe(&self) -> String {
        #[cfg(target_os = "windows")]
        let backend = "Windows Credential Manager";
        #[cfg(target_os = "macos")]
        let backend = "macOS Keychain";
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let backend = "Linux Secret Service (GNOME Keyring/KWallet)";

        format!("{} (with file fallback at {})", backend, self.fallback.path().display())
    }
}

/// Open the platform's preferred credential store.
pub fn default_credential_store() -> Result<Box<dyn CredentialStore>, StoreError> {
    let file = FileCredentialStore::default_location()?;

    #[cfg(feature = "keyring-storage")]
    {
        Ok(Box::new(KeyringCredentialStore::new(file)))
    }

    #[cfg(not(feature = "keyring-storage"))]
    {
        Ok(Box::new(file))
    }
}
