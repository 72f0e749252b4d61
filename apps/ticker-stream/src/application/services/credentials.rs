//! Access Credential Storage
//!
//! The provider access token is an opaque string. It is validated at this
//! boundary so an unusable token never reaches the connection manager.

use std::fmt;
use std::sync::Arc;

use crate::application::ports::{KeyValueStore, StorageError};

/// Durable key holding the access token.
pub const CREDENTIAL_KEY: &str = "finnhub_api_key";

/// Placeholder value shipped in sample configuration files.
const PLACEHOLDER_TOKEN: &str = "your_api_key_here";

/// Tokens at or below this length are rejected.
const MIN_TOKEN_LEN: usize = 10;

// =============================================================================
// Access Token
// =============================================================================

/// Errors from credential validation and storage.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Token is too short or the placeholder value.
    #[error("invalid access token")]
    Invalid,

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Validated provider access token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Validate a raw token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] if the token is too short or is
    /// the placeholder value.
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let token = raw.trim();
        if token.len() <= MIN_TOKEN_LEN || token == PLACEHOLDER_TOKEN {
            return Err(CredentialError::Invalid);
        }
        Ok(Self(token.to_string()))
    }

    /// Expose the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Stream URL: `prefix` followed by the token.
    #[must_use]
    pub fn stream_url(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessToken").field(&"[REDACTED]").finish()
    }
}

// =============================================================================
// Credential Store
// =============================================================================

/// Saves and restores the access token in durable storage.
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    /// Create a credential store over a key-value backend.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Validate and persist a token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] without writing anything if the
    /// token fails validation, or a storage error.
    pub fn save(&self, raw: &str) -> Result<AccessToken, CredentialError> {
        let token = AccessToken::parse(raw)?;
        self.store.set(CREDENTIAL_KEY, token.expose())?;
        tracing::info!("Access token saved");
        Ok(token)
    }

    /// Load the stored token. Invalid stored values are ignored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot be read.
    pub fn load(&self) -> Result<Option<AccessToken>, CredentialError> {
        let Some(raw) = self.store.get(CREDENTIAL_KEY)? else {
            return Ok(None);
        };
        match AccessToken::parse(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(_) => {
                tracing::warn!("Ignoring invalid stored access token");
                Ok(None)
            }
        }
    }

    /// Remove the stored token.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot be written.
    pub fn remove(&self) -> Result<(), CredentialError> {
        self.store.remove(CREDENTIAL_KEY)?;
        Ok(())
    }

    /// Resolve the token to use: `preferred` (e.g. from the environment)
    /// wins over the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] if `preferred` is set but
    /// invalid, or a storage error.
    pub fn resolve(&self, preferred: Option<&str>) -> Result<Option<AccessToken>, CredentialError> {
        match preferred {
            Some(raw) => AccessToken::parse(raw).map(Some),
            None => self.load(),
        }
    }
}
