//! Persistent token storage keyed by authority and client id.
//!
//! The token set is written as one JSON entry under
//! `oidc.user:{authority}:{client_id}`. Reads fail soft: anything that does
//! not parse is reported as absent so the session falls back to a fresh login.
//!
//! ## Storage Strategy
//!
//! - On login / renewal: overwrite the entry
//! - On page load: read the entry once, the session manager decides validity
//! - On logout or 401: remove the entry
//! - Per request: the API client reads the entry, so a renewed token is
//!   picked up without any extra wiring

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing;

use crate::OidcConfig;
use crate::client::clock;
use crate::error::AuthError;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Key/value string storage the token store writes to.
pub trait StorageBackend {
    /// Reads a value
    fn get(&self, key: &str) -> Option<String>;
    /// Writes a value, replacing any previous one
    fn set(&self, key: &str, value: &str);
    /// Deletes a value; missing keys are fine
    fn remove(&self, key: &str);
}

/// In-memory storage for native builds and tests.
///
/// Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

/// Browser `localStorage`.
#[cfg(target_arch = "wasm32")]
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalStorage;

#[cfg(target_arch = "wasm32")]
impl LocalStorage {
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window()?.local_storage().ok()?
    }
}

#[cfg(target_arch = "wasm32")]
impl StorageBackend for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        Self::storage()?.get_item(key).ok()?
    }

    fn set(&self, key: &str, value: &str) {
        if let Some(storage) = Self::storage()
            && storage.set_item(key, value).is_err()
        {
            tracing::warn!("Failed to write {} to localStorage", key);
        }
    }

    fn remove(&self, key: &str) {
        if let Some(storage) = Self::storage() {
            let _ = storage.remove_item(key);
        }
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Tokens issued by the identity provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    /// Access token presented to the Meal API
    pub access_token: String,
    /// Refresh token, present when `offline_access` was granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// ID token, used as `id_token_hint` on logout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Token type, normally `Bearer`
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Unix timestamp when the access token expires (in seconds)
    pub expires_at: u64,
}

impl TokenSet {
    /// Creates a token set expiring `expires_in` seconds after `now`.
    pub fn new(access_token: String, expires_in: u64, now: u64) -> Self {
        Self {
            access_token,
            refresh_token: None,
            id_token: None,
            token_type: default_token_type(),
            scope: None,
            expires_at: now.saturating_add(expires_in),
        }
    }

    /// Checks expiry against the given time.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Checks expiry against the wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(clock::now())
    }

    /// Seconds until expiry, zero once expired.
    pub fn expires_in(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    /// Keeps `previous` refresh and ID tokens when a refresh response omitted them.
    pub fn inherit_from(mut self, previous: &TokenSet) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.id_token.is_none() {
            self.id_token = previous.id_token.clone();
        }
        self
    }
}

/// Token persistence bound to one (authority, client id) pair.
#[derive(Clone, Debug)]
pub struct TokenStore<S> {
    backend: S,
    key: String,
}

impl<S: StorageBackend> TokenStore<S> {
    /// Creates a store writing to `backend` under the key derived from `config`.
    pub fn new(backend: S, config: &OidcConfig) -> Self {
        Self {
            backend,
            key: config.token_storage_key(),
        }
    }

    /// Storage key in use.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Underlying storage, shared with the pending login request.
    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Persists the token set, replacing any previous one.
    pub fn save(&self, tokens: &TokenSet) {
        match serde_json::to_string(tokens) {
            Ok(json) => {
                self.backend.set(&self.key, &json);
                tracing::trace!(
                    "Token set saved, expires in {} seconds",
                    tokens.expires_in(clock::now())
                );
            }
            Err(e) => tracing::error!("Failed to serialize token set: {}", e),
        }
    }

    /// Loads the token set; corrupt data is reported as absent.
    pub fn load(&self) -> Option<TokenSet> {
        let raw = self.backend.get(&self.key)?;
        match Self::parse(&raw) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    fn parse(raw: &str) -> Result<TokenSet, AuthError> {
        serde_json::from_str(raw).map_err(|e| AuthError::StorageCorrupt(e.to_string()))
    }

    /// Returns the access token if a non-expired set is stored.
    pub fn valid_access_token(&self, now: u64) -> Option<String> {
        self.load()
            .filter(|tokens| !tokens.is_expired_at(now))
            .map(|tokens| tokens.access_token)
    }

    /// Removes the token set.
    pub fn clear(&self) {
        self.backend.remove(&self.key);
        tracing::trace!("Token set cleared");
    }
}
