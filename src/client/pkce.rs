//! PKCE (Proof Key for Code Exchange) utilities for the authorization code flow.
//!
//! This module generates code verifiers and S256 challenges as specified in
//! RFC 7636, builds authorization URLs, and keeps the pending login request
//! (state + verifier) across the full-page redirect to the provider.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::client::token_store::StorageBackend;

/// Length of the code verifier in bytes (43-128 characters recommended by RFC 7636)
const CODE_VERIFIER_LENGTH: usize = 32;

/// Length of the random state parameter in bytes
const STATE_LENGTH: usize = 16;

fn random_url_safe(len: usize) -> String {
    use rand::Rng;

    let random_bytes: Vec<u8> = rand::thread_rng()
        .sample_iter(rand::distributions::Standard)
        .take(len)
        .collect();

    URL_SAFE_NO_PAD.encode(&random_bytes)
}

/// Generates a cryptographically random code verifier for PKCE flow.
///
/// The code verifier is a high-entropy cryptographic random string using the
/// unreserved characters [A-Z] / [a-z] / [0-9] / "-" / "_".
pub fn generate_code_verifier() -> String {
    random_url_safe(CODE_VERIFIER_LENGTH)
}

/// Generates a code challenge from a code verifier using SHA256.
pub fn generate_code_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    let hash = hasher.finalize();

    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a random state parameter for CSRF protection.
pub fn generate_state() -> String {
    random_url_safe(STATE_LENGTH)
}

/// Parameters of one authorization redirect.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest<'a> {
    /// Provider authorization endpoint
    pub endpoint: &'a str,
    /// Client identifier
    pub client_id: &'a str,
    /// Callback URL registered with the provider
    pub redirect_uri: &'a str,
    /// Space separated scopes
    pub scope: &'a str,
    /// CSRF state
    pub state: &'a str,
    /// S256 code challenge
    pub code_challenge: &'a str,
    /// `none` for silent renewal, otherwise unset
    pub prompt: Option<&'a str>,
}

/// Builds the authorization URL the browser is sent to.
pub fn build_authorization_url(request: &AuthorizationRequest<'_>) -> String {
    let separator = if request.endpoint.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        request.endpoint,
        separator,
        urlencoding::encode(request.client_id),
        urlencoding::encode(request.redirect_uri),
        urlencoding::encode(request.scope),
        urlencoding::encode(request.state),
        urlencoding::encode(request.code_challenge),
    );
    if let Some(prompt) = request.prompt {
        url.push_str("&prompt=");
        url.push_str(&urlencoding::encode(prompt));
    }
    url
}

/// Login request kept in storage while the user is at the provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingLogin {
    /// CSRF state sent with the authorization request
    pub state: String,
    /// PKCE verifier matching the challenge that was sent
    pub code_verifier: String,
    /// Path to return to after login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

impl PendingLogin {
    /// Creates a request with a fresh state and verifier.
    pub fn generate(return_to: Option<String>) -> Self {
        Self {
            state: generate_state(),
            code_verifier: generate_code_verifier(),
            return_to,
        }
    }

    /// S256 challenge for this request's verifier.
    pub fn code_challenge(&self) -> String {
        generate_code_challenge(&self.code_verifier)
    }

    /// Stores the request under `key`.
    pub fn save<S: StorageBackend>(&self, backend: &S, key: &str) {
        match serde_json::to_string(self) {
            Ok(json) => backend.set(key, &json),
            Err(e) => tracing::error!("Failed to serialize pending login: {}", e),
        }
    }

    /// Reads and removes the request stored under `key`.
    ///
    /// A request is only ever usable once.
    pub fn take<S: StorageBackend>(backend: &S, key: &str) -> Option<Self> {
        let raw = backend.get(key)?;
        backend.remove(key);
        serde_json::from_str(&raw)
            .map_err(|e| tracing::warn!("Discarding unreadable pending login: {}", e))
            .ok()
    }
}
