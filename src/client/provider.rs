//! Identity provider client: code exchange, refresh, userinfo, logout URL.
//!
//! The session manager only talks to the provider through the
//! [`IdentityProvider`] trait, so its transitions can be driven by a test
//! double. [`HttpIdentityProvider`] is the real implementation over
//! `reqwest`, working against the endpoints found by discovery.

use serde::{Deserialize, Serialize};

use crate::client::clock;
use crate::client::discovery::ProviderMetadata;
use crate::client::pkce::{AuthorizationRequest, PendingLogin, build_authorization_url};
use crate::client::silent_frame;
use crate::client::token_store::{DEFAULT_EXPIRES_IN, TokenSet};
use crate::error::AuthError;
use crate::{OidcConfig, User};

/// Operations the session manager needs from the identity provider.
#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    /// URL for the interactive redirect of `pending`.
    fn authorization_url(&self, pending: &PendingLogin) -> String;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet, AuthError>;

    /// Runs the refresh-token grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;

    /// Fetches the userinfo profile for `access_token`.
    async fn fetch_user_profile(&self, access_token: &str) -> Result<User, AuthError>;

    /// RP-initiated logout URL, if the provider has an end-session endpoint.
    fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<String>;

    /// Obtains a fresh token set without user interaction.
    ///
    /// Refresh and ID tokens missing from the answer are carried over from
    /// `current`.
    async fn renew_silently(&self, current: &TokenSet) -> Result<TokenSet, AuthError>;

    /// Signs in through the provider session alone (`prompt=none`), without
    /// any token set to start from.
    async fn sign_in_silently(&self) -> Result<TokenSet, AuthError>;
}

/// Token response from the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self, now: u64) -> TokenSet {
        let mut tokens = TokenSet::new(
            self.access_token,
            self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            now,
        );
        if let Some(token_type) = self.token_type {
            tokens.token_type = token_type;
        }
        tokens.refresh_token = self.refresh_token;
        tokens.id_token = self.id_token;
        tokens.scope = self.scope;
        tokens
    }
}

/// Error response from the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// OIDC client over HTTP.
#[derive(Clone, Debug)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    config: OidcConfig,
    metadata: ProviderMetadata,
}

impl HttpIdentityProvider {
    /// Creates a provider client from already known endpoints.
    pub fn new(config: OidcConfig, metadata: ProviderMetadata) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            metadata,
        }
    }

    /// Runs discovery for `config.authority` and creates the client.
    pub async fn discover(config: OidcConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::new();
        let metadata = ProviderMetadata::fetch(&client, &config).await?;
        Ok(Self {
            client,
            config,
            metadata,
        })
    }

    /// Client configuration.
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Discovered endpoints.
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn authorization_url_for(
        &self,
        pending: &PendingLogin,
        redirect_uri: &str,
        prompt: Option<&str>,
    ) -> String {
        let code_challenge = pending.code_challenge();
        build_authorization_url(&AuthorizationRequest {
            endpoint: &self.metadata.authorization_endpoint,
            client_id: &self.config.client_id,
            redirect_uri,
            scope: &self.config.scope,
            state: &pending.state,
            code_challenge: &code_challenge,
            prompt,
        })
    }

    async fn exchange_code_with(
        &self,
        code: &str,
        code_verifier: Option<&str>,
        redirect_uri: &str,
    ) -> Result<TokenSet, AuthError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        self.token_request(&form)
            .await
            .map_err(|e| AuthError::CodeExchangeFailed(e.to_string()))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, AuthError> {
        let response = self
            .client
            .post(&self.metadata.token_endpoint)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let token_response: TokenResponse = response.json().await?;
            return Ok(token_response.into_token_set(clock::now()));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => Err(AuthError::Provider {
                error: error.error,
                description: error.error_description,
            }),
            Err(_) => Err(AuthError::Provider {
                error: format!("http_{}", status.as_u16()),
                description: (!body.is_empty()).then_some(body),
            }),
        }
    }
}

impl IdentityProvider for HttpIdentityProvider {
    fn authorization_url(&self, pending: &PendingLogin) -> String {
        self.authorization_url_for(pending, &self.config.redirect_uri, None)
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet, AuthError> {
        tracing::trace!("Exchanging authorization code at {}", self.metadata.token_endpoint);
        let tokens = self
            .exchange_code_with(code, code_verifier, &self.config.redirect_uri)
            .await;
        if let Err(e) = &tokens {
            tracing::error!("Failed to exchange code for tokens: {}", e);
        }
        tokens
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        tracing::trace!("Refreshing access token");
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        self.token_request(&form).await
    }

    async fn fetch_user_profile(&self, access_token: &str) -> Result<User, AuthError> {
        tracing::trace!("Fetching user profile from {}", self.metadata.userinfo_endpoint);

        let response = self
            .client
            .get(&self.metadata.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::ProfileFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::ProfileFetchFailed(format!(
                "userinfo returned {}",
                response.status()
            )));
        }

        let user: User = response
            .json()
            .await
            .map_err(|e| AuthError::ProfileFetchFailed(format!("Failed to parse profile: {e}")))?;

        tracing::trace!("Fetched profile for {}", user.id);
        Ok(user)
    }

    fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<String> {
        let endpoint = self.metadata.end_session_endpoint.as_deref()?;
        let mut params = vec![format!(
            "client_id={}",
            urlencoding::encode(&self.config.client_id)
        )];
        if let Some(hint) = id_token_hint {
            params.push(format!("id_token_hint={}", urlencoding::encode(hint)));
        }
        if let Some(return_to) = self.config.post_logout_redirect_uri.as_deref() {
            params.push(format!(
                "post_logout_redirect_uri={}",
                urlencoding::encode(return_to)
            ));
        }
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        Some(format!("{endpoint}{separator}{}", params.join("&")))
    }

    async fn renew_silently(&self, current: &TokenSet) -> Result<TokenSet, AuthError> {
        if let Some(refresh_token) = current.refresh_token.as_deref() {
            let fresh = self
                .refresh(refresh_token)
                .await
                .map_err(|e| AuthError::SilentRenewalFailed(e.to_string()))?;
            return Ok(fresh.inherit_from(current));
        }

        if self.config.silent_redirect_uri.is_some() {
            return Ok(self.sign_in_silently().await?.inherit_from(current));
        }

        Err(AuthError::SilentRenewalFailed(
            "No refresh token and no silent renewal channel".to_string(),
        ))
    }

    async fn sign_in_silently(&self) -> Result<TokenSet, AuthError> {
        let Some(silent_redirect_uri) = self.config.silent_redirect_uri.as_deref() else {
            return Err(AuthError::SilentRenewalFailed(
                "No silent redirect URI configured".to_string(),
            ));
        };

        let pending = PendingLogin::generate(None);
        let url = self.authorization_url_for(&pending, silent_redirect_uri, Some("none"));
        let params = silent_frame::authorize_in_hidden_frame(&url, silent_redirect_uri).await?;
        let code = params
            .into_code(Some(&pending.state))
            .map_err(|e| AuthError::SilentRenewalFailed(e.to_string()))?;
        self.exchange_code_with(&code, Some(&pending.code_verifier), silent_redirect_uri)
            .await
            .map_err(|e| AuthError::SilentRenewalFailed(e.to_string()))
    }
}
