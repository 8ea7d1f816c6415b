//! Client configuration for the OIDC session and the Meal API.
//!
//! Configuration comes from one of two places:
//! - compile-time environment variables (see `build.rs`), read with `option_env!()`
//! - the runtime JSON document served next to the app, which uses the same
//!   uppercase keys (`API_BASE_URL`, `OIDC_AUTHORITY`, ...)

use serde::{Deserialize, Serialize};

use crate::client::refresher::RenewalPolicy;
use crate::error::AuthError;

/// Default scope; `offline_access` asks the provider for a refresh token.
pub const DEFAULT_SCOPE: &str = "openid profile email offline_access";

/// What the route guard does with an unauthenticated visitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// Navigate to the local `/login` page
    #[default]
    LoginPage,
    /// Start the interactive provider redirect right away
    ProviderRedirect,
}

/// OpenID Connect client settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OidcConfig {
    /// Issuer URL, e.g. `https://auth.example.com/application/o/mealplanner/`
    pub authority: String,

    /// Public client identifier
    pub client_id: String,

    /// Client secret for confidential clients.
    ///
    /// Only set this when the provider requires it for the code exchange;
    /// anything compiled into a browser bundle is public.
    pub client_secret: Option<String>,

    /// Where the provider sends the user back to (`/callback`)
    pub redirect_uri: String,

    /// Landing page for hidden-iframe renewal (`/silent-refresh`)
    pub silent_redirect_uri: Option<String>,

    /// Where the provider sends the user after end-session
    pub post_logout_redirect_uri: Option<String>,

    /// Space separated scopes
    pub scope: String,

    /// Schedule silent renewal ahead of token expiry
    pub automatic_silent_renew: bool,

    /// Renewal timing and retry budget
    #[serde(default)]
    pub renewal: RenewalPolicy,
}

impl OidcConfig {
    /// Creates a config with default scope and renewal settings.
    ///
    /// # Example
    ///
    /// ```
    /// # use mealplanner_auth::OidcConfig;
    /// let config = OidcConfig::new(
    ///     "https://auth.example.com/application/o/meals/".to_string(),
    ///     "meals-web".to_string(),
    ///     "https://meals.example.com/callback".to_string(),
    /// );
    /// assert!(config.client_secret.is_none());
    /// assert!(config.automatic_silent_renew);
    /// ```
    pub fn new(authority: String, client_id: String, redirect_uri: String) -> Self {
        Self {
            authority,
            client_id,
            client_secret: None,
            redirect_uri,
            silent_redirect_uri: None,
            post_logout_redirect_uri: None,
            scope: DEFAULT_SCOPE.to_string(),
            automatic_silent_renew: true,
            renewal: RenewalPolicy::default(),
        }
    }

    /// Sets the client secret used for the code exchange.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the hidden-iframe renewal landing page.
    pub fn with_silent_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.silent_redirect_uri = Some(uri.into());
        self
    }

    /// Sets the post-logout landing page.
    pub fn with_post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Authority without trailing slash.
    fn authority_base(&self) -> &str {
        self.authority.trim_end_matches('/')
    }

    /// Returns the discovery document URL.
    ///
    /// # Example
    ///
    /// ```
    /// # use mealplanner_auth::OidcConfig;
    /// let config = OidcConfig::new(
    ///     "https://auth.example.com/application/o/meals/".to_string(),
    ///     "meals-web".to_string(),
    ///     "https://meals.example.com/callback".to_string(),
    /// );
    /// assert_eq!(
    ///     config.discovery_url(),
    ///     "https://auth.example.com/application/o/meals/.well-known/openid-configuration"
    /// );
    /// ```
    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.authority_base())
    }

    /// Storage key for the persisted token set.
    ///
    /// Derived from authority and client id so that two environments served
    /// from the same origin never read each other's tokens.
    pub fn token_storage_key(&self) -> String {
        format!("oidc.user:{}:{}", self.authority, self.client_id)
    }

    /// Storage key for the pending interactive login request.
    pub fn login_storage_key(&self) -> String {
        format!("oidc.login:{}:{}", self.authority, self.client_id)
    }
}

/// Everything the web client needs: API location, OIDC client, guard behaviour.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the Meal API, e.g. `https://meals.example.com`
    pub api_base_url: String,

    /// Identity provider settings
    pub oidc: OidcConfig,

    /// Unauthenticated navigation policy
    #[serde(default)]
    pub guard_mode: GuardMode,
}

/// Runtime configuration document as served to the browser.
#[derive(Debug, Deserialize)]
struct RuntimeConfigDocument {
    #[serde(rename = "API_BASE_URL")]
    api_base_url: String,
    #[serde(rename = "OIDC_AUTHORITY")]
    authority: String,
    #[serde(rename = "OIDC_CLIENT_ID")]
    client_id: String,
    #[serde(rename = "OIDC_REDIRECT_URI")]
    redirect_uri: String,
    #[serde(rename = "OIDC_CLIENT_SECRET", default)]
    client_secret: Option<String>,
    #[serde(rename = "OIDC_SILENT_REDIRECT_URI", default)]
    silent_redirect_uri: Option<String>,
    #[serde(rename = "OIDC_POST_LOGOUT_URI", default)]
    post_logout_redirect_uri: Option<String>,
    #[serde(rename = "OIDC_SCOPE", default)]
    scope: Option<String>,
    #[serde(rename = "OIDC_GUARD_MODE", default)]
    guard_mode: Option<GuardMode>,
}

impl From<RuntimeConfigDocument> for ClientConfig {
    fn from(doc: RuntimeConfigDocument) -> Self {
        let mut oidc = OidcConfig::new(doc.authority, doc.client_id, doc.redirect_uri);
        oidc.client_secret = doc.client_secret;
        oidc.silent_redirect_uri = doc.silent_redirect_uri;
        oidc.post_logout_redirect_uri = doc.post_logout_redirect_uri;
        if let Some(scope) = doc.scope {
            oidc.scope = scope;
        }

        Self {
            api_base_url: doc.api_base_url,
            oidc,
            guard_mode: doc.guard_mode.unwrap_or_default(),
        }
    }
}

impl ClientConfig {
    /// Creates a config with the default guard mode.
    pub fn new(api_base_url: String, oidc: OidcConfig) -> Self {
        Self {
            api_base_url,
            oidc,
            guard_mode: GuardMode::default(),
        }
    }

    /// Loads the config from compile-time environment variables.
    ///
    /// Required: `API_BASE_URL`, `OIDC_AUTHORITY`, `OIDC_CLIENT_ID`,
    /// `OIDC_REDIRECT_URI`. Optional: `OIDC_CLIENT_SECRET`,
    /// `OIDC_SILENT_REDIRECT_URI`, `OIDC_POST_LOGOUT_URI`, `OIDC_SCOPE`.
    ///
    /// Returns `None` if any required variable was not set at compile time.
    pub fn from_env_client() -> Option<Self> {
        let api_base_url = option_env!("API_BASE_URL")?;
        let authority = option_env!("OIDC_AUTHORITY")?;
        let client_id = option_env!("OIDC_CLIENT_ID")?;
        let redirect_uri = option_env!("OIDC_REDIRECT_URI")?;

        let mut oidc = OidcConfig::new(
            authority.to_string(),
            client_id.to_string(),
            redirect_uri.to_string(),
        );
        oidc.client_secret = option_env!("OIDC_CLIENT_SECRET").map(str::to_string);
        oidc.silent_redirect_uri = option_env!("OIDC_SILENT_REDIRECT_URI").map(str::to_string);
        oidc.post_logout_redirect_uri = option_env!("OIDC_POST_LOGOUT_URI").map(str::to_string);
        if let Some(scope) = option_env!("OIDC_SCOPE") {
            oidc.scope = scope.to_string();
        }

        Some(Self::new(api_base_url.to_string(), oidc))
    }

    /// Parses the runtime configuration document.
    ///
    /// # Example
    ///
    /// ```
    /// # use mealplanner_auth::ClientConfig;
    /// let config = ClientConfig::from_json(r#"{
    ///     "API_BASE_URL": "https://meals.example.com",
    ///     "OIDC_AUTHORITY": "https://auth.example.com/application/o/meals/",
    ///     "OIDC_CLIENT_ID": "meals-web",
    ///     "OIDC_REDIRECT_URI": "https://meals.example.com/callback"
    /// }"#).unwrap();
    /// assert_eq!(config.oidc.client_id, "meals-web");
    /// ```
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let doc: RuntimeConfigDocument = serde_json::from_str(json)
            .map_err(|e| AuthError::Config(format!("Invalid runtime config: {e}")))?;
        Ok(doc.into())
    }

    /// Fetches and parses the runtime configuration document.
    pub async fn fetch(url: &str) -> Result<Self, AuthError> {
        tracing::trace!("Fetching runtime configuration from {}", url);
        let body = reqwest::get(url).await?.error_for_status()?.text().await?;
        Self::from_json(&body)
    }
}
