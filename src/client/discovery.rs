//! OpenID Connect discovery.
//!
//! Endpoints are read from `{authority}/.well-known/openid-configuration`
//! instead of being hard-coded per provider.

use serde::{Deserialize, Serialize};

use crate::OidcConfig;
use crate::error::AuthError;

/// Endpoints advertised by the identity provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Interactive and silent authorization
    pub authorization_endpoint: String,
    /// Code exchange and refresh
    pub token_endpoint: String,
    /// Profile lookup
    pub userinfo_endpoint: String,
    /// RP-initiated logout, if the provider supports it
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl ProviderMetadata {
    /// Downloads the discovery document for `config.authority`.
    pub async fn fetch(client: &reqwest::Client, config: &OidcConfig) -> Result<Self, AuthError> {
        let url = config.discovery_url();
        tracing::trace!("Fetching OIDC discovery document from {}", url);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Discovery(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| AuthError::Discovery(format!("Failed to parse discovery document: {e}")))?;

        tracing::trace!(
            "Discovered provider {} (end-session supported: {})",
            metadata.issuer,
            metadata.end_session_endpoint.is_some()
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> OidcConfig {
        OidcConfig::new(
            format!("{}/application/o/meals/", server.uri()),
            "meals-web".to_string(),
            "http://localhost:8080/callback".to_string(),
        )
    }

    #[tokio::test]
    async fn test_fetch_discovery_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/application/o/meals/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://auth.test.com/application/o/meals/",
                "authorization_endpoint": "https://auth.test.com/application/o/authorize/",
                "token_endpoint": "https://auth.test.com/application/o/token/",
                "userinfo_endpoint": "https://auth.test.com/application/o/userinfo/",
                "end_session_endpoint": "https://auth.test.com/application/o/meals/end-session/",
                "jwks_uri": "https://auth.test.com/application/o/meals/jwks/",
                "response_types_supported": ["code"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = ProviderMetadata::fetch(&reqwest::Client::new(), &config_for(&server))
            .await
            .unwrap();

        assert_eq!(
            metadata.token_endpoint,
            "https://auth.test.com/application/o/token/"
        );
        assert_eq!(
            metadata.end_session_endpoint.as_deref(),
            Some("https://auth.test.com/application/o/meals/end-session/")
        );
    }

    #[tokio::test]
    async fn test_fetch_without_end_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "i",
                "authorization_endpoint": "a",
                "token_endpoint": "t",
                "userinfo_endpoint": "u"
            })))
            .mount(&server)
            .await;

        let metadata = ProviderMetadata::fetch(&reqwest::Client::new(), &config_for(&server))
            .await
            .unwrap();
        assert!(metadata.end_session_endpoint.is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = ProviderMetadata::fetch(&reqwest::Client::new(), &config_for(&server)).await;
        assert!(matches!(result, Err(AuthError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_fetch_malformed_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = ProviderMetadata::fetch(&reqwest::Client::new(), &config_for(&server)).await;
        assert!(matches!(result, Err(AuthError::Discovery(_))));
    }
}
