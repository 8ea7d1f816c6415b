//! Error types for the authentication core and the authenticated API client.
//!
//! Authentication errors never reach the UI: the session manager resolves
//! every [`AuthError`] into either `Authenticated` or `Unauthenticated`.
//! [`ApiError`] is what page code sees when a Meal API call fails.

use reqwest::StatusCode;

/// Errors raised while establishing or maintaining a session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Persisted token data could not be parsed
    #[error("Stored token data is corrupt: {0}")]
    StorageCorrupt(String),

    /// Token endpoint rejected the authorization code
    #[error("Authorization code exchange failed: {0}")]
    CodeExchangeFailed(String),

    /// Userinfo endpoint unreachable or returned garbage
    #[error("Failed to fetch user profile: {0}")]
    ProfileFetchFailed(String),

    /// Non-interactive renewal did not produce a new token set
    #[error("Silent renewal failed: {0}")]
    SilentRenewalFailed(String),

    /// An API call was rejected with 401
    #[error("Request was rejected as unauthorized")]
    Unauthorized,

    /// Callback `state` does not match the pending login request
    #[error("State parameter mismatch - possible CSRF attempt")]
    StateMismatch,

    /// Provider returned an OAuth error body or redirect error
    #[error("Identity provider error: {error}: {}", description.as_deref().unwrap_or_default())]
    Provider {
        /// OAuth error code, e.g. `invalid_grant` or `login_required`
        error: String,
        /// Optional human readable description
        description: Option<String>,
    },

    /// Discovery document could not be fetched or parsed
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Errors returned by [`ApiClient`](crate::client::http_client::ApiClient).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The API answered 401; the session has already been cleared
    #[error("Unauthorized - session cleared")]
    Unauthorized,

    /// Any other non-success status
    #[error("API returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: StatusCode,
        /// Response body, possibly empty
        body: String,
    },

    /// Transport failure
    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body was not the expected JSON
    #[error("Failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The URL could not be built from the configured base
    #[error("Invalid API URL: {0}")]
    Url(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display_with_description() {
        let err = AuthError::Provider {
            error: "invalid_grant".to_string(),
            description: Some("Code expired".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Identity provider error: invalid_grant: Code expired"
        );
    }

    #[test]
    fn test_provider_error_display_without_description() {
        let err = AuthError::Provider {
            error: "login_required".to_string(),
            description: None,
        };
        assert_eq!(err.to_string(), "Identity provider error: login_required: ");
    }

    #[test]
    fn test_api_status_error_display() {
        let err = ApiError::Status {
            status: StatusCode::BAD_REQUEST,
            body: "missing start_date".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "API returned 400 Bad Request: missing start_date"
        );
    }
}
