//! Parsing of the provider redirect back to `/callback` or `/silent-refresh`.

use url::Url;

use crate::error::AuthError;

/// Query parameters the provider appends to the redirect URI.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// State echoed back by the provider
    pub state: Option<String>,
    /// OAuth error code, e.g. `access_denied` or `login_required`
    pub error: Option<String>,
    /// Error description, if any
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Extracts callback parameters from an absolute or path-relative URL.
    ///
    /// Returns `None` when the URL carries neither a code nor an error, i.e.
    /// it is not a provider redirect at all.
    pub fn from_url(url: &str) -> Option<Self> {
        Self::from_parsed(&parse(url)?)
    }

    /// Like [`from_url`](Self::from_url), but only for URLs whose path is
    /// exactly `route`.
    pub fn from_route_url(url: &str, route: &str) -> Option<Self> {
        let parsed = parse(url)?;
        if parsed.path() != route {
            return None;
        }
        Self::from_parsed(&parsed)
    }

    fn from_parsed(url: &Url) -> Option<Self> {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }

        (params.code.is_some() || params.error.is_some()).then_some(params)
    }

    /// Consumes the parameters and returns the authorization code.
    ///
    /// `expected_state` is the state of the pending login request, if one was
    /// stored. The echoed state must match it exactly; both being absent
    /// counts as a match.
    pub fn into_code(self, expected_state: Option<&str>) -> Result<String, AuthError> {
        if let Some(error) = self.error {
            return Err(AuthError::Provider {
                error,
                description: self.error_description,
            });
        }

        if self.state.as_deref() != expected_state {
            tracing::error!(
                "State mismatch - expected: {:?}, received: {:?}",
                expected_state,
                self.state
            );
            return Err(AuthError::StateMismatch);
        }

        self.code
            .ok_or_else(|| AuthError::CodeExchangeFailed("Callback carried no code".to_string()))
    }
}

fn parse(url: &str) -> Option<Url> {
    Url::parse(url)
        .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(url)))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_absolute_url() {
        let params =
            CallbackParams::from_url("http://localhost:8080/callback?code=XYZ&state=abc").unwrap();
        assert_eq!(params.code.as_deref(), Some("XYZ"));
        assert_eq!(params.state.as_deref(), Some("abc"));
        assert!(params.error.is_none());
    }

    #[test]
    fn test_from_relative_url() {
        let params = CallbackParams::from_url("/callback?code=XYZ").unwrap();
        assert_eq!(params.code.as_deref(), Some("XYZ"));
        assert!(params.state.is_none());
    }

    #[test]
    fn test_from_url_decodes_values() {
        let params = CallbackParams::from_url(
            "/silent-refresh?error=login_required&error_description=User%20must%20log%20in",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("login_required"));
        assert_eq!(
            params.error_description.as_deref(),
            Some("User must log in")
        );
    }

    #[test]
    fn test_from_url_without_callback_params() {
        assert!(CallbackParams::from_url("http://localhost:8080/?week=12").is_none());
        assert!(CallbackParams::from_url("/login").is_none());
    }

    #[test]
    fn test_from_route_url_checks_path() {
        let params =
            CallbackParams::from_route_url("http://localhost:8080/callback?code=XYZ", "/callback")
                .unwrap();
        assert_eq!(params.code.as_deref(), Some("XYZ"));

        assert!(CallbackParams::from_route_url("http://localhost:8080/?code=XYZ", "/callback").is_none());
        assert!(CallbackParams::from_route_url("/meals?error=access_denied", "/callback").is_none());
        assert!(CallbackParams::from_route_url("/callback/extra?code=XYZ", "/callback").is_none());
    }

    #[test]
    fn test_into_code_without_state() {
        let params = CallbackParams::from_url("/callback?code=XYZ").unwrap();
        assert_eq!(params.into_code(None).unwrap(), "XYZ");
    }

    #[test]
    fn test_into_code_matching_state() {
        let params = CallbackParams::from_url("/callback?code=XYZ&state=abc").unwrap();
        assert_eq!(params.into_code(Some("abc")).unwrap(), "XYZ");
    }

    #[test]
    fn test_into_code_state_mismatch() {
        let params = CallbackParams::from_url("/callback?code=XYZ&state=evil").unwrap();
        assert!(matches!(
            params.into_code(Some("abc")),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_into_code_unexpected_state() {
        let params = CallbackParams::from_url("/callback?code=XYZ&state=abc").unwrap();
        assert!(matches!(params.into_code(None), Err(AuthError::StateMismatch)));
    }

    #[test]
    fn test_into_code_missing_state() {
        let params = CallbackParams::from_url("/callback?code=XYZ").unwrap();
        assert!(matches!(
            params.into_code(Some("abc")),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_into_code_provider_error() {
        let params = CallbackParams::from_url("/callback?error=access_denied&state=abc").unwrap();
        match params.into_code(Some("abc")) {
            Err(AuthError::Provider { error, description }) => {
                assert_eq!(error, "access_denied");
                assert!(description.is_none());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
