//! Authenticated HTTP client for the Meal API.
//!
//! Every request reads the token store right before it is sent, so tokens
//! renewed in the background are picked up without rebuilding the client.
//! A 401 answer clears the store and hands control to an
//! [`UnauthorizedHandler`]; the request itself is never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::client::clock;
use crate::client::navigator::{Navigator, Route};
use crate::client::token_store::{StorageBackend, TokenStore};
use crate::error::ApiError;

/// Reacts to a 401 from the API after the token store was cleared.
pub trait UnauthorizedHandler {
    fn on_unauthorized(&self);
}

impl<F: Fn()> UnauthorizedHandler for F {
    fn on_unauthorized(&self) {
        self()
    }
}

/// Navigates to `/login` on the first 401 only.
///
/// Clones share the latch; call [`reset`](Self::reset) once a new session
/// is established.
#[derive(Clone, Debug)]
pub struct NavigateOnce<N> {
    navigator: N,
    fired: Arc<AtomicBool>,
}

impl<N: Navigator> NavigateOnce<N> {
    pub fn new(navigator: N) -> Self {
        Self {
            navigator,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Re-arms the latch.
    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl<N: Navigator> UnauthorizedHandler for NavigateOnce<N> {
    fn on_unauthorized(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            tracing::trace!("Unauthorized, redirecting to login");
            self.navigator.navigate(Route::LOGIN);
        }
    }
}

/// HTTP client that attaches the stored access token.
#[derive(Clone, Debug)]
pub struct ApiClient<S, H> {
    client: reqwest::Client,
    base_url: Url,
    store: TokenStore<S>,
    on_unauthorized: H,
}

impl<S, H> ApiClient<S, H>
where
    S: StorageBackend,
    H: UnauthorizedHandler,
{
    /// Creates a client for the API at `base_url`.
    pub fn new(base_url: &str, store: TokenStore<S>, on_unauthorized: H) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            store,
            on_unauthorized,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn store(&self) -> &TokenStore<S> {
        &self.store
    }

    /// Resolves an API path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Starts a request, with the bearer token when a valid one is stored.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let builder = self.client.request(method, self.url(path)?);
        Ok(match self.store.valid_access_token(clock::now()) {
            Some(token) => builder.bearer_auth(token),
            None => {
                tracing::trace!("No valid access token - sending unauthenticated request");
                builder
            }
        })
    }

    /// Sends the request and maps error statuses.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("API rejected request as unauthorized: {}", response.url());
            self.store.clear();
            self.on_unauthorized.on_unauthorized();
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        Ok(response)
    }

    /// GET `path` with query parameters and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let builder = self.request(Method::GET, path)?.query(query);
        let response = self.send(builder).await?;
        Self::decode(response).await
    }

    /// POST a JSON body to `path` and decode the JSON answer.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let builder = self.request(Method::POST, path)?.json(body);
        let response = self.send(builder).await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
