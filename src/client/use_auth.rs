//! Dioxus integration: session context and the `use_auth` hook.
//!
//! [`use_auth_provider`] runs the session driver inside one coroutine for the
//! lifetime of the root component and publishes every state change into a
//! `Signal<SessionState>`. Everything below the root reads that signal and
//! talks to the driver by sending [`SessionInput`] messages.

use dioxus::prelude::*;

use crate::client::driver::{self, Lifetime, SessionDriver};
use crate::client::guard::GuardRedirect;
use crate::client::http_client::{ApiClient, UnauthorizedHandler};
use crate::client::navigator::{self, BrowserNavigator, Route};
use crate::client::provider::HttpIdentityProvider;
use crate::client::session::{SessionInput, SessionState};
use crate::client::token_store::TokenStore;
use crate::config::GuardMode;
use crate::error::ApiError;
use crate::{ClientConfig, User};

/// Token storage used by the web client.
#[cfg(target_arch = "wasm32")]
pub type BrowserStorage = crate::client::token_store::LocalStorage;

/// Token storage used by the web client.
#[cfg(not(target_arch = "wasm32"))]
pub type BrowserStorage = crate::client::token_store::MemoryStorage;

/// API client wired to the session.
pub type SessionApiClient = ApiClient<BrowserStorage, SessionUnauthorized>;

/// Ends the session when the API answers 401.
///
/// The session machine only navigates when it leaves `Authenticated`, so
/// repeated 401s lead to a single `/login` navigation.
#[derive(Clone, Copy)]
pub struct SessionUnauthorized(Coroutine<SessionInput>);

impl UnauthorizedHandler for SessionUnauthorized {
    fn on_unauthorized(&self) {
        self.0.send(SessionInput::SessionEnded);
    }
}

/// Provides the authentication context to the component tree.
///
/// Must be called once at the root of the app.
///
/// # Example
///
/// ```ignore
/// #[component]
/// pub fn App() -> Element {
///     let config = ClientConfig::from_env_client().expect("OIDC_* variables set at build time");
///     use_auth_provider(config);
///     rsx! { Router::<Route> {} }
/// }
/// ```
pub fn use_auth_provider(config: ClientConfig) -> AuthContext {
    let mut state = use_signal(SessionState::default);
    let config = use_signal(move || config);
    let lifetime = use_hook(Lifetime::new);

    let session = {
        let lifetime = lifetime.clone();
        use_coroutine(move |mut inputs: UnboundedReceiver<SessionInput>| {
            let oidc = config.peek().oidc.clone();
            let lifetime = lifetime.clone();
            async move {
                if navigator::current_path()
                    .is_some_and(|path| path.starts_with(Route::SILENT_REFRESH))
                {
                    // Inside the renewal iframe; the parent owns the session
                    return;
                }

                let Some((provider, replay)) = driver::connect_provider(
                    || HttpIdentityProvider::discover(oidc.clone()),
                    &mut inputs,
                    &BrowserNavigator,
                    || state.set(SessionState::Unauthenticated),
                )
                .await
                else {
                    return;
                };

                let mut driver = SessionDriver::new(
                    &oidc,
                    provider,
                    BrowserStorage::default(),
                    BrowserNavigator,
                )
                .with_lifetime(lifetime)
                .on_state_change(move |next| state.set(next.clone()));

                let url = navigator::current_url().unwrap_or_default();
                driver.boot(&url).await;
                if let Some(input) = replay {
                    driver.dispatch(input).await;
                }
                driver.run_until_closed(inputs).await;
            }
        })
    };

    use_drop(move || lifetime.end());

    let context = AuthContext {
        state,
        session,
        config,
    };
    use_context_provider(|| context)
}

/// Hook for reading the session and starting login or logout.
///
/// # Panics
///
/// Panics if called without `use_auth_provider()` being called in an ancestor component.
pub fn use_auth() -> AuthContext {
    use_context::<AuthContext>()
}

/// Context object returned by use_auth hook.
#[derive(Clone, Copy)]
pub struct AuthContext {
    state: Signal<SessionState>,
    session: Coroutine<SessionInput>,
    config: Signal<ClientConfig>,
}

impl AuthContext {
    /// Current session state; reading it subscribes the caller.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// True while the session is still initializing.
    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().is_authenticated()
    }

    /// Signed-in user, if any.
    pub fn user(&self) -> Option<User> {
        self.state.read().user().cloned()
    }

    /// Unauthenticated navigation policy.
    pub fn guard_mode(&self) -> GuardMode {
        self.config.read().guard_mode
    }

    /// Starts the interactive login, returning to `return_to` afterwards.
    pub fn login(&self, return_to: Option<String>) {
        self.session.send(SessionInput::LoginRequested { return_to });
    }

    /// Signs out locally and at the provider.
    pub fn logout(&self) {
        self.session.send(SessionInput::LogoutRequested);
    }

    /// Creates a Meal API client bound to this session.
    pub fn api(&self) -> Result<SessionApiClient, ApiError> {
        let config = self.config.read();
        ApiClient::new(
            &config.api_base_url,
            TokenStore::new(BrowserStorage::default(), &config.oidc),
            SessionUnauthorized(self.session),
        )
    }

    /// Hands a route guard redirect to the session, which tries silent
    /// sign-in before falling back to `redirect`.
    pub(crate) fn follow(&self, redirect: GuardRedirect) {
        self.session.send(SessionInput::SignInRequired(redirect));
    }
}

/// Provides a fixed session state without a driver behind it.
#[cfg(test)]
pub(crate) fn use_static_auth(session_state: SessionState) -> AuthContext {
    let state = use_signal(move || session_state);
    let config = use_signal(|| {
        ClientConfig::new(
            "http://localhost:5000".to_string(),
            crate::OidcConfig::new(
                "https://auth.test.com/application/o/meals/".to_string(),
                "meals-web".to_string(),
                "http://localhost:8080/callback".to_string(),
            ),
        )
    });
    let session = use_coroutine(|_inputs: UnboundedReceiver<SessionInput>| async {});
    use_context_provider(|| AuthContext {
        state,
        session,
        config,
    })
}
