//! Authentication session state machine.
//!
//! [`SessionMachine::handle`] is pure: it takes one [`SessionInput`] and the
//! current time, updates the in-memory session and returns the [`Effect`]s
//! to execute. Network calls, storage writes and redirects all happen in the
//! [`SessionDriver`](crate::client::driver::SessionDriver), which feeds their
//! results back in as further inputs.
//!
//! ```text
//!            Boot
//!  Loading ───────────────► Authenticated ◄──┐
//!     │  code in URL              │          │ Renewed(Ok)
//!     ▼                           │ logout / 401 / expiry / renewal exhausted
//!  ExchangingCode ──────────►     ▼
//!                          Unauthenticated ──► silent sign-in, then login
//! ```
//!
//! Results are only accepted while the machine is waiting for them, which
//! makes late or duplicate results harmless. An `Authenticated` session never
//! outlives its access token: every token set arms an expiry timer, and a
//! renewal that cannot finish before expiry ends the session.

use crate::OidcConfig;
use crate::User;
use crate::client::callback::CallbackParams;
use crate::client::guard::GuardRedirect;
use crate::client::navigator::Route;
use crate::client::pkce::PendingLogin;
use crate::client::refresher::{RenewalVerdict, TokenRefresher};
use crate::client::token_store::TokenSet;
use crate::error::AuthError;

/// Observable authentication state.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SessionState {
    /// Initialization has not settled yet
    #[default]
    Loading,
    /// An authorization code from the callback is being exchanged
    ExchangingCode,
    /// Valid tokens and a profile are held
    Authenticated(User),
    /// No session
    Unauthenticated,
}

impl SessionState {
    /// True while the route guard must keep showing the placeholder.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading | Self::ExchangingCode)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Signed-in user, if any.
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

/// Events fed into the machine.
#[derive(Debug)]
pub enum SessionInput {
    /// Page load: what storage and the current URL contain
    Boot {
        /// Persisted token set, if any
        stored: Option<TokenSet>,
        /// Provider redirect parameters, if the URL is a callback
        callback: Option<CallbackParams>,
        /// Login request started before the redirect
        pending: Option<PendingLogin>,
    },
    /// Result of [`Effect::ExchangeCode`]
    CodeExchanged(Result<TokenSet, AuthError>),
    /// Result of [`Effect::FetchProfile`]
    ProfileLoaded(Result<User, AuthError>),
    /// The renewal timer fired
    RenewalDue,
    /// The expiry timer fired
    TokenExpired,
    /// Result of [`Effect::RenewSilently`] or [`Effect::SignInSilently`]
    Renewed(Result<TokenSet, AuthError>),
    /// The Meal API answered 401
    SessionEnded,
    /// A protected route was opened without a session; `fallback` is where
    /// to go once silent sign-in is ruled out
    SignInRequired(GuardRedirect),
    /// User asked to sign out
    LogoutRequested,
    /// User asked to sign in
    LoginRequested {
        /// Path to come back to afterwards
        return_to: Option<String>,
    },
}

/// Side effects requested by the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Exchange an authorization code at the token endpoint
    ExchangeCode {
        code: String,
        code_verifier: Option<String>,
    },
    /// Load the userinfo profile
    FetchProfile { access_token: String },
    /// Obtain fresh tokens without user interaction
    RenewSilently { tokens: TokenSet },
    /// Try the provider session with `prompt=none`
    SignInSilently,
    /// Write the token set to storage
    PersistTokens(TokenSet),
    /// Remove the token set from storage
    ClearTokens,
    /// Arm the renewal timer for this Unix timestamp
    ScheduleRenewal { at: u64 },
    /// Arm the expiry timer for this Unix timestamp
    ScheduleExpiry { at: u64 },
    /// Disarm the renewal and expiry timers
    CancelTimers,
    /// Client-side navigation to an app route
    Navigate(String),
    /// Start the interactive authorization redirect
    BeginLogin { return_to: Option<String> },
    /// Leave the app for the provider's end-session endpoint
    EndProviderSession { id_token_hint: Option<String> },
}

/// Result the machine is currently waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Awaiting {
    Nothing,
    Exchange,
    Profile,
    BootRenewal,
    Renewal,
    SilentSignIn,
}

/// The session state machine.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    awaiting: Awaiting,
    booted: bool,
    tokens: Option<TokenSet>,
    /// Set while a callback is being completed; where to go afterwards
    callback_return: Option<String>,
    refresher: TokenRefresher,
    automatic_silent_renew: bool,
    /// Silent sign-in runs at most once per page lifetime
    silent_sign_in_tried: bool,
}

impl SessionMachine {
    pub fn new(config: &OidcConfig) -> Self {
        Self {
            state: SessionState::Loading,
            awaiting: Awaiting::Nothing,
            booted: false,
            tokens: None,
            callback_return: None,
            refresher: TokenRefresher::new(config.renewal.clone()),
            automatic_silent_renew: config.automatic_silent_renew,
            silent_sign_in_tried: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Tokens of the current or pending session.
    pub fn tokens(&self) -> Option<&TokenSet> {
        self.tokens.as_ref()
    }

    /// Applies one input and returns the effects to run, in order.
    pub fn handle(&mut self, input: SessionInput, now: u64) -> Vec<Effect> {
        match input {
            SessionInput::Boot {
                stored,
                callback,
                pending,
            } => self.boot(stored, callback, pending, now),
            SessionInput::CodeExchanged(result) => self.code_exchanged(result),
            SessionInput::ProfileLoaded(result) => self.profile_loaded(result, now),
            SessionInput::RenewalDue => self.renewal_due(now),
            SessionInput::TokenExpired => self.token_expired(now),
            SessionInput::Renewed(result) => self.renewed(result, now),
            SessionInput::SessionEnded => self.session_ended(),
            SessionInput::SignInRequired(fallback) => self.sign_in_required(fallback),
            SessionInput::LogoutRequested => self.logout(),
            SessionInput::LoginRequested { return_to } => self.login(return_to),
        }
    }

    fn boot(
        &mut self,
        stored: Option<TokenSet>,
        callback: Option<CallbackParams>,
        pending: Option<PendingLogin>,
        now: u64,
    ) -> Vec<Effect> {
        if self.booted {
            tracing::warn!("Ignoring repeated session boot");
            return Vec::new();
        }
        self.booted = true;

        if let Some(tokens) = stored.as_ref().filter(|t| !t.is_expired_at(now)) {
            tracing::trace!("Restoring session from stored tokens");
            if callback.is_some() {
                // Already signed in; just leave the callback URL
                self.callback_return = Some(Self::return_path(pending.and_then(|p| p.return_to)));
            }
            let access_token = tokens.access_token.clone();
            self.tokens = stored;
            self.awaiting = Awaiting::Profile;
            return vec![Effect::FetchProfile { access_token }];
        }

        if let Some(callback) = callback {
            let (expected_state, code_verifier, return_to) = match pending {
                Some(p) => (Some(p.state), Some(p.code_verifier), p.return_to),
                None => (None, None, None),
            };

            return match callback.into_code(expected_state.as_deref()) {
                Ok(code) => {
                    tracing::trace!("Authorization code received, exchanging");
                    self.state = SessionState::ExchangingCode;
                    self.awaiting = Awaiting::Exchange;
                    self.callback_return = Some(Self::return_path(return_to));
                    vec![Effect::ExchangeCode {
                        code,
                        code_verifier,
                    }]
                }
                Err(e) => {
                    tracing::error!("Rejected authorization callback: {}", e);
                    self.state = SessionState::Unauthenticated;
                    vec![Effect::ClearTokens, Effect::Navigate(Route::LOGIN.to_string())]
                }
            };
        }

        if let Some(expired) = stored {
            tracing::trace!("Stored tokens expired, attempting one silent renewal");
            self.tokens = Some(expired.clone());
            self.awaiting = Awaiting::BootRenewal;
            return vec![Effect::RenewSilently { tokens: expired }];
        }

        tracing::trace!("No stored session");
        self.state = SessionState::Unauthenticated;
        Vec::new()
    }

    fn code_exchanged(&mut self, result: Result<TokenSet, AuthError>) -> Vec<Effect> {
        if self.awaiting != Awaiting::Exchange {
            tracing::trace!("Ignoring unexpected code exchange result");
            return Vec::new();
        }

        match result {
            Ok(tokens) => {
                let access_token = tokens.access_token.clone();
                self.tokens = Some(tokens.clone());
                self.awaiting = Awaiting::Profile;
                vec![
                    Effect::PersistTokens(tokens),
                    Effect::FetchProfile { access_token },
                ]
            }
            Err(e) => {
                tracing::error!("Failed to exchange code for tokens: {}", e);
                self.reset(SessionState::Unauthenticated);
                vec![Effect::ClearTokens, Effect::Navigate(Route::LOGIN.to_string())]
            }
        }
    }

    fn profile_loaded(&mut self, result: Result<User, AuthError>, now: u64) -> Vec<Effect> {
        if self.awaiting != Awaiting::Profile {
            tracing::trace!("Ignoring unexpected profile result");
            return Vec::new();
        }

        let user = match result {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("{}", e);
                return self.profile_failed();
            }
        };
        let Some(mut effects) = self
            .tokens
            .as_ref()
            .filter(|tokens| !tokens.is_expired_at(now))
            .map(|tokens| self.timers(tokens, now))
        else {
            return self.profile_failed();
        };

        tracing::trace!("Session established for {}", user.id);
        self.state = SessionState::Authenticated(user);
        self.awaiting = Awaiting::Nothing;
        self.refresher.record_success();

        if let Some(path) = self.callback_return.take() {
            effects.push(Effect::Navigate(path));
        }
        effects
    }

    fn profile_failed(&mut self) -> Vec<Effect> {
        let from_callback = self.callback_return.is_some();
        self.reset(SessionState::Unauthenticated);
        let mut effects = vec![Effect::ClearTokens];
        if from_callback {
            effects.push(Effect::Navigate(Route::LOGIN.to_string()));
        }
        effects
    }

    fn renewal_due(&mut self, now: u64) -> Vec<Effect> {
        if !self.state.is_authenticated() || self.awaiting != Awaiting::Nothing {
            return Vec::new();
        }
        match self.tokens.clone() {
            // Timer fired late, e.g. in a background tab
            Some(tokens) if tokens.is_expired_at(now) => self.expire(),
            Some(tokens) => {
                self.awaiting = Awaiting::Renewal;
                vec![Effect::RenewSilently { tokens }]
            }
            None => Vec::new(),
        }
    }

    fn token_expired(&mut self, now: u64) -> Vec<Effect> {
        let expired = self
            .tokens
            .as_ref()
            .is_none_or(|tokens| tokens.is_expired_at(now));
        if !self.state.is_authenticated() || !expired {
            // Stale timer from a token set that has since been replaced
            return Vec::new();
        }
        self.expire()
    }

    fn expire(&mut self) -> Vec<Effect> {
        tracing::warn!("Access token expired, ending session");
        self.reset(SessionState::Unauthenticated);
        vec![Effect::ClearTokens, Effect::CancelTimers]
    }

    fn renewed(&mut self, result: Result<TokenSet, AuthError>, now: u64) -> Vec<Effect> {
        match (self.awaiting, result) {
            (Awaiting::BootRenewal | Awaiting::SilentSignIn, Ok(tokens)) => {
                let access_token = tokens.access_token.clone();
                self.tokens = Some(tokens.clone());
                self.awaiting = Awaiting::Profile;
                vec![
                    Effect::PersistTokens(tokens),
                    Effect::FetchProfile { access_token },
                ]
            }
            (Awaiting::BootRenewal, Err(e)) => {
                tracing::warn!("{}", e);
                self.reset(SessionState::Unauthenticated);
                vec![Effect::ClearTokens]
            }
            (Awaiting::SilentSignIn, Err(e)) => {
                tracing::trace!("Silent sign-in failed: {}", e);
                self.reset(SessionState::Unauthenticated);
                Vec::new()
            }
            (Awaiting::Renewal, Ok(tokens)) => {
                tracing::trace!("Access token renewed");
                self.refresher.record_success();
                self.awaiting = Awaiting::Nothing;
                let mut effects = vec![Effect::PersistTokens(tokens.clone())];
                effects.extend(self.timers(&tokens, now));
                self.tokens = Some(tokens);
                effects
            }
            (Awaiting::Renewal, Err(e)) => {
                tracing::warn!("{}", e);
                self.awaiting = Awaiting::Nothing;
                let expires_at = self.tokens.as_ref().map_or(now, |tokens| tokens.expires_at);
                match self.refresher.record_failure(now) {
                    RenewalVerdict::RetryAt(at) if at < expires_at => {
                        vec![Effect::ScheduleRenewal { at }]
                    }
                    RenewalVerdict::RetryAt(_) => {
                        tracing::warn!("No silent renewal attempt left before expiry");
                        self.escalate()
                    }
                    RenewalVerdict::Exhausted => self.escalate(),
                }
            }
            _ => {
                tracing::trace!("Ignoring unexpected renewal result");
                Vec::new()
            }
        }
    }

    fn escalate(&mut self) -> Vec<Effect> {
        self.reset(SessionState::Unauthenticated);
        vec![
            Effect::ClearTokens,
            Effect::CancelTimers,
            Effect::BeginLogin { return_to: None },
        ]
    }

    fn session_ended(&mut self) -> Vec<Effect> {
        if !self.state.is_authenticated() {
            return Vec::new();
        }
        tracing::trace!("Session rejected by the API");
        self.reset(SessionState::Unauthenticated);
        vec![
            Effect::ClearTokens,
            Effect::CancelTimers,
            Effect::Navigate(Route::LOGIN.to_string()),
        ]
    }

    fn sign_in_required(&mut self, fallback: GuardRedirect) -> Vec<Effect> {
        if self.state != SessionState::Unauthenticated {
            return Vec::new();
        }
        if !self.silent_sign_in_tried {
            tracing::trace!("Trying silent sign-in");
            self.silent_sign_in_tried = true;
            self.state = SessionState::Loading;
            self.awaiting = Awaiting::SilentSignIn;
            return vec![Effect::SignInSilently];
        }
        match fallback {
            GuardRedirect::LoginPage => vec![Effect::Navigate(Route::LOGIN.to_string())],
            GuardRedirect::ProviderLogin { return_to } => vec![Effect::BeginLogin {
                return_to: Some(return_to),
            }],
        }
    }

    fn logout(&mut self) -> Vec<Effect> {
        // The provider session may outlive the logout
        self.silent_sign_in_tried = true;
        match self.state {
            SessionState::Authenticated(_) => {
                tracing::trace!("Signing out");
                let id_token_hint = self.tokens.as_ref().and_then(|t| t.id_token.clone());
                self.reset(SessionState::Unauthenticated);
                vec![
                    Effect::ClearTokens,
                    Effect::CancelTimers,
                    Effect::EndProviderSession { id_token_hint },
                ]
            }
            SessionState::Loading | SessionState::ExchangingCode if self.booted => {
                self.reset(SessionState::Unauthenticated);
                vec![Effect::ClearTokens, Effect::CancelTimers]
            }
            _ => vec![Effect::ClearTokens],
        }
    }

    fn login(&mut self, return_to: Option<String>) -> Vec<Effect> {
        match self.state {
            SessionState::Authenticated(_) => vec![Effect::Navigate(Self::return_path(return_to))],
            SessionState::Unauthenticated => vec![Effect::BeginLogin { return_to }],
            SessionState::Loading | SessionState::ExchangingCode => {
                tracing::trace!("Ignoring login request while session is loading");
                Vec::new()
            }
        }
    }

    fn timers(&self, tokens: &TokenSet, now: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.automatic_silent_renew {
            effects.push(Effect::ScheduleRenewal {
                at: self.refresher.renewal_at(tokens, now),
            });
        }
        effects.push(Effect::ScheduleExpiry {
            at: tokens.expires_at,
        });
        effects
    }

    fn reset(&mut self, state: SessionState) {
        self.state = state;
        self.awaiting = Awaiting::Nothing;
        self.tokens = None;
        self.callback_return = None;
        self.refresher.record_success();
    }

    fn return_path(return_to: Option<String>) -> String {
        return_to
            .filter(|path| path.starts_with('/') && !path.starts_with("//"))
            .unwrap_or_else(|| Route::HOME.to_string())
    }
}
