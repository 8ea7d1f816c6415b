//! Route guard decision for protected pages.
//!
//! Kept free of UI code: the [`AuthGuard`](crate::client::components::AuthGuard)
//! component renders whatever [`decide`] returns and performs the redirect
//! from an effect.

use crate::config::GuardMode;
use crate::client::session::SessionState;

/// Where an unauthenticated visitor is sent once silent sign-in has failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardRedirect {
    /// The local `/login` page
    LoginPage,
    /// Straight to the provider, coming back to `return_to`
    ProviderLogin { return_to: String },
}

/// What a protected route shows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardView {
    /// Blocking placeholder; children are not rendered
    Placeholder,
    /// The protected children
    Render,
    /// Placeholder while leaving for the login flow
    Redirect(GuardRedirect),
}

/// Decides what the guard renders for `requested_path`.
pub fn decide(state: &SessionState, mode: GuardMode, requested_path: &str) -> GuardView {
    match state {
        SessionState::Loading | SessionState::ExchangingCode => GuardView::Placeholder,
        SessionState::Authenticated(_) => GuardView::Render,
        SessionState::Unauthenticated => GuardView::Redirect(match mode {
            GuardMode::LoginPage => GuardRedirect::LoginPage,
            GuardMode::ProviderRedirect => GuardRedirect::ProviderLogin {
                return_to: requested_path.to_string(),
            },
        }),
    }
}
