//! Pages and wrappers for the authentication routes.

use dioxus::prelude::*;

use crate::client::guard::{self, GuardView};
use crate::client::navigator::{self, BrowserNavigator, Navigator, Route};
use crate::client::silent_frame;
use crate::client::use_auth::use_auth;

/// Blocking placeholder shown while the session settles.
#[component]
pub fn Spinner() -> Element {
    rsx! {
        div { class: "fixed inset-0 bg-black/30 flex items-center justify-center z-50",
            div { class: "animate-spin rounded-full h-16 w-16 border-4 border-white/25 border-t-white" }
        }
    }
}

/// Renders `children` only for an authenticated session.
///
/// While loading, only the spinner is shown. For unauthenticated visitors an
/// effect first lets the session try a silent sign-in against the provider,
/// then falls back to the login flow; nothing is redirected during rendering.
#[component]
pub fn AuthGuard(children: Element) -> Element {
    let auth = use_auth();

    use_effect(move || {
        let state = auth.state();
        let path = navigator::current_path().unwrap_or_else(|| "/".to_string());
        if let GuardView::Redirect(redirect) = guard::decide(&state, auth.guard_mode(), &path) {
            auth.follow(redirect);
        }
    });

    let path = navigator::current_path().unwrap_or_else(|| "/".to_string());
    match guard::decide(&auth.state(), auth.guard_mode(), &path) {
        GuardView::Render => children,
        GuardView::Placeholder | GuardView::Redirect(_) => rsx! { Spinner {} },
    }
}

/// `/login`: starts the provider login; signed-in users go straight home.
#[component]
pub fn LoginPage() -> Element {
    let auth = use_auth();

    use_effect(move || {
        if auth.is_authenticated() {
            BrowserNavigator.navigate(Route::HOME);
        }
    });

    if auth.is_loading() {
        return rsx! { Spinner {} };
    }

    rsx! {
        div { class: "min-h-screen bg-downy-50 flex items-center justify-center p-4",
            div { class: "bg-white p-8 rounded-lg shadow-lg max-w-md w-full",
                h1 { class: "text-2xl font-bold text-downy-900 mb-6 text-center",
                    "Welcome to Mealplanner"
                }
                button {
                    class: "w-full bg-downy-500 hover:bg-downy-600 text-white font-medium py-2 px-4 rounded-md transition-colors",
                    onclick: move |_| auth.login(None),
                    "Log in"
                }
            }
        }
    }
}

/// `/callback`: the session driver completes the login on boot.
#[component]
pub fn CallbackPage() -> Element {
    rsx! { Spinner {} }
}

/// `/silent-refresh`: hands the provider's answer to the parent window.
#[component]
pub fn SilentRefreshPage() -> Element {
    use_effect(|| {
        silent_frame::notify_parent_frame();
    });

    rsx! {}
}

/// Signs the user out.
#[component]
pub fn LogoutButton() -> Element {
    let auth = use_auth();

    rsx! {
        button {
            class: "px-4 py-2 bg-red-500 text-white rounded hover:bg-red-600",
            onclick: move |_| auth.logout(),
            "Logout"
        }
    }
}
