//! # mealplanner-auth
//!
//! Authentication and session core of the Mealplanner web client.
//!
//! The app talks to an OpenID Connect provider (authorization code flow with
//! PKCE, optional client secret) and to the Meal API, which expects a bearer
//! token on every request. This crate owns everything in between:
//!
//! - **Token Store** - one JSON token set per (authority, client id) in
//!   browser storage
//! - **Session Manager** - a pure state machine
//!   (`Loading`, `ExchangingCode`, `Authenticated`, `Unauthenticated`) plus
//!   the driver that runs its effects
//! - **Token Refresher** - renewal ahead of expiry via refresh token or a
//!   hidden `prompt=none` iframe, with a bounded retry budget
//! - **HTTP Client** - attaches `Authorization: Bearer`, clears the session
//!   on 401
//! - **Route Guard** - placeholder while loading; silent sign-in, then the
//!   login redirect when signed out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dioxus::prelude::*;
//! use mealplanner_auth::ClientConfig;
//! use mealplanner_auth::client::{AuthGuard, CallbackPage, LoginPage, SilentRefreshPage, use_auth_provider};
//!
//! #[derive(Routable, Clone, PartialEq)]
//! enum Route {
//!     #[route("/")]
//!     Home {},
//!     #[route("/login")]
//!     Login {},
//!     #[route("/callback")]
//!     Callback {},
//!     #[route("/silent-refresh")]
//!     SilentRefresh {},
//! }
//!
//! #[component]
//! fn App() -> Element {
//!     let config = ClientConfig::from_env_client().expect("OIDC settings at build time");
//!     use_auth_provider(config);
//!     rsx! { Router::<Route> {} }
//! }
//!
//! #[component]
//! fn Home() -> Element {
//!     rsx! { AuthGuard { WeekView {} } }
//! }
//! ```
//!
//! ## Configuration
//!
//! `build.rs` reads `.env` (or `.env.example`) and exposes `API_BASE_URL`,
//! `OIDC_AUTHORITY`, `OIDC_CLIENT_ID`, `OIDC_REDIRECT_URI` and the optional
//! `OIDC_*` settings to [`ClientConfig::from_env_client`]. A `VITE_` prefix
//! is accepted for compatibility with existing env files. Alternatively
//! [`ClientConfig::fetch`] loads the same keys from a JSON document at
//! runtime.
//!
//! ## Platform Compatibility
//!
//! Browser-only pieces (`localStorage`, `window.location`, the renewal
//! iframe) are compiled for `wasm32` and replaced by logging stubs natively,
//! so the state machine, token store and HTTP client are tested with plain
//! `cargo test`.

pub mod config;
pub mod error;
pub mod user;

pub mod client;

pub use config::{ClientConfig, GuardMode, OidcConfig};
pub use error::{ApiError, AuthError};
pub use user::User;
