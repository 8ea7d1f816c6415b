//! Browser side of the session: OIDC flow, token storage, API client and
//! Dioxus integration.
//!
//! - [`token_store`] persists the token set under a key derived from
//!   authority and client id
//! - [`session`] is the pure state machine, [`driver`] runs its effects
//! - [`provider`] talks to the identity provider, [`refresher`] decides
//!   when to renew
//! - [`http_client`] attaches the bearer token and handles 401s,
//!   [`meals`] adds the typed Meal API calls
//! - [`guard`], [`use_auth`] and [`components`] wire it into the UI
//!
//! # Example
//!
//! ```rust,ignore
//! use mealplanner_auth::client::{AuthGuard, use_auth};
//!
//! #[component]
//! fn WeekView() -> Element {
//!     let auth = use_auth();
//!     let meals = use_resource(move || async move {
//!         let api = auth.api()?;
//!         api.week_meals(week_start(today())).await
//!     });
//!     rsx! { AuthGuard { /* ... */ } }
//! }
//! ```

pub mod callback;
pub mod clock;
pub mod components;
pub mod discovery;
pub mod driver;
pub mod guard;
pub mod http_client;
pub mod meals;
pub mod navigator;
pub mod pkce;
pub mod provider;
pub mod refresher;
pub mod session;
pub mod silent_frame;
pub mod token_store;
pub mod use_auth;

// Re-export commonly used types and functions
pub use components::{AuthGuard, CallbackPage, LoginPage, LogoutButton, SilentRefreshPage, Spinner};
pub use http_client::{ApiClient, NavigateOnce, UnauthorizedHandler};
pub use meals::{LabelConfig, Meal, MealSuggestion, MealType, week_start};
pub use navigator::Route;
pub use session::{SessionState, SessionInput};
pub use token_store::{TokenSet, TokenStore};
pub use use_auth::{AuthContext, use_auth, use_auth_provider};
