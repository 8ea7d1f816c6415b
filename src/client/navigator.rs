//! App routes and browser navigation.

/// Paths the authentication flow relies on.
pub struct Route;

impl Route {
    /// Local sign-in page
    pub const LOGIN: &'static str = "/login";
    /// Interactive redirect target
    pub const CALLBACK: &'static str = "/callback";
    /// Hidden-iframe renewal target
    pub const SILENT_REFRESH: &'static str = "/silent-refresh";
    /// Protected week view
    pub const HOME: &'static str = "/";
}

/// Performs navigation requested by the session driver.
pub trait Navigator {
    /// Moves to an app route without leaving the page.
    fn navigate(&self, path: &str);

    /// Leaves the app for an external URL (provider login or logout).
    fn redirect(&self, url: &str);
}

/// Navigation through `window.location` and `window.history`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserNavigator;

#[cfg(target_arch = "wasm32")]
impl Navigator for BrowserNavigator {
    fn navigate(&self, path: &str) {
        let Some(window) = web_sys::window() else {
            tracing::error!("Failed to get window for navigation to {}", path);
            return;
        };

        // Replace instead of push so the callback URL never stays in history
        let replaced = window.history().and_then(|history| {
            history.replace_state_with_url(&wasm_bindgen::JsValue::NULL, "", Some(path))
        });
        let notified = web_sys::Event::new("popstate")
            .and_then(|event| window.dispatch_event(&event));

        if replaced.is_err() || notified.is_err() {
            tracing::warn!("History update failed, reloading at {}", path);
            let _ = window.location().replace(path);
        } else {
            tracing::trace!("Navigated to {}", path);
        }
    }

    fn redirect(&self, url: &str) {
        tracing::trace!("Redirecting to {}", url);
        match web_sys::window() {
            Some(window) => {
                if window.location().set_href(url).is_err() {
                    tracing::error!("Failed to redirect to {}", url);
                }
            }
            None => tracing::error!("Failed to get window for redirect"),
        }
    }
}

/// Non-WASM stub.
#[cfg(not(target_arch = "wasm32"))]
impl Navigator for BrowserNavigator {
    fn navigate(&self, path: &str) {
        tracing::warn!("Navigation to {} not supported in non-WASM builds", path);
    }

    fn redirect(&self, url: &str) {
        tracing::warn!("Redirect to {} not supported in non-WASM builds", url);
    }
}

/// Current `pathname + search`, used as the return path of a login.
#[cfg(target_arch = "wasm32")]
pub fn current_path() -> Option<String> {
    let location = web_sys::window()?.location();
    let path = location.pathname().ok()?;
    let search = location.search().unwrap_or_default();
    Some(format!("{path}{search}"))
}

/// Non-WASM stub for current_path.
#[cfg(not(target_arch = "wasm32"))]
pub fn current_path() -> Option<String> {
    None
}

/// Full URL of the current page.
#[cfg(target_arch = "wasm32")]
pub fn current_url() -> Option<String> {
    web_sys::window()?.location().href().ok()
}

/// Non-WASM stub for current_url.
#[cfg(not(target_arch = "wasm32"))]
pub fn current_url() -> Option<String> {
    None
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNavigator;
    use super::*;

    #[test]
    fn test_routes() {
        assert_eq!(Route::LOGIN, "/login");
        assert_eq!(Route::CALLBACK, "/callback");
        assert_eq!(Route::SILENT_REFRESH, "/silent-refresh");
        assert_eq!(Route::HOME, "/");
    }

    #[test]
    fn test_recording_navigator_shares_log_between_clones() {
        let navigator = RecordingNavigator::default();
        let clone = navigator.clone();
        clone.navigate("/login");
        clone.redirect("https://auth.test.com/authorize");
        assert_eq!(navigator.navigations(), vec!["/login".to_string()]);
        assert_eq!(
            navigator.redirects(),
            vec!["https://auth.test.com/authorize".to_string()]
        );
    }

    #[test]
    fn test_native_stubs() {
        assert!(current_path().is_none());
        assert!(current_url().is_none());
        BrowserNavigator.navigate("/login");
    }
}
