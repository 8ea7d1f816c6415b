//! Hidden-iframe renewal for sessions without a refresh token.
//!
//! The parent page loads the authorization endpoint with `prompt=none` in an
//! invisible iframe. The provider redirects the frame to `/silent-refresh`,
//! whose page calls [`notify_parent_frame`] to post its full URL back. The
//! parent then parses the code out of it like a normal callback.

use std::time::Duration;

use crate::client::callback::CallbackParams;
use crate::error::AuthError;

/// How long the provider gets to answer inside the frame.
pub const SILENT_RENEW_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(target_arch = "wasm32")]
fn renewal_failed(reason: impl std::fmt::Display) -> AuthError {
    AuthError::SilentRenewalFailed(reason.to_string())
}

/// Loads `authorize_url` in a hidden iframe and waits for the redirect to
/// `silent_redirect_uri` to be posted back.
#[cfg(target_arch = "wasm32")]
pub async fn authorize_in_hidden_frame(
    authorize_url: &str,
    silent_redirect_uri: &str,
) -> Result<CallbackParams, AuthError> {
    use std::cell::RefCell;
    use std::rc::Rc;

    use futures::channel::oneshot;
    use futures::future::{self, Either};
    use wasm_bindgen::JsCast;
    use wasm_bindgen::closure::Closure;

    use crate::client::clock;

    let window = web_sys::window().ok_or_else(|| renewal_failed("No window"))?;
    let document = window
        .document()
        .ok_or_else(|| renewal_failed("No document"))?;
    let body = document.body().ok_or_else(|| renewal_failed("No body"))?;
    let origin = window
        .location()
        .origin()
        .map_err(|e| renewal_failed(format!("{e:?}")))?;

    let frame: web_sys::HtmlIFrameElement = document
        .create_element("iframe")
        .map_err(|e| renewal_failed(format!("{e:?}")))?
        .dyn_into()
        .map_err(|_| renewal_failed("Created element is not an iframe"))?;
    let _ = frame.set_attribute("style", "display:none");
    let _ = frame.set_attribute("aria-hidden", "true");

    let (tx, rx) = oneshot::channel::<String>();
    let tx = Rc::new(RefCell::new(Some(tx)));
    let expected_prefix = silent_redirect_uri.to_string();
    let listener = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(
        move |event: web_sys::MessageEvent| {
            if event.origin() != origin {
                return;
            }
            let Some(url) = event.data().as_string() else {
                return;
            };
            if !url.starts_with(&expected_prefix) {
                return;
            }
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send(url);
            }
        },
    );

    window
        .add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())
        .map_err(|e| renewal_failed(format!("{e:?}")))?;

    frame.set_src(authorize_url);
    let appended = body.append_child(&frame);

    let outcome = match appended {
        Ok(_) => {
            tracing::trace!("Silent renewal frame loading");
            Some(future::select(rx, Box::pin(clock::sleep(SILENT_RENEW_TIMEOUT))).await)
        }
        Err(e) => {
            tracing::error!("Failed to attach silent renewal frame: {:?}", e);
            None
        }
    };

    let _ = window.remove_event_listener_with_callback("message", listener.as_ref().unchecked_ref());
    frame.remove();
    drop(listener);

    match outcome {
        Some(Either::Left((Ok(url), _))) => CallbackParams::from_url(&url)
            .ok_or_else(|| renewal_failed("Silent renewal response carried no code")),
        Some(Either::Left((Err(_), _))) => Err(renewal_failed("Silent renewal channel closed")),
        Some(Either::Right(_)) => Err(renewal_failed(format!(
            "No answer within {}s",
            SILENT_RENEW_TIMEOUT.as_secs()
        ))),
        None => Err(renewal_failed("Could not attach iframe")),
    }
}

/// Posts the current URL to the parent window.
///
/// Called by the `/silent-refresh` page. Returns false when the page is not
/// running inside a frame.
#[cfg(target_arch = "wasm32")]
pub fn notify_parent_frame() -> bool {
    let Some(window) = web_sys::window() else {
        return false;
    };
    let Ok(Some(parent)) = window.parent() else {
        return false;
    };
    let location = window.location();
    let (Ok(href), Ok(origin)) = (location.href(), location.origin()) else {
        return false;
    };

    match parent.post_message(&wasm_bindgen::JsValue::from_str(&href), &origin) {
        Ok(()) => {
            tracing::trace!("Posted silent renewal result to parent frame");
            true
        }
        Err(e) => {
            tracing::error!("Failed to post to parent frame: {:?}", e);
            false
        }
    }
}

/// Non-WASM stub for notify_parent_frame.
#[cfg(not(target_arch = "wasm32"))]
pub fn notify_parent_frame() -> bool {
    tracing::warn!("Silent renewal frames not supported in non-WASM builds");
    false
}

/// Non-WASM stub for authorize_in_hidden_frame.
#[cfg(not(target_arch = "wasm32"))]
pub async fn authorize_in_hidden_frame(
    _authorize_url: &str,
    _silent_redirect_uri: &str,
) -> Result<CallbackParams, AuthError> {
    Err(AuthError::SilentRenewalFailed(
        "Silent renewal frames not supported in non-WASM builds".to_string(),
    ))
}
