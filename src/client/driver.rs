//! Effect runner for the session state machine.
//!
//! The driver owns the [`SessionMachine`] together with everything its
//! effects need: the identity provider, the token store and a navigator. It
//! feeds each input to the machine, executes the returned effects in order
//! and loops provider results back in until the machine settles.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{self, Either};
use futures::{Stream, StreamExt};

use crate::OidcConfig;
use crate::client::callback::CallbackParams;
use crate::client::clock;
use crate::client::navigator::{Navigator, Route};
use crate::client::pkce::PendingLogin;
use crate::client::provider::IdentityProvider;
use crate::client::session::{Effect, SessionInput, SessionMachine, SessionState};
use crate::client::token_store::{StorageBackend, TokenStore};
use crate::error::AuthError;

/// Liveness flag shared with the component that owns the driver.
///
/// Once ended, results of in-flight provider calls are dropped and no state
/// is published anymore.
#[derive(Clone, Debug)]
pub struct Lifetime(Arc<AtomicBool>);

impl Lifetime {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Ends the lifetime for every clone.
    pub fn end(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

type StateListener = Box<dyn FnMut(&SessionState)>;

/// Runs the session for one page lifetime.
pub struct SessionDriver<P, S, N> {
    machine: SessionMachine,
    provider: P,
    store: TokenStore<S>,
    login_key: String,
    navigator: N,
    lifetime: Lifetime,
    renewal_due: Option<u64>,
    expiry_due: Option<u64>,
    listener: Option<StateListener>,
}

impl<P, S, N> SessionDriver<P, S, N>
where
    P: IdentityProvider,
    S: StorageBackend,
    N: Navigator,
{
    pub fn new(config: &OidcConfig, provider: P, backend: S, navigator: N) -> Self {
        Self {
            machine: SessionMachine::new(config),
            provider,
            store: TokenStore::new(backend, config),
            login_key: config.login_storage_key(),
            navigator,
            lifetime: Lifetime::new(),
            renewal_due: None,
            expiry_due: None,
            listener: None,
        }
    }

    /// Uses an externally owned lifetime flag.
    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Calls `listener` whenever the session state changes.
    pub fn on_state_change(mut self, listener: impl FnMut(&SessionState) + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn state(&self) -> &SessionState {
        self.machine.state()
    }

    pub fn store(&self) -> &TokenStore<S> {
        &self.store
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Unix timestamp of the next scheduled renewal.
    pub fn renewal_due(&self) -> Option<u64> {
        self.renewal_due
    }

    /// Unix timestamp at which the current access token expires.
    pub fn expiry_due(&self) -> Option<u64> {
        self.expiry_due
    }

    /// Initializes the session from storage and the page URL.
    pub async fn boot(&mut self, current_url: &str) {
        let stored = self.store.load();
        let callback = CallbackParams::from_route_url(current_url, Route::CALLBACK);
        let pending = callback
            .as_ref()
            .and_then(|_| PendingLogin::take(self.store.backend(), &self.login_key));

        self.dispatch(SessionInput::Boot {
            stored,
            callback,
            pending,
        })
        .await;
    }

    /// Feeds `input` to the machine and runs effects until it settles.
    pub async fn dispatch(&mut self, input: SessionInput) {
        let mut queue = VecDeque::from([input]);

        while let Some(input) = queue.pop_front() {
            if !self.lifetime.is_alive() {
                tracing::trace!("Session lifetime ended, discarding {:?}", input);
                return;
            }
            match input {
                SessionInput::RenewalDue => self.renewal_due = None,
                SessionInput::TokenExpired => self.expiry_due = None,
                _ => {}
            }

            let before = self.machine.state().clone();
            let effects = self.machine.handle(input, clock::now());
            if *self.machine.state() != before {
                self.publish();
            }

            for effect in effects {
                if let Some(result) = self.run(effect).await {
                    queue.push_back(result);
                }
            }
        }
    }

    /// Processes inputs and the session timers until the input stream closes
    /// or the lifetime ends.
    pub async fn run_until_closed<I>(&mut self, mut inputs: I)
    where
        I: Stream<Item = SessionInput> + Unpin,
    {
        while self.lifetime.is_alive() {
            let next = match self.next_timer() {
                Some((at, fired)) => {
                    let timer = pin!(clock::sleep_until(at));
                    match future::select(inputs.next(), timer).await {
                        Either::Left((input, _)) => input,
                        Either::Right(((), _)) => Some(fired),
                    }
                }
                None => inputs.next().await,
            };

            match next {
                Some(input) => self.dispatch(input).await,
                None => break,
            }
        }
        tracing::trace!("Session driver stopped");
    }

    /// Earliest armed timer and the input it fires.
    fn next_timer(&self) -> Option<(u64, SessionInput)> {
        match (self.renewal_due, self.expiry_due) {
            (Some(renewal), Some(expiry)) if expiry < renewal => {
                Some((expiry, SessionInput::TokenExpired))
            }
            (Some(renewal), _) => Some((renewal, SessionInput::RenewalDue)),
            (None, Some(expiry)) => Some((expiry, SessionInput::TokenExpired)),
            (None, None) => None,
        }
    }

    fn publish(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener(self.machine.state());
        }
    }

    async fn run(&mut self, effect: Effect) -> Option<SessionInput> {
        match effect {
            Effect::ExchangeCode {
                code,
                code_verifier,
            } => {
                let result = self
                    .provider
                    .exchange_code(&code, code_verifier.as_deref())
                    .await;
                Some(SessionInput::CodeExchanged(result))
            }
            Effect::FetchProfile { access_token } => {
                let result = self.provider.fetch_user_profile(&access_token).await;
                Some(SessionInput::ProfileLoaded(result))
            }
            Effect::RenewSilently { tokens } => {
                let result = self.provider.renew_silently(&tokens).await;
                Some(SessionInput::Renewed(result))
            }
            Effect::SignInSilently => {
                let result = self.provider.sign_in_silently().await;
                Some(SessionInput::Renewed(result))
            }
            Effect::PersistTokens(tokens) => {
                self.store.save(&tokens);
                None
            }
            Effect::ClearTokens => {
                self.store.clear();
                None
            }
            Effect::ScheduleRenewal { at } => {
                tracing::trace!("Renewal scheduled in {}s", at.saturating_sub(clock::now()));
                self.renewal_due = Some(at);
                None
            }
            Effect::ScheduleExpiry { at } => {
                self.expiry_due = Some(at);
                None
            }
            Effect::CancelTimers => {
                self.renewal_due = None;
                self.expiry_due = None;
                None
            }
            Effect::Navigate(path) => {
                self.navigator.navigate(&path);
                None
            }
            Effect::BeginLogin { return_to } => {
                let pending = PendingLogin::generate(return_to);
                pending.save(self.store.backend(), &self.login_key);
                let url = self.provider.authorization_url(&pending);
                tracing::trace!("Starting interactive login");
                self.navigator.redirect(&url);
                None
            }
            Effect::EndProviderSession { id_token_hint } => {
                match self.provider.end_session_url(id_token_hint.as_deref()) {
                    Some(url) => self.navigator.redirect(&url),
                    None => self.navigator.navigate(Route::LOGIN),
                }
                None
            }
        }
    }
}

/// Discovers the provider, waiting for the user after a failure.
///
/// Each failed attempt calls `on_failure` and then drains `inputs`: a login
/// request triggers the next attempt and is handed back for replay once the
/// driver runs, a guard asking for sign-in is sent to `/login`. Returns
/// `None` when `inputs` closes first.
pub async fn connect_provider<P, F, Fut, I, N>(
    mut discover: F,
    inputs: &mut I,
    navigator: &N,
    mut on_failure: impl FnMut(),
) -> Option<(P, Option<SessionInput>)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<P, AuthError>>,
    I: Stream<Item = SessionInput> + Unpin,
    N: Navigator,
{
    let mut replay = None;
    loop {
        match discover().await {
            Ok(provider) => return Some((provider, replay)),
            Err(e) => {
                tracing::error!("{}", e);
                on_failure();
            }
        }

        replay = loop {
            match inputs.next().await? {
                input @ SessionInput::LoginRequested { .. } => break Some(input),
                SessionInput::SignInRequired(_) => navigator.navigate(Route::LOGIN),
                other => tracing::trace!("No identity provider yet, dropping {:?}", other),
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use futures::channel::mpsc;

    use super::*;
    use crate::User;
    use crate::client::guard::GuardRedirect;
    use crate::client::navigator::testing::RecordingNavigator;
    use crate::client::token_store::{MemoryStorage, TokenSet};

    /// Provider double with call counters.
    #[derive(Clone, Default)]
    struct MockProvider {
        exchanges: Rc<Cell<u32>>,
        renewals: Rc<Cell<u32>>,
        profiles: Rc<Cell<u32>>,
        silent_sign_ins: Rc<Cell<u32>>,
        provider_session: bool,
        fail_exchange: bool,
        fail_renewal: bool,
        fail_profile: bool,
        with_end_session: bool,
        end_during_exchange: Option<Lifetime>,
    }

    impl IdentityProvider for MockProvider {
        fn authorization_url(&self, pending: &PendingLogin) -> String {
            format!("https://auth.test.com/authorize?state={}", pending.state)
        }

        async fn exchange_code(
            &self,
            code: &str,
            _code_verifier: Option<&str>,
        ) -> Result<TokenSet, AuthError> {
            self.exchanges.set(self.exchanges.get() + 1);
            if let Some(lifetime) = &self.end_during_exchange {
                lifetime.end();
            }
            if self.fail_exchange {
                return Err(AuthError::CodeExchangeFailed("invalid_grant".to_string()));
            }
            assert_eq!(code, "XYZ");
            let mut tokens = TokenSet::new("T".to_string(), 3600, clock::now());
            tokens.refresh_token = Some("R".to_string());
            tokens.id_token = Some("I".to_string());
            Ok(tokens)
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
            unreachable!("renew_silently is overridden")
        }

        async fn fetch_user_profile(&self, access_token: &str) -> Result<User, AuthError> {
            self.profiles.set(self.profiles.get() + 1);
            if self.fail_profile {
                return Err(AuthError::ProfileFetchFailed("down".to_string()));
            }
            let mut user = User::new("4f1c2a".to_string());
            user.name = Some(format!("holder of {access_token}"));
            Ok(user)
        }

        fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<String> {
            self.with_end_session.then(|| {
                format!(
                    "https://auth.test.com/end-session?id_token_hint={}",
                    id_token_hint.unwrap_or_default()
                )
            })
        }

        async fn renew_silently(&self, current: &TokenSet) -> Result<TokenSet, AuthError> {
            self.renewals.set(self.renewals.get() + 1);
            if self.fail_renewal {
                return Err(AuthError::SilentRenewalFailed("login_required".to_string()));
            }
            Ok(TokenSet::new("renewed".to_string(), 3600, clock::now()).inherit_from(current))
        }

        async fn sign_in_silently(&self) -> Result<TokenSet, AuthError> {
            self.silent_sign_ins.set(self.silent_sign_ins.get() + 1);
            if !self.provider_session {
                return Err(AuthError::Provider {
                    error: "login_required".to_string(),
                    description: None,
                });
            }
            Ok(TokenSet::new("silent".to_string(), 3600, clock::now()))
        }
    }

    type TestDriver = SessionDriver<MockProvider, MemoryStorage, RecordingNavigator>;

    fn test_config() -> OidcConfig {
        OidcConfig::new(
            "https://auth.test.com/application/o/meals/".to_string(),
            "meals-web".to_string(),
            "http://localhost:8080/callback".to_string(),
        )
    }

    fn driver(provider: MockProvider) -> (TestDriver, MemoryStorage, RecordingNavigator) {
        let storage = MemoryStorage::new();
        let navigator = RecordingNavigator::default();
        let driver = SessionDriver::new(
            &test_config(),
            provider,
            storage.clone(),
            navigator.clone(),
        );
        (driver, storage, navigator)
    }

    fn store_for(storage: &MemoryStorage) -> TokenStore<MemoryStorage> {
        TokenStore::new(storage.clone(), &test_config())
    }

    #[tokio::test]
    async fn test_boot_with_valid_tokens() {
        let provider = MockProvider::default();
        let (mut driver, storage, navigator) = driver(provider.clone());
        store_for(&storage).save(&TokenSet::new("T".to_string(), 3600, clock::now()));

        driver.boot("http://localhost:8080/").await;

        assert!(driver.state().is_authenticated());
        assert_eq!(provider.exchanges.get(), 0);
        assert_eq!(provider.profiles.get(), 1);
        assert!(navigator.redirects().is_empty());
        assert!(driver.renewal_due().is_some());
    }

    #[tokio::test]
    async fn test_boot_callback_exchanges_code_once() {
        let provider = MockProvider::default();
        let (mut driver, storage, navigator) = driver(provider.clone());

        driver.boot("http://localhost:8080/callback?code=XYZ").await;

        assert!(driver.state().is_authenticated());
        assert_eq!(provider.exchanges.get(), 1);
        let stored = store_for(&storage).load().unwrap();
        assert_eq!(stored.access_token, "T");
        assert_eq!(stored.refresh_token.as_deref(), Some("R"));
        assert_eq!(navigator.navigations(), vec!["/".to_string()]);
    }

    #[tokio::test]
    async fn test_boot_callback_consumes_pending_login() {
        let provider = MockProvider::default();
        let (mut driver, storage, navigator) = driver(provider.clone());
        let pending = PendingLogin::generate(Some("/?week=2024-05-06".to_string()));
        pending.save(&storage, &test_config().login_storage_key());

        driver
            .boot(&format!(
                "http://localhost:8080/callback?code=XYZ&state={}",
                pending.state
            ))
            .await;

        assert!(driver.state().is_authenticated());
        assert_eq!(navigator.navigations(), vec!["/?week=2024-05-06".to_string()]);
        assert!(storage.get(&test_config().login_storage_key()).is_none());
    }

    #[tokio::test]
    async fn test_boot_ignores_code_outside_callback_route() {
        let provider = MockProvider::default();
        let (mut driver, _, navigator) = driver(provider.clone());

        driver.boot("http://localhost:8080/?code=XYZ").await;

        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert_eq!(provider.exchanges.get(), 0);
        assert!(navigator.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_boot_arms_expiry_timer() {
        let (mut driver, storage, _) = driver(MockProvider::default());
        let tokens = TokenSet::new("T".to_string(), 3600, clock::now());
        store_for(&storage).save(&tokens);

        driver.boot("http://localhost:8080/").await;

        assert_eq!(driver.expiry_due(), Some(tokens.expires_at));
        driver.dispatch(SessionInput::LogoutRequested).await;
        assert!(driver.expiry_due().is_none());
    }

    #[tokio::test]
    async fn test_boot_callback_failure() {
        let provider = MockProvider {
            fail_exchange: true,
            ..MockProvider::default()
        };
        let (mut driver, storage, navigator) = driver(provider);

        driver.boot("http://localhost:8080/callback?code=XYZ").await;

        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert!(store_for(&storage).load().is_none());
        assert_eq!(navigator.navigations(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn test_boot_expired_tokens_renewal_fails() {
        let provider = MockProvider {
            fail_renewal: true,
            ..MockProvider::default()
        };
        let (mut driver, storage, _) = driver(provider.clone());
        store_for(&storage).save(&TokenSet::new("old".to_string(), 60, clock::now() - 600));

        driver.boot("http://localhost:8080/").await;

        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert_eq!(provider.renewals.get(), 1);
        assert_eq!(provider.profiles.get(), 0);
        assert!(store_for(&storage).load().is_none());
    }

    #[tokio::test]
    async fn test_boot_expired_tokens_renewed() {
        let provider = MockProvider::default();
        let (mut driver, storage, _) = driver(provider.clone());
        let mut expired = TokenSet::new("old".to_string(), 60, clock::now() - 600);
        expired.refresh_token = Some("R".to_string());
        store_for(&storage).save(&expired);

        driver.boot("http://localhost:8080/").await;

        assert!(driver.state().is_authenticated());
        let stored = store_for(&storage).load().unwrap();
        assert_eq!(stored.access_token, "renewed");
        assert_eq!(stored.refresh_token.as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_profile_failure_clears_store() {
        let provider = MockProvider {
            fail_profile: true,
            ..MockProvider::default()
        };
        let (mut driver, storage, _) = driver(provider);
        store_for(&storage).save(&TokenSet::new("T".to_string(), 3600, clock::now()));

        driver.boot("http://localhost:8080/").await;

        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert!(store_for(&storage).load().is_none());
    }

    #[tokio::test]
    async fn test_logout_redirects_to_end_session() {
        let provider = MockProvider {
            with_end_session: true,
            ..MockProvider::default()
        };
        let (mut driver, storage, navigator) = driver(provider.clone());
        driver.boot("http://localhost:8080/callback?code=XYZ").await;

        driver.dispatch(SessionInput::LogoutRequested).await;

        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert!(store_for(&storage).load().is_none());
        assert!(driver.renewal_due().is_none());
        assert_eq!(
            navigator.redirects(),
            vec!["https://auth.test.com/end-session?id_token_hint=I".to_string()]
        );

        // Timer input after logout makes no provider call
        driver.dispatch(SessionInput::RenewalDue).await;
        assert_eq!(provider.renewals.get(), 0);
    }

    #[tokio::test]
    async fn test_logout_without_end_session_goes_to_login() {
        let provider = MockProvider::default();
        let (mut driver, _, navigator) = driver(provider);
        driver.boot("http://localhost:8080/callback?code=XYZ").await;

        driver.dispatch(SessionInput::LogoutRequested).await;

        assert!(navigator.redirects().is_empty());
        assert_eq!(navigator.navigations().last().map(String::as_str), Some("/login"));
    }

    #[tokio::test]
    async fn test_login_saves_pending_request() {
        let provider = MockProvider::default();
        let (mut driver, storage, navigator) = driver(provider);
        driver.boot("http://localhost:8080/login").await;

        driver
            .dispatch(SessionInput::LoginRequested {
                return_to: Some("/".to_string()),
            })
            .await;

        let key = test_config().login_storage_key();
        let pending = PendingLogin::take(&storage, &key).unwrap();
        assert_eq!(pending.return_to.as_deref(), Some("/"));
        assert_eq!(
            navigator.redirects(),
            vec![format!("https://auth.test.com/authorize?state={}", pending.state)]
        );
    }

    #[tokio::test]
    async fn test_renewal_exhaustion_begins_login() {
        let provider = MockProvider {
            fail_renewal: true,
            ..MockProvider::default()
        };
        let (mut driver, storage, navigator) = driver(provider.clone());
        store_for(&storage).save(&TokenSet::new("T".to_string(), 3600, clock::now()));
        driver.boot("http://localhost:8080/").await;

        for _ in 0..3 {
            driver.dispatch(SessionInput::RenewalDue).await;
        }

        assert_eq!(provider.renewals.get(), 3);
        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert!(store_for(&storage).load().is_none());
        assert_eq!(navigator.redirects().len(), 1);
        assert!(driver.renewal_due().is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_navigates_once() {
        let provider = MockProvider::default();
        let (mut driver, _, navigator) = driver(provider);
        driver.boot("http://localhost:8080/callback?code=XYZ").await;
        let before = navigator.navigations().len();

        driver.dispatch(SessionInput::SessionEnded).await;
        driver.dispatch(SessionInput::SessionEnded).await;

        let navigations = navigator.navigations();
        assert_eq!(navigations.len(), before + 1);
        assert_eq!(navigations.last().map(String::as_str), Some("/login"));
    }

    #[tokio::test]
    async fn test_results_discarded_after_lifetime_ends() {
        let lifetime = Lifetime::new();
        let provider = MockProvider {
            end_during_exchange: Some(lifetime.clone()),
            ..MockProvider::default()
        };
        let published = Rc::new(RefCell::new(Vec::new()));
        let sink = published.clone();
        let (driver, storage, navigator) = driver(provider.clone());
        let mut driver = driver
            .with_lifetime(lifetime)
            .on_state_change(move |state| sink.borrow_mut().push(state.clone()));

        driver.boot("http://localhost:8080/callback?code=XYZ").await;

        assert_eq!(provider.exchanges.get(), 1);
        assert_eq!(provider.profiles.get(), 0);
        assert!(store_for(&storage).load().is_none());
        assert!(navigator.navigations().is_empty());
        assert_eq!(*published.borrow(), vec![SessionState::ExchangingCode]);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let published = Rc::new(RefCell::new(Vec::new()));
        let sink = published.clone();
        let (driver, _, _) = driver(MockProvider::default());
        let mut driver = driver.on_state_change(move |state| sink.borrow_mut().push(state.clone()));

        driver.boot("http://localhost:8080/callback?code=XYZ").await;

        let published = published.borrow();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], SessionState::ExchangingCode);
        assert!(published[1].is_authenticated());
    }

    #[tokio::test]
    async fn test_run_until_closed_processes_inputs() {
        let (mut driver, storage, navigator) = driver(MockProvider::default());
        store_for(&storage).save(&TokenSet::new("T".to_string(), 3600, clock::now()));
        driver.boot("http://localhost:8080/").await;

        let (tx, rx) = mpsc::unbounded();
        tx.unbounded_send(SessionInput::LogoutRequested).unwrap();
        drop(tx);

        driver.run_until_closed(rx).await;

        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert_eq!(navigator.navigations(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn test_run_until_closed_fires_due_renewal() {
        let provider = MockProvider::default();
        let (mut driver, storage, _) = driver(provider.clone());
        // Inside the renewal margin, so renewal is due immediately
        store_for(&storage).save(&TokenSet::new("T".to_string(), 30, clock::now()));
        driver.boot("http://localhost:8080/").await;
        assert!(driver.renewal_due().is_some());

        let (tx, rx) = mpsc::unbounded::<SessionInput>();
        let lifetime = driver.lifetime().clone();
        let stop = async move {
            while provider.renewals.get() == 0 {
                clock::sleep(std::time::Duration::from_millis(5)).await;
            }
            lifetime.end();
            drop(tx);
        };

        futures::join!(driver.run_until_closed(rx), stop);

        assert_eq!(
            store_for(&storage).load().map(|t| t.access_token),
            Some("renewed".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_until_closed_expires_session() {
        let mut config = test_config();
        config.automatic_silent_renew = false;
        let storage = MemoryStorage::new();
        let published = Rc::new(RefCell::new(Vec::new()));
        let sink = published.clone();
        let mut driver = SessionDriver::new(
            &config,
            MockProvider::default(),
            storage.clone(),
            RecordingNavigator::default(),
        )
        .on_state_change(move |state| sink.borrow_mut().push(state.clone()));
        store_for(&storage).save(&TokenSet::new("T".to_string(), 2, clock::now()));
        driver.boot("http://localhost:8080/").await;
        assert!(driver.state().is_authenticated());
        assert!(driver.renewal_due().is_none());

        let (tx, rx) = mpsc::unbounded::<SessionInput>();
        let lifetime = driver.lifetime().clone();
        let watched = published.clone();
        let stop = async move {
            while !watched.borrow().contains(&SessionState::Unauthenticated) {
                clock::sleep(std::time::Duration::from_millis(20)).await;
            }
            lifetime.end();
            drop(tx);
        };

        futures::join!(driver.run_until_closed(rx), stop);

        assert!(store_for(&storage).load().is_none());
    }

    #[tokio::test]
    async fn test_guard_sign_in_uses_provider_session() {
        let provider = MockProvider {
            provider_session: true,
            ..MockProvider::default()
        };
        let (mut driver, storage, navigator) = driver(provider.clone());
        driver.boot("http://localhost:8080/").await;
        assert_eq!(driver.state(), &SessionState::Unauthenticated);

        driver
            .dispatch(SessionInput::SignInRequired(GuardRedirect::LoginPage))
            .await;

        assert!(driver.state().is_authenticated());
        assert_eq!(provider.silent_sign_ins.get(), 1);
        assert_eq!(
            store_for(&storage).load().map(|t| t.access_token),
            Some("silent".to_string())
        );
        assert!(navigator.navigations().is_empty());
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_guard_sign_in_falls_back_after_silent_failure() {
        let provider = MockProvider::default();
        let (mut driver, _, navigator) = driver(provider.clone());
        driver.boot("http://localhost:8080/").await;

        driver
            .dispatch(SessionInput::SignInRequired(GuardRedirect::LoginPage))
            .await;
        assert_eq!(driver.state(), &SessionState::Unauthenticated);
        assert!(navigator.navigations().is_empty());

        // The guard asks again once the state settles
        driver
            .dispatch(SessionInput::SignInRequired(GuardRedirect::LoginPage))
            .await;
        assert_eq!(provider.silent_sign_ins.get(), 1);
        assert_eq!(navigator.navigations(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_provider_retries_on_login_request() {
        let attempts = Cell::new(0);
        let failures = Cell::new(0);
        let navigator = RecordingNavigator::default();
        let (tx, mut rx) = mpsc::unbounded();
        tx.unbounded_send(SessionInput::LogoutRequested).unwrap();
        tx.unbounded_send(SessionInput::SignInRequired(GuardRedirect::LoginPage))
            .unwrap();
        tx.unbounded_send(SessionInput::LoginRequested {
            return_to: Some("/".to_string()),
        })
        .unwrap();

        let connected = connect_provider(
            || {
                attempts.set(attempts.get() + 1);
                let result = if attempts.get() == 1 {
                    Err(AuthError::Discovery("connection refused".to_string()))
                } else {
                    Ok(MockProvider::default())
                };
                async move { result }
            },
            &mut rx,
            &navigator,
            || failures.set(failures.get() + 1),
        )
        .await;

        let (provider, replay) = connected.unwrap();
        assert_eq!(attempts.get(), 2);
        assert_eq!(failures.get(), 1);
        assert_eq!(navigator.navigations(), vec!["/login".to_string()]);

        // The replayed request starts the login once the driver runs
        let storage = MemoryStorage::new();
        let mut driver = SessionDriver::new(&test_config(), provider, storage, navigator.clone());
        driver.boot("http://localhost:8080/login").await;
        driver.dispatch(replay.unwrap()).await;
        assert_eq!(navigator.redirects().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_provider_stops_when_inputs_close() {
        let (tx, mut rx) = mpsc::unbounded::<SessionInput>();
        drop(tx);

        let connected = connect_provider(
            || async { Err::<MockProvider, _>(AuthError::Discovery("offline".to_string())) },
            &mut rx,
            &RecordingNavigator::default(),
            || {},
        )
        .await;

        assert!(connected.is_none());
    }
}
