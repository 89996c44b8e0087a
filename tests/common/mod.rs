//! Shared fixtures: a scripted identity provider and store helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use portfolio_store::{
    AuthEvent, AuthResponse, AuthStateChange, IdentityProvider, MemoryStorage, OAuthProvider, ProviderError,
    ProviderUser, RootStore, Session, StoreConfig,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

type Scripted<T> = Mutex<VecDeque<Result<T, ProviderError>>>;

/// Identity provider answering from scripted results.
///
/// Calls with nothing scripted succeed: sign-in and sign-up return a user for
/// the given email, sign-out clears the provider's current user.
pub struct MockProvider {
    events: broadcast::Sender<AuthStateChange>,
    sign_in: Scripted<AuthResponse>,
    sign_out: Scripted<()>,
    refresh: Scripted<AuthResponse>,
    current_user: Mutex<Option<ProviderUser>>,
    calls: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            sign_in: Mutex::new(VecDeque::new()),
            sign_out: Mutex::new(VecDeque::new()),
            refresh: Mutex::new(VecDeque::new()),
            current_user: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn script_sign_in(&self, result: Result<AuthResponse, ProviderError>) {
        self.sign_in.lock().push_back(result);
    }

    pub fn script_sign_out(&self, result: Result<(), ProviderError>) {
        self.sign_out.lock().push_back(result);
    }

    pub fn script_refresh(&self, result: Result<AuthResponse, ProviderError>) {
        self.refresh.lock().push_back(result);
    }

    pub fn set_current_user(&self, user: Option<ProviderUser>) {
        *self.current_user.lock() = user;
    }

    /// Push an event to every subscriber. Returns how many received it.
    pub fn emit(&self, event: AuthEvent, user: Option<ProviderUser>) -> usize {
        let session = user.map(Session::for_user);
        self.events
            .send(AuthStateChange::new(event, session))
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

pub fn provider_user(email: &str) -> ProviderUser {
    ProviderUser::new(format!("id-{email}"), email)
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn sign_in_with_email(&self, email: &str, _password: &str) -> Result<AuthResponse, ProviderError> {
        self.record(format!("sign_in:{email}"));
        tokio::task::yield_now().await;
        let result = self
            .sign_in
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(AuthResponse::for_user(provider_user(email))));
        if let Ok(response) = &result {
            *self.current_user.lock() = response.user.clone();
        }
        result
    }

    async fn sign_up_with_email(
        &self,
        email: &str,
        _password: &str,
        name: Option<&str>,
    ) -> Result<AuthResponse, ProviderError> {
        self.record(format!("sign_up:{email}:{}", name.unwrap_or("-")));
        let mut user = provider_user(email);
        user.user_metadata.full_name = name.map(str::to_string);
        Ok(AuthResponse::for_user(user))
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &str) -> Result<(), ProviderError> {
        self.record(format!("oauth:{provider:?}:{redirect_to}"));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.record("sign_out".to_string());
        tokio::task::yield_now().await;
        let result = self.sign_out.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            *self.current_user.lock() = None;
        }
        result
    }

    async fn get_current_user(&self) -> Result<Option<ProviderUser>, ProviderError> {
        self.record("get_current_user".to_string());
        Ok(self.current_user.lock().clone())
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), ProviderError> {
        self.record(format!("reset:{email}:{redirect_to}"));
        Ok(())
    }

    async fn refresh_session(&self) -> Result<AuthResponse, ProviderError> {
        self.record("refresh".to_string());
        let scripted = self.refresh.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => match self.current_user.lock().clone() {
                Some(user) => Ok(AuthResponse::for_user(user)),
                None => Err(ProviderError::SessionExpired),
            },
        }
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

/// Config for tests: in-memory, devtools off.
pub fn test_config() -> StoreConfig {
    StoreConfig {
        devtools: false,
        ..StoreConfig::default()
    }
}

/// Route store logs to the test harness. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn test_root(provider: &Arc<MockProvider>) -> RootStore {
    init_tracing();
    RootStore::init_with_storage(
        test_config(),
        Arc::clone(provider) as Arc<dyn IdentityProvider>,
        Arc::new(MemoryStorage::new()),
    )
    .unwrap()
}

/// Yield until `done` holds, giving spawned tasks a chance to run.
pub async fn settle<F: Fn() -> bool>(done: F) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    done()
}
