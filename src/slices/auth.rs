//! Auth slice: mirrors the identity provider's session into local state.
//!
//! Two inputs drive it:
//! - imperative actions on [`AuthSlice`] (login, logout, ...), each wrapped in
//!   the loading/error envelope of [`LoadingGuard`];
//! - the provider's auth-state feed, folded in by [`fold_auth_event`] from the
//!   task started with [`spawn_auth_listener`].
//!
//! Actions are not cancellable. A slow `login` that resolves after a later
//! `logout` still signs the user in: state follows the last call to resolve,
//! not the last call made.

use crate::config::AuthConfig;
use crate::error::{ProviderError, Result, StoreError};
use crate::provider::{AuthEvent, AuthStateChange, IdentityProvider, OAuthProvider, ProviderUser};
use crate::state::RootState;
use crate::store::Store;
use crate::types::{PreferencesPatch, Role, User, UserPatch, UserPreferences};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::future::Future;
use std::sync::Weak;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Authentication state.
///
/// `current_user` is private: it only changes through [`AuthState::set_current_user`],
/// and authentication status is derived from it, so the two can never disagree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthState {
    current_user: Option<User>,
    pub loading: bool,
    pub error: Option<String>,
    /// Admin-managed user list.
    pub users: Vec<User>,
    pub selected_user: Option<User>,
}

impl AuthState {
    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user.is_some()
    }

    /// Replace or clear the signed-in user.
    pub fn set_current_user(&mut self, user: Option<User>) {
        self.current_user = user;
    }

    /// Edit the signed-in user in place, if there is one.
    pub fn current_user_mut(&mut self) -> Option<&mut User> {
        self.current_user.as_mut()
    }
}

impl Serialize for AuthState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AuthState", 6)?;
        state.serialize_field("currentUser", &self.current_user)?;
        state.serialize_field("isAuthenticated", &self.is_authenticated())?;
        state.serialize_field("loading", &self.loading)?;
        state.serialize_field("error", &self.error)?;
        state.serialize_field("users", &self.users)?;
        state.serialize_field("selectedUser", &self.selected_user)?;
        state.end()
    }
}

/// Map a provider user to an app user.
///
/// Users without both an id and an email are rejected. The display name falls
/// back from `full_name` to `name` to the email; the avatar from `avatar_url`
/// to `picture`.
pub fn map_provider_user(user: &ProviderUser) -> Option<User> {
    let id = user.id.as_deref().filter(|id| !id.is_empty());
    let email = user.email.as_deref().filter(|email| !email.is_empty());

    let (id, email) = match (id, email) {
        (Some(id), Some(email)) => (id, email),
        _ => {
            warn!(
                has_id = id.is_some(),
                has_email = email.is_some(),
                "invalid user data received from identity provider"
            );
            return None;
        }
    };

    let meta = &user.user_metadata;
    let name = present(&meta.full_name)
        .or_else(|| present(&meta.name))
        .unwrap_or(email);
    let avatar = present(&meta.avatar_url)
        .or_else(|| present(&meta.picture))
        .map(str::to_string);

    Some(User {
        id: id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        avatar,
        role: Role::User,
        preferences: UserPreferences::default(),
    })
}

/// An optional provider field, with empty strings treated as absent.
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

/// Fold one provider event into the store.
pub fn fold_auth_event(store: &Store<RootState>, change: &AuthStateChange) {
    match change.event {
        AuthEvent::SignedIn | AuthEvent::InitialSession | AuthEvent::TokenRefreshed => {
            match change.session_user() {
                Some(raw) => {
                    // Malformed payloads are dropped without touching state.
                    if let Some(user) = map_provider_user(raw) {
                        store.mutate(event_label(change.event), |s| {
                            s.auth.set_current_user(Some(user));
                            s.auth.error = None;
                        });
                    }
                }
                None if change.event == AuthEvent::SignedIn => {
                    warn!("SIGNED_IN event without a session user, ignoring");
                }
                None => sign_out_locally(store, event_label(change.event)),
            }
        }
        AuthEvent::SignedOut => sign_out_locally(store, event_label(change.event)),
        other => debug!(event = ?other, "ignoring auth event"),
    }
}

fn event_label(event: AuthEvent) -> &'static str {
    match event {
        AuthEvent::InitialSession => "auth/event/initial-session",
        AuthEvent::SignedIn => "auth/event/signed-in",
        AuthEvent::SignedOut => "auth/event/signed-out",
        AuthEvent::TokenRefreshed => "auth/event/token-refreshed",
        AuthEvent::UserUpdated => "auth/event/user-updated",
        AuthEvent::PasswordRecovery => "auth/event/password-recovery",
        AuthEvent::Other => "auth/event/other",
    }
}

fn sign_out_locally(store: &Store<RootState>, label: &str) {
    store.mutate(label, |s| {
        s.auth.set_current_user(None);
        s.auth.error = None;
    });
}

/// Marks the auth slice busy for its lifetime.
///
/// Acquiring commits `loading = true` and clears `error`; dropping commits
/// `loading = false`, whichever way the holder exits.
pub struct LoadingGuard<'a> {
    store: &'a Store<RootState>,
    label: &'static str,
}

impl<'a> LoadingGuard<'a> {
    pub fn acquire(store: &'a Store<RootState>, label: &'static str) -> Self {
        store.mutate(label, |s| {
            s.auth.loading = true;
            s.auth.error = None;
        });
        Self { store, label }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.store.mutate(self.label, |s| s.auth.loading = false);
    }
}

/// Auth actions over a store and an identity provider.
pub struct AuthSlice<'a> {
    store: &'a Store<RootState>,
    provider: &'a dyn IdentityProvider,
    config: &'a AuthConfig,
}

impl<'a> AuthSlice<'a> {
    pub fn new(store: &'a Store<RootState>, provider: &'a dyn IdentityProvider, config: &'a AuthConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Run a provider call inside the loading envelope. `on_success` commits
    /// before loading is released; a failure lands in `error`.
    async fn run<T, Fut, F>(&self, label: &'static str, fallback: &'static str, call: Fut, on_success: F)
    where
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
        F: FnOnce(&Store<RootState>, T),
    {
        let _busy = LoadingGuard::acquire(self.store, label);

        match call.await {
            Ok(value) => on_success(self.store, value),
            Err(e) => {
                error!(action = label, error = %e, "auth action failed");
                let message = match e.to_string() {
                    m if m.trim().is_empty() => fallback.to_string(),
                    m => m,
                };
                self.store.mutate(label, |s| s.auth.error = Some(message));
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) {
        let label = "auth/login";
        self.run(
            label,
            "Login failed",
            self.provider.sign_in_with_email(email, password),
            |store, response| adopt_user(store, label, response.user.as_ref()),
        )
        .await
    }

    /// Start an OAuth redirect. The session arrives later as a provider event.
    pub async fn login_with_oauth(&self, provider: OAuthProvider) {
        let redirect = self.config.oauth_redirect();
        self.run(
            "auth/login-oauth",
            "OAuth login failed",
            self.provider.sign_in_with_oauth(provider, &redirect),
            |_, ()| {},
        )
        .await
    }

    pub async fn register(&self, email: &str, password: &str, name: Option<&str>) {
        let label = "auth/register";
        self.run(
            label,
            "Registration failed",
            self.provider.sign_up_with_email(email, password, name),
            |store, response| adopt_user(store, label, response.user.as_ref()),
        )
        .await
    }

    pub async fn logout(&self) {
        let label = "auth/logout";
        self.run(label, "Logout failed", self.provider.sign_out(), |store, ()| {
            sign_out_locally(store, label)
        })
        .await
    }

    pub async fn reset_password(&self, email: &str) {
        let redirect = self.config.password_reset_redirect();
        self.run(
            "auth/reset-password",
            "Password reset failed",
            self.provider.reset_password_for_email(email, &redirect),
            |_, ()| {},
        )
        .await
    }

    /// Re-derive the user from a refreshed session. On failure the user is kept.
    pub async fn refresh_token(&self) {
        let label = "auth/refresh-token";
        self.run(
            label,
            "Token refresh failed",
            self.provider.refresh_session(),
            |store, response| {
                let user = response
                    .user
                    .as_ref()
                    .or_else(|| response.session.as_ref().and_then(|s| s.user.as_ref()));
                adopt_user(store, label, user)
            },
        )
        .await
    }

    /// Ask the provider who is signed in and mirror the answer.
    pub async fn check_auth(&self) {
        let label = "auth/check";
        self.run(
            label,
            "Auth check failed",
            self.provider.get_current_user(),
            |store, user| {
                let user = user.as_ref().and_then(map_provider_user);
                store.mutate(label, |s| s.auth.set_current_user(user));
            },
        )
        .await
    }

    // --- Local updates ---

    pub fn set_current_user(&self, user: Option<User>) {
        self.store
            .mutate("auth/set-current-user", |s| s.auth.set_current_user(user));
    }

    /// Merge into the signed-in user. No-op when signed out.
    pub fn update_user_profile(&self, patch: UserPatch) {
        self.store.mutate("auth/update-profile", |s| {
            if let Some(user) = s.auth.current_user_mut() {
                patch.apply(user);
            }
        });
    }

    /// Merge into the signed-in user's preferences. No-op when signed out.
    pub fn update_user_preferences(&self, patch: PreferencesPatch) {
        self.store.mutate("auth/update-preferences", |s| {
            if let Some(user) = s.auth.current_user_mut() {
                patch.apply(&mut user.preferences);
            }
        });
    }

    pub fn set_users(&self, users: Vec<User>) {
        self.store.mutate("auth/set-users", |s| s.auth.users = users);
    }

    pub fn add_user(&self, user: User) {
        self.store.mutate("auth/add-user", |s| s.auth.users.push(user));
    }

    pub fn update_user(&self, id: &str, patch: UserPatch) {
        self.store.mutate("auth/update-user", |s| {
            if let Some(user) = s.auth.users.iter_mut().find(|u| u.id == id) {
                patch.apply(user);
            }
        });
    }

    pub fn remove_user(&self, id: &str) {
        self.store
            .mutate("auth/remove-user", |s| s.auth.users.retain(|u| u.id != id));
    }

    pub fn set_selected_user(&self, user: Option<User>) {
        self.store
            .mutate("auth/set-selected-user", |s| s.auth.selected_user = user);
    }

    pub fn set_loading(&self, loading: bool) {
        self.store.mutate("auth/set-loading", |s| s.auth.loading = loading);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.store.mutate("auth/set-error", |s| s.auth.error = error);
    }

    /// Restore the auth slice to its defaults.
    pub fn reset(&self) {
        self.store
            .mutate("auth/reset", |s| s.auth = AuthState::default());
    }
}

fn adopt_user(store: &Store<RootState>, label: &str, user: Option<&ProviderUser>) {
    if let Some(user) = user.and_then(map_provider_user) {
        store.mutate(label, |s| s.auth.set_current_user(Some(user)));
    }
}

/// Handle to the task folding provider events into the store.
///
/// Dropping the handle stops the task.
pub struct AuthListener {
    task: Option<JoinHandle<()>>,
}

impl AuthListener {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop folding events. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the event-folding task on the current tokio runtime.
///
/// The task holds only a weak reference and ends when the store is dropped or
/// the provider closes its feed.
pub fn spawn_auth_listener(
    store: Weak<Store<RootState>>,
    mut events: broadcast::Receiver<AuthStateChange>,
) -> Result<AuthListener> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| StoreError::NoRuntime(e.to_string()))?;

    let task = runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(change) => match store.upgrade() {
                    Some(store) => fold_auth_event(&store, &change),
                    None => break,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth event feed lagged, events lost");
                }
                Err(RecvError::Closed) => {
                    debug!("auth event feed closed");
                    break;
                }
            }
        }
    });

    Ok(AuthListener { task: Some(task) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Session, UserMetadata};

    fn store() -> Store<RootState> {
        Store::builder("test", RootState::default()).build()
    }

    fn signed_in(user: ProviderUser) -> AuthStateChange {
        AuthStateChange::new(AuthEvent::SignedIn, Some(Session::for_user(user)))
    }

    #[test]
    fn test_map_requires_id_and_email() {
        assert!(map_provider_user(&ProviderUser::new("u1", "a@b.com")).is_some());
        assert!(map_provider_user(&ProviderUser {
            id: Some("u1".into()),
            email: None,
            ..Default::default()
        })
        .is_none());
        assert!(map_provider_user(&ProviderUser::new("", "a@b.com")).is_none());
    }

    #[test]
    fn test_map_name_and_avatar_fallbacks() {
        let bare = map_provider_user(&ProviderUser::new("u1", "a@b.com")).unwrap();
        assert_eq!(bare.name, "a@b.com");
        assert_eq!(bare.avatar, None);
        assert_eq!(bare.role, Role::User);

        let named = map_provider_user(&ProviderUser::new("u1", "a@b.com").with_metadata(UserMetadata {
            name: Some("Ada".into()),
            picture: Some("p.png".into()),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(named.name, "Ada");
        assert_eq!(named.avatar.as_deref(), Some("p.png"));

        let full = map_provider_user(&ProviderUser::new("u1", "a@b.com").with_metadata(UserMetadata {
            full_name: Some("Ada Lovelace".into()),
            name: Some("Ada".into()),
            avatar_url: Some("a.png".into()),
            picture: Some("p.png".into()),
        }))
        .unwrap();
        assert_eq!(full.name, "Ada Lovelace");
        assert_eq!(full.avatar.as_deref(), Some("a.png"));

        // Empty strings fall through to the next candidate.
        let blanks = map_provider_user(&ProviderUser::new("u1", "a@b.com").with_metadata(UserMetadata {
            full_name: Some(String::new()),
            name: Some("Ada".into()),
            avatar_url: Some(String::new()),
            picture: Some("p.png".into()),
        }))
        .unwrap();
        assert_eq!(blanks.name, "Ada");
        assert_eq!(blanks.avatar.as_deref(), Some("p.png"));

        let all_blank = map_provider_user(&ProviderUser::new("u1", "a@b.com").with_metadata(UserMetadata {
            full_name: Some(String::new()),
            name: Some(String::new()),
            avatar_url: Some(String::new()),
            picture: Some(String::new()),
        }))
        .unwrap();
        assert_eq!(all_blank.name, "a@b.com");
        assert_eq!(all_blank.avatar, None);
    }

    #[test]
    fn test_signed_in_then_signed_out() {
        let store = store();
        store.mutate("seed", |s| s.auth.error = Some("stale".into()));

        fold_auth_event(&store, &signed_in(ProviderUser::new("u1", "a@b.com")));
        let snapshot = store.snapshot();
        assert!(snapshot.auth.is_authenticated());
        assert_eq!(snapshot.auth.error, None);

        fold_auth_event(&store, &AuthStateChange::new(AuthEvent::SignedOut, None));
        assert!(!store.snapshot().auth.is_authenticated());
    }

    #[test]
    fn test_malformed_signed_in_is_discarded() {
        let store = store();
        fold_auth_event(&store, &signed_in(ProviderUser::new("u1", "a@b.com")));
        let before = store.snapshot();

        let malformed = ProviderUser {
            id: Some("u2".into()),
            email: None,
            ..Default::default()
        };
        fold_auth_event(&store, &signed_in(malformed));

        let after = store.snapshot();
        assert_eq!(after.version, before.version);
        assert_eq!(after.auth.current_user().unwrap().id, "u1");
    }

    #[test]
    fn test_initial_session_without_user_clears() {
        let store = store();
        store.mutate("seed", |s| {
            s.auth.set_current_user(map_provider_user(&ProviderUser::new("u1", "a@b.com")))
        });

        fold_auth_event(&store, &AuthStateChange::new(AuthEvent::InitialSession, None));
        assert!(store.snapshot().auth.current_user().is_none());
    }

    #[test]
    fn test_token_refreshed_without_user_signs_out() {
        let store = store();
        fold_auth_event(&store, &signed_in(ProviderUser::new("u1", "a@b.com")));
        fold_auth_event(
            &store,
            &AuthStateChange::new(AuthEvent::TokenRefreshed, Some(Session::default())),
        );
        assert!(!store.snapshot().auth.is_authenticated());
    }

    #[test]
    fn test_other_events_do_not_commit() {
        let store = store();
        fold_auth_event(&store, &AuthStateChange::new(AuthEvent::UserUpdated, None));
        fold_auth_event(&store, &AuthStateChange::new(AuthEvent::Other, None));
        assert_eq!(store.version().0, 0);
    }

    #[test]
    fn test_loading_guard_releases_on_drop() {
        let store = store();
        store.mutate("seed", |s| s.auth.error = Some("old".into()));
        {
            let _busy = LoadingGuard::acquire(&store, "test");
            let snapshot = store.snapshot();
            assert!(snapshot.auth.loading);
            assert_eq!(snapshot.auth.error, None);
        }
        assert!(!store.snapshot().auth.loading);
    }

    #[test]
    fn test_serialized_state_carries_derived_flag() {
        let mut state = AuthState::default();
        state.set_current_user(map_provider_user(&ProviderUser::new("u1", "a@b.com")));
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["isAuthenticated"], true);
        assert_eq!(value["currentUser"]["id"], "u1");
    }
}
