//! Identity provider contract consumed by the auth slice.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Free-form profile fields a provider may attach to a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// A user as the provider reports it. Nothing here is guaranteed present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl ProviderUser {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            email: Some(email.into()),
            user_metadata: UserMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: UserMetadata) -> Self {
        self.user_metadata = metadata;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<ProviderUser>,
}

impl Session {
    pub fn for_user(user: ProviderUser) -> Self {
        Self {
            user: Some(user),
            ..Default::default()
        }
    }
}

/// Result of a sign-in, sign-up or refresh call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub user: Option<ProviderUser>,
    #[serde(default)]
    pub session: Option<Session>,
}

impl AuthResponse {
    pub fn for_user(user: ProviderUser) -> Self {
        Self {
            session: Some(Session::for_user(user.clone())),
            user: Some(user),
        }
    }
}

/// Session lifecycle events pushed by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
    #[serde(other)]
    Other,
}

/// One entry of the provider's auth-state feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    #[serde(default)]
    pub session: Option<Session>,
}

impl AuthStateChange {
    pub fn new(event: AuthEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }

    pub fn session_user(&self) -> Option<&ProviderUser> {
        self.session.as_ref().and_then(|s| s.user.as_ref())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
}

/// External identity service.
///
/// Every call may fail; the auth slice turns failures into its `error` field.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError>;

    async fn sign_up_with_email(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<AuthResponse, ProviderError>;

    /// Starts a redirect flow; the session arrives later as a `SIGNED_IN` event.
    async fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &str) -> Result<(), ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn get_current_user(&self) -> Result<Option<ProviderUser>, ProviderError>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), ProviderError>;

    async fn refresh_session(&self) -> Result<AuthResponse, ProviderError>;

    /// Subscribe to session lifecycle events.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange>;
}
