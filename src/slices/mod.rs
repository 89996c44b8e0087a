//! State slices and their actions.

pub mod app;
pub mod auth;

pub use app::{AppSlice, AppState, DEFAULT_PAGE_TITLE};
pub use auth::{fold_auth_event, map_provider_user, AuthListener, AuthSlice, AuthState, LoadingGuard};
