//! # Portfolio Store
//!
//! A reactive application store: one observable state container that mirrors an
//! identity provider's session, keeps UI state, and runs every commit through a
//! pipeline of cross-cutting stages.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: Each commit produces a new immutable snapshot of the whole state
//! - **Pipeline**: Broadcast, persistence and devtools stages run after every commit
//! - **Persistence**: A partial view is written under a schema version and migrated on load
//! - **Slices**: Auth and app actions, reached through [`RootStore::auth`] and [`RootStore::app`]
//! - **Views**: Memoized projections that keep their identity while unchanged
//!
//! ## Example
//!
//! ```ignore
//! use portfolio_store::{RootStore, StoreConfig, Theme};
//!
//! let root = RootStore::init(StoreConfig::from_env(), provider)?;
//! let _listener = root.start()?;
//!
//! root.app().set_theme(Theme::Dark);
//! root.auth().login("ada@example.com", "secret").await;
//!
//! if root.auth_view().is_authenticated {
//!     root.app().notify_success("Welcome back", None);
//! }
//! ```

pub mod config;
pub mod error;
pub mod middleware;
pub mod persist;
pub mod provider;
pub mod root;
pub mod selectors;
pub mod slices;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::{AppConfig, AuthConfig, ConfigPatch, Environment, StoreConfig, DEFAULT_STORE_NAME};
pub use error::{ProviderError, Result, StoreError};
pub use middleware::{DevtoolsInspector, InspectorHandle, Middleware, Pipeline, Transition};
pub use persist::{
    DurableStorage, FileStorage, MemoryStorage, Migrations, NoopStorage, Partialize, PersistAdapter, PersistMode,
    PersistedRecord, StorageBackend,
};
pub use provider::{
    AuthEvent, AuthResponse, AuthStateChange, IdentityProvider, OAuthProvider, ProviderUser, Session, UserMetadata,
};
pub use root::RootStore;
pub use selectors::{Selector, Selectors};
pub use slices::{AppSlice, AppState, AuthListener, AuthSlice, AuthState, LoadingGuard};
pub use state::{PersistedUser, PersistedView, RootState, StoreMeta, PERSIST_VERSION};
pub use store::{Commit, Snapshot, Store, StoreBuilder};
pub use subscriptions::{SubscriptionId, SubscriptionManager};
pub use types::*;
