//! Selective persistence.
//!
//! A store opts in by implementing [`Partialize`]: the projection of its state
//! that may reach durable storage, and how a restored projection is merged back
//! over defaults. [`PersistAdapter`] then runs as a commit pipeline stage and
//! rehydrates once at startup, upgrading older records through [`Migrations`].

mod adapter;
mod migrate;
mod storage;

pub use adapter::{PersistAdapter, PersistMode, PersistedRecord};
pub use migrate::Migrations;
pub use storage::{DurableStorage, FileStorage, MemoryStorage, NoopStorage, StorageBackend};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// State with a persistable projection.
pub trait Partialize {
    /// The persisted subset. Fields left out never reach storage.
    type View: Serialize + DeserializeOwned;

    fn partialize(&self) -> Self::View;

    /// Overlay a restored view. Fields the view lacks keep their current value.
    fn merge(&mut self, view: Self::View);
}
