//! Change broadcaster.
//!
//! Listeners are told about every committed snapshot, or only about changes
//! to a selected part of it:
//!
//! ```ignore
//! let id = store.subscribe_with_selector(
//!     |state: &RootState| state.app.theme,
//!     |current, previous| println!("theme {:?} -> {:?}", previous, current),
//! );
//! store.unsubscribe(id);
//! ```
//!
//! Delivery is queued: a commit made from inside a listener is delivered in a
//! separate pass after the current one, never folded into it.

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::SubscriptionId;
