//! Mutation core: immutable snapshots produced from draft edits.

use crate::middleware::{Middleware, Pipeline};
use crate::subscriptions::{SubscriptionId, SubscriptionManager};
use crate::types::{Timestamp, Version};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

/// One immutable version of the whole state.
pub struct Snapshot<S> {
    pub version: Version,
    pub committed_at: Timestamp,
    state: S,
}

impl<S> Snapshot<S> {
    fn initial(state: S) -> Self {
        Self {
            version: Version::default(),
            committed_at: Timestamp::now(),
            state,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S> Deref for Snapshot<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

impl<S: fmt::Debug> fmt::Debug for Snapshot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("committed_at", &self.committed_at)
            .field("state", &self.state)
            .finish()
    }
}

/// A finished commit, as seen by middleware stages.
pub struct Commit<'a, S> {
    /// Name of the action that produced the commit.
    pub label: &'a str,
    pub previous: &'a Arc<Snapshot<S>>,
    pub current: &'a Arc<Snapshot<S>>,
}

/// Process-wide observable state container.
///
/// Readers get whole snapshots. Writers hand a closure a private draft; when it
/// returns successfully the draft becomes the next snapshot in a single swap
/// and the commit pipeline runs once.
pub struct Store<S> {
    name: String,

    /// State restored by [`Store::reset`].
    defaults: Arc<S>,

    /// Current snapshot.
    current: RwLock<Arc<Snapshot<S>>>,

    /// Serializes commits.
    write_lock: Mutex<()>,

    subscriptions: Arc<SubscriptionManager<S>>,

    broadcast_enabled: bool,

    pipeline: Pipeline<S>,
}

impl<S> Store<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>, defaults: S) -> StoreBuilder<S> {
        StoreBuilder::new(name, defaults)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot<S>> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> Version {
        self.current.read().version
    }

    /// Apply an infallible mutation.
    pub fn mutate<R, F>(&self, label: &str, f: F) -> R
    where
        F: FnOnce(&mut S) -> R,
    {
        match self.try_mutate::<R, std::convert::Infallible, _>(label, |draft| Ok(f(draft))) {
            Ok(out) => out,
            Err(never) => match never {},
        }
    }

    /// Apply a mutation that may fail.
    ///
    /// On `Err` the draft is discarded and the previous snapshot stays current.
    /// A panicking mutation likewise leaves the store untouched.
    pub fn try_mutate<R, E, F>(&self, label: &str, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut S) -> Result<R, E>,
    {
        let (previous, current, out) = {
            let _lock = self.write_lock.lock();

            let previous = self.snapshot();
            let mut draft = previous.state.clone();
            let out = f(&mut draft)?;

            let current = Arc::new(Snapshot {
                version: previous.version.next(),
                committed_at: Timestamp::now(),
                state: draft,
            });
            *self.current.write() = Arc::clone(&current);
            // Queued under the write lock so delivery follows commit order.
            if self.broadcast_enabled {
                self.subscriptions.enqueue(Arc::clone(&current));
            }

            (previous, current, out)
        };

        debug!(store = %self.name, label, version = %current.version, "commit");

        // Runs without the write lock so listeners may start their own commits.
        self.pipeline.run(&Commit {
            label,
            previous: &previous,
            current: &current,
        });

        Ok(out)
    }

    /// Replace the whole state.
    pub fn replace(&self, label: &str, state: S) {
        self.mutate(label, move |draft| *draft = state);
    }

    /// Restore the default state. Subscriptions are kept.
    pub fn reset(&self) {
        let defaults = S::clone(&self.defaults);
        self.replace("reset", defaults);
    }

    pub fn defaults(&self) -> &S {
        &self.defaults
    }

    // --- Subscriptions ---

    /// Call `listener` after every commit.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&Snapshot<S>) + Send + 'static,
    {
        self.warn_if_silent();
        self.subscriptions.subscribe(listener)
    }

    /// Call `listener(current, previous)` when the selected value changes.
    pub fn subscribe_with_selector<T, Sel, F>(&self, selector: Sel, listener: F) -> SubscriptionId
    where
        T: PartialEq + Send + 'static,
        Sel: Fn(&S) -> T + Send + 'static,
        F: FnMut(&T, &T) + Send + 'static,
    {
        self.warn_if_silent();
        let initial = selector(&self.snapshot());
        self.subscriptions
            .subscribe_with_selector(initial, selector, listener)
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    fn warn_if_silent(&self) {
        if !self.broadcast_enabled {
            warn!(store = %self.name, "subscribing to a store with broadcast disabled");
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("version", &self.current.read().version)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// Assembles a [`Store`] and its commit pipeline.
pub struct StoreBuilder<S> {
    name: String,
    defaults: S,
    start: Option<S>,
    broadcast: bool,
    persist: Option<Arc<dyn Middleware<S>>>,
    devtools: Option<Arc<dyn Middleware<S>>>,
}

impl<S> StoreBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, defaults: S) -> Self {
        Self {
            name: name.into(),
            defaults,
            start: None,
            broadcast: true,
            persist: None,
            devtools: None,
        }
    }

    /// Initial state when it differs from the defaults (e.g. after rehydration).
    pub fn start_from(mut self, state: S) -> Self {
        self.start = Some(state);
        self
    }

    pub fn broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }

    pub fn persist(mut self, stage: Arc<dyn Middleware<S>>) -> Self {
        self.persist = Some(stage);
        self
    }

    pub fn devtools(mut self, stage: Arc<dyn Middleware<S>>) -> Self {
        self.devtools = Some(stage);
        self
    }

    pub fn build(self) -> Store<S> {
        let subscriptions = Arc::new(SubscriptionManager::new());

        let mut stages: Vec<Arc<dyn Middleware<S>>> = Vec::new();
        if self.broadcast {
            stages.push(Arc::clone(&subscriptions) as Arc<dyn Middleware<S>>);
        }
        stages.extend(self.persist);
        stages.extend(self.devtools);

        let start = self.start.unwrap_or_else(|| self.defaults.clone());

        Store {
            name: self.name,
            defaults: Arc::new(self.defaults),
            current: RwLock::new(Arc::new(Snapshot::initial(start))),
            write_lock: Mutex::new(()),
            subscriptions,
            broadcast_enabled: self.broadcast,
            pipeline: Pipeline::new(stages),
        }
    }
}
