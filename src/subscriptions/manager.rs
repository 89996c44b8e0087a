//! Subscription manager for broadcasting committed snapshots.

use crate::error::Result;
use crate::middleware::Middleware;
use crate::store::{Commit, Snapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::types::{Listener, SelectorListener, SubscriptionId};

/// Internal subscription state.
struct Subscription<S> {
    id: SubscriptionId,
    /// Cleared on unsubscribe so an in-flight delivery skips it.
    active: AtomicBool,
    listener: Mutex<Listener<S>>,
}

/// Pending deliveries.
struct Delivery<S> {
    queue: VecDeque<Arc<Snapshot<S>>>,
    /// Some caller is currently draining the queue.
    draining: bool,
}

/// Resets `draining` if a listener unwinds mid-delivery.
struct DrainGuard<'a, S> {
    delivery: &'a Mutex<Delivery<S>>,
    armed: bool,
}

impl<S> Drop for DrainGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.delivery.lock().draining = false;
        }
    }
}

/// Manages listeners and delivers snapshots to them.
///
/// Snapshots are queued and delivered one at a time, in commit order. A commit
/// made by a listener is queued behind the one being delivered and gets its
/// own delivery pass.
pub struct SubscriptionManager<S> {
    /// Active subscriptions in registration order.
    subscriptions: RwLock<Vec<Arc<Subscription<S>>>>,
    delivery: Mutex<Delivery<S>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl<S: 'static> SubscriptionManager<S> {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            delivery: Mutex::new(Delivery {
                queue: VecDeque::new(),
                draining: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for every delivered snapshot.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&Snapshot<S>) + Send + 'static,
    {
        self.register(Box::new(listener))
    }

    /// Register a listener that fires only when `selector` yields a different
    /// value than it did for the previous delivery (`initial` for the first).
    pub fn subscribe_with_selector<T, Sel, F>(
        &self,
        initial: T,
        selector: Sel,
        listener: F,
    ) -> SubscriptionId
    where
        T: PartialEq + Send + 'static,
        Sel: Fn(&S) -> T + Send + 'static,
        F: FnMut(&T, &T) + Send + 'static,
    {
        let mut wrapped = SelectorListener {
            last: initial,
            selector,
            listener,
        };
        self.register(Box::new(move |snapshot: &Snapshot<S>| {
            wrapped.observe(snapshot.state())
        }))
    }

    fn register(&self, listener: Listener<S>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.write().push(Arc::new(Subscription {
            id,
            active: AtomicBool::new(true),
            listener: Mutex::new(listener),
        }));
        id
    }

    /// Unsubscribe. Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.iter().position(|s| s.id == id) {
            Some(index) => {
                let sub = subs.remove(index);
                sub.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    /// Queue a snapshot and deliver everything queued.
    pub fn publish(&self, snapshot: Arc<Snapshot<S>>) {
        self.enqueue(snapshot);
        self.drain();
    }

    /// Queue a snapshot without delivering it. The store calls this while
    /// still holding its write lock, so the queue is in commit order.
    pub(crate) fn enqueue(&self, snapshot: Arc<Snapshot<S>>) {
        self.delivery.lock().queue.push_back(snapshot);
    }

    /// Deliver everything queued, unless another caller is already draining.
    pub fn drain(&self) {
        {
            let mut delivery = self.delivery.lock();
            if delivery.draining || delivery.queue.is_empty() {
                return;
            }
            delivery.draining = true;
        }

        let mut guard = DrainGuard {
            delivery: &self.delivery,
            armed: true,
        };

        loop {
            let next = {
                let mut delivery = self.delivery.lock();
                match delivery.queue.pop_front() {
                    Some(snapshot) => snapshot,
                    None => {
                        delivery.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };

            let subs: Vec<_> = self.subscriptions.read().clone();
            trace!(version = %next.version, listeners = subs.len(), "delivering snapshot");
            for sub in subs {
                if sub.active.load(Ordering::SeqCst) {
                    (sub.listener.lock())(&next);
                }
            }
        }
    }
}

impl<S: 'static> Default for SubscriptionManager<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Middleware<S> for SubscriptionManager<S>
where
    S: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "broadcast"
    }

    /// The store has already queued `commit.current`; this only delivers.
    fn on_commit(&self, _commit: &Commit<'_, S>) -> Result<()> {
        self.drain();
        Ok(())
    }
}
