//! Subscription types.

use crate::store::Snapshot;
use std::fmt;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Type-erased listener invoked with each delivered snapshot.
pub(crate) type Listener<S> = Box<dyn FnMut(&Snapshot<S>) + Send>;

/// Wraps a selector and its listener, remembering the last selected value.
pub(crate) struct SelectorListener<T, Sel, F> {
    pub(crate) last: T,
    pub(crate) selector: Sel,
    pub(crate) listener: F,
}

impl<T, Sel, F> SelectorListener<T, Sel, F>
where
    T: PartialEq,
{
    /// Select from `state` and fire if the value changed.
    pub(crate) fn observe<S>(&mut self, state: &S)
    where
        Sel: Fn(&S) -> T,
        F: FnMut(&T, &T),
    {
        let next = (self.selector)(state);
        if next != self.last {
            let previous = std::mem::replace(&mut self.last, next);
            (self.listener)(&self.last, &previous);
        }
    }
}
