//! Pub/sub fan-out for status transitions.
//!
//! An ordered observer list: subscribers are notified in subscription
//! order, a panicking subscriber does not prevent the rest from being
//! notified, and unsubscribing from inside a callback cannot corrupt
//! the iteration (notification walks a snapshot of the list).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::status::SyncStatus;

type Callback = Arc<dyn Fn(SyncStatus) + Send + Sync>;

#[derive(Default)]
struct ListenerList {
    next_id: u64,
    listeners: Vec<(u64, Callback)>,
}

/// Fan-out of status-change notifications to zero or more subscribers.
///
/// The broadcaster does not deduplicate values; the engine compares the
/// old and new status and only calls [`notify`](Self::notify) on an
/// actual transition.
#[derive(Default)]
pub struct StatusBroadcaster {
    inner: Arc<Mutex<ListenerList>>,
}

impl StatusBroadcaster {
    /// Create a broadcaster with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber. The returned handle removes exactly this
    /// callback when unsubscribed.
    pub fn subscribe(
        &self,
        callback: impl Fn(SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(callback)));
        StatusSubscription {
            list: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Notify every current subscriber, in subscription order.
    pub fn notify(&self, status: SyncStatus) {
        let snapshot: Vec<Callback> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.iter().map(|(_, cb)| cb.clone()).collect()
        };

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                tracing::error!(
                    status = status.as_str(),
                    "status listener panicked, continuing with remaining listeners"
                );
            }
        }
    }

    /// Number of registered subscribers.
    pub fn listener_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.listeners.len()
    }
}

/// Handle returned by [`StatusBroadcaster::subscribe`].
pub struct StatusSubscription {
    list: Weak<Mutex<ListenerList>>,
    id: u64,
}

impl StatusSubscription {
    /// Remove the subscribed callback. Safe to call after the
    /// broadcaster has been dropped.
    pub fn unsubscribe(self) {
        if let Some(list) = self.list.upgrade() {
            let mut inner = list.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
