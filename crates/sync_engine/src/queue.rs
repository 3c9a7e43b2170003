//! Bounded, ordered queue of pending operations.
//!
//! Insertion order is replay order. When the queue is full, the oldest
//! entry is evicted to make room for the newest: the engine favors
//! retaining recent intent over unbounded growth.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::operation::QueuedOperation;

/// In-memory pending-operation queue with a capacity cap.
#[derive(Clone, Debug)]
pub struct PendingQueue {
    items: VecDeque<QueuedOperation>,
    max_size: usize,
}

impl PendingQueue {
    /// Create an empty queue with the given capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Rebuild a queue from restored items, dropping the oldest entries
    /// if the restored list exceeds the configured capacity.
    pub fn from_items(mut items: VecDeque<QueuedOperation>, max_size: usize) -> Self {
        while items.len() > max_size {
            if let Some(dropped) = items.pop_front() {
                tracing::warn!(
                    operation = %dropped.id,
                    "restored queue exceeds capacity, dropping oldest ({})",
                    dropped.describe()
                );
            }
        }
        Self { items, max_size }
    }

    /// Append an operation. Returns the evicted oldest entry when the
    /// queue was already at capacity.
    pub fn push(&mut self, op: QueuedOperation) -> Option<QueuedOperation> {
        let evicted = if self.items.len() >= self.max_size {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(op);
        evicted
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Clone the current items in FIFO order for a drain pass.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.items.iter().cloned().collect()
    }

    /// The underlying items, for persistence.
    pub fn items(&self) -> &VecDeque<QueuedOperation> {
        &self.items
    }

    /// Settle the outcome of a drain pass: drop every operation in
    /// `remove`, bump the retry count of every operation in `retried`.
    /// Operations enqueued after the pass snapshot are untouched.
    pub fn settle(&mut self, remove: &[Uuid], retried: &[Uuid]) {
        self.items.retain(|op| !remove.contains(&op.id));
        for op in self.items.iter_mut() {
            if retried.contains(&op.id) {
                op.retry_count += 1;
            }
        }
    }
}
