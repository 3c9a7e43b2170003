//! Sync engine orchestration.
//!
//! The engine is the single authority over the pending-operation queue
//! and the externally observable connectivity status. It handles:
//!
//! - Buffering mutations issued while the backend is unreachable
//! - Persisting the queue across reloads of the hosting process
//! - Replaying the queue in FIFO order via a caller-supplied apply
//!   function
//! - Retry accounting with a bounded ceiling
//! - Broadcasting status transitions to subscribers
//!
//! Construct one engine per process and share it by `Arc`; each
//! consumer receives the instance by dependency injection rather than
//! through a global.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broadcast::{StatusBroadcaster, StatusSubscription};
use crate::error::ApplyError;
use crate::operation::{OperationKind, QueuedOperation};
use crate::queue::PendingQueue;
use crate::status::{StatusInfo, SyncStatus};
use crate::store::{QueueStore, SessionStore, QUEUE_STORAGE_KEY};

/// Future returned by an apply function.
pub type ApplyFuture = Pin<Box<dyn Future<Output = Result<(), ApplyError>> + Send>>;

/// Caller-supplied function that applies one queued operation against
/// the real backend. A rejection means "retry later".
pub type ApplyFn = Arc<dyn Fn(QueuedOperation) -> ApplyFuture + Send + Sync>;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Queue capacity; at capacity the oldest entry is evicted.
    pub max_queue_size: usize,
    /// Failed attempts after which an operation is dropped.
    pub max_retries: u32,
    /// Session-store key under which the queue is persisted.
    pub storage_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_retries: 5,
            storage_key: QUEUE_STORAGE_KEY.to_string(),
        }
    }
}

impl EngineConfig {
    /// Set the queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the persistence key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }
}

/// Offline-tolerant write queue and connectivity state machine.
///
/// All interior state is private; callers observe the queue only
/// through [`queue_len`](Self::queue_len) and the status only through
/// [`status`](Self::status) / [`on_status_change`](Self::on_status_change).
pub struct SyncEngine {
    config: EngineConfig,
    queue: Mutex<PendingQueue>,
    store: QueueStore,
    apply_fn: Mutex<Option<ApplyFn>>,
    status: Mutex<SyncStatus>,
    broadcaster: StatusBroadcaster,
    /// In-flight drain guard; replaces the event-loop mutual exclusion
    /// the design assumes.
    draining: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create an engine with the default configuration, restoring any
    /// queue persisted in the given store.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(store: Arc<dyn SessionStore>, config: EngineConfig) -> Self {
        let queue_store = QueueStore::with_key(store, config.storage_key.clone());
        let restored = queue_store.load();
        let status = if restored.is_empty() {
            SyncStatus::Online
        } else {
            tracing::info!(
                pending = restored.len(),
                "restored pending operations from previous session"
            );
            SyncStatus::Offline
        };

        Self {
            queue: Mutex::new(PendingQueue::from_items(restored, config.max_queue_size)),
            store: queue_store,
            apply_fn: Mutex::new(None),
            status: Mutex::new(status),
            broadcaster: StatusBroadcaster::new(),
            draining: AtomicBool::new(false),
            last_sync_time: Mutex::new(None),
            monitor_task: Mutex::new(None),
            config,
        }
    }

    /// Register the apply function that knows how to replay one queued
    /// operation against the real backend.
    ///
    /// Enqueueing before this is legal; drain passes are no-ops until
    /// an apply function is registered.
    pub fn initialize<F, Fut>(&self, apply: F)
    where
        F: Fn(QueuedOperation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApplyError>> + Send + 'static,
    {
        let wrapped: ApplyFn = Arc::new(move |op| Box::pin(apply(op)));
        *self.lock(&self.apply_fn) = Some(wrapped);
    }

    /// Buffer a mutation for later replay and flip status to offline.
    ///
    /// Purely local: persists the queue but never touches the backend.
    /// At capacity the oldest entry is evicted first. Returns the id of
    /// the buffered operation.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        entity_type: impl Into<String>,
        data: serde_json::Value,
        entity_id: Option<String>,
    ) -> Uuid {
        let op = QueuedOperation::new(kind, entity_type, data, entity_id);
        let id = op.id;

        {
            let mut queue = self.lock(&self.queue);
            if let Some(evicted) = queue.push(op) {
                tracing::warn!(
                    operation = %evicted.id,
                    "pending queue full, evicting oldest operation ({})",
                    evicted.describe()
                );
            }
            self.store.save(queue.items());
        }

        self.set_status(SyncStatus::Offline);
        id
    }

    /// Replay every currently queued operation, in FIFO order.
    ///
    /// No-op when no apply function is registered, when the queue is
    /// empty, or when a pass is already in flight. One operation's
    /// failure never prevents attempting the rest; the queue is
    /// persisted once, after the full pass settles.
    pub async fn process_queue(&self) {
        let Some(apply) = self.lock(&self.apply_fn).clone() else {
            return;
        };
        if self.lock(&self.queue).is_empty() {
            return;
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_status(SyncStatus::Syncing);

        let snapshot = self.lock(&self.queue).snapshot();
        tracing::debug!(pending = snapshot.len(), "starting drain pass");

        let mut remove = Vec::new();
        let mut retried = Vec::new();
        for op in snapshot {
            match apply(op.clone()).await {
                Ok(()) => remove.push(op.id),
                Err(err) => {
                    let failed_attempts = op.retry_count + 1;
                    if failed_attempts >= self.config.max_retries {
                        tracing::error!(
                            operation = %op.id,
                            "dropping operation after {} failed attempts ({}): {}",
                            failed_attempts,
                            op.describe(),
                            err
                        );
                        remove.push(op.id);
                    } else {
                        tracing::debug!(
                            operation = %op.id,
                            attempt = failed_attempts,
                            "apply failed, will retry: {}",
                            err
                        );
                        retried.push(op.id);
                    }
                }
            }
        }

        let remaining = {
            let mut queue = self.lock(&self.queue);
            queue.settle(&remove, &retried);
            self.store.save(queue.items());
            queue.len()
        };

        if remaining == 0 {
            *self.lock(&self.last_sync_time) = Some(Utc::now());
            self.set_status(SyncStatus::Online);
        } else {
            self.set_status(SyncStatus::Offline);
        }
        self.draining.store(false, Ordering::SeqCst);
    }

    /// Number of operations waiting for replay.
    pub fn queue_len(&self) -> usize {
        self.lock(&self.queue).len()
    }

    /// Current connectivity status.
    pub fn status(&self) -> SyncStatus {
        *self.lock(&self.status)
    }

    /// Register a listener invoked synchronously on every status value
    /// change (never on no-op transitions). Returns a handle that
    /// removes exactly this listener.
    pub fn on_status_change(
        &self,
        callback: impl Fn(SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        self.broadcaster.subscribe(callback)
    }

    /// When the queue last drained completely, if it has this session.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.lock(&self.last_sync_time)
    }

    /// Seconds since the queue last drained completely.
    pub fn time_since_sync(&self) -> Option<u64> {
        self.last_sync_time()
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
    }

    /// Snapshot of engine state for UI display.
    pub fn status_info(&self) -> StatusInfo {
        let status = self.status();
        let pending = self.queue_len();

        let status_message = match status {
            SyncStatus::Online => "Connected".to_string(),
            SyncStatus::Syncing => "Syncing pending operations...".to_string(),
            SyncStatus::Offline => {
                if pending > 0 {
                    format!("Offline - {} pending operations", pending)
                } else {
                    "Offline".to_string()
                }
            }
        };

        StatusInfo {
            status,
            pending_operations: pending,
            time_since_sync: self.time_since_sync(),
            status_message,
        }
    }

    /// Stop the periodic retry timer, if one is running. Idempotent;
    /// does not abort an in-flight drain pass.
    pub fn dispose(&self) {
        if let Some(handle) = self.lock(&self.monitor_task).take() {
            handle.abort();
        }
    }

    /// Transition status, notifying subscribers only on a value change.
    pub(crate) fn set_status(&self, status: SyncStatus) {
        let changed = {
            let mut current = self.lock(&self.status);
            if *current == status {
                false
            } else {
                tracing::debug!(from = current.as_str(), to = status.as_str(), "status change");
                *current = status;
                true
            }
        };
        if changed {
            self.broadcaster.notify(status);
        }
    }

    /// Adopt a monitor task so `dispose` can stop it. Replacing an
    /// existing task aborts the old one.
    pub(crate) fn register_monitor_task(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.lock(&self.monitor_task).replace(handle) {
            previous.abort();
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn make_engine() -> SyncEngine {
        SyncEngine::new(Arc::new(MemorySessionStore::new()))
    }

    /// Apply function that records invocation order and fails for the
    /// entity ids in `failing`.
    fn recording_apply(
        calls: Arc<Mutex<Vec<String>>>,
        failing: Vec<String>,
    ) -> impl Fn(QueuedOperation) -> ApplyFuture + Send + Sync + 'static {
        move |op: QueuedOperation| {
            let calls = calls.clone();
            let failing = failing.clone();
            Box::pin(async move {
                let entity_id = op.entity_id.clone().unwrap_or_default();
                calls.lock().unwrap().push(entity_id.clone());
                if failing.contains(&entity_id) {
                    Err(ApplyError::new("backend unavailable"))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn enqueue_entity(engine: &SyncEngine, entity_id: &str) {
        engine.enqueue(
            OperationKind::Update,
            "user",
            json!({"id": entity_id}),
            Some(entity_id.to_string()),
        );
    }

    // ========== Enqueue Tests ==========

    #[test]
    fn test_new_engine_is_online_and_empty() {
        let engine = make_engine();
        assert_eq!(engine.status(), SyncStatus::Online);
        assert_eq!(engine.queue_len(), 0);
    }

    #[test]
    fn test_enqueue_flips_status_offline() {
        let engine = make_engine();
        enqueue_entity(&engine, "1");

        assert_eq!(engine.status(), SyncStatus::Offline);
        assert_eq!(engine.queue_len(), 1);
    }

    #[test]
    fn test_enqueue_persists_immediately() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = SyncEngine::new(store.clone());
        enqueue_entity(&engine, "1");

        let rebuilt = SyncEngine::new(store);
        assert_eq!(rebuilt.queue_len(), 1);
        assert_eq!(rebuilt.status(), SyncStatus::Offline);
    }

    #[test]
    fn test_enqueue_beyond_capacity_evicts_oldest() {
        let store = Arc::new(MemorySessionStore::new());
        let config = EngineConfig::default().with_max_queue_size(2);
        let engine = SyncEngine::with_config(store, config);

        enqueue_entity(&engine, "a");
        enqueue_entity(&engine, "b");
        enqueue_entity(&engine, "c");

        assert_eq!(engine.queue_len(), 2);
        let snapshot = engine.lock(&engine.queue).snapshot();
        let ids: Vec<_> = snapshot
            .iter()
            .filter_map(|op| op.entity_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    // ========== Drain Pass Tests ==========

    #[tokio::test]
    async fn test_process_queue_without_apply_fn_is_noop() {
        let engine = make_engine();
        enqueue_entity(&engine, "1");

        engine.process_queue().await;

        assert_eq!(engine.queue_len(), 1);
        assert_eq!(engine.status(), SyncStatus::Offline);
    }

    #[tokio::test]
    async fn test_drain_applies_in_fifo_order_and_empties_queue() {
        let engine = make_engine();
        let calls = Arc::new(Mutex::new(Vec::new()));
        engine.initialize(recording_apply(calls.clone(), vec![]));

        for id in ["1", "2", "3"] {
            enqueue_entity(&engine, id);
        }
        engine.process_queue().await;

        assert_eq!(*calls.lock().unwrap(), vec!["1", "2", "3"]);
        assert_eq!(engine.queue_len(), 0);
        assert_eq!(engine.status(), SyncStatus::Online);
        assert!(engine.last_sync_time().is_some());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_only_failed_item() {
        let engine = make_engine();
        let calls = Arc::new(Mutex::new(Vec::new()));
        engine.initialize(recording_apply(calls.clone(), vec!["2".to_string()]));

        for id in ["1", "2", "3"] {
            enqueue_entity(&engine, id);
        }
        engine.process_queue().await;

        // All three attempted, in order.
        assert_eq!(*calls.lock().unwrap(), vec!["1", "2", "3"]);
        // Only the failing one remains, with one recorded attempt.
        assert_eq!(engine.queue_len(), 1);
        let snapshot = engine.lock(&engine.queue).snapshot();
        assert_eq!(snapshot[0].entity_id.as_deref(), Some("2"));
        assert_eq!(snapshot[0].retry_count, 1);
        assert_eq!(engine.status(), SyncStatus::Offline);
    }

    #[tokio::test]
    async fn test_retry_ceiling_drops_operation() {
        let engine = make_engine();
        let calls = Arc::new(Mutex::new(Vec::new()));
        engine.initialize(recording_apply(calls.clone(), vec!["1".to_string()]));

        enqueue_entity(&engine, "1");

        // Four failed passes leave the item with retry_count 1..=4.
        for expected in 1..=4 {
            engine.process_queue().await;
            assert_eq!(engine.queue_len(), 1);
            let snapshot = engine.lock(&engine.queue).snapshot();
            assert_eq!(snapshot[0].retry_count, expected);
        }

        // The fifth failure reaches the ceiling and drops the item.
        engine.process_queue().await;
        assert_eq!(engine.queue_len(), 0);
        assert_eq!(engine.status(), SyncStatus::Online);
        assert_eq!(calls.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_drain_persists_once_after_pass() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = SyncEngine::new(store.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));
        engine.initialize(recording_apply(calls, vec!["2".to_string()]));

        for id in ["1", "2"] {
            enqueue_entity(&engine, id);
        }
        engine.process_queue().await;

        // Persisted state reflects the post-pass queue.
        let rebuilt = SyncEngine::new(store);
        assert_eq!(rebuilt.queue_len(), 1);
        let snapshot = rebuilt.lock(&rebuilt.queue).snapshot();
        assert_eq!(snapshot[0].entity_id.as_deref(), Some("2"));
        assert_eq!(snapshot[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_overlapping_drain_is_noop() {
        let engine = Arc::new(make_engine());
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let apply_gate = gate.clone();
        let apply_calls = calls.clone();
        engine.initialize(move |_op| {
            let gate = apply_gate.clone();
            let calls = apply_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(())
            }
        });

        enqueue_entity(&engine, "1");

        let background = engine.clone();
        let pass = tokio::spawn(async move { background.process_queue().await });

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.status(), SyncStatus::Syncing);

        // Concurrent trigger while the first pass is suspended.
        engine.process_queue().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        pass.await.unwrap();
        assert_eq!(engine.status(), SyncStatus::Online);
    }

    #[tokio::test]
    async fn test_items_enqueued_mid_pass_wait_for_next_pass() {
        let engine = Arc::new(make_engine());
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let apply_gate = gate.clone();
        let apply_calls = calls.clone();
        engine.initialize(move |op: QueuedOperation| {
            let gate = apply_gate.clone();
            let calls = apply_calls.clone();
            async move {
                calls
                    .lock()
                    .unwrap()
                    .push(op.entity_id.clone().unwrap_or_default());
                gate.notified().await;
                Ok(())
            }
        });

        enqueue_entity(&engine, "1");
        let background = engine.clone();
        let pass = tokio::spawn(async move { background.process_queue().await });

        while calls.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        enqueue_entity(&engine, "2");
        gate.notify_one();
        pass.await.unwrap();

        // "2" arrived after the snapshot: not attempted, still queued.
        assert_eq!(*calls.lock().unwrap(), vec!["1"]);
        assert_eq!(engine.queue_len(), 1);
        assert_eq!(engine.status(), SyncStatus::Offline);
    }

    // ========== Status & Listener Tests ==========

    #[tokio::test]
    async fn test_status_passes_through_syncing() {
        let engine = make_engine();
        let calls = Arc::new(Mutex::new(Vec::new()));
        engine.initialize(recording_apply(calls, vec![]));

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        let _sub = engine.on_status_change(move |status| sink.lock().unwrap().push(status));

        enqueue_entity(&engine, "1");
        engine.process_queue().await;

        assert_eq!(
            *transitions.lock().unwrap(),
            vec![SyncStatus::Offline, SyncStatus::Syncing, SyncStatus::Online]
        );
    }

    #[tokio::test]
    async fn test_no_notification_for_noop_transitions() {
        let engine = make_engine();
        let calls = Arc::new(Mutex::new(Vec::new()));
        engine.initialize(recording_apply(calls, vec![]));

        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        let _sub = engine.on_status_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Empty queue: no status change, no notification.
        engine.process_queue().await;
        assert_eq!(notifications.load(Ordering::SeqCst), 0);

        // Two enqueues: only the first transitions online -> offline.
        enqueue_entity(&engine, "1");
        enqueue_entity(&engine, "2");
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribed_listener_is_silent() {
        let engine = make_engine();
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        let sub = engine.on_status_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        enqueue_entity(&engine, "1");

        assert_eq!(notifications.load(Ordering::SeqCst), 0);
    }

    // ========== Status Info Tests ==========

    #[tokio::test]
    async fn test_status_info_messages() {
        let engine = make_engine();

        let info = engine.status_info();
        assert_eq!(info.status, SyncStatus::Online);
        assert_eq!(info.status_message, "Connected");
        assert!(!info.should_show());

        enqueue_entity(&engine, "1");
        enqueue_entity(&engine, "2");
        let info = engine.status_info();
        assert_eq!(info.pending_operations, 2);
        assert_eq!(info.status_message, "Offline - 2 pending operations");
        assert!(info.should_show());
    }

    // ========== Persistence Round-Trip Tests ==========

    #[tokio::test]
    async fn test_restart_preserves_items_order_and_retries() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = SyncEngine::new(store.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));
        engine.initialize(recording_apply(
            calls,
            vec!["1".into(), "2".into(), "3".into()],
        ));

        for id in ["1", "2", "3"] {
            enqueue_entity(&engine, id);
        }
        // One all-failing pass records a retry on each item.
        engine.process_queue().await;

        // Simulated process restart.
        let rebuilt = SyncEngine::new(store);
        assert_eq!(rebuilt.queue_len(), 3);
        let snapshot = rebuilt.lock(&rebuilt.queue).snapshot();
        let ids: Vec<_> = snapshot
            .iter()
            .filter_map(|op| op.entity_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(snapshot.iter().all(|op| op.retry_count == 1));
    }

    // ========== Dispose Tests ==========

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let engine = make_engine();
        engine.register_monitor_task(tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }));

        engine.dispose();
        engine.dispose();
    }
}
