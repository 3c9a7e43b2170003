//! Offline-tolerant write queue and connectivity state machine.
//!
//! This crate buffers mutating operations issued while the backend is
//! unreachable, replays them once connectivity returns, and broadcasts
//! a three-valued connectivity status to interested observers. It is a
//! library-level component embedded in a larger data-access layer: the
//! actual backend call is an opaque async apply function supplied by
//! the caller.
//!
//! # Modules
//!
//! - `operation`: the unit of buffered work
//! - `queue`: bounded in-memory queue with FIFO eviction
//! - `store`: session-scoped persistence for the queue
//! - `status`: connectivity status values and UI snapshots
//! - `broadcast`: pub/sub fan-out of status transitions
//! - `engine`: enqueue, replay, retry accounting, status transitions
//! - `monitor`: periodic and event-driven replay triggers
//! - `error`: error types
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use sync_engine::{MemorySessionStore, OperationKind, SyncEngine, SyncStatus};
//!
//! let engine = SyncEngine::new(Arc::new(MemorySessionStore::new()));
//!
//! // A remote call failed; buffer the mutation for later replay.
//! engine.enqueue(
//!     OperationKind::Update,
//!     "user",
//!     json!({"name": "Ada"}),
//!     Some("42".to_string()),
//! );
//!
//! assert_eq!(engine.status(), SyncStatus::Offline);
//! assert_eq!(engine.queue_len(), 1);
//! ```
//!
//! Replay requires an apply function and a trigger:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use sync_engine::{AlwaysOnline, ConnectivityMonitor, MemorySessionStore, SyncEngine};
//! # async fn example() {
//! let engine = Arc::new(SyncEngine::new(Arc::new(MemorySessionStore::new())));
//! engine.initialize(|op| async move {
//!     // Perform the real backend call for `op` here.
//!     let _ = op;
//!     Ok(())
//! });
//!
//! let monitor = ConnectivityMonitor::new(engine.clone(), Arc::new(AlwaysOnline));
//! monitor.start();
//! # }
//! ```

pub mod broadcast;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod operation;
pub mod queue;
pub mod status;
pub mod store;

// Re-export commonly used types
pub use broadcast::{StatusBroadcaster, StatusSubscription};
pub use engine::{ApplyFn, ApplyFuture, EngineConfig, SyncEngine};
pub use error::{ApplyError, EngineError, EngineResult};
pub use monitor::{AlwaysOnline, ConnectivityMonitor, ConnectivityProbe, MonitorConfig};
pub use operation::{OperationKind, QueuedOperation};
pub use queue::PendingQueue;
pub use status::{StatusInfo, SyncStatus};
pub use store::{
    FileSessionStore, MemorySessionStore, QueueStore, SessionStore, QUEUE_STORAGE_KEY,
};
