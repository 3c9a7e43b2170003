//! Session-scoped persistence for the pending queue.
//!
//! The engine persists through a narrow key-value seam supplied by the
//! host. Persistence is best-effort: read and write failures are
//! absorbed here and reported through diagnostics, never propagated to
//! enqueue or drain logic.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{EngineError, EngineResult};
use crate::operation::QueuedOperation;

/// Namespaced key under which the pending queue is persisted.
pub const QUEUE_STORAGE_KEY: &str = "sync_engine.pending_operations";

/// Per-session key-value store.
///
/// Both methods absorb their own failures: `get` answers `None` and
/// `set` silently drops the write when the underlying store misbehaves.
/// Storage is scoped to the current session, not indefinite durable
/// storage.
pub trait SessionStore: Send + Sync {
    /// Read the value for a key, if present and readable.
    fn get(&self, key: &str) -> Option<String>;

    /// Write the value for a key. Best-effort.
    fn set(&self, key: &str, value: &str);
}

/// In-memory session store.
///
/// The default for tests and for hosts without a persistence facility;
/// contents live exactly as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
    }
}

/// File-backed session store: one file per key under a session
/// directory. Point it at a temporary directory to match per-session
/// lifetime.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read(&self, key: &str) -> EngineResult<String> {
        std::fs::read_to_string(self.path_for(key))
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    fn write(&self, key: &str, value: &str) -> EngineResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| EngineError::Storage(e.to_string()))?;
        std::fs::write(self.path_for(key), value)
            .map_err(|e| EngineError::Storage(e.to_string()))
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        // A missing file is the routine first-run case; not worth a log.
        self.read(key).ok()
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.write(key, value) {
            tracing::warn!(key, "session store write failed: {}", e);
        }
    }
}

/// Serialization layer binding the pending queue to its storage key.
pub struct QueueStore {
    store: Arc<dyn SessionStore>,
    key: String,
}

impl QueueStore {
    /// Create a queue store using the default storage key.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_key(store, QUEUE_STORAGE_KEY)
    }

    /// Create a queue store with a custom storage key.
    pub fn with_key(store: Arc<dyn SessionStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Restore the persisted queue. A missing key or corrupt payload
    /// yields an empty queue rather than an error.
    pub fn load(&self) -> VecDeque<QueuedOperation> {
        match self.try_load() {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("discarding corrupt pending-operation state: {}", e);
                VecDeque::new()
            }
        }
    }

    /// Persist the full queue. Best-effort; serialization failures are
    /// logged and swallowed, storage failures are absorbed by the store.
    pub fn save(&self, items: &VecDeque<QueuedOperation>) {
        if let Err(e) = self.try_save(items) {
            tracing::warn!("failed to persist pending queue: {}", e);
        }
    }

    fn try_load(&self) -> EngineResult<VecDeque<QueuedOperation>> {
        let Some(raw) = self.store.get(&self.key) else {
            return Ok(VecDeque::new());
        };
        serde_json::from_str(&raw).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    fn try_save(&self, items: &VecDeque<QueuedOperation>) -> EngineResult<()> {
        let json = serde_json::to_string(items)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        self.store.set(&self.key, &json);
        Ok(())
    }
}
