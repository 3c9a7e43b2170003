//! Connectivity status values and UI-facing snapshots.

use serde::{Deserialize, Serialize};

/// Three-valued connectivity indicator broadcast to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No pending work, last known connectivity good.
    Online,
    /// A drain pass is actively replaying the queue.
    Syncing,
    /// Pending work exists or connectivity is known bad.
    Offline,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Online
    }
}

impl SyncStatus {
    /// Short name for log fields and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Online => "online",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Offline => "offline",
        }
    }

    /// Whether the status is `Online`.
    pub fn is_online(&self) -> bool {
        matches!(self, SyncStatus::Online)
    }

    /// Whether the status is `Offline`.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncStatus::Offline)
    }

    /// Whether a drain pass is in flight.
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }
}

/// Snapshot of engine state for UI display.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Current connectivity status.
    pub status: SyncStatus,
    /// Number of operations waiting for replay.
    pub pending_operations: usize,
    /// Seconds since the queue last drained completely, if it ever has.
    pub time_since_sync: Option<u64>,
    /// Ready-made display message.
    pub status_message: String,
}

impl StatusInfo {
    /// Whether an indicator should be shown: anything other than a
    /// clean online state is worth surfacing.
    pub fn should_show(&self) -> bool {
        !self.status.is_online() || self.pending_operations > 0
    }

    /// Format time since the last full drain for display.
    pub fn formatted_time_since_sync(&self) -> Option<String> {
        self.time_since_sync.map(|seconds| {
            if seconds < 60 {
                format!("{}s ago", seconds)
            } else if seconds < 3600 {
                format!("{}m ago", seconds / 60)
            } else if seconds < 86400 {
                format!("{}h ago", seconds / 3600)
            } else {
                format!("{}d ago", seconds / 86400)
            }
        })
    }
}
