//! The unit of buffered work: a mutating operation issued while the
//! backend was unreachable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Intent of a buffered mutation.
///
/// Describes what the caller meant to do to the entity, not the
/// transport verb used to do it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Short name for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

/// A mutating operation buffered for later replay.
///
/// Created only by the engine's `enqueue`; leaves the queue only by
/// successful application during a drain pass or by exhausting its
/// retries. The payload is opaque to the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier, generated at enqueue time. Used for
    /// idempotent removal after replay.
    pub id: Uuid,
    /// Creation time. Diagnostics only; replay order is FIFO by
    /// insertion, never by timestamp.
    pub timestamp: DateTime<Utc>,
    /// What the caller intended to do.
    pub kind: OperationKind,
    /// Caller-defined name of the logical resource kind.
    pub entity_type: String,
    /// Identifier of the target resource; absent for creates.
    pub entity_id: Option<String>,
    /// Opaque payload; never inspected or validated by the engine.
    pub data: serde_json::Value,
    /// Number of failed replay attempts so far.
    pub retry_count: u32,
}

impl QueuedOperation {
    /// Create a new operation with a fresh id and a zeroed retry count.
    pub fn new(
        kind: OperationKind,
        entity_type: impl Into<String>,
        data: serde_json::Value,
        entity_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            entity_type: entity_type.into(),
            entity_id,
            data,
            retry_count: 0,
        }
    }

    /// Short human-readable description for diagnostics.
    pub fn describe(&self) -> String {
        match &self.entity_id {
            Some(entity_id) => format!("{} {} {}", self.kind.as_str(), self.entity_type, entity_id),
            None => format!("{} {}", self.kind.as_str(), self.entity_type),
        }
    }
}
