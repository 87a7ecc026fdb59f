//! # Audit Trail
//!
//! Append-only record of every state-changing ledger operation, with
//! before/after snapshots for forensic reconstruction. Records are never
//! mutated or deleted; the store only appends, inside the same atomic
//! unit as the change being recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_core::Actor;

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record identifier.
    pub id: Uuid,
    /// The operation performed ("milestone.approve", "wallet.freeze", ...).
    pub action: String,
    /// Who performed it.
    pub actor: Actor,
    /// The entity kind ("milestone", "wallet", ...).
    pub entity_kind: String,
    /// Display form of the entity identifier.
    pub entity_id: String,
    /// JSON snapshot before the change, if the entity existed.
    pub before: Option<serde_json::Value>,
    /// JSON snapshot after the change.
    pub after: Option<serde_json::Value>,
    /// Correlates all records written by one atomic unit.
    pub trace_id: Uuid,
    /// When the record was written (UTC).
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a new audit record stamped with the current time.
    pub fn new(
        action: impl Into<String>,
        actor: Actor,
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
        trace_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            actor,
            entity_kind: entity_kind.into(),
            entity_id: entity_id.into(),
            before,
            after,
            trace_id,
            at: Utc::now(),
        }
    }
}
