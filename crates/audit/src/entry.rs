use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use lendstock_core::{AggregateId, UserId};

/// One immutable audit record: who changed what, from which state to which.
///
/// `old_value`/`new_value` are serialized snapshots of the touched entity;
/// `old_value` is `None` when the entity was created by the operation.
/// `action` is the stable event-type identifier of the mutation (e.g.
/// "lending.loan.approved"), which ties the entry back to the committed
/// event without enforcing referential integrity — an entry may outlive the
/// entity it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub actor: UserId,
    pub target_table: String,
    pub target_id: AggregateId,
    pub action: String,
    pub old_value: Option<JsonValue>,
    pub new_value: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: UserId,
        target_table: impl Into<String>,
        target_id: AggregateId,
        action: impl Into<String>,
        old_value: Option<JsonValue>,
        new_value: JsonValue,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            actor,
            target_table: target_table.into(),
            target_id,
            action: action.into(),
            old_value,
            new_value,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn creation_entries_have_no_old_value() {
        let entry = AuditEntry::new(
            UserId::new(),
            "stock_items",
            AggregateId::new(),
            "ledger.item.registered",
            None,
            json!({"on_shelf": 5}),
            Utc::now(),
        );

        assert!(entry.old_value.is_none());
        assert_eq!(entry.target_table, "stock_items");
        assert_eq!(entry.new_value["on_shelf"], 5);
    }
}
