//! Versioned entity model (customers and other shared records)

use serde::{Deserialize, Serialize};

/// Entity type of customer records
pub const CUSTOMER_ENTITY: &str = "customers";

/// A shared record protected by an optimistic version counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedEntity {
    /// Entity kind (also the queue table name)
    pub entity_type: String,
    /// Entity identifier
    pub id: String,
    /// Accepted write count, starting at 1
    pub version: i64,
    /// Serialized record
    pub payload: serde_json::Value,
    /// Actor (terminal or operator) of the last accepted write
    pub updated_by: String,
    /// Last write timestamp (Unix ms)
    pub updated_at: i64,
    /// Last time the local copy matched the backend (Unix ms)
    pub last_synced_at: Option<i64>,
}

impl VersionedEntity {
    /// A first version of a new entity
    pub fn new(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        payload: serde_json::Value,
        updated_by: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            version: 1,
            payload,
            updated_by: updated_by.into(),
            updated_at: chrono::Utc::now().timestamp_millis(),
            last_synced_at: None,
        }
    }
}

/// Request for the backend's version-checked write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedWrite {
    pub entity_type: String,
    pub entity_id: String,
    /// Version the writer read; `None` bypasses the check (forced write)
    pub base_version: Option<i64>,
    pub payload: serde_json::Value,
    pub updated_by: String,
    /// Writer's local modification time (Unix ms)
    pub updated_at: i64,
}

/// Backend verdict on a [`VersionedWrite`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "entity", rename_all = "snake_case")]
pub enum VersionedWriteResult {
    /// Write applied; carries the new remote state
    Accepted(VersionedEntity),
    /// Base version was stale; carries the current remote state
    Rejected(VersionedEntity),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_starts_at_version_one() {
        let entity = VersionedEntity::new(
            CUSTOMER_ENTITY,
            "c-1",
            serde_json::json!({"name": "Ada"}),
            "T1",
        );
        assert_eq!(entity.version, 1);
        assert!(entity.last_synced_at.is_none());
    }

    #[test]
    fn write_result_is_tagged_by_status() {
        let entity = VersionedEntity::new(CUSTOMER_ENTITY, "c-1", serde_json::json!({}), "T1");
        let json = serde_json::to_value(VersionedWriteResult::Rejected(entity)).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["entity"]["id"], "c-1");
    }
}
