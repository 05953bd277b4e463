//! Mutation queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Kind of write carried by a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOperation {
    /// Record created locally
    Insert,
    /// Record changed locally
    Update,
    /// Record removed locally
    Delete,
}

impl QueueOperation {
    /// Database/wire representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Fold a superseding operation into an earlier one for the same record.
    ///
    /// The later operation wins, except that an update on top of a not yet
    /// transmitted insert is still an insert for the backend.
    #[must_use]
    pub const fn coalesce(earlier: Self, later: Self) -> Self {
        match (earlier, later) {
            (Self::Insert, Self::Update) => Self::Insert,
            (_, later) => later,
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown queue operation '{other}'"
            ))),
        }
    }
}

/// Transmission state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    /// Waiting for its next retry window
    Pending,
    /// Claimed by a drain and on its way to the backend
    InFlight,
    /// Retries exhausted; waits for an operator retry
    Failed,
}

impl QueueEntryStatus {
    /// Database representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueEntryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown queue status '{other}'"))),
        }
    }
}

/// A pending write waiting to be transmitted to the central store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Queue row identifier (creation order)
    pub id: i64,
    /// Local table the record lives in
    pub table_name: String,
    /// Primary key of the record
    pub record_id: String,
    /// Write kind
    pub operation: QueueOperation,
    /// Serialized record
    pub payload: serde_json::Value,
    /// Version the write was based on (versioned entities only)
    pub base_version: Option<i64>,
    /// Transmission state
    pub status: QueueEntryStatus,
    /// Failed transmission attempts so far
    pub attempts: u32,
    /// Last transmission error
    pub error_message: Option<String>,
    /// Earliest time of the next attempt (Unix ms)
    pub next_retry_at: i64,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
}

impl QueueEntry {
    /// Whether the entry must pass through the conflict resolver
    pub const fn is_versioned(&self) -> bool {
        self.base_version.is_some()
    }
}

/// A single mutation as handed to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMutation {
    /// Queue row the mutation came from
    pub queue_id: i64,
    pub table_name: String,
    pub record_id: String,
    pub operation: QueueOperation,
    pub payload: serde_json::Value,
}

impl From<&QueueEntry> for OutgoingMutation {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            queue_id: entry.id,
            table_name: entry.table_name.clone(),
            record_id: entry.record_id.clone(),
            operation: entry.operation,
            payload: entry.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesce_keeps_insert_under_update() {
        assert_eq!(
            QueueOperation::coalesce(QueueOperation::Insert, QueueOperation::Update),
            QueueOperation::Insert
        );
    }

    #[test]
    fn coalesce_later_operation_wins_otherwise() {
        assert_eq!(
            QueueOperation::coalesce(QueueOperation::Insert, QueueOperation::Delete),
            QueueOperation::Delete
        );
        assert_eq!(
            QueueOperation::coalesce(QueueOperation::Update, QueueOperation::Update),
            QueueOperation::Update
        );
        assert_eq!(
            QueueOperation::coalesce(QueueOperation::Delete, QueueOperation::Insert),
            QueueOperation::Insert
        );
    }

    #[test]
    fn operation_parse_rejects_unknown() {
        assert_eq!(
            "update".parse::<QueueOperation>().unwrap(),
            QueueOperation::Update
        );
        assert!("upsert".parse::<QueueOperation>().is_err());
    }

    #[test]
    fn entry_is_versioned_only_with_base_version() {
        let mut entry = QueueEntry {
            id: 1,
            table_name: "customers".to_string(),
            record_id: "c-1".to_string(),
            operation: QueueOperation::Update,
            payload: serde_json::json!({"name": "Ada"}),
            base_version: None,
            status: QueueEntryStatus::Pending,
            attempts: 0,
            error_message: None,
            next_retry_at: 0,
            created_at: 0,
        };
        assert!(!entry.is_versioned());
        entry.base_version = Some(3);
        assert!(entry.is_versioned());
    }
}
