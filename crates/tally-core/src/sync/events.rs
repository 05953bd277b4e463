//! Queue lifecycle events

use serde::Serialize;

use crate::models::QueueOperation;

/// Broadcast whenever a queue entry changes state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued {
        queue_id: i64,
        table_name: String,
        record_id: String,
        operation: QueueOperation,
    },
    Transmitted {
        queue_id: i64,
        table_name: String,
        record_id: String,
        remote_id: Option<String>,
    },
    /// Transmission failed; the entry waits for `next_retry_at`
    Failed {
        queue_id: i64,
        table_name: String,
        record_id: String,
        attempts: u32,
        next_retry_at: i64,
        message: String,
    },
    /// Retries used up; the entry waits for an operator retry
    Exhausted {
        queue_id: i64,
        table_name: String,
        record_id: String,
        attempts: u32,
        message: String,
    },
    /// Orphaned financial rows put back on the queue
    Requeued { count: u64 },
    /// Failed entries reset by an operator
    Retried { count: u64 },
    /// A versioned write turned into a conflict record
    Conflicted {
        queue_id: i64,
        table_name: String,
        record_id: String,
        conflict_id: i64,
    },
}
