//! Mutation queue repository implementation

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{MoneyTable, QueueEntry, QueueEntryStatus, QueueOperation};

const ENTRY_COLUMNS: &str = "id, table_name, record_id, operation, payload, base_version, status,
    attempts, error_message, next_retry_at, created_at";

/// Bookkeeping applied to an entry whose transmission failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    /// Attempts including the one that just failed
    pub attempts: u32,
    pub next_retry_at: i64,
    pub message: String,
    /// Retries are used up; the entry parks as failed
    pub exhausted: bool,
}

/// Entry counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub failed: u64,
}

impl QueueStats {
    pub const fn total(&self) -> u64 {
        self.pending + self.in_flight + self.failed
    }
}

/// Trait for mutation queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Insert or replace the waiting entry for a record
    async fn upsert(
        &self,
        table_name: &str,
        record_id: &str,
        operation: QueueOperation,
        payload: &serde_json::Value,
        base_version: Option<i64>,
        now: i64,
    ) -> Result<QueueEntry>;

    /// Get an entry by id
    async fn get(&self, id: i64) -> Result<Option<QueueEntry>>;

    /// Move up to `limit` eligible entries to in-flight, oldest first
    async fn claim_eligible(&self, now: i64, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Remove an entry the backend accepted
    async fn complete(&self, id: i64) -> Result<()>;

    /// Hand an in-flight entry back to the queue
    ///
    /// `None` releases the claim without charging an attempt.
    async fn release(&self, id: i64, failure: Option<&FailureUpdate>) -> Result<()>;

    /// Point the waiting entry of a versioned record at a newer base version
    async fn rebase_waiting(&self, table_name: &str, record_id: &str, base_version: i64)
        -> Result<bool>;

    /// Whether a not-in-flight entry exists for the record
    async fn has_waiting(&self, table_name: &str, record_id: &str) -> Result<bool>;

    /// Whether the queue holds no entries at all
    async fn is_empty(&self) -> Result<bool>;

    /// Entry counts per status
    async fn stats(&self) -> Result<QueueStats>;

    /// Entries in creation order
    async fn list(&self, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Reset failed entries to pending
    async fn retry_all_failed(&self, now: i64) -> Result<u64>;

    /// Enqueue money-bearing rows that lack a remote id and a queue entry
    async fn requeue_orphaned(&self, now: i64) -> Result<u64>;

    /// Release every in-flight entry left behind by an interrupted drain
    async fn recover_in_flight(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<QueueEntry> {
        let operation: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let status: String = row.get(6)?;
        Ok(QueueEntry {
            id: row.get(0)?,
            table_name: row.get(1)?,
            record_id: row.get(2)?,
            operation: operation.parse()?,
            payload: serde_json::from_str(&payload)?,
            base_version: row.get(5)?,
            status: status.parse()?,
            attempts: u32::try_from(row.get::<i64>(7)?).unwrap_or(u32::MAX),
            error_message: row.get(8)?,
            next_retry_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    async fn collect(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<QueueEntry>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    async fn waiting_entry(&self, table_name: &str, record_id: &str) -> Result<Option<QueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE table_name = ? AND record_id = ? AND status != 'in_flight'"
        );
        Ok(self
            .collect(&sql, [table_name, record_id])
            .await?
            .into_iter()
            .next())
    }

    /// Unsynced rows of a money-bearing table with their queue payload
    fn orphan_select(table: MoneyTable) -> &'static str {
        // Payloads mirror the serde layout of the ledger models
        match table {
            MoneyTable::Orders => {
                "SELECT r.id AS id, json_object('id', r.id, 'business_date', r.business_date,
                    'status', r.status, 'amount_minor', r.amount_minor, 'staff_id', r.staff_id,
                    'remote_id', NULL, 'created_at', r.created_at,
                    'updated_at', r.updated_at) AS payload
                 FROM orders r WHERE r.remote_id IS NULL OR r.remote_id = ''"
            }
            MoneyTable::Payments => {
                "SELECT r.id AS id, json_object('id', r.id, 'order_id', r.order_id,
                    'business_date', r.business_date, 'method', r.method,
                    'amount_minor', r.amount_minor, 'remote_id', NULL,
                    'created_at', r.created_at) AS payload
                 FROM order_payments r WHERE r.remote_id IS NULL OR r.remote_id = ''"
            }
            MoneyTable::DriverEarnings => {
                "SELECT r.id AS id, json_object('id', r.id, 'shift_id', r.shift_id,
                    'order_id', r.order_id, 'business_date', r.business_date,
                    'amount_minor', r.amount_minor, 'remote_id', NULL,
                    'created_at', r.created_at) AS payload
                 FROM driver_earnings r WHERE r.remote_id IS NULL OR r.remote_id = ''"
            }
            MoneyTable::Expenses => {
                "SELECT r.id AS id, json_object('id', r.id, 'shift_id', r.shift_id,
                    'business_date', r.business_date, 'description', r.description,
                    'amount_minor', r.amount_minor, 'remote_id', NULL,
                    'created_at', r.created_at) AS payload
                 FROM shift_expenses r WHERE r.remote_id IS NULL OR r.remote_id = ''"
            }
        }
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn upsert(
        &self,
        table_name: &str,
        record_id: &str,
        operation: QueueOperation,
        payload: &serde_json::Value,
        base_version: Option<i64>,
        now: i64,
    ) -> Result<QueueEntry> {
        if table_name.trim().is_empty() || record_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "queue entries need a table name and a record id".to_string(),
            ));
        }
        let payload_json = serde_json::to_string(payload)?;

        let id = if let Some(existing) = self.waiting_entry(table_name, record_id).await? {
            // Attempts, schedule and status carry over to the replacement
            let merged = QueueOperation::coalesce(existing.operation, operation);
            self.conn
                .execute(
                    "UPDATE sync_queue SET operation = ?, payload = ?, base_version = ? WHERE id = ?",
                    params![merged.as_str(), payload_json, base_version, existing.id],
                )
                .await?;
            existing.id
        } else {
            self.conn
                .execute(
                    "INSERT INTO sync_queue
                        (table_name, record_id, operation, payload, base_version, status,
                         attempts, next_retry_at, created_at)
                     VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)",
                    params![
                        table_name,
                        record_id,
                        operation.as_str(),
                        payload_json,
                        base_version,
                        now,
                        now
                    ],
                )
                .await?;
            self.conn.last_insert_rowid()
        };

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("queue entry {id}")))
    }

    async fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?");
        Ok(self.collect(&sql, [id]).await?.into_iter().next())
    }

    async fn claim_eligible(&self, now: i64, limit: usize) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue q
             WHERE q.status = 'pending' AND q.next_retry_at <= ?
               AND NOT EXISTS (
                   SELECT 1 FROM sync_queue f
                   WHERE f.status = 'in_flight'
                     AND f.table_name = q.table_name AND f.record_id = q.record_id
               )
             ORDER BY q.id
             LIMIT ?"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let candidates = self.collect(&sql, params![now, limit]).await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for mut entry in candidates {
            let changed = self
                .conn
                .execute(
                    "UPDATE sync_queue SET status = 'in_flight' WHERE id = ? AND status = 'pending'",
                    [entry.id],
                )
                .await?;
            if changed == 1 {
                entry.status = QueueEntryStatus::InFlight;
                claimed.push(entry);
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id])
            .await?;
        Ok(())
    }

    async fn release(&self, id: i64, failure: Option<&FailureUpdate>) -> Result<()> {
        let Some(entry) = self.get(id).await? else {
            return Ok(());
        };
        if entry.status != QueueEntryStatus::InFlight {
            return Ok(());
        }

        let (attempts, next_retry_at, message, exhausted) = match failure {
            Some(update) => (
                update.attempts,
                update.next_retry_at,
                Some(update.message.clone()),
                update.exhausted,
            ),
            None => (entry.attempts, entry.next_retry_at, entry.error_message.clone(), false),
        };
        let status = if exhausted {
            QueueEntryStatus::Failed
        } else {
            QueueEntryStatus::Pending
        };

        // A write made while this entry was in flight supersedes its payload
        let (operation, payload, base_version) =
            match self.waiting_entry(&entry.table_name, &entry.record_id).await? {
                Some(successor) => {
                    self.conn
                        .execute("DELETE FROM sync_queue WHERE id = ?", [successor.id])
                        .await?;
                    (
                        QueueOperation::coalesce(entry.operation, successor.operation),
                        successor.payload,
                        successor.base_version,
                    )
                }
                None => (entry.operation, entry.payload, entry.base_version),
            };

        self.conn
            .execute(
                "UPDATE sync_queue
                 SET operation = ?, payload = ?, base_version = ?, status = ?, attempts = ?,
                     next_retry_at = ?, error_message = ?
                 WHERE id = ?",
                params![
                    operation.as_str(),
                    serde_json::to_string(&payload)?,
                    base_version,
                    status.as_str(),
                    i64::from(attempts),
                    next_retry_at,
                    message,
                    id
                ],
            )
            .await?;
        Ok(())
    }

    async fn rebase_waiting(
        &self,
        table_name: &str,
        record_id: &str,
        base_version: i64,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE sync_queue SET base_version = ?
                 WHERE table_name = ? AND record_id = ? AND status != 'in_flight'
                   AND base_version IS NOT NULL",
                params![base_version, table_name, record_id],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn has_waiting(&self, table_name: &str, record_id: &str) -> Result<bool> {
        Ok(self.waiting_entry(table_name, record_id).await?.is_some())
    }

    async fn is_empty(&self) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT EXISTS(SELECT 1 FROM sync_queue)", ())
            .await?;
        let exists = match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        };
        Ok(!exists)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM sync_queue GROUP BY status",
                (),
            )
            .await?;
        let mut stats = QueueStats::default();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count = u64::try_from(row.get::<i64>(1)?).unwrap_or_default();
            match status.parse::<QueueEntryStatus>()? {
                QueueEntryStatus::Pending => stats.pending = count,
                QueueEntryStatus::InFlight => stats.in_flight = count,
                QueueEntryStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    async fn list(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM sync_queue ORDER BY id LIMIT ?");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.collect(&sql, [limit]).await
    }

    async fn retry_all_failed(&self, now: i64) -> Result<u64> {
        let reset = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET status = 'pending', attempts = 0, next_retry_at = ?
                 WHERE status = 'failed'",
                [now],
            )
            .await?;
        Ok(reset)
    }

    async fn requeue_orphaned(&self, now: i64) -> Result<u64> {
        let mut requeued = 0;
        for table in MoneyTable::ALL {
            let name = table.table_name();
            let sql = format!(
                "INSERT INTO sync_queue
                    (table_name, record_id, operation, payload, status, attempts,
                     next_retry_at, created_at)
                 SELECT '{name}', orphan.id, 'insert', orphan.payload, 'pending', 0, ?1, ?1
                 FROM ({select}) AS orphan
                 WHERE NOT EXISTS (
                     SELECT 1 FROM sync_queue q
                     WHERE q.table_name = '{name}' AND q.record_id = orphan.id
                 )",
                select = Self::orphan_select(table),
            );
            requeued += self.conn.execute(&sql, [now]).await?;
        }
        Ok(requeued)
    }

    async fn recover_in_flight(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM sync_queue WHERE status = 'in_flight' ORDER BY id",
                (),
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }
        drop(rows);

        for id in &ids {
            self.release(*id, None).await?;
        }
        Ok(ids.len() as u64)
    }
}
