//! Shared database service wrapper used by the engine components.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::db::{
    begin, finish, CloseCommit, CloseRepository, ConflictRepository, Database, EntityRepository,
    FailureUpdate, LedgerRepository, LibSqlCloseRepository, LibSqlConflictRepository,
    LibSqlEntityRepository, LibSqlLedgerRepository, LibSqlQueueRepository,
    LibSqlSettingsRepository, PreconditionCounts, QueueRepository, QueueStats,
    SettingsRepository, UnsyncedCounts, LAST_BUSINESS_DATE_KEY, LAST_CLOSE_AT_KEY,
    SESSION_PREFIX,
};
use crate::models::{
    ConflictRecord, DrawerSession, LedgerRecord, MoneyTable, Order, QueueEntry, QueueOperation,
    ResolutionStrategy, StaffShift, TerminalTotals, VersionedEntity,
};
use crate::Result;

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// Claims left in flight by a previous process are released.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        let service = Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        };
        let recovered = service.recover_in_flight().await?;
        if recovered > 0 {
            tracing::warn!("Released {recovered} queue claim(s) left by an interrupted drain");
        }
        Ok(service)
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Path of the backing file, if any
    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    // Mutation queue

    /// Insert or replace the waiting queue entry of a record.
    pub async fn enqueue(
        &self,
        table_name: &str,
        record_id: &str,
        operation: QueueOperation,
        payload: &serde_json::Value,
        base_version: Option<i64>,
        now: i64,
    ) -> Result<QueueEntry> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result = LibSqlQueueRepository::new(conn)
            .upsert(table_name, record_id, operation, payload, base_version, now)
            .await;
        finish(conn, result).await
    }

    /// Claim up to `limit` eligible entries for transmission.
    pub async fn claim_eligible(&self, now: i64, limit: usize) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result = LibSqlQueueRepository::new(conn)
            .claim_eligible(now, limit)
            .await;
        finish(conn, result).await
    }

    /// Remove an accepted entry and stamp the source row with its remote id.
    pub async fn complete_entry(&self, entry: &QueueEntry, remote_id: Option<&str>) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            LibSqlQueueRepository::new(conn).complete(entry.id).await?;
            if let Some(remote_id) = remote_id {
                LibSqlLedgerRepository::new(conn)
                    .set_remote_id(&entry.table_name, &entry.record_id, remote_id)
                    .await?;
            }
            Ok(())
        }
        .await;
        finish(conn, result).await
    }

    /// Hand an in-flight entry back; `None` charges no attempt.
    pub async fn release_entry(&self, id: i64, failure: Option<&FailureUpdate>) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result = LibSqlQueueRepository::new(conn).release(id, failure).await;
        finish(conn, result).await
    }

    pub async fn queue_entry(&self, id: i64) -> Result<Option<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).get(id).await
    }

    pub async fn queue_has_waiting(&self, table_name: &str, record_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .has_waiting(table_name, record_id)
            .await
    }

    pub async fn queue_is_empty(&self) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).is_empty().await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).stats().await
    }

    pub async fn queue_entries(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).list(limit).await
    }

    pub async fn retry_all_failed(&self, now: i64) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .retry_all_failed(now)
            .await
    }

    pub async fn requeue_orphaned(&self, now: i64) -> Result<u64> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result = LibSqlQueueRepository::new(conn).requeue_orphaned(now).await;
        finish(conn, result).await
    }

    pub async fn recover_in_flight(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result = LibSqlQueueRepository::new(conn).recover_in_flight().await;
        finish(conn, result).await
    }

    // Ledger

    /// Store a ledger row and queue it for the backend in one transaction.
    pub async fn save_and_enqueue(
        &self,
        record: &LedgerRecord,
        operation: QueueOperation,
        now: i64,
    ) -> Result<QueueEntry> {
        let payload = record.payload()?;
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            LibSqlLedgerRepository::new(conn).save(record).await?;
            LibSqlQueueRepository::new(conn)
                .upsert(
                    record.table_name(),
                    record.record_id(),
                    operation,
                    &payload,
                    None,
                    now,
                )
                .await
        }
        .await;
        finish(conn, result).await
    }

    /// Store a ledger row without queueing it (rows that came from the backend).
    pub async fn save_ledger_record(&self, record: &LedgerRecord) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .save(record)
            .await
    }

    pub async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .get_order(id)
            .await
    }

    pub async fn get_shift(&self, id: &str) -> Result<Option<StaffShift>> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .get_shift(id)
            .await
    }

    pub async fn get_drawer(&self, id: &str) -> Result<Option<DrawerSession>> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .get_drawer(id)
            .await
    }

    pub async fn precondition_counts(&self, date: NaiveDate) -> Result<PreconditionCounts> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .precondition_counts(date)
            .await
    }

    pub async fn unsynced_counts(&self, date: NaiveDate) -> Result<UnsyncedCounts> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .unsynced_counts(date)
            .await
    }

    pub async fn local_totals(&self, table: MoneyTable, date: NaiveDate) -> Result<(u64, i64)> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .local_totals(table, date)
            .await
    }

    pub async fn terminal_totals(&self, date: NaiveDate) -> Result<TerminalTotals> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .terminal_totals(date)
            .await
    }

    pub async fn count_through(&self, table_name: &str, date: NaiveDate) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlLedgerRepository::new(db.connection())
            .count_through(table_name, date)
            .await
    }

    // Versioned entities and conflicts

    pub async fn get_entity(&self, entity_type: &str, id: &str) -> Result<Option<VersionedEntity>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get(entity_type, id)
            .await
    }

    pub async fn list_entities(
        &self,
        entity_type: &str,
        limit: usize,
    ) -> Result<Vec<VersionedEntity>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .list(entity_type, limit)
            .await
    }

    /// Record a local edit of a versioned entity and queue it for the resolver.
    ///
    /// An entity that has never been synced is queued with base version 0.
    pub async fn stage_versioned_write(
        &self,
        entity_type: &str,
        id: &str,
        payload: serde_json::Value,
        updated_by: &str,
        now: i64,
    ) -> Result<QueueEntry> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            let entities = LibSqlEntityRepository::new(conn);
            let (entity, operation) = match entities.get(entity_type, id).await? {
                Some(mut existing) => {
                    existing.payload = payload;
                    existing.updated_by = updated_by.to_string();
                    existing.updated_at = now;
                    (existing, QueueOperation::Update)
                }
                None => (
                    VersionedEntity {
                        entity_type: entity_type.to_string(),
                        id: id.to_string(),
                        version: 0,
                        payload,
                        updated_by: updated_by.to_string(),
                        updated_at: now,
                        last_synced_at: None,
                    },
                    QueueOperation::Insert,
                ),
            };
            entities.upsert(&entity).await?;
            LibSqlQueueRepository::new(conn)
                .upsert(
                    entity_type,
                    id,
                    operation,
                    &entity.payload,
                    Some(entity.version),
                    now,
                )
                .await
        }
        .await;
        finish(conn, result).await
    }

    /// Store the accepted remote state locally, settling its queue entry if any.
    ///
    /// A local edit queued behind the accepted write keeps its payload in the
    /// local copy and is rebased onto the accepted version.
    pub async fn store_accepted_entity(
        &self,
        entity: &VersionedEntity,
        queue_id: Option<i64>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            let queue = LibSqlQueueRepository::new(conn);
            let entities = LibSqlEntityRepository::new(conn);
            if let Some(queue_id) = queue_id {
                queue.complete(queue_id).await?;
            }

            let rebased = queue
                .rebase_waiting(&entity.entity_type, &entity.id, entity.version)
                .await?;
            let local = if rebased {
                entities.get(&entity.entity_type, &entity.id).await?
            } else {
                None
            };
            match local {
                Some(mut local) => {
                    local.version = entity.version;
                    local.last_synced_at = entity.last_synced_at;
                    entities.upsert(&local).await
                }
                None => entities.upsert(entity).await,
            }
        }
        .await;
        finish(conn, result).await
    }

    /// Persist a conflict; the queue entry that produced it is dropped.
    pub async fn store_conflict(
        &self,
        conflict: &ConflictRecord,
        queue_id: Option<i64>,
    ) -> Result<ConflictRecord> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            let stored = LibSqlConflictRepository::new(conn).insert(conflict).await?;
            if let Some(queue_id) = queue_id {
                LibSqlQueueRepository::new(conn).complete(queue_id).await?;
            }
            Ok(stored)
        }
        .await;
        finish(conn, result).await
    }

    pub async fn get_conflict(&self, id: i64) -> Result<Option<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).get(id).await
    }

    pub async fn list_conflicts(
        &self,
        unresolved_only: bool,
        limit: usize,
    ) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list(unresolved_only, limit)
            .await
    }

    /// Mark a conflict resolved, storing the settled entity state with it.
    pub async fn resolve_conflict(
        &self,
        id: i64,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        entity: &VersionedEntity,
        now: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            LibSqlEntityRepository::new(conn).upsert(entity).await?;
            LibSqlConflictRepository::new(conn)
                .mark_resolved(id, strategy, resolved_by, now)
                .await
        }
        .await;
        finish(conn, result).await
    }

    // Settings and day close

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection()).get(key).await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .set(key, value)
            .await
    }

    pub async fn last_close_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .last_close_at()
            .await
    }

    pub async fn last_business_date(&self) -> Result<Option<NaiveDate>> {
        let db = self.db.lock().await;
        let value = LibSqlSettingsRepository::new(db.connection())
            .get(LAST_BUSINESS_DATE_KEY)
            .await?;
        Ok(value.and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok()))
    }

    pub async fn close_commit(&self, date: NaiveDate) -> Result<Option<CloseCommit>> {
        let db = self.db.lock().await;
        LibSqlCloseRepository::new(db.connection()).get(date).await
    }

    pub async fn pending_closes(&self) -> Result<Vec<CloseCommit>> {
        let db = self.db.lock().await;
        LibSqlCloseRepository::new(db.connection()).pending().await
    }

    /// Write the commit marker and advance the last-close timestamp together.
    ///
    /// Returns the stored `last_close_at`, which never moves backwards even
    /// when the wall clock does.
    pub async fn commit_close(&self, commit: &CloseCommit) -> Result<i64> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            let settings = LibSqlSettingsRepository::new(conn);
            let last_close_at = match settings.last_close_at().await? {
                Some(previous) => commit.committed_at.max(previous + 1),
                None => commit.committed_at,
            };
            LibSqlCloseRepository::new(conn).insert(commit).await?;
            settings
                .set(LAST_CLOSE_AT_KEY, &last_close_at.to_string())
                .await?;
            settings
                .set(LAST_BUSINESS_DATE_KEY, &commit.business_date.to_string())
                .await?;
            Ok(last_close_at)
        }
        .await;
        finish(conn, result).await
    }

    pub async fn mark_close_printed(&self, date: NaiveDate) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCloseRepository::new(db.connection())
            .mark_printed(date)
            .await
    }

    /// Clear every ledger row dated on or before `date` and close the marker.
    pub async fn finalize_close(
        &self,
        date: NaiveDate,
        now: i64,
    ) -> Result<BTreeMap<String, u64>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let result: Result<_> = async {
            let deletions = LibSqlLedgerRepository::new(conn).clear_through(date).await?;
            let session_keys = LibSqlSettingsRepository::new(conn)
                .delete_prefix(SESSION_PREFIX)
                .await?;
            tracing::debug!("Cleared {session_keys} session setting(s)");
            LibSqlCloseRepository::new(conn)
                .mark_cleaned(date, &deletions, now)
                .await?;
            Ok(deletions)
        }
        .await;
        finish(conn, result).await
    }

    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute_batch(sql).await?;
        Ok(())
    }
}
