//! Durable outbox of local writes and its drain loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

use super::backoff::BackoffPolicy;
use super::conflict::{ConflictResolver, WriteOutcome};
use super::events::QueueEvent;
use crate::backend::{Backend, MutationStatus};
use crate::db::QueueStats;
use crate::models::{OutgoingMutation, QueueEntry, QueueOperation};
use crate::services::DatabaseService;
use crate::util::unix_millis_now;
use crate::Result;

const EVENT_CAPACITY: usize = 256;

/// Summary of one drain run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub transmitted: u64,
    /// Failures that will be retried
    pub failed: u64,
    /// Failures that used up the last attempt
    pub exhausted: u64,
    pub conflicts: u64,
    /// Entries still queued after the run
    pub remaining: u64,
    /// The deadline cut the run short
    pub timed_out: bool,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

/// Progress handed to the drain callback after every batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainProgress {
    pub transmitted: u64,
    pub failed: u64,
    pub elapsed: Duration,
    pub deadline: Duration,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(value.as_millis())
    }
}

enum BatchEnd {
    Settled,
    DeadlineReached,
}

enum Settled {
    Transmitted,
    Failed,
    Exhausted,
    Conflicted,
}

#[derive(Clone)]
pub struct MutationQueue {
    db: DatabaseService,
    backend: Arc<dyn Backend>,
    resolver: ConflictResolver,
    policy: BackoffPolicy,
    batch_size: usize,
    events: broadcast::Sender<QueueEvent>,
}

impl MutationQueue {
    pub fn new(
        db: DatabaseService,
        backend: Arc<dyn Backend>,
        resolver: ConflictResolver,
        policy: BackoffPolicy,
        batch_size: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            backend,
            resolver,
            policy,
            batch_size: batch_size.max(1),
            events,
        }
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        self.events.send(event).ok();
    }

    pub(crate) fn emit_enqueued(&self, entry: &QueueEntry) {
        tracing::debug!(
            "Queued {} {} {} as entry {}",
            entry.operation,
            entry.table_name,
            entry.record_id,
            entry.id
        );
        self.emit(QueueEvent::Enqueued {
            queue_id: entry.id,
            table_name: entry.table_name.clone(),
            record_id: entry.record_id.clone(),
            operation: entry.operation,
        });
    }

    /// Queue a write; replaces the record's waiting entry if there is one
    pub async fn enqueue(
        &self,
        table_name: &str,
        record_id: &str,
        operation: QueueOperation,
        payload: serde_json::Value,
    ) -> Result<QueueEntry> {
        let entry = self
            .db
            .enqueue(table_name, record_id, operation, &payload, None, unix_millis_now())
            .await?;
        self.emit_enqueued(&entry);
        Ok(entry)
    }

    /// Queue a write of a versioned entity read at `base_version`
    pub async fn enqueue_versioned(
        &self,
        table_name: &str,
        record_id: &str,
        operation: QueueOperation,
        payload: serde_json::Value,
        base_version: i64,
    ) -> Result<QueueEntry> {
        let entry = self
            .db
            .enqueue(
                table_name,
                record_id,
                operation,
                &payload,
                Some(base_version),
                unix_millis_now(),
            )
            .await?;
        self.emit_enqueued(&entry);
        Ok(entry)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.db.queue_is_empty().await
    }

    pub async fn len(&self) -> Result<u64> {
        Ok(self.db.queue_stats().await?.total())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.db.queue_stats().await
    }

    /// Oldest entries first, with their last error
    pub async fn entries(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        self.db.queue_entries(limit).await
    }

    /// Put exhausted entries back in line
    pub async fn retry_all_failed(&self) -> Result<u64> {
        let count = self.db.retry_all_failed(unix_millis_now()).await?;
        if count > 0 {
            tracing::info!("Reset {count} failed queue entr{}", plural_y(count));
            self.emit(QueueEvent::Retried { count });
        }
        Ok(count)
    }

    /// Queue financial rows that were never synced and are not queued
    pub async fn requeue_orphaned(&self) -> Result<u64> {
        let count = self.db.requeue_orphaned(unix_millis_now()).await?;
        if count > 0 {
            tracing::warn!("Re-queued {count} orphaned financial record(s)");
            self.emit(QueueEvent::Requeued { count });
        }
        Ok(count)
    }

    /// Release claims an interrupted drain left in flight
    pub async fn recover_in_flight(&self) -> Result<u64> {
        self.db.recover_in_flight().await
    }

    /// Transmit every eligible entry until none is left or `deadline` passes.
    ///
    /// Entries still claimed when the deadline hits go back to the queue
    /// without being charged an attempt.
    pub async fn drain(
        &self,
        deadline: Duration,
        mut on_progress: impl FnMut(&DrainProgress),
    ) -> Result<DrainReport> {
        let started = Instant::now();
        let mut report = DrainReport::default();

        loop {
            if started.elapsed() >= deadline {
                report.timed_out = true;
                break;
            }

            let batch = self
                .db
                .claim_eligible(unix_millis_now(), self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            tracing::debug!(
                "Draining batch of {} queue entr{}",
                batch.len(),
                plural_y(batch.len() as u64)
            );

            let claimed: Vec<i64> = batch.iter().map(|entry| entry.id).collect();
            match self.drain_batch(batch, started, deadline, &mut report).await {
                Ok(BatchEnd::Settled) => {}
                Ok(BatchEnd::DeadlineReached) => {
                    report.timed_out = true;
                    break;
                }
                Err(error) => {
                    self.release_claims(&claimed).await;
                    return Err(error);
                }
            }

            on_progress(&DrainProgress {
                transmitted: report.transmitted,
                failed: report.failed + report.exhausted,
                elapsed: started.elapsed(),
                deadline,
            });
        }

        report.remaining = self.len().await?;
        report.elapsed = started.elapsed();
        if report.timed_out {
            tracing::warn!(
                "Drain stopped at its {}s deadline with {} entr{} queued",
                deadline.as_secs(),
                report.remaining,
                plural_y(report.remaining)
            );
        } else if report.transmitted + report.failed + report.exhausted + report.conflicts > 0 {
            tracing::info!(
                "Drain transmitted {}, failed {}, exhausted {}, conflicted {}; {} remaining",
                report.transmitted,
                report.failed,
                report.exhausted,
                report.conflicts,
                report.remaining
            );
        }
        Ok(report)
    }

    async fn drain_batch(
        &self,
        batch: Vec<QueueEntry>,
        started: Instant,
        deadline: Duration,
        report: &mut DrainReport,
    ) -> Result<BatchEnd> {
        let (versioned, plain): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(QueueEntry::is_versioned);

        let mut pending = versioned.into_iter();
        while let Some(entry) = pending.next() {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                self.release_all(std::iter::once(entry).chain(pending).chain(plain))
                    .await?;
                return Ok(BatchEnd::DeadlineReached);
            };
            match tokio::time::timeout(remaining, self.resolver.propose_queued(&entry)).await {
                Ok(Ok(outcome)) => {
                    let settled = self.settle_versioned(&entry, &outcome);
                    report.record(&settled);
                }
                Ok(Err(error)) => {
                    let settled = self.fail(&entry, &error.to_string()).await?;
                    report.record(&settled);
                }
                Err(_) => {
                    self.release_all(std::iter::once(entry).chain(pending).chain(plain))
                        .await?;
                    return Ok(BatchEnd::DeadlineReached);
                }
            }
        }

        if plain.is_empty() {
            return Ok(BatchEnd::Settled);
        }
        let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
            self.release_all(plain).await?;
            return Ok(BatchEnd::DeadlineReached);
        };
        let mutations: Vec<OutgoingMutation> = plain.iter().map(OutgoingMutation::from).collect();
        match tokio::time::timeout(remaining, self.backend.push_mutations(&mutations)).await {
            Ok(Ok(outcomes)) => {
                let mut by_id: HashMap<i64, MutationStatus> = outcomes
                    .into_iter()
                    .map(|outcome| (outcome.queue_id, outcome.status))
                    .collect();
                for entry in &plain {
                    let settled = match by_id.remove(&entry.id) {
                        Some(MutationStatus::Accepted { remote_id }) => {
                            self.transmitted(entry, Some(remote_id)).await?
                        }
                        Some(MutationStatus::Failed { message }) => {
                            self.fail(entry, &message).await?
                        }
                        None => {
                            self.fail(entry, "backend returned no outcome for entry")
                                .await?
                        }
                    };
                    report.record(&settled);
                }
            }
            Ok(Err(error)) => {
                let message = error.to_string();
                for entry in &plain {
                    let settled = self.fail(entry, &message).await?;
                    report.record(&settled);
                }
            }
            Err(_) => {
                self.release_all(plain).await?;
                return Ok(BatchEnd::DeadlineReached);
            }
        }
        Ok(BatchEnd::Settled)
    }

    /// Hand back whatever a failed batch still holds; settled entries are skipped
    async fn release_claims(&self, claimed: &[i64]) {
        for id in claimed {
            if let Err(error) = self.db.release_entry(*id, None).await {
                tracing::warn!("Could not release claim on queue entry {id}: {error}");
            }
        }
    }

    async fn release_all(&self, entries: impl IntoIterator<Item = QueueEntry>) -> Result<()> {
        for entry in entries {
            self.db.release_entry(entry.id, None).await?;
        }
        Ok(())
    }

    async fn transmitted(&self, entry: &QueueEntry, remote_id: Option<String>) -> Result<Settled> {
        self.db.complete_entry(entry, remote_id.as_deref()).await?;
        tracing::debug!(
            "Transmitted {} {} (entry {})",
            entry.table_name,
            entry.record_id,
            entry.id
        );
        self.emit(QueueEvent::Transmitted {
            queue_id: entry.id,
            table_name: entry.table_name.clone(),
            record_id: entry.record_id.clone(),
            remote_id,
        });
        Ok(Settled::Transmitted)
    }

    fn settle_versioned(&self, entry: &QueueEntry, outcome: &WriteOutcome) -> Settled {
        // The resolver already removed the entry in the same transaction
        match outcome {
            WriteOutcome::Accepted(entity) => {
                self.emit(QueueEvent::Transmitted {
                    queue_id: entry.id,
                    table_name: entry.table_name.clone(),
                    record_id: entry.record_id.clone(),
                    remote_id: Some(entity.id.clone()),
                });
                Settled::Transmitted
            }
            WriteOutcome::Conflict(conflict) => {
                self.emit(QueueEvent::Conflicted {
                    queue_id: entry.id,
                    table_name: entry.table_name.clone(),
                    record_id: entry.record_id.clone(),
                    conflict_id: conflict.id,
                });
                Settled::Conflicted
            }
        }
    }

    async fn fail(&self, entry: &QueueEntry, message: &str) -> Result<Settled> {
        let update = self
            .policy
            .failure(entry.attempts, unix_millis_now(), message);
        self.db.release_entry(entry.id, Some(&update)).await?;

        if update.exhausted {
            tracing::warn!(
                "Giving up on {} {} after {} attempts: {message}",
                entry.table_name,
                entry.record_id,
                update.attempts
            );
            self.emit(QueueEvent::Exhausted {
                queue_id: entry.id,
                table_name: entry.table_name.clone(),
                record_id: entry.record_id.clone(),
                attempts: update.attempts,
                message: update.message,
            });
            Ok(Settled::Exhausted)
        } else {
            tracing::debug!(
                "Transmission of {} {} failed (attempt {}): {message}",
                entry.table_name,
                entry.record_id,
                update.attempts
            );
            self.emit(QueueEvent::Failed {
                queue_id: entry.id,
                table_name: entry.table_name.clone(),
                record_id: entry.record_id.clone(),
                attempts: update.attempts,
                next_retry_at: update.next_retry_at,
                message: update.message,
            });
            Ok(Settled::Failed)
        }
    }
}

impl DrainReport {
    fn record(&mut self, settled: &Settled) {
        match settled {
            Settled::Transmitted => self.transmitted += 1,
            Settled::Failed => self.failed += 1,
            Settled::Exhausted => self.exhausted += 1,
            Settled::Conflicted => self.conflicts += 1,
        }
    }

    /// Nothing is left to transmit
    pub const fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

const fn plural_y(count: u64) -> &'static str {
    if count == 1 {
        "y"
    } else {
        "ies"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::models::{LedgerRecord, Order, QueueEntryStatus, VersionedEntity, CUSTOMER_ENTITY};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LONG: Duration = Duration::from_secs(10);

    async fn setup_with(policy: BackoffPolicy) -> (DatabaseService, Arc<InMemoryBackend>, MutationQueue) {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let backend = Arc::new(InMemoryBackend::new("T1"));
        let resolver =
            ConflictResolver::new(db.clone(), backend.clone(), "T1", Duration::from_secs(30));
        let queue = MutationQueue::new(db.clone(), backend.clone(), resolver, policy, 2);
        (db, backend, queue)
    }

    async fn setup() -> (DatabaseService, Arc<InMemoryBackend>, MutationQueue) {
        setup_with(BackoffPolicy::default()).await
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_enqueue_keeps_one_entry_with_last_payload() {
        let (_db, _backend, queue) = setup().await;
        for version in 1..=5 {
            queue
                .enqueue("orders", "o-1", QueueOperation::Update, json!({ "v": version }))
                .await
                .unwrap();
        }

        let entries = queue.entries(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, json!({"v": 5}));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_transmits_everything_in_creation_order() {
        let (db, backend, queue) = setup().await;
        let mut ids = Vec::new();
        for amount in [100, 200, 300, 400, 500] {
            let order = Order::new(date(), amount, "staff-1");
            ids.push(order.id.clone());
            db.save_and_enqueue(&LedgerRecord::Order(order), QueueOperation::Insert, 0)
                .await
                .unwrap();
        }

        let mut progress = Vec::new();
        let report = queue
            .drain(LONG, |update| progress.push(update.transmitted))
            .await
            .unwrap();

        assert_eq!(report.transmitted, 5);
        assert_eq!(report.remaining, 0);
        assert!(!report.timed_out);
        assert!(queue.is_empty().await.unwrap());
        // Batches of two
        assert_eq!(progress, vec![2, 4, 5]);
        let pushed: Vec<String> = backend.pushed().into_iter().map(|m| m.record_id).collect();
        assert_eq!(pushed, ids);
        for id in &ids {
            assert!(db.get_order(id).await.unwrap().unwrap().remote_id.is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_returns_early_when_nothing_is_eligible() {
        let (_db, backend, queue) = setup().await;
        let report = queue.drain(LONG, |_| {}).await.unwrap();
        assert_eq!(report, DrainReport { elapsed: report.elapsed, ..DrainReport::default() });
        assert_eq!(backend.push_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failures_back_off_instead_of_retrying_immediately() {
        let (_db, backend, queue) = setup().await;
        let mut events = queue.subscribe();
        queue
            .enqueue("orders", "o-1", QueueOperation::Insert, json!({"amount_minor": 1}))
            .await
            .unwrap();
        backend.fail_next_pushes(1);

        let report = queue.drain(LONG, |_| {}).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(backend.push_calls(), 1);
        let entry = &queue.entries(1).await.unwrap()[0];
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.status, QueueEntryStatus::Pending);
        assert!(entry.next_retry_at > unix_millis_now());
        assert_eq!(entry.error_message.as_deref(), Some("Backend API error: HTTP 503"));

        assert!(matches!(events.recv().await.unwrap(), QueueEvent::Enqueued { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            QueueEvent::Failed { attempts: 1, .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_entries_stay_until_operator_retry() {
        let policy = BackoffPolicy {
            base: Duration::ZERO,
            max_attempts: 2,
            ..BackoffPolicy::default()
        };
        let (_db, backend, queue) = setup_with(policy).await;
        queue
            .enqueue("orders", "o-1", QueueOperation::Insert, json!({}))
            .await
            .unwrap();
        backend.reject_record("orders", "o-1");

        let report = queue.drain(LONG, |_| {}).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.exhausted, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(queue.stats().await.unwrap().failed, 1);

        backend.accept_record("orders", "o-1");
        assert_eq!(queue.drain(LONG, |_| {}).await.unwrap().transmitted, 0);
        assert_eq!(queue.retry_all_failed().await.unwrap(), 1);
        assert_eq!(queue.drain(LONG, |_| {}).await.unwrap().transmitted, 1);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_rejected_entry_does_not_block_its_batch() {
        let (_db, backend, queue) = setup().await;
        queue
            .enqueue("orders", "o-1", QueueOperation::Insert, json!({}))
            .await
            .unwrap();
        queue
            .enqueue("orders", "o-2", QueueOperation::Insert, json!({}))
            .await
            .unwrap();
        backend.reject_record("orders", "o-1");

        let report = queue.drain(LONG, |_| {}).await.unwrap();

        assert_eq!(report.transmitted, 1);
        assert_eq!(report.failed, 1);
        assert!(backend.record("orders", "o-2").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn store_error_mid_batch_releases_remaining_claims() {
        let (db, backend, queue) = setup().await;
        for id in ["o-1", "o-2"] {
            queue
                .enqueue("orders", id, QueueOperation::Insert, json!({}))
                .await
                .unwrap();
        }
        db.execute_batch(
            "CREATE TRIGGER refuse_delete BEFORE DELETE ON sync_queue
             WHEN OLD.record_id = 'o-1'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .await
        .unwrap();

        assert!(queue.drain(LONG, |_| {}).await.is_err());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.pending, 2);

        db.execute_batch("DROP TRIGGER refuse_delete;").await.unwrap();
        let report = queue.drain(LONG, |_| {}).await.unwrap();
        assert_eq!(report.transmitted, 2);
        assert!(queue.is_empty().await.unwrap());
        assert!(backend.record("orders", "o-2").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_deadline_releases_claims_without_charging() {
        let (_db, backend, queue) = setup().await;
        queue
            .enqueue("orders", "o-1", QueueOperation::Insert, json!({}))
            .await
            .unwrap();

        let report = queue.drain(Duration::ZERO, |_| {}).await.unwrap();

        assert!(report.timed_out);
        assert_eq!(report.remaining, 1);
        assert_eq!(backend.push_calls(), 0);
        let entry = &queue.entries(1).await.unwrap()[0];
        assert_eq!(entry.status, QueueEntryStatus::Pending);
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_backend_counts_as_failure() {
        let (_db, backend, queue) = setup().await;
        backend.set_reachable(false);
        queue
            .enqueue("orders", "o-1", QueueOperation::Insert, json!({}))
            .await
            .unwrap();

        let report = queue.drain(LONG, |_| {}).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(!queue.is_empty().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn versioned_entries_go_through_the_resolver() {
        let (db, backend, queue) = setup().await;
        backend.put_entity(VersionedEntity {
            entity_type: CUSTOMER_ENTITY.to_string(),
            id: "c-1".to_string(),
            version: 2,
            payload: json!({"name": "Ada"}),
            updated_by: "T2".to_string(),
            updated_at: 0,
            last_synced_at: None,
        });
        queue
            .enqueue_versioned(
                CUSTOMER_ENTITY,
                "c-1",
                QueueOperation::Update,
                json!({"name": "Ada L."}),
                2,
            )
            .await
            .unwrap();
        queue
            .enqueue_versioned(
                CUSTOMER_ENTITY,
                "c-2",
                QueueOperation::Update,
                json!({"name": "Grace"}),
                5,
            )
            .await
            .unwrap();
        backend.put_entity(VersionedEntity {
            entity_type: CUSTOMER_ENTITY.to_string(),
            id: "c-2".to_string(),
            version: 6,
            payload: json!({"name": "Grace H."}),
            updated_by: "T2".to_string(),
            updated_at: 0,
            last_synced_at: None,
        });

        let report = queue.drain(LONG, |_| {}).await.unwrap();

        assert_eq!(report.transmitted, 1);
        assert_eq!(report.conflicts, 1);
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(backend.push_calls(), 0);
        assert_eq!(
            db.get_entity(CUSTOMER_ENTITY, "c-1").await.unwrap().unwrap().version,
            3
        );
        let conflicts = db.list_conflicts(true, 10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_id, "c-2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn staged_customer_edit_is_created_remotely() {
        let (db, backend, queue) = setup().await;
        db.stage_versioned_write(CUSTOMER_ENTITY, "c-9", json!({"name": "New"}), "T1", 1)
            .await
            .unwrap();

        let report = queue.drain(LONG, |_| {}).await.unwrap();

        assert_eq!(report.transmitted, 1);
        assert_eq!(backend.entity(CUSTOMER_ENTITY, "c-9").unwrap().version, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn requeue_orphaned_picks_up_unsynced_rows() {
        let (db, _backend, queue) = setup().await;
        db.save_ledger_record(&LedgerRecord::Order(Order::new(date(), 900, "staff-1")))
            .await
            .unwrap();
        let mut events = queue.subscribe();

        assert_eq!(queue.requeue_orphaned().await.unwrap(), 1);
        assert_eq!(queue.requeue_orphaned().await.unwrap(), 0);
        assert_eq!(events.recv().await.unwrap(), QueueEvent::Requeued { count: 1 });

        let report = queue.drain(LONG, |_| {}).await.unwrap();
        assert_eq!(report.transmitted, 1);
    }
}
