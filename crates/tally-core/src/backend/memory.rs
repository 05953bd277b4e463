//! In-process backend used by tests and offline rehearsals.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{Backend, BackendError, BackendResult, MutationOutcome, MutationStatus, RemoteTotals};
use crate::models::{
    DayCloseSnapshot, MoneyTable, OutgoingMutation, QueueOperation, VersionedEntity,
    VersionedWrite, VersionedWriteResult,
};

type RecordKey = (String, String);

#[derive(Debug, Default)]
struct State {
    unreachable: bool,
    failing_pushes: u32,
    rejected_records: HashSet<RecordKey>,
    rejected_submissions: Option<String>,
    records: BTreeMap<RecordKey, serde_json::Value>,
    remote_ids: HashMap<RecordKey, String>,
    pushed: Vec<OutgoingMutation>,
    push_calls: usize,
    entities: HashMap<RecordKey, VersionedEntity>,
    snapshots: HashMap<(String, NaiveDate), DayCloseSnapshot>,
    submitted: Vec<DayCloseSnapshot>,
    totals_overrides: HashMap<(String, MoneyTable, NaiveDate), RemoteTotals>,
}

/// Backend that keeps the shared store in memory, with fault injection
#[derive(Debug)]
pub struct InMemoryBackend {
    terminal_id: String,
    state: Mutex<State>,
}

impl InMemoryBackend {
    /// A reachable backend serving `terminal_id`
    pub fn new(terminal_id: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    /// Fail the next `count` push calls as a whole
    pub fn fail_next_pushes(&self, count: u32) {
        self.state().failing_pushes = count;
    }

    /// Reject every future push of one record
    pub fn reject_record(&self, table_name: &str, record_id: &str) {
        self.state()
            .rejected_records
            .insert((table_name.to_string(), record_id.to_string()));
    }

    /// Accept pushes of a previously rejected record again
    pub fn accept_record(&self, table_name: &str, record_id: &str) {
        self.state()
            .rejected_records
            .remove(&(table_name.to_string(), record_id.to_string()));
    }

    /// Refuse snapshot submissions with `message`; `None` accepts them again
    pub fn reject_submissions(&self, message: Option<&str>) {
        self.state().rejected_submissions = message.map(str::to_string);
    }

    /// Store a remote entity as if another terminal had written it
    pub fn put_entity(&self, entity: VersionedEntity) {
        self.state()
            .entities
            .insert((entity.entity_type.clone(), entity.id.clone()), entity);
    }

    /// Store a terminal's own snapshot for aggregation
    pub fn put_snapshot(&self, snapshot: DayCloseSnapshot) {
        self.state().snapshots.insert(
            (snapshot.terminal_id.clone(), snapshot.business_date),
            snapshot,
        );
    }

    /// Report fixed totals for one (terminal, table, date)
    pub fn set_remote_totals(
        &self,
        terminal_id: &str,
        table: MoneyTable,
        business_date: NaiveDate,
        totals: RemoteTotals,
    ) {
        self.state()
            .totals_overrides
            .insert((terminal_id.to_string(), table, business_date), totals);
    }

    pub fn entity(&self, entity_type: &str, entity_id: &str) -> Option<VersionedEntity> {
        self.state()
            .entities
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned()
    }

    /// Payload currently held for a record
    pub fn record(&self, table_name: &str, record_id: &str) -> Option<serde_json::Value> {
        self.state()
            .records
            .get(&(table_name.to_string(), record_id.to_string()))
            .cloned()
    }

    pub fn record_count(&self, table_name: &str) -> usize {
        self.state()
            .records
            .keys()
            .filter(|(table, _)| table == table_name)
            .count()
    }

    /// Every mutation received, in arrival order
    pub fn pushed(&self) -> Vec<OutgoingMutation> {
        self.state().pushed.clone()
    }

    pub fn push_calls(&self) -> usize {
        self.state().push_calls
    }

    /// Snapshots accepted by `submit_snapshot`
    pub fn submitted(&self) -> Vec<DayCloseSnapshot> {
        self.state().submitted.clone()
    }

    fn ensure_reachable(state: &State) -> BackendResult<()> {
        if state.unreachable {
            Err(BackendError::Unreachable(
                "in-memory backend is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn payload_date(payload: &serde_json::Value) -> Option<NaiveDate> {
    payload
        .get("business_date")
        .and_then(serde_json::Value::as_str)
        .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn is_reachable(&self) -> bool {
        !self.state().unreachable
    }

    async fn push_mutations(
        &self,
        mutations: &[OutgoingMutation],
    ) -> BackendResult<Vec<MutationOutcome>> {
        let mut state = self.state();
        Self::ensure_reachable(&state)?;
        state.push_calls += 1;
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(BackendError::Api("HTTP 503".to_string()));
        }

        let mut outcomes = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            state.pushed.push(mutation.clone());
            let key = (mutation.table_name.clone(), mutation.record_id.clone());
            if state.rejected_records.contains(&key) {
                outcomes.push(MutationOutcome {
                    queue_id: mutation.queue_id,
                    status: MutationStatus::Failed {
                        message: format!("{} {} rejected", key.0, key.1),
                    },
                });
                continue;
            }

            match mutation.operation {
                QueueOperation::Delete => {
                    state.records.remove(&key);
                }
                QueueOperation::Insert | QueueOperation::Update => {
                    state.records.insert(key.clone(), mutation.payload.clone());
                }
            }
            let next = state.remote_ids.len() + 1;
            let remote_id = state
                .remote_ids
                .entry(key)
                .or_insert_with(|| format!("remote-{next}"))
                .clone();
            outcomes.push(MutationOutcome {
                queue_id: mutation.queue_id,
                status: MutationStatus::Accepted { remote_id },
            });
        }
        Ok(outcomes)
    }

    async fn fetch_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> BackendResult<Option<VersionedEntity>> {
        let state = self.state();
        Self::ensure_reachable(&state)?;
        Ok(state
            .entities
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }

    async fn write_versioned(&self, write: &VersionedWrite) -> BackendResult<VersionedWriteResult> {
        let mut state = self.state();
        Self::ensure_reachable(&state)?;
        let key = (write.entity_type.clone(), write.entity_id.clone());
        let current_version = state.entities.get(&key).map_or(0, |entity| entity.version);

        if let (Some(base), Some(current)) = (write.base_version, state.entities.get(&key)) {
            if base != current.version {
                return Ok(VersionedWriteResult::Rejected(current.clone()));
            }
        } else if write.base_version.is_some_and(|base| base != 0) {
            return Err(BackendError::Api(format!(
                "{} {} does not exist (404)",
                write.entity_type, write.entity_id
            )));
        }

        let accepted = VersionedEntity {
            entity_type: write.entity_type.clone(),
            id: write.entity_id.clone(),
            version: current_version + 1,
            payload: write.payload.clone(),
            updated_by: write.updated_by.clone(),
            updated_at: write.updated_at,
            last_synced_at: None,
        };
        state.entities.insert(key, accepted.clone());
        Ok(VersionedWriteResult::Accepted(accepted))
    }

    async fn remote_totals(
        &self,
        terminal_id: &str,
        table: MoneyTable,
        business_date: NaiveDate,
    ) -> BackendResult<RemoteTotals> {
        let state = self.state();
        Self::ensure_reachable(&state)?;
        if let Some(totals) = state
            .totals_overrides
            .get(&(terminal_id.to_string(), table, business_date))
        {
            return Ok(*totals);
        }
        if terminal_id != self.terminal_id {
            return Ok(RemoteTotals::default());
        }

        let mut totals = RemoteTotals::default();
        for ((table_name, _), payload) in &state.records {
            if table_name != table.table_name() || payload_date(payload) != Some(business_date) {
                continue;
            }
            totals.count += 1;
            totals.total_minor += payload
                .get("amount_minor")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or_default();
        }
        Ok(totals)
    }

    async fn submit_snapshot(&self, snapshot: &DayCloseSnapshot) -> BackendResult<String> {
        let mut state = self.state();
        Self::ensure_reachable(&state)?;
        if let Some(message) = &state.rejected_submissions {
            return Err(BackendError::Api(format!("{message} (422)")));
        }
        state.submitted.push(snapshot.clone());
        Ok(format!(
            "close-{}-{}",
            snapshot.terminal_id, snapshot.business_date
        ))
    }

    async fn fetch_terminal_snapshot(
        &self,
        terminal_id: &str,
        business_date: NaiveDate,
    ) -> BackendResult<Option<DayCloseSnapshot>> {
        let state = self.state();
        Self::ensure_reachable(&state)?;
        Ok(state
            .snapshots
            .get(&(terminal_id.to_string(), business_date))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CUSTOMER_ENTITY;
    use serde_json::json;

    fn mutation(queue_id: i64, record_id: &str, amount: i64) -> OutgoingMutation {
        OutgoingMutation {
            queue_id,
            table_name: "orders".to_string(),
            record_id: record_id.to_string(),
            operation: QueueOperation::Insert,
            payload: json!({"business_date": "2025-06-01", "amount_minor": amount}),
        }
    }

    fn write(base_version: Option<i64>, name: &str) -> VersionedWrite {
        VersionedWrite {
            entity_type: CUSTOMER_ENTITY.to_string(),
            entity_id: "c-1".to_string(),
            base_version,
            payload: json!({"name": name}),
            updated_by: "T1".to_string(),
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn push_is_idempotent_per_record() {
        let backend = InMemoryBackend::new("T1");
        let first = backend.push_mutations(&[mutation(1, "o-1", 500)]).await.unwrap();
        let again = backend.push_mutations(&[mutation(2, "o-1", 500)]).await.unwrap();

        assert_eq!(first[0].status, again[0].status);
        assert_eq!(backend.record_count("orders"), 1);
        let totals = backend
            .remote_totals("T1", MoneyTable::Orders, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(totals, RemoteTotals { count: 1, total_minor: 500 });
    }

    #[tokio::test]
    async fn offline_backend_refuses_calls() {
        let backend = InMemoryBackend::new("T1");
        backend.set_reachable(false);
        assert!(!backend.is_reachable().await);
        assert!(matches!(
            backend.push_mutations(&[mutation(1, "o-1", 1)]).await,
            Err(BackendError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn versioned_write_checks_base() {
        let backend = InMemoryBackend::new("T1");

        let created = backend.write_versioned(&write(Some(0), "Ada")).await.unwrap();
        assert!(matches!(created, VersionedWriteResult::Accepted(ref e) if e.version == 1));

        let stale = backend.write_versioned(&write(Some(0), "Bob")).await.unwrap();
        assert!(matches!(stale, VersionedWriteResult::Rejected(ref e) if e.version == 1));

        let forced = backend.write_versioned(&write(None, "Cy")).await.unwrap();
        assert!(matches!(forced, VersionedWriteResult::Accepted(ref e) if e.version == 2));
    }
}
