//! Optimistic-concurrency writes for versioned entities.
//!
//! A write names the version it was based on. When the backend holds a
//! different version the write is not retried or merged; a
//! [`ConflictRecord`] with both sides is stored and waits for an explicit
//! [`Resolution`].

use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::models::{
    ConflictRecord, ConflictType, QueueEntry, Resolution, VersionedEntity, VersionedWrite,
    VersionedWriteResult,
};
use crate::services::DatabaseService;
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Result of proposing a versioned write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The backend applied the write; carries the new state
    Accepted(VersionedEntity),
    /// The write was stale and has been recorded as a conflict
    Conflict(ConflictRecord),
}

/// Result of resolving a conflict
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Resolved {
        conflict: ConflictRecord,
        entity: VersionedEntity,
    },
    /// The re-submission was stale again; the original stays open
    Reconflicted(ConflictRecord),
}

#[derive(Clone)]
pub struct ConflictResolver {
    db: DatabaseService,
    backend: Arc<dyn Backend>,
    terminal_id: String,
    /// Writes this close together count as simultaneous
    sync_cycle: Duration,
}

impl ConflictResolver {
    pub fn new(
        db: DatabaseService,
        backend: Arc<dyn Backend>,
        terminal_id: impl Into<String>,
        sync_cycle: Duration,
    ) -> Self {
        Self {
            db,
            backend,
            terminal_id: terminal_id.into(),
            sync_cycle,
        }
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    /// Submit `payload` for an entity read at `base_version`
    pub async fn propose_write(
        &self,
        entity_type: &str,
        entity_id: &str,
        base_version: i64,
        payload: serde_json::Value,
    ) -> Result<WriteOutcome> {
        let write = VersionedWrite {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            base_version: Some(base_version),
            payload,
            updated_by: self.terminal_id.clone(),
            updated_at: unix_millis_now(),
        };
        self.submit(&write, None).await
    }

    /// Submit a versioned queue entry; the entry is settled with the outcome
    pub(crate) async fn propose_queued(&self, entry: &QueueEntry) -> Result<WriteOutcome> {
        let base_version = entry.base_version.ok_or_else(|| {
            Error::InvalidInput(format!("queue entry {} carries no base version", entry.id))
        })?;
        let updated_at = self
            .db
            .get_entity(&entry.table_name, &entry.record_id)
            .await?
            .map_or(entry.created_at, |local| local.updated_at);

        let write = VersionedWrite {
            entity_type: entry.table_name.clone(),
            entity_id: entry.record_id.clone(),
            base_version: Some(base_version),
            payload: entry.payload.clone(),
            updated_by: self.terminal_id.clone(),
            updated_at,
        };
        self.submit(&write, Some(entry.id)).await
    }

    async fn submit(&self, write: &VersionedWrite, queue_id: Option<i64>) -> Result<WriteOutcome> {
        match self.backend.write_versioned(write).await? {
            VersionedWriteResult::Accepted(mut entity) => {
                entity.last_synced_at = Some(unix_millis_now());
                self.db.store_accepted_entity(&entity, queue_id).await?;
                tracing::debug!(
                    "Accepted {} {} at version {}",
                    entity.entity_type,
                    entity.id,
                    entity.version
                );
                Ok(WriteOutcome::Accepted(entity))
            }
            VersionedWriteResult::Rejected(remote) => {
                let conflict = self.record_conflict(write, &remote, queue_id).await?;
                Ok(WriteOutcome::Conflict(conflict))
            }
        }
    }

    async fn record_conflict(
        &self,
        write: &VersionedWrite,
        remote: &VersionedEntity,
        queue_id: Option<i64>,
    ) -> Result<ConflictRecord> {
        let conflict_type = self.classify(write, remote).await?;
        let conflict = ConflictRecord {
            id: 0,
            entity_type: write.entity_type.clone(),
            entity_id: write.entity_id.clone(),
            local_version: write.base_version.unwrap_or(remote.version),
            remote_version: remote.version,
            local_data: write.payload.clone(),
            remote_data: remote.payload.clone(),
            conflict_type,
            resolution_strategy: None,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            terminal_id: self.terminal_id.clone(),
            created_at: unix_millis_now(),
        };
        let stored = self.db.store_conflict(&conflict, queue_id).await?;
        tracing::warn!(
            "Conflict {} on {} {}: {} (local v{}, remote v{})",
            stored.id,
            stored.entity_type,
            stored.entity_id,
            stored.conflict_type,
            stored.local_version,
            stored.remote_version
        );
        Ok(stored)
    }

    async fn classify(&self, write: &VersionedWrite, remote: &VersionedEntity) -> Result<ConflictType> {
        if self
            .db
            .queue_has_waiting(&write.entity_type, &write.entity_id)
            .await?
        {
            return Ok(ConflictType::PendingLocalChanges);
        }

        let cycle_ms = u64::try_from(self.sync_cycle.as_millis()).unwrap_or(u64::MAX);
        if remote.updated_at.abs_diff(write.updated_at) <= cycle_ms {
            Ok(ConflictType::SimultaneousUpdate)
        } else if remote.updated_by == write.updated_by {
            // An earlier write of ours landed that the local copy never absorbed
            Ok(ConflictType::PendingLocalChanges)
        } else {
            Ok(ConflictType::VersionMismatch)
        }
    }

    /// Settle an open conflict
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
        resolved_by: &str,
    ) -> Result<ResolutionOutcome> {
        let conflict = self
            .db
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if conflict.resolved {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let strategy = resolution.strategy();
        let now = unix_millis_now();
        let (base_version, payload) = match resolution {
            Resolution::RemoteWins => {
                let entity = VersionedEntity {
                    entity_type: conflict.entity_type.clone(),
                    id: conflict.entity_id.clone(),
                    version: conflict.remote_version,
                    payload: conflict.remote_data.clone(),
                    updated_by: resolved_by.to_string(),
                    updated_at: now,
                    last_synced_at: Some(now),
                };
                return self.settle(conflict, strategy, resolved_by, entity, now).await;
            }
            Resolution::LocalWins => (Some(conflict.remote_version), conflict.local_data.clone()),
            Resolution::ManualMerge(merged) => (Some(conflict.remote_version), merged),
            Resolution::ForceUpdate => {
                tracing::warn!(
                    target: "audit",
                    conflict_id,
                    entity_type = %conflict.entity_type,
                    entity_id = %conflict.entity_id,
                    remote_version = conflict.remote_version,
                    resolved_by,
                    "Forcing write past version check"
                );
                (None, conflict.local_data.clone())
            }
        };

        let write = VersionedWrite {
            entity_type: conflict.entity_type.clone(),
            entity_id: conflict.entity_id.clone(),
            base_version,
            payload,
            updated_by: resolved_by.to_string(),
            updated_at: now,
        };
        match self.backend.write_versioned(&write).await? {
            VersionedWriteResult::Accepted(mut entity) => {
                entity.last_synced_at = Some(now);
                self.settle(conflict, strategy, resolved_by, entity, now).await
            }
            VersionedWriteResult::Rejected(remote) => {
                let again = self.record_conflict(&write, &remote, None).await?;
                tracing::warn!(
                    "Resolving conflict {conflict_id} with {strategy} conflicted again as {}",
                    again.id
                );
                Ok(ResolutionOutcome::Reconflicted(again))
            }
        }
    }

    async fn settle(
        &self,
        mut conflict: ConflictRecord,
        strategy: crate::models::ResolutionStrategy,
        resolved_by: &str,
        entity: VersionedEntity,
        now: i64,
    ) -> Result<ResolutionOutcome> {
        self.db
            .resolve_conflict(conflict.id, strategy, resolved_by, &entity, now)
            .await?;
        tracing::info!(
            "Resolved conflict {} on {} {} with {strategy}",
            conflict.id,
            conflict.entity_type,
            conflict.entity_id
        );
        conflict.resolved = true;
        conflict.resolution_strategy = Some(strategy);
        conflict.resolved_at = Some(now);
        conflict.resolved_by = Some(resolved_by.to_string());
        Ok(ResolutionOutcome::Resolved { conflict, entity })
    }

    /// Stored conflicts, newest first
    pub async fn conflicts(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ConflictRecord>> {
        self.db.list_conflicts(unresolved_only, limit).await
    }
}
