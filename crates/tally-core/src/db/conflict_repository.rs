//! Sync conflict repository implementation

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{ConflictRecord, ResolutionStrategy};

const CONFLICT_COLUMNS: &str = "id, entity_type, entity_id, local_version, remote_version,
    local_data, remote_data, conflict_type, resolution_strategy, resolved, resolved_at,
    resolved_by, terminal_id, created_at";

/// Trait for conflict record storage (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Persist a new conflict; the record's `id` is ignored and the stored row returned
    async fn insert(&self, conflict: &ConflictRecord) -> Result<ConflictRecord>;

    /// Get a conflict by id
    async fn get(&self, id: i64) -> Result<Option<ConflictRecord>>;

    /// Newest conflicts first
    async fn list(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ConflictRecord>>;

    /// Mark a conflict resolved
    async fn mark_resolved(
        &self,
        id: i64,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        resolved_at: i64,
    ) -> Result<()>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<ConflictRecord> {
        let local_data: String = row.get(5)?;
        let remote_data: String = row.get(6)?;
        let conflict_type: String = row.get(7)?;
        let strategy: Option<String> = row.get(8)?;
        Ok(ConflictRecord {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            local_version: row.get(3)?,
            remote_version: row.get(4)?,
            local_data: serde_json::from_str(&local_data)?,
            remote_data: serde_json::from_str(&remote_data)?,
            conflict_type: conflict_type.parse()?,
            resolution_strategy: strategy
                .map(|value| value.parse::<ResolutionStrategy>())
                .transpose()?,
            resolved: row.get::<i64>(9)? != 0,
            resolved_at: row.get(10)?,
            resolved_by: row.get(11)?,
            terminal_id: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn insert(&self, conflict: &ConflictRecord) -> Result<ConflictRecord> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                    (entity_type, entity_id, local_version, remote_version, local_data,
                     remote_data, conflict_type, resolved, terminal_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
                params![
                    conflict.entity_type.as_str(),
                    conflict.entity_id.as_str(),
                    conflict.local_version,
                    conflict.remote_version,
                    serde_json::to_string(&conflict.local_data)?,
                    serde_json::to_string(&conflict.remote_data)?,
                    conflict.conflict_type.as_str(),
                    conflict.terminal_id.as_str(),
                    conflict.created_at
                ],
            )
            .await?;
        let id = self.conn.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))
    }

    async fn get(&self, id: i64) -> Result<Option<ConflictRecord>> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?");
        let mut rows = self.conn.query(&sql, [id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ConflictRecord>> {
        let filter = if unresolved_only {
            "WHERE resolved = 0"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts {filter}
             ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        let mut rows = self
            .conn
            .query(&sql, [i64::try_from(limit).unwrap_or(i64::MAX)])
            .await?;
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn mark_resolved(
        &self,
        id: i64,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        resolved_at: i64,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE sync_conflicts
                 SET resolved = 1, resolution_strategy = ?, resolved_by = ?, resolved_at = ?
                 WHERE id = ? AND resolved = 0",
                params![strategy.as_str(), resolved_by, resolved_at, id],
            )
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("unresolved conflict {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ConflictType, CUSTOMER_ENTITY};
    use serde_json::json;

    fn conflict(entity_id: &str, created_at: i64) -> ConflictRecord {
        ConflictRecord {
            id: 0,
            entity_type: CUSTOMER_ENTITY.to_string(),
            entity_id: entity_id.to_string(),
            local_version: 2,
            remote_version: 3,
            local_data: json!({"name": "local"}),
            remote_data: json!({"name": "remote"}),
            conflict_type: ConflictType::VersionMismatch,
            resolution_strategy: None,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            terminal_id: "T1".to_string(),
            created_at,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_resolve() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let stored = repo.insert(&conflict("c-1", 10)).await.unwrap();
        assert!(stored.id > 0);
        assert_eq!(stored.remote_data, json!({"name": "remote"}));

        repo.mark_resolved(stored.id, ResolutionStrategy::RemoteWins, "manager", 20)
            .await
            .unwrap();
        let resolved = repo.get(stored.id).await.unwrap().unwrap();
        assert!(resolved.resolved);
        assert_eq!(
            resolved.resolution_strategy,
            Some(ResolutionStrategy::RemoteWins)
        );
        assert_eq!(resolved.resolved_by.as_deref(), Some("manager"));

        // Resolving twice is refused
        assert!(repo
            .mark_resolved(stored.id, ResolutionStrategy::LocalWins, "manager", 30)
            .await
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_filters_unresolved_newest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let old = repo.insert(&conflict("c-1", 10)).await.unwrap();
        let new = repo.insert(&conflict("c-2", 20)).await.unwrap();
        repo.mark_resolved(old.id, ResolutionStrategy::ForceUpdate, "T1", 30)
            .await
            .unwrap();

        let all = repo.list(false, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, new.id);

        let open = repo.list(true, 10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, new.id);
    }
}
