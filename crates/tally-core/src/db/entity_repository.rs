//! Versioned entity repository implementation

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::VersionedEntity;

/// Trait for the local copies of versioned entities (async)
#[allow(async_fn_in_trait)]
pub trait EntityRepository {
    /// Get the local copy of an entity
    async fn get(&self, entity_type: &str, id: &str) -> Result<Option<VersionedEntity>>;

    /// Insert or overwrite the local copy
    async fn upsert(&self, entity: &VersionedEntity) -> Result<()>;

    /// List local copies of one entity type
    async fn list(&self, entity_type: &str, limit: usize) -> Result<Vec<VersionedEntity>>;
}

/// libSQL implementation of `EntityRepository`
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entity(row: &Row) -> Result<VersionedEntity> {
        let payload: String = row.get(3)?;
        Ok(VersionedEntity {
            entity_type: row.get(0)?,
            id: row.get(1)?,
            version: row.get(2)?,
            payload: serde_json::from_str(&payload)?,
            updated_by: row.get(4)?,
            updated_at: row.get(5)?,
            last_synced_at: row.get(6)?,
        })
    }
}

impl EntityRepository for LibSqlEntityRepository<'_> {
    async fn get(&self, entity_type: &str, id: &str) -> Result<Option<VersionedEntity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, id, version, payload, updated_by, updated_at, last_synced_at
                 FROM versioned_entities WHERE entity_type = ? AND id = ?",
                [entity_type, id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, entity: &VersionedEntity) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO versioned_entities
                    (entity_type, id, version, payload, updated_by, updated_at, last_synced_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    entity.entity_type.as_str(),
                    entity.id.as_str(),
                    entity.version,
                    serde_json::to_string(&entity.payload)?,
                    entity.updated_by.as_str(),
                    entity.updated_at,
                    entity.last_synced_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self, entity_type: &str, limit: usize) -> Result<Vec<VersionedEntity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, id, version, payload, updated_by, updated_at, last_synced_at
                 FROM versioned_entities WHERE entity_type = ?
                 ORDER BY updated_at DESC LIMIT ?",
                params![entity_type, i64::try_from(limit).unwrap_or(i64::MAX)],
            )
            .await?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(Self::parse_entity(&row)?);
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::CUSTOMER_ENTITY;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_overwrites_local_copy() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlEntityRepository::new(db.connection());

        let mut customer = VersionedEntity::new(CUSTOMER_ENTITY, "c-1", json!({"name": "Ada"}), "T1");
        repo.upsert(&customer).await.unwrap();
        customer.version = 2;
        customer.payload = json!({"name": "Ada L."});
        customer.last_synced_at = Some(99);
        repo.upsert(&customer).await.unwrap();

        let loaded = repo.get(CUSTOMER_ENTITY, "c-1").await.unwrap().unwrap();
        assert_eq!(loaded, customer);
        assert_eq!(repo.list(CUSTOMER_ENTITY, 10).await.unwrap().len(), 1);
        assert!(repo.get(CUSTOMER_ENTITY, "c-2").await.unwrap().is_none());
    }
}
