//! Day-close commit marker repository implementation

use std::collections::BTreeMap;

use chrono::NaiveDate;
use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::DayCloseSnapshot;

/// Durable record of a committed day close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCommit {
    pub business_date: NaiveDate,
    /// Identifier the backend assigned to the submitted snapshot
    pub close_id: String,
    /// Held until the local ledger has been cleared
    pub snapshot: Option<DayCloseSnapshot>,
    /// Snapshot handed to the printing observer
    pub printed: bool,
    pub committed_at: i64,
    /// Set once the destructive phase finished
    pub cleaned_at: Option<i64>,
    /// Rows removed per table by the destructive phase
    pub deletions: Option<BTreeMap<String, u64>>,
}

impl CloseCommit {
    pub const fn is_cleaned(&self) -> bool {
        self.cleaned_at.is_some()
    }
}

/// Trait for close commit markers (async)
#[allow(async_fn_in_trait)]
pub trait CloseRepository {
    /// Marker for a business date
    async fn get(&self, business_date: NaiveDate) -> Result<Option<CloseCommit>>;

    /// Write the marker of a freshly committed close
    async fn insert(&self, commit: &CloseCommit) -> Result<()>;

    /// Committed closes whose destructive phase has not finished, oldest first
    async fn pending(&self) -> Result<Vec<CloseCommit>>;

    /// Record that the snapshot reached the printing observer
    async fn mark_printed(&self, business_date: NaiveDate) -> Result<()>;

    /// Drop the stored snapshot and stamp the cleanup
    async fn mark_cleaned(
        &self,
        business_date: NaiveDate,
        deletions: &BTreeMap<String, u64>,
        cleaned_at: i64,
    ) -> Result<()>;
}

/// libSQL implementation of `CloseRepository`
pub struct LibSqlCloseRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCloseRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_commit(row: &Row) -> Result<CloseCommit> {
        let business_date: String = row.get(0)?;
        let snapshot: Option<String> = row.get(2)?;
        let deletions: Option<String> = row.get(6)?;
        Ok(CloseCommit {
            business_date: NaiveDate::parse_from_str(&business_date, "%Y-%m-%d").map_err(
                |error| Error::Database(format!("bad close date '{business_date}': {error}")),
            )?,
            close_id: row.get(1)?,
            snapshot: snapshot
                .map(|value| serde_json::from_str(&value))
                .transpose()?,
            printed: row.get::<i64>(3)? != 0,
            committed_at: row.get(4)?,
            cleaned_at: row.get(5)?,
            deletions: deletions
                .map(|value| serde_json::from_str(&value))
                .transpose()?,
        })
    }
}

impl CloseRepository for LibSqlCloseRepository<'_> {
    async fn get(&self, business_date: NaiveDate) -> Result<Option<CloseCommit>> {
        let mut rows = self
            .conn
            .query(
                "SELECT business_date, close_id, snapshot, printed, committed_at, cleaned_at,
                        deletions
                 FROM day_close_commits WHERE business_date = ?",
                [business_date.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_commit(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, commit: &CloseCommit) -> Result<()> {
        let snapshot = commit
            .snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn
            .execute(
                "INSERT INTO day_close_commits
                    (business_date, close_id, snapshot, printed, committed_at, cleaned_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    commit.business_date.to_string(),
                    commit.close_id.as_str(),
                    snapshot,
                    i64::from(commit.printed),
                    commit.committed_at,
                    commit.cleaned_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<CloseCommit>> {
        let mut rows = self
            .conn
            .query(
                "SELECT business_date, close_id, snapshot, printed, committed_at, cleaned_at,
                        deletions
                 FROM day_close_commits WHERE cleaned_at IS NULL
                 ORDER BY business_date",
                (),
            )
            .await?;
        let mut commits = Vec::new();
        while let Some(row) = rows.next().await? {
            commits.push(Self::parse_commit(&row)?);
        }
        Ok(commits)
    }

    async fn mark_printed(&self, business_date: NaiveDate) -> Result<()> {
        self.conn
            .execute(
                "UPDATE day_close_commits SET printed = 1 WHERE business_date = ?",
                [business_date.to_string()],
            )
            .await?;
        Ok(())
    }

    async fn mark_cleaned(
        &self,
        business_date: NaiveDate,
        deletions: &BTreeMap<String, u64>,
        cleaned_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE day_close_commits
                 SET snapshot = NULL, cleaned_at = ?, deletions = ?
                 WHERE business_date = ?",
                params![
                    cleaned_at,
                    serde_json::to_string(deletions)?,
                    business_date.to_string()
                ],
            )
            .await?;
        Ok(())
    }
}
