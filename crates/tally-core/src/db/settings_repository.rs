//! Settings repository implementation

use crate::error::Result;
use libsql::Connection;

/// Unix ms of the most recent committed day close
pub const LAST_CLOSE_AT_KEY: &str = "close.last_close_at";

/// Business date of the most recent committed day close
pub const LAST_BUSINESS_DATE_KEY: &str = "close.last_business_date";

/// Prefix of the keys that make up the active terminal session
pub const SESSION_PREFIX: &str = "session.";

/// Trait for key/value settings storage (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Read a setting
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a setting, replacing an existing value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every setting whose key starts with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Last committed close timestamp, if any
    pub async fn last_close_at(&self) -> Result<Option<i64>> {
        Ok(self
            .get(LAST_CLOSE_AT_KEY)
            .await?
            .and_then(|value| value.parse().ok()))
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM settings WHERE substr(key, 1, length(?1)) = ?1",
                [prefix],
            )
            .await?;
        Ok(removed)
    }
}
