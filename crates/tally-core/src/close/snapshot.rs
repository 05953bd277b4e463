//! Day-close snapshot generation and multi-terminal aggregation

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::backend::Backend;
use crate::models::DayCloseSnapshot;
use crate::services::DatabaseService;
use crate::Result;

#[derive(Clone)]
pub struct SnapshotBuilder {
    db: DatabaseService,
    backend: Arc<dyn Backend>,
    terminal_id: String,
    subordinates: Vec<String>,
    request_timeout: Duration,
}

impl SnapshotBuilder {
    pub fn new(
        db: DatabaseService,
        backend: Arc<dyn Backend>,
        terminal_id: impl Into<String>,
        subordinates: Vec<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            db,
            backend,
            terminal_id: terminal_id.into(),
            subordinates,
            request_timeout,
        }
    }

    pub fn is_coordinator(&self) -> bool {
        !self.subordinates.is_empty()
    }

    /// This terminal's own figures for `business_date`
    pub async fn generate(&self, business_date: NaiveDate) -> Result<DayCloseSnapshot> {
        let totals = self.db.terminal_totals(business_date).await?;
        Ok(DayCloseSnapshot::new(
            self.terminal_id.as_str(),
            business_date,
            totals,
        ))
    }

    /// Merge every subordinate's snapshot into `snapshot`.
    ///
    /// Subordinates that cannot be fetched are listed in
    /// `missing_terminals`; the close goes on without them.
    pub async fn aggregate(&self, snapshot: &mut DayCloseSnapshot) -> Result<()> {
        let business_date = snapshot.business_date;
        for terminal_id in &self.subordinates {
            if terminal_id == &self.terminal_id {
                continue;
            }
            let fetched = tokio::time::timeout(
                self.request_timeout,
                self.backend
                    .fetch_terminal_snapshot(terminal_id, business_date),
            )
            .await;

            match fetched {
                Ok(Ok(Some(child))) => {
                    snapshot.merge(&child)?;
                    tracing::debug!("Merged snapshot of terminal {terminal_id}");
                }
                Ok(Ok(None)) => {
                    tracing::warn!(
                        "Terminal {terminal_id} has no snapshot for {business_date}; closing without it"
                    );
                    snapshot.mark_missing(terminal_id.as_str());
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        "Failed to fetch snapshot of terminal {terminal_id}: {error}; closing without it"
                    );
                    snapshot.mark_missing(terminal_id.as_str());
                }
                Err(_) => {
                    tracing::warn!(
                        "Timed out fetching snapshot of terminal {terminal_id}; closing without it"
                    );
                    snapshot.mark_missing(terminal_id.as_str());
                }
            }
        }
        Ok(())
    }
}
