//! End-of-day close: gate, drain, verify, snapshot, submit, then clear.
//!
//! The close commits in two phases. Timestamping writes the commit marker
//! and the last-close timestamp in one transaction; Finalizing hands the
//! snapshot to the printer and deletes the closed ledger rows. A terminal
//! that dies between the two finishes the second phase on its next
//! [`EndOfDayFinalizer::resume_pending`], which every close runs first.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use super::guard::ResyncGuard;
use super::preconditions::PreconditionReport;
use super::snapshot::SnapshotBuilder;
use super::state::CloseState;
use crate::backend::Backend;
use crate::config::TerminalConfig;
use crate::db::CloseCommit;
use crate::error::{Error, Result};
use crate::integrity::IntegrityChecker;
use crate::models::{DayCloseSnapshot, IntegrityCheck, MoneyTable};
use crate::services::DatabaseService;
use crate::sync::MutationQueue;
use crate::util::{join_items, pluralize, unix_millis_now};

/// Finalizer knobs taken from the terminal configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerSettings {
    pub drain_timeout: Duration,
    pub request_timeout: Duration,
    pub integrity_check: bool,
    pub integrity_tolerance_minor: i64,
    /// Non-empty on the coordinating terminal
    pub subordinate_terminals: Vec<String>,
}

impl Default for FinalizerSettings {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(10),
            integrity_check: true,
            integrity_tolerance_minor: 0,
            subordinate_terminals: Vec::new(),
        }
    }
}

impl From<&TerminalConfig> for FinalizerSettings {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            drain_timeout: config.drain_timeout(),
            request_timeout: config.request_timeout(),
            integrity_check: config.integrity_check,
            integrity_tolerance_minor: config.integrity_tolerance_minor,
            subordinate_terminals: config.subordinate_terminals.clone(),
        }
    }
}

/// Per-run choices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseOptions {
    /// Skip the integrity phase for this run even when policy enables it
    pub skip_integrity: bool,
}

/// A committed and cleared business date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseSummary {
    pub close_id: String,
    pub business_date: NaiveDate,
    /// Rows deleted per table
    pub deletions: BTreeMap<String, u64>,
}

impl CloseSummary {
    pub fn total_deleted(&self) -> u64 {
        self.deletions.values().sum()
    }
}

/// Why a close stopped before committing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    AlreadyClosed {
        business_date: NaiveDate,
    },
    Preconditions(PreconditionReport),
    Offline {
        message: String,
    },
    SyncTimeout {
        remaining: u64,
        timeout_secs: u64,
    },
    Unsynced {
        items: Vec<String>,
    },
    Integrity(IntegrityCheck),
    SubmitFailed {
        message: String,
    },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyClosed { business_date } => {
                write!(f, "business date {business_date} is already closed")
            }
            Self::Preconditions(report) => f.write_str(&report.message()),
            Self::Offline { message } => write!(f, "backend unreachable: {message}"),
            Self::SyncTimeout {
                remaining,
                timeout_secs,
            } => write!(
                f,
                "{} left after {timeout_secs}s of draining",
                pluralize(*remaining, "queued mutation", "queued mutations")
            ),
            Self::Unsynced { items } => f.write_str(&join_items(items)),
            Self::Integrity(check) => {
                let lines = check
                    .discrepancies()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                write!(f, "integrity mismatch: {}", lines.join("; "))
            }
            Self::SubmitFailed { message } => write!(f, "snapshot submission failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseBlocked {
    /// State the run stopped in
    pub blocked_at: CloseState,
    pub reason: BlockReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CloseOutcome {
    Completed(CloseSummary),
    Blocked(CloseBlocked),
}

impl CloseOutcome {
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Hooks for the presentation and printing layers
pub trait CloseObserver: Send + Sync {
    fn on_state(&self, _state: CloseState) {}

    /// Called once per close, after submission and before any deletion
    fn on_snapshot(&self, _snapshot: &DayCloseSnapshot) {}

    fn on_closed(&self, _summary: &CloseSummary) {}
}

pub struct EndOfDayFinalizer {
    db: DatabaseService,
    backend: Arc<dyn Backend>,
    queue: MutationQueue,
    integrity: IntegrityChecker,
    snapshots: SnapshotBuilder,
    settings: FinalizerSettings,
    state: watch::Sender<CloseState>,
    running: Mutex<()>,
    observers: Vec<Arc<dyn CloseObserver>>,
}

impl EndOfDayFinalizer {
    pub fn new(
        db: DatabaseService,
        backend: Arc<dyn Backend>,
        queue: MutationQueue,
        terminal_id: impl Into<String>,
        settings: FinalizerSettings,
    ) -> Self {
        let terminal_id = terminal_id.into();
        let integrity = IntegrityChecker::new(
            db.clone(),
            backend.clone(),
            terminal_id.as_str(),
            settings.integrity_tolerance_minor,
        );
        let snapshots = SnapshotBuilder::new(
            db.clone(),
            backend.clone(),
            terminal_id,
            settings.subordinate_terminals.clone(),
            settings.request_timeout,
        );
        let (state, _) = watch::channel(CloseState::Idle);
        Self {
            db,
            backend,
            queue,
            integrity,
            snapshots,
            settings,
            state,
            running: Mutex::new(()),
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CloseObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<CloseState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CloseState {
        *self.state.borrow()
    }

    fn publish(&self, state: CloseState) {
        self.state.send_replace(state);
        tracing::debug!("Day close state: {state}");
        for observer in &self.observers {
            observer.on_state(state);
        }
    }

    /// Whether the operational state allows closing `business_date`
    pub async fn can_close(&self, business_date: NaiveDate) -> Result<PreconditionReport> {
        let counts = self.db.precondition_counts(business_date).await?;
        Ok(PreconditionReport::new(business_date, counts))
    }

    /// Run a full close of `business_date`.
    ///
    /// Blocked runs come back as [`CloseOutcome::Blocked`] with local data
    /// untouched. Fails with [`Error::CloseInProgress`] while another close
    /// runs on this terminal.
    pub async fn close(
        &self,
        business_date: NaiveDate,
        options: CloseOptions,
    ) -> Result<CloseOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(Error::CloseInProgress);
        };

        tracing::info!("Starting day close for {business_date}");
        let outcome = self.run(business_date, options).await;
        if let Err(error) = &outcome {
            tracing::warn!("Day close for {business_date} failed: {error}");
        }
        self.publish(CloseState::Idle);
        outcome
    }

    /// Finish the destructive phase of every committed but uncleared close
    pub async fn resume_pending(&self) -> Result<Vec<CloseSummary>> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(Error::CloseInProgress);
        };
        let resumed = self.resume_unlocked().await;
        self.publish(CloseState::Idle);
        resumed
    }

    async fn resume_unlocked(&self) -> Result<Vec<CloseSummary>> {
        let pending = self.db.pending_closes().await?;
        let mut summaries = Vec::with_capacity(pending.len());
        for commit in pending {
            tracing::info!(
                "Resuming interrupted close of {} ({})",
                commit.business_date,
                commit.close_id
            );
            self.publish(CloseState::Finalizing);
            summaries.push(self.finalize(&commit).await?);
        }
        Ok(summaries)
    }

    fn block(&self, blocked_at: CloseState, reason: BlockReason) -> CloseOutcome {
        if blocked_at.is_blocked() {
            self.publish(blocked_at);
        }
        tracing::warn!("Day close blocked at {blocked_at}: {reason}");
        CloseOutcome::Blocked(CloseBlocked { blocked_at, reason })
    }

    async fn run(&self, business_date: NaiveDate, options: CloseOptions) -> Result<CloseOutcome> {
        self.resume_unlocked().await?;

        self.publish(CloseState::CheckingPreconditions);
        let guard = ResyncGuard::load(&self.db).await?;
        if !guard.accepts_business_date(business_date)
            || self.db.close_commit(business_date).await?.is_some()
        {
            return Ok(self.block(
                CloseState::CheckingPreconditions,
                BlockReason::AlreadyClosed { business_date },
            ));
        }
        let report = self.can_close(business_date).await?;
        if !report.can_close() {
            return Ok(self.block(
                CloseState::CheckingPreconditions,
                BlockReason::Preconditions(report),
            ));
        }

        let reachable =
            tokio::time::timeout(self.settings.request_timeout, self.backend.is_reachable()).await;
        if !matches!(reachable, Ok(true)) {
            return Ok(self.block(
                CloseState::OfflineBlocked,
                BlockReason::Offline {
                    message: "reachability probe failed".to_string(),
                },
            ));
        }

        self.publish(CloseState::DrainingQueue);
        let requeued = self.queue.requeue_orphaned().await?;
        if requeued > 0 {
            tracing::info!("Re-queued {requeued} unsynced financial record(s)");
        }
        let drain = self
            .queue
            .drain(self.settings.drain_timeout, |progress| {
                tracing::debug!(
                    "Close drain: {} transmitted, {} failed after {:?}",
                    progress.transmitted,
                    progress.failed,
                    progress.elapsed
                );
            })
            .await?;
        if drain.timed_out && !self.queue.is_empty().await? {
            return Ok(self.block(
                CloseState::SyncTimeout,
                BlockReason::SyncTimeout {
                    remaining: self.queue.len().await?,
                    timeout_secs: self.settings.drain_timeout.as_secs(),
                },
            ));
        }

        self.publish(CloseState::VerifyingSync);
        let items = self.unsynced_items(business_date).await?;
        if !items.is_empty() {
            return Ok(self.block(CloseState::UnsyncedBlocked, BlockReason::Unsynced { items }));
        }

        if self.settings.integrity_check && !options.skip_integrity {
            self.publish(CloseState::ValidatingIntegrity);
            let calls = u32::try_from(MoneyTable::ALL.len()).unwrap_or(u32::MAX);
            let checked = tokio::time::timeout(
                self.settings.request_timeout.saturating_mul(calls),
                self.integrity.check(business_date),
            )
            .await;
            match checked {
                Ok(Ok(check)) if check.valid => {}
                Ok(Ok(check)) => {
                    return Ok(self.block(CloseState::IntegrityBlocked, BlockReason::Integrity(check)));
                }
                Ok(Err(Error::Backend(error))) => {
                    return Ok(self.block(
                        CloseState::OfflineBlocked,
                        BlockReason::Offline {
                            message: error.to_string(),
                        },
                    ));
                }
                Ok(Err(error)) => return Err(error),
                Err(_) => {
                    return Ok(self.block(
                        CloseState::OfflineBlocked,
                        BlockReason::Offline {
                            message: "integrity check timed out".to_string(),
                        },
                    ));
                }
            }
        } else {
            tracing::info!("Skipping integrity check for {business_date}");
        }

        self.publish(CloseState::GeneratingSnapshot);
        let mut snapshot = self.snapshots.generate(business_date).await?;
        if self.snapshots.is_coordinator() {
            self.publish(CloseState::Aggregating);
            self.snapshots.aggregate(&mut snapshot).await?;
        }

        self.publish(CloseState::Submitting);
        let submitted =
            tokio::time::timeout(self.settings.request_timeout, self.backend.submit_snapshot(&snapshot))
                .await;
        let close_id = match submitted {
            Ok(Ok(close_id)) => close_id,
            Ok(Err(error)) => {
                return Ok(self.block(
                    CloseState::SubmitFailed,
                    BlockReason::SubmitFailed {
                        message: error.to_string(),
                    },
                ));
            }
            Err(_) => {
                return Ok(self.block(
                    CloseState::SubmitFailed,
                    BlockReason::SubmitFailed {
                        message: format!(
                            "timed out after {}s",
                            self.settings.request_timeout.as_secs()
                        ),
                    },
                ));
            }
        };

        self.publish(CloseState::Timestamping);
        let commit = CloseCommit {
            business_date,
            close_id,
            snapshot: Some(snapshot),
            printed: false,
            committed_at: unix_millis_now(),
            cleaned_at: None,
            deletions: None,
        };
        let last_close_at = self.db.commit_close(&commit).await?;
        tracing::info!(
            "Committed close {} for {business_date} at {last_close_at}",
            commit.close_id
        );

        self.publish(CloseState::Finalizing);
        let summary = self.finalize(&commit).await?;
        self.publish(CloseState::Complete);
        Ok(CloseOutcome::Completed(summary))
    }

    async fn unsynced_items(&self, business_date: NaiveDate) -> Result<Vec<String>> {
        let unsynced = self.db.unsynced_counts(business_date).await?;
        let rows = [
            (MoneyTable::Orders, "unsynced finalized", unsynced.finalized_orders),
            (MoneyTable::Payments, "unsynced", unsynced.payments),
            (MoneyTable::DriverEarnings, "unsynced", unsynced.driver_earnings),
            (MoneyTable::Expenses, "unsynced", unsynced.expenses),
        ];

        let mut items = Vec::new();
        for (table, qualifier, count) in rows {
            if count == 0 {
                continue;
            }
            let (singular, plural) = table.nouns();
            items.push(pluralize(
                count,
                &format!("{qualifier} {singular}"),
                &format!("{qualifier} {plural}"),
            ));
        }

        let queued = self.queue.len().await?;
        if queued > 0 {
            items.push(pluralize(queued, "queued mutation", "queued mutations"));
        }
        Ok(items)
    }

    async fn finalize(&self, commit: &CloseCommit) -> Result<CloseSummary> {
        let business_date = commit.business_date;
        if !commit.printed {
            if let Some(snapshot) = &commit.snapshot {
                for observer in &self.observers {
                    observer.on_snapshot(snapshot);
                }
            }
            self.db.mark_close_printed(business_date).await?;
        }

        let deletions = self
            .db
            .finalize_close(business_date, unix_millis_now())
            .await?;
        let summary = CloseSummary {
            close_id: commit.close_id.clone(),
            business_date,
            deletions,
        };
        tracing::info!(
            "Closed business date {business_date}: removed {} local row(s)",
            summary.total_deleted()
        );
        for observer in &self.observers {
            observer.on_closed(&summary);
        }
        Ok(summary)
    }
}
