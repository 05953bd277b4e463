//! Wiring of one terminal's components

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{Backend, HttpBackend};
use crate::close::{CloseObserver, EndOfDayFinalizer, FinalizerSettings};
use crate::config::TerminalConfig;
use crate::integrity::IntegrityChecker;
use crate::services::{DatabaseService, LedgerService};
use crate::sync::{BackgroundDrain, BackoffPolicy, ConflictResolver, MutationQueue};
use crate::Result;

/// Every component of a terminal, sharing one local store and one backend
pub struct Engine {
    config: TerminalConfig,
    db: DatabaseService,
    queue: MutationQueue,
    resolver: ConflictResolver,
    ledger: LedgerService,
    integrity: IntegrityChecker,
    finalizer: EndOfDayFinalizer,
}

impl Engine {
    pub fn new(config: TerminalConfig, db: DatabaseService, backend: Arc<dyn Backend>) -> Self {
        let terminal_id = config.terminal_id.clone();
        let resolver = ConflictResolver::new(
            db.clone(),
            backend.clone(),
            terminal_id.as_str(),
            config.sync_interval(),
        );
        let queue = MutationQueue::new(
            db.clone(),
            backend.clone(),
            resolver.clone(),
            BackoffPolicy::from(&config.backoff),
            config.drain_batch_size,
        );
        let ledger = LedgerService::new(db.clone(), queue.clone(), terminal_id.as_str());
        let integrity = IntegrityChecker::new(
            db.clone(),
            backend.clone(),
            terminal_id.as_str(),
            config.integrity_tolerance_minor,
        );
        let finalizer = EndOfDayFinalizer::new(
            db.clone(),
            backend,
            queue.clone(),
            terminal_id,
            FinalizerSettings::from(&config),
        );

        Self {
            config,
            db,
            queue,
            resolver,
            ledger,
            integrity,
            finalizer,
        }
    }

    /// Validate `config`, open the store at `db_path` and connect over HTTP
    pub async fn open(config: TerminalConfig, db_path: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        let db = DatabaseService::open_path(db_path).await?;
        let backend = HttpBackend::new(
            config.backend_url.as_str(),
            config.terminal_id.as_str(),
            config.api_token.clone(),
            config.request_timeout(),
        )?;
        Ok(Self::new(config, db, Arc::new(backend)))
    }

    #[must_use]
    pub fn with_close_observer(mut self, observer: Arc<dyn CloseObserver>) -> Self {
        self.finalizer = self.finalizer.with_observer(observer);
        self
    }

    pub const fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub const fn db(&self) -> &DatabaseService {
        &self.db
    }

    pub const fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub const fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub const fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub const fn integrity(&self) -> &IntegrityChecker {
        &self.integrity
    }

    pub const fn finalizer(&self) -> &EndOfDayFinalizer {
        &self.finalizer
    }

    /// Drain the queue every `sync_interval_secs` until shut down
    pub fn spawn_background_drain(&self) -> BackgroundDrain {
        BackgroundDrain::spawn(
            self.queue.clone(),
            self.config.sync_interval(),
            self.config.drain_timeout(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::close::{CloseOptions, CloseOutcome};
    use crate::models::OrderStatus;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn components_share_store_and_backend() {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let backend = Arc::new(InMemoryBackend::new("T1"));
        let engine = Engine::new(
            TerminalConfig::new("T1", "https://pos.example.com"),
            db,
            backend.clone(),
        );
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let order = engine
            .ledger()
            .record_order(date, 1_250, "staff-1")
            .await
            .unwrap();
        engine
            .ledger()
            .update_order_status(&order.id, OrderStatus::Completed)
            .await
            .unwrap();
        assert_eq!(engine.queue().len().await.unwrap(), 1);

        let outcome = engine
            .finalizer()
            .close(date, CloseOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, CloseOutcome::Completed(_)));
        assert_eq!(backend.record_count("orders"), 1);
        assert!(engine.queue().is_empty().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = TerminalConfig::new("", "https://pos.example.com");
        assert!(Engine::open(config, dir.path().join("t.db")).await.is_err());
    }
}
