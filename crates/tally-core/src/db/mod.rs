//! Database layer for Tally

mod close_repository;
mod conflict_repository;
mod connection;
mod entity_repository;
mod ledger_repository;
mod migrations;
mod queue_repository;
mod settings_repository;

pub use close_repository::{CloseCommit, CloseRepository, LibSqlCloseRepository};
pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub(crate) use connection::{begin, finish};
pub use entity_repository::{EntityRepository, LibSqlEntityRepository};
pub use ledger_repository::{
    LedgerRepository, LibSqlLedgerRepository, PreconditionCounts, UnsyncedCounts,
};
pub use queue_repository::{FailureUpdate, LibSqlQueueRepository, QueueRepository, QueueStats};
pub use settings_repository::{
    LibSqlSettingsRepository, SettingsRepository, LAST_BUSINESS_DATE_KEY, LAST_CLOSE_AT_KEY,
    SESSION_PREFIX,
};
