//! Services shared by every client of the engine

mod database;
mod ledger;

pub use database::DatabaseService;
pub use ledger::LedgerService;
