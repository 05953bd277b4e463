//! Data models for Tally

mod conflict;
mod integrity;
mod ledger;
mod queue;
mod snapshot;
mod versioned;

pub use conflict::{ConflictRecord, ConflictType, Resolution, ResolutionStrategy};
pub use integrity::{FinancialIntegrityReport, IntegrityCheck};
pub use ledger::{
    format_minor, minor_from_decimal, DrawerSession, DriverEarning, Expense, LedgerRecord,
    MoneyTable, Order, OrderStatus, Payment, ShiftRole, StaffShift, CLEARED_TABLES,
};
pub use queue::{OutgoingMutation, QueueEntry, QueueEntryStatus, QueueOperation};
pub use snapshot::{DayCloseSnapshot, StaffPerformance, TerminalTotals};
pub use versioned::{VersionedEntity, VersionedWrite, VersionedWriteResult, CUSTOMER_ENTITY};
