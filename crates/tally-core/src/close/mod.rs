//! End-of-day close of a business date

mod finalizer;
mod guard;
mod preconditions;
mod snapshot;
mod state;

pub use finalizer::{
    BlockReason, CloseBlocked, CloseObserver, CloseOptions, CloseOutcome, CloseSummary,
    EndOfDayFinalizer, FinalizerSettings,
};
pub use guard::ResyncGuard;
pub use preconditions::PreconditionReport;
pub use snapshot::SnapshotBuilder;
pub use state::CloseState;
