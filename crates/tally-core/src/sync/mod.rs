//! Propagation of local writes to the central store

mod background;
mod backoff;
mod conflict;
mod events;
mod queue;

pub use background::BackgroundDrain;
pub use backoff::BackoffPolicy;
pub use conflict::{ConflictResolver, ResolutionOutcome, WriteOutcome};
pub use events::QueueEvent;
pub use queue::{DrainProgress, DrainReport, MutationQueue};
