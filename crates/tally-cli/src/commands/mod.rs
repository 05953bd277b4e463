pub mod close;
pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod integrity;
pub mod queue;
pub mod status;
pub mod sync;
