//! tally-core - Core library for Tally
//!
//! Local-first engine of a point-of-sale terminal: the local ledger store,
//! the mutation queue that propagates it to the central backend, conflict
//! resolution for versioned entities, financial integrity checks and the
//! end-of-day close.

pub mod backend;
pub mod close;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use engine::Engine;
pub use error::{Error, Result};
