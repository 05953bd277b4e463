//! Central backend client boundary.
//!
//! The engine only talks to the shared store through [`Backend`]. `HttpBackend`
//! speaks the JSON API; `InMemoryBackend` keeps everything in process for tests
//! and offline rehearsals.

mod http;
mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    DayCloseSnapshot, MoneyTable, OutgoingMutation, VersionedEntity, VersionedWrite,
    VersionedWriteResult,
};

pub use http::HttpBackend;
pub use memory::InMemoryBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend API error: {0}")]
    Api(String),
    #[error("Invalid backend payload: {0}")]
    InvalidPayload(String),
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Per-entry verdict on a pushed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationStatus {
    Accepted {
        /// Backend identifier of the record
        remote_id: String,
    },
    Failed {
        message: String,
    },
}

/// Outcome of one mutation in a pushed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub queue_id: i64,
    #[serde(flatten)]
    pub status: MutationStatus,
}

/// Backend-side count and total of one money-bearing table for one date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTotals {
    pub count: u64,
    /// Total in minor units
    pub total_minor: i64,
}

/// Operations the engine needs from the central store
#[async_trait]
pub trait Backend: Send + Sync {
    /// Cheap reachability probe
    async fn is_reachable(&self) -> bool;

    /// Apply a batch of mutations; idempotent on (table, record, operation)
    ///
    /// Returns one outcome per mutation. Mutations missing from the response
    /// count as failed.
    async fn push_mutations(
        &self,
        mutations: &[OutgoingMutation],
    ) -> BackendResult<Vec<MutationOutcome>>;

    /// Current remote state of a versioned entity
    async fn fetch_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> BackendResult<Option<VersionedEntity>>;

    /// Version-checked write; `base_version: None` skips the check
    async fn write_versioned(&self, write: &VersionedWrite) -> BackendResult<VersionedWriteResult>;

    /// Totals the backend holds for a terminal's table on a date
    async fn remote_totals(
        &self,
        terminal_id: &str,
        table: MoneyTable,
        business_date: NaiveDate,
    ) -> BackendResult<RemoteTotals>;

    /// Submit a day-close snapshot; returns the backend's close identifier
    async fn submit_snapshot(&self, snapshot: &DayCloseSnapshot) -> BackendResult<String>;

    /// A terminal's own snapshot for a date, if it has closed
    async fn fetch_terminal_snapshot(
        &self,
        terminal_id: &str,
        business_date: NaiveDate,
    ) -> BackendResult<Option<DayCloseSnapshot>>;
}
