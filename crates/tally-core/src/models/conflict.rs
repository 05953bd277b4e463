//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Why a versioned write was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Remote was updated by another actor after the local base was read
    VersionMismatch,
    /// Local and remote writes landed within the same sync cycle
    SimultaneousUpdate,
    /// Local has further unsynced writes queued for the entity
    PendingLocalChanges,
}

impl ConflictType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionMismatch => "version_mismatch",
            Self::SimultaneousUpdate => "simultaneous_update",
            Self::PendingLocalChanges => "pending_local_changes",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "version_mismatch" => Ok(Self::VersionMismatch),
            "simultaneous_update" => Ok(Self::SimultaneousUpdate),
            "pending_local_changes" => Ok(Self::PendingLocalChanges),
            other => Err(Error::InvalidInput(format!("unknown conflict type '{other}'"))),
        }
    }
}

/// How an operator or policy settled a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LocalWins,
    RemoteWins,
    ManualMerge,
    ForceUpdate,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::ManualMerge => "manual_merge",
            Self::ForceUpdate => "force_update",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "local_wins" => Ok(Self::LocalWins),
            "remote_wins" => Ok(Self::RemoteWins),
            "manual_merge" => Ok(Self::ManualMerge),
            "force_update" => Ok(Self::ForceUpdate),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy '{other}'"
            ))),
        }
    }
}

/// Operator decision for a recorded conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Re-submit the local data on top of the remote version
    LocalWins,
    /// Adopt the remote data locally
    RemoteWins,
    /// Submit an operator-merged payload on top of the remote version
    ManualMerge(serde_json::Value),
    /// Overwrite the remote without a version check (audited)
    ForceUpdate,
}

impl Resolution {
    pub const fn strategy(&self) -> ResolutionStrategy {
        match self {
            Self::LocalWins => ResolutionStrategy::LocalWins,
            Self::RemoteWins => ResolutionStrategy::RemoteWins,
            Self::ManualMerge(_) => ResolutionStrategy::ManualMerge,
            Self::ForceUpdate => ResolutionStrategy::ForceUpdate,
        }
    }
}

/// A rejected optimistic write awaiting an explicit resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Conflict row identifier
    pub id: i64,
    /// Entity kind
    pub entity_type: String,
    /// Entity involved in the conflict
    pub entity_id: String,
    /// Version the local write was based on
    pub local_version: i64,
    /// Backend version at rejection time
    pub remote_version: i64,
    /// Payload this terminal tried to write
    pub local_data: serde_json::Value,
    /// Payload the backend holds
    pub remote_data: serde_json::Value,
    /// Classification
    pub conflict_type: ConflictType,
    /// Strategy that settled it, once resolved
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub resolved: bool,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
    /// Terminal the conflict was detected on
    pub terminal_id: String,
    /// Detection timestamp (Unix ms)
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parse_accepts_cli_spelling() {
        assert_eq!(
            "local-wins".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::LocalWins
        );
        assert_eq!(
            "force_update".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::ForceUpdate
        );
        assert!("merge".parse::<ResolutionStrategy>().is_err());
    }

    #[test]
    fn resolution_maps_to_strategy() {
        assert_eq!(
            Resolution::ManualMerge(serde_json::json!({})).strategy(),
            ResolutionStrategy::ManualMerge
        );
    }
}
