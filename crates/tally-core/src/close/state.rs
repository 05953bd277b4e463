//! Day-close state machine states

use serde::Serialize;
use std::fmt;

/// Phase of a day close, published on the finalizer's watch channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseState {
    #[default]
    Idle,
    CheckingPreconditions,
    OfflineBlocked,
    DrainingQueue,
    SyncTimeout,
    VerifyingSync,
    UnsyncedBlocked,
    ValidatingIntegrity,
    IntegrityBlocked,
    GeneratingSnapshot,
    /// Coordinating terminals only
    Aggregating,
    Submitting,
    SubmitFailed,
    /// Commit marker and last-close timestamp
    Timestamping,
    /// Destructive clear
    Finalizing,
    Complete,
}

impl CloseState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingPreconditions => "checking_preconditions",
            Self::OfflineBlocked => "offline_blocked",
            Self::DrainingQueue => "draining_queue",
            Self::SyncTimeout => "sync_timeout",
            Self::VerifyingSync => "verifying_sync",
            Self::UnsyncedBlocked => "unsynced_blocked",
            Self::ValidatingIntegrity => "validating_integrity",
            Self::IntegrityBlocked => "integrity_blocked",
            Self::GeneratingSnapshot => "generating_snapshot",
            Self::Aggregating => "aggregating",
            Self::Submitting => "submitting",
            Self::SubmitFailed => "submit_failed",
            Self::Timestamping => "timestamping",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
        }
    }

    /// States that end a run without touching local data
    pub const fn is_blocked(self) -> bool {
        matches!(
            self,
            Self::OfflineBlocked
                | Self::SyncTimeout
                | Self::UnsyncedBlocked
                | Self::IntegrityBlocked
                | Self::SubmitFailed
        )
    }

    /// From here on the close is committed and can only move forward
    pub const fn is_committed(self) -> bool {
        matches!(self, Self::Timestamping | Self::Finalizing | Self::Complete)
    }
}

impl fmt::Display for CloseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_states_are_never_committed() {
        let blocked = [
            CloseState::OfflineBlocked,
            CloseState::SyncTimeout,
            CloseState::UnsyncedBlocked,
            CloseState::IntegrityBlocked,
            CloseState::SubmitFailed,
        ];
        for state in blocked {
            assert!(state.is_blocked(), "{state}");
            assert!(!state.is_committed(), "{state}");
        }
        assert!(!CloseState::Finalizing.is_blocked());
        assert!(CloseState::Finalizing.is_committed());
    }

    #[test]
    fn states_serialize_in_snake_case() {
        assert_eq!(
            serde_json::to_string(&CloseState::ValidatingIntegrity).unwrap(),
            "\"validating_integrity\""
        );
        assert_eq!(CloseState::default(), CloseState::Idle);
    }
}
