use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(
        "Terminal is not configured. Create {0} or set TALLY_TERMINAL_ID and TALLY_BACKEND_URL."
    )]
    NotConfigured(String),
    #[error("manual-merge needs --payload with the merged entity JSON")]
    MissingMergePayload,
    #[error("--payload is only used with manual-merge")]
    UnexpectedPayload,
    #[error("Invalid merge payload: {0}")]
    InvalidPayload(String),
    #[error("Conflict {original} conflicted again; see conflict {replacement}")]
    Reconflicted { original: i64, replacement: i64 },
    #[error("Day close blocked at {state}: {reason}")]
    CloseBlocked { state: String, reason: String },
}
