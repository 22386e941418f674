//! Error kinds surfaced by the focus engine.
//!
//! Every kind is `Clone` so it can be both returned to the caller and
//! broadcast on the accountant's error channel.

use serde::Serialize;

/// All errors the timer, accountant and sound scheduler report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum FocusError {
    #[error("no task is scheduled for the current time")]
    NoActiveTask,

    #[error("no focus session is in progress")]
    NoActiveSession,

    #[error("cannot {action} while the timer is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("failed to save focus ledger: {0}")]
    SaveFailed(String),

    #[error("failed to fetch focus ledger: {0}")]
    FetchFailed(String),

    #[error("ambient sound playback failed: {0}")]
    AudioPlaybackFailed(String),
}

impl FocusError {
    /// Wraps a persistence failure, keeping the whole context chain.
    pub fn save_failed(err: &anyhow::Error) -> Self {
        FocusError::SaveFailed(format!("{err:#}"))
    }

    pub fn fetch_failed(err: &anyhow::Error) -> Self {
        FocusError::FetchFailed(format!("{err:#}"))
    }
}

pub type FocusResult<T> = Result<T, FocusError>;
