// Domain errors surfaced to callers of the window service
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },

    #[error("row source failed: {0:#}")]
    RowSource(#[source] anyhow::Error),
}

impl WindowError {
    pub fn invalid_range(reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            reason: reason.into(),
        }
    }
}
