use leasewatch_model::ScanRunId;
use thiserror::Error;

use crate::scan::history::HistoryError;
use crate::scan::validation::ValidationError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Scan not found: {0}")]
    NotFound(ScanRunId),

    #[error("Scan still running: {0}")]
    StillRunning(ScanRunId),

    #[error("History store error: {0}")]
    History(#[from] HistoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Stable snake_case code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::Validation(err) => err.code(),
            ScanError::NotFound(_) => "scan_not_found",
            ScanError::StillRunning(_) => "scan_still_running",
            ScanError::History(HistoryError::NotFound(_)) => "scan_not_found",
            ScanError::History(HistoryError::InvalidPageToken(_)) => {
                "invalid_page_token"
            }
            ScanError::History(_) => "history_unavailable",
            ScanError::Serialization(_) => "serialization_error",
            ScanError::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
