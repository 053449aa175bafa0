use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use leasewatch_core::{
    ScanError,
    scan::{history::HistoryError, validation::ValidationError},
};
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Stable machine-readable code, when the error has one.
    pub code: Option<&'static str>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
                "code": self.code,
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        let code = err.code();
        let base = match &err {
            ScanError::Validation(_) => Self::bad_request(err.to_string()),
            ScanError::NotFound(_)
            | ScanError::History(HistoryError::NotFound(_)) => {
                Self::not_found(err.to_string())
            }
            ScanError::StillRunning(_)
            | ScanError::History(HistoryError::DuplicateRun(_)) => {
                Self::conflict(err.to_string())
            }
            ScanError::History(HistoryError::InvalidPageToken(_)) => {
                Self::bad_request(err.to_string())
            }
            ScanError::History(HistoryError::Unavailable(_)) => {
                tracing::error!(error = %err, "history store unavailable");
                Self::service_unavailable("Scan history is unavailable")
            }
            ScanError::Serialization(_) | ScanError::Internal(_) => {
                tracing::error!(error = %err, "scan request failed");
                Self::internal(err.to_string())
            }
        };
        base.with_code(code)
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.to_string()).with_code(err.code())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use leasewatch_core::model::{ScanRunId, SourceId};

    use super::*;

    #[test]
    fn scan_errors_map_to_http_statuses() {
        let id = ScanRunId::new();
        let cases = [
            (
                AppError::from(ScanError::Validation(
                    ValidationError::NoSourcesEnabled,
                )),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(ScanError::Validation(
                    ValidationError::UnknownSource(SourceId::from("lexis")),
                )),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::from(ScanError::NotFound(id)), StatusCode::NOT_FOUND),
            (
                AppError::from(ScanError::StillRunning(id)),
                StatusCode::CONFLICT,
            ),
            (
                AppError::from(ScanError::History(
                    HistoryError::InvalidPageToken("garbage".into()),
                )),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(ScanError::Internal("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status, status, "{err}");
            assert!(err.code.is_some());
        }
    }
}
