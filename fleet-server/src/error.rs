//! HTTP error mapping: engine and command failures become status codes with a
//! JSON `{ "error": ... }` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use backup_engine::EngineError;
use serde_json::json;

use crate::commands::CommandError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The requested work is already running.
    #[error("{0}")]
    Busy(String),

    /// The panel or Drive could not be reached or refused the call.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    NotReady(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Busy(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::PassInProgress | EngineError::LabelBusy(_) => AppError::Busy(e.to_string()),
            EngineError::Transport(msg) => AppError::Upstream(msg),
            EngineError::Config(msg) => AppError::BadRequest(msg),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<CommandError> for AppError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::NoServers => AppError::Upstream(e.to_string()),
            CommandError::InvalidIndex => AppError::NotFound(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_status_codes() {
        let cases = [
            (EngineError::PassInProgress, StatusCode::CONFLICT),
            (EngineError::LabelBusy("world1".into()), StatusCode::CONFLICT),
            (EngineError::Transport("panel down".into()), StatusCode::BAD_GATEWAY),
            (EngineError::Archive("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_command_errors_keep_operator_text() {
        let err = AppError::from(CommandError::InvalidIndex);
        assert_eq!(err.to_string(), "Invalid server number.");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
