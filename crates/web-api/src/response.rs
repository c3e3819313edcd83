//! Uniform JSON envelope and the error-to-status mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tradedesk_bot_orchestrator::RunControlError;
use tradedesk_core::{ErrorKind, TradingError};
use tradedesk_execution::ExecutionResult;

/// `{ "success": bool, "data": ..., "error": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

#[must_use]
pub const fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Configuration => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Authentication | ErrorKind::Connection | ErrorKind::Execution => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TradingError> for ApiError {
    fn from(err: TradingError) -> Self {
        Self::new(status_for_kind(err.kind()), err.to_string())
    }
}

impl From<RunControlError> for ApiError {
    fn from(err: RunControlError) -> Self {
        match err {
            RunControlError::Trading(inner) => inner.into(),
            other => Self::new(StatusCode::CONFLICT, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!("Request failed ({}): {}", self.status, self.message);
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Order outcomes always carry the full result; a failed one also sets the status.
pub struct ExecutionReply(pub ExecutionResult);

impl IntoResponse for ExecutionReply {
    fn into_response(self) -> Response {
        let result = self.0;
        let status = match result.error_kind {
            Some(kind) if !result.success => status_for_kind(kind),
            _ => StatusCode::OK,
        };
        let body = ApiResponse {
            success: result.success,
            error: result.error.clone(),
            data: Some(result),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradedesk_bot_orchestrator::RunStatus;
    use tradedesk_core::{ConnectionError, ExecutionError, ValidationError};

    #[test]
    fn trading_errors_map_to_statuses() {
        let cases = [
            (TradingError::AccountNotFound(9), StatusCode::NOT_FOUND),
            (
                ExecutionError::PositionNotFound(42).into(),
                StatusCode::NOT_FOUND,
            ),
            (TradingError::not_connected(1), StatusCode::CONFLICT),
            (
                ValidationError::SymbolNotFound("XAUEUR".to_string()).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ConnectionError::Authentication("bad password".to_string()).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                TradingError::Fatal("store gone".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err.clone()).status, status, "{err}");
        }
    }

    #[test]
    fn run_control_conflicts() {
        let err = ApiError::from(RunControlError::AlreadyActive(RunStatus::Running));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.message, "bot is already running");

        let wrapped = ApiError::from(RunControlError::Trading(TradingError::AccountNotFound(2)));
        assert_eq!(wrapped.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let json = serde_json::to_value(ApiResponse::ok(3)).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": 3 }));
    }
}
