use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use services::{ErrorCode, ServiceError};

/// External JSON error shape. The wrapped cause is logged, never serialised.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Response wrapper translating [`ServiceError`] into the external shape.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(op = self.0.op, error = ?self.0, "request failed");
        } else {
            tracing::debug!(op = self.0.op, code = %self.0.code, "request rejected");
        }

        (
            status,
            Json(ErrorResponse::new(self.0.code, self.0.message)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn service_errors_map_to_status_and_json() {
        let err = ApiError(ServiceError::new(
            ErrorCode::NotFound,
            "SessionService.Get",
            "session not found",
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, ErrorCode::NotFound);
        assert_eq!(parsed.message, "session not found");
    }
}
