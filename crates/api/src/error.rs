//! API error type with the uniform JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use engine::{EngineError, Severity};
use saga_store::StoreError;

/// API-level error mapped onto the uniform error body:
///
/// ```json
/// { "timestamp": "...", "status": 404, "error": "NOT_FOUND",
///   "message": "...", "sagaId": "...", "stepId": "...",
///   "errorCode": "NOT_FOUND", "severity": "LOW" }
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub severity: Severity,
    pub saga_id: Option<String>,
    pub step_id: Option<String>,
}

impl ApiError {
    /// A 404 for a missing resource.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
            severity: Severity::Low,
            saga_id: None,
            step_id: None,
        }
    }

    /// A 400 for invalid client input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION",
            message: message.into(),
            severity: Severity::Low,
            saga_id: None,
            step_id: None,
        }
    }

    /// Tags the error with the saga it concerns.
    pub fn with_saga_id(mut self, saga_id: impl ToString) -> Self {
        self.saga_id = Some(saga_id.to_string());
        self
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::SagaNotFound(_) | EngineError::Store(StoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            EngineError::Validation(_)
            | EngineError::Domain(_)
            | EngineError::InvalidState { .. }
            | EngineError::UnsupportedStepType(_) => StatusCode::BAD_REQUEST,
            EngineError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            EngineError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            EngineError::Store(_) | EngineError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let saga_id = match &err {
            EngineError::SagaNotFound(id) => Some(id.to_string()),
            EngineError::Store(StoreError::NotFound(id))
            | EngineError::Store(StoreError::Conflict { saga_id: id, .. }) => Some(id.to_string()),
            _ => None,
        };
        Self {
            status,
            code: err.code(),
            severity: err.severity(),
            message: err.to_string(),
            saga_id,
            step_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = serde_json::json!({
            "timestamp": Utc::now(),
            "status": self.status.as_u16(),
            "error": self.code,
            "message": self.message,
            "sagaId": self.saga_id,
            "stepId": self.step_id,
            "errorCode": self.code,
            "severity": self.severity,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SagaId;

    #[test]
    fn not_found_maps_to_404_with_saga_id() {
        let id = SagaId::new();
        let err = ApiError::from(EngineError::SagaNotFound(id));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.saga_id, Some(id.to_string()));
        assert_eq!(err.code, "NOT_FOUND");
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = ApiError::from(EngineError::RateLimited("client".into()));
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code, "RATE_LIMITED");
    }

    #[test]
    fn conflict_maps_to_409_stale_version() {
        let err = ApiError::from(EngineError::Store(StoreError::Conflict {
            saga_id: SagaId::new(),
            expected: common::Version::new(1),
            actual: common::Version::new(2),
        }));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "STALE_VERSION");
    }
}
