use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relayd_core::error::RelayError;

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(RelayError::InvalidArgument(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<RelayError>() {
            match e {
                RelayError::InvalidRelay(_) | RelayError::InvalidArgument(_) => {
                    StatusCode::BAD_REQUEST
                }
                RelayError::SequenceNotFound(_) => StatusCode::NOT_FOUND,
                RelayError::HardwareFault { .. }
                | RelayError::HardwareTimeout { .. }
                | RelayError::NotInitialized => StatusCode::INTERNAL_SERVER_ERROR,
                RelayError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
