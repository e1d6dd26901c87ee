use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tickethive_schema::Error;

/// Reply shown to end users when a turn fails for reasons that are not
/// theirs to fix.
const GENERIC_USER_REPLY: &str = "I could not process your message, please try again.";

pub struct ApiError {
    status: StatusCode,
    message: String,
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::CapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    /// Admin surface: the audience is trusted, keep the detail.
    pub fn admin(err: Error) -> Self {
        if matches!(err, Error::Internal(_)) {
            tracing::error!("admin request failed: {err:#}");
        }
        Self {
            status: status_for(&err),
            message: err.to_string(),
        }
    }

    /// User surface: bad input keeps its message, everything else collapses
    /// to a generic retry reply without leaking internal detail.
    pub fn user_facing(err: Error) -> Self {
        let status = status_for(&err);
        let message = match &err {
            Error::Validation(msg) => msg.clone(),
            _ => {
                tracing::warn!("turn failed: {err:#}");
                GENERIC_USER_REPLY.to_string()
            }
        };
        Self { status, message }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
