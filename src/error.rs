use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the ticket core. I/O errors originate in the store or
/// directory and propagate unchanged through the router to the HTTP
/// boundary, where `IntoResponse` maps them to status codes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{resource} limit exceeded for this tenant plan")]
    QuotaExceeded { resource: &'static str },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Delivery(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            Error::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::NotFound("tenant").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Conflict("ticket already assigned").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::QuotaExceeded { resource: "message" }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::Delivery("wpp send error".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
