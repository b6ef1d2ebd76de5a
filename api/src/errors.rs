use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::metrics::REJECTED_REQUESTS_TOTAL;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed request body: {0}")]
    MalformedRequestBody(String),

    #[error("Invalid value for '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    #[error("Ambiguous timestamp: {0}")]
    AmbiguousTimestamp(String),

    #[error("This resource is immutable and cannot be edited")]
    ImmutableResourceEdit,

    #[error("Invalid query parameter '{name}': {reason}")]
    InvalidQueryParameter { name: String, reason: String },

    #[error("Resource not found: {0}")]
    UnknownResource(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ValidationFailed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn query(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidQueryParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::MalformedRequestBody(_)
            | Error::ValidationFailed { .. }
            | Error::AmbiguousTimestamp(_)
            | Error::ImmutableResourceEdit
            | Error::InvalidQueryParameter { .. } => StatusCode::BAD_REQUEST,
            Error::UnknownResource(_) => StatusCode::NOT_FOUND,
            Error::UnsupportedMediaType(_) => StatusCode::NOT_ACCEPTABLE,
            Error::Database(_) | Error::Migration(_) | Error::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            debug!("Request rejected ({}): {}", status.as_u16(), self);
            REJECTED_REQUESTS_TOTAL.inc();
            self.to_string()
        };

        (
            status,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::VARY, "Accept"),
            ],
            Json(json!({ "message": message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_bad_request() {
        assert_eq!(
            Error::MalformedRequestBody("eof".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::ImmutableResourceEdit.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::query("aggtime", "missing").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_lookup_and_negotiation_statuses() {
        assert_eq!(
            Error::UnknownResource("/sites/9".to_string()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::UnsupportedMediaType("foobar".to_string()).status(),
            StatusCode::NOT_ACCEPTABLE
        );
    }

    #[test]
    fn test_error_response_is_json_with_vary() {
        let response = Error::validation("name", "must not be empty").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get(header::VARY).unwrap(), "Accept");
    }
}
