//! JSON error responses.
//!
//! Every failure leaves the server as `{"error": ..., "details": ...}` with a
//! 400, 401, 404, 500 or 501 status.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use strata_types::error::StrataError;
use tracing::error;

/// An error ready to be rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn not_implemented(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StrataError> for ApiError {
    fn from(e: StrataError) -> Self {
        match e {
            StrataError::InvalidInput(msg) => Self::bad_request("Invalid request").with_details(msg),
            StrataError::NotFound { resource, id } => {
                Self::not_found(format!("{resource} not found")).with_details(id)
            }
            other => {
                error!(error = %other, "Request failed");
                Self::internal("Internal error").with_details(other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("Malformed JSON body").with_details(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request("Malformed query string").with_details(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.error,
            details: self.details.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strata_error_status_mapping() {
        let bad: ApiError = StrataError::InvalidInput("agent_id must not be empty".into()).into();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.details.as_deref(), Some("agent_id must not be empty"));

        let missing: ApiError = StrataError::memory_not_found("abc").into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.error, "Memory not found");

        let storage: ApiError = StrataError::Storage("disk full".into()).into();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(storage.details.unwrap().contains("disk full"));
    }

    #[test]
    fn test_body_omits_absent_details() {
        let body = ErrorBody {
            error: "nope",
            details: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"nope"}"#);
    }
}
