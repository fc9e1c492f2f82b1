//! Bearer token authentication.
//!
//! Installed only when `auth_token` is configured. `/api/health` stays open so
//! that liveness probes need no credentials.

use crate::error::ApiError;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Path exempt from authentication.
pub const PUBLIC_PATH: &str = "/api/health";

/// The expected token.
#[derive(Clone)]
pub struct BearerAuth {
    token: Arc<[u8]>,
}

impl BearerAuth {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self {
            token: Arc::from(token.as_ref().as_bytes()),
        }
    }

    fn verify(&self, provided: &[u8]) -> bool {
        // ct_eq on slices of different length is a constant-time false
        self.token.as_ref().ct_eq(provided).into()
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerAuth(<redacted>)")
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Reject requests without a matching `Authorization: Bearer <token>` header.
pub async fn require_bearer(
    State(auth): State<BearerAuth>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == PUBLIC_PATH {
        return next.run(request).await;
    }

    match bearer_token(request.headers()) {
        Some(token) if auth.verify(token.as_bytes()) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request with invalid token");
            ApiError::new(StatusCode::UNAUTHORIZED, "Invalid bearer token").into_response()
        }
        None => ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token")
            .with_details("Use: Authorization: Bearer <token>")
            .into_response(),
    }
}
