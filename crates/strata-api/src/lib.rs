//! HTTP API for the Strata memory kernel.
//!
//! # Endpoints
//!
//! - `POST /api/memories`, `GET /api/memories`
//! - `GET /api/memories/{id}`, `PUT /api/memories/{id}`, `DELETE /api/memories/{id}`
//! - `POST /api/search`, plus `/semantic`, `/fulltext` and `/graph` variants
//!   that pin the strategy
//! - `POST /api/conversations/log`, `GET /api/conversations/log`
//! - `POST /api/conversations/summarize`
//! - `GET /api/entities`, `GET /api/entities/{type}`, `GET /api/entities/{type}/{id}`
//! - `GET /api/entities/{id}/related`, `GET /api/entities/{type}/{id}/related`
//! - `POST /api/entities/extract`
//! - `GET /api/health`
//! - `POST /api/sync/retry`, `GET /api/sync/queue`
//! - `POST /api/admin/migrate-markdown`
//!
//! When `auth_token` is configured every route except `/api/health` requires
//! `Authorization: Bearer <token>`.

pub mod auth;
pub mod error;
pub mod routes;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::future::Future;
use std::sync::Arc;
use strata_kernel::MemoryKernel;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::BearerAuth;
pub use error::{ApiError, ApiResult};
pub use routes::AppState;

/// Request bodies above this size are rejected.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Build the router over a kernel. Auth is taken from the kernel's config.
pub fn build_router(kernel: Arc<MemoryKernel>) -> Router {
    let auth = kernel.config().auth_token.as_deref().map(BearerAuth::new);
    let state = Arc::new(AppState { kernel });

    let router = Router::new()
        .route(
            "/api/memories",
            post(routes::create_memory).get(routes::list_memories),
        )
        .route(
            "/api/memories/{id}",
            get(routes::get_memory)
                .put(routes::update_memory)
                .delete(routes::delete_memory),
        )
        .route("/api/search", post(routes::search))
        .route("/api/search/semantic", post(routes::search_semantic))
        .route("/api/search/fulltext", post(routes::search_fulltext))
        .route("/api/search/graph", post(routes::search_graph))
        .route(
            "/api/conversations/log",
            post(routes::log_conversation).get(routes::conversation_log),
        )
        .route(
            "/api/conversations/summarize",
            post(routes::summarize_conversation),
        )
        // Entity routes share parameter names per segment so the matcher
        // sees one wildcard at each depth.
        .route("/api/entities", get(routes::list_entities))
        .route("/api/entities/extract", post(routes::extract_entities))
        .route("/api/entities/{first}", get(routes::list_entities_of_type))
        .route("/api/entities/{first}/{second}", get(routes::entity_path))
        .route(
            "/api/entities/{first}/{second}/related",
            get(routes::typed_related),
        )
        .route("/api/health", get(routes::health))
        .route("/api/sync/retry", post(routes::retry_sync))
        .route("/api/sync/queue", get(routes::sync_queue))
        .route("/api/admin/migrate-markdown", post(routes::migrate_markdown))
        .with_state(state);

    let router = match auth {
        Some(auth) => router.layer(middleware::from_fn_with_state(auth, auth::require_bearer)),
        None => router,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve(
    kernel: Arc<MemoryKernel>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = kernel.config().listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %listener.local_addr()?,
        auth = kernel.config().auth_token.is_some(),
        "Strata API listening"
    );
    axum::serve(listener, build_router(kernel))
        .with_graceful_shutdown(shutdown)
        .await
}
