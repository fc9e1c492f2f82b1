//! Route handlers for the Strata API.

use crate::error::{ApiError, ApiResult};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use strata_kernel::MemoryKernel;
use strata_memory::cypher::entity_slug;
use strata_memory::markdown::{MigrateMarkdownRequest, MigrationReport};
use strata_types::conversation::{ConversationLogEntry, SummarizeRequest, SummarizeResponse};
use strata_types::graph::EntityDetail;
use strata_types::memory::{
    CreateMemoryRequest, ExtractionResult, ListMemoriesQuery, Memory, MemoryId,
    UpdateMemoryRequest,
};
use strata_types::search::{SearchRequest, SearchResponse, SearchStrategy};
use strata_types::sync::{HealthReport, MemoryWriteResult, SyncRunStats};
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub kernel: Arc<MemoryKernel>,
}

type SharedState = State<Arc<AppState>>;

const DEFAULT_ENTITY_LIMIT: usize = 50;
const DEFAULT_RELATED_DEPTH: u32 = 2;
const DEFAULT_QUEUE_LIMIT: usize = 100;
const DEFAULT_LOG_LIMIT: usize = 200;

fn parse_memory_id(raw: &str) -> ApiResult<MemoryId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Invalid memory id").with_details(raw.to_string()))
}

// ---------------------------------------------------------------------------
// Memories
// ---------------------------------------------------------------------------

/// POST /api/memories
pub async fn create_memory(
    State(state): SharedState,
    body: Result<Json<CreateMemoryRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MemoryWriteResult>)> {
    let Json(request) = body?;
    let result = state.kernel.create_memory(request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /api/memories
pub async fn list_memories(
    State(state): SharedState,
    query: Result<Query<ListMemoriesQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let memories = state.kernel.list_memories(&query)?;
    Ok(Json(json!({ "count": memories.len(), "memories": memories })))
}

/// GET /api/memories/{id}
pub async fn get_memory(
    State(state): SharedState,
    Path(id): Path<String>,
) -> ApiResult<Json<Memory>> {
    let id = parse_memory_id(&id)?;
    state
        .kernel
        .get_memory(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Memory not found").with_details(id.to_string()))
}

/// PUT /api/memories/{id}
pub async fn update_memory(
    State(state): SharedState,
    Path(id): Path<String>,
    body: Result<Json<UpdateMemoryRequest>, JsonRejection>,
) -> ApiResult<Json<MemoryWriteResult>> {
    let id = parse_memory_id(&id)?;
    let Json(request) = body?;
    state
        .kernel
        .update_memory(&id, request)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Memory not found").with_details(id.to_string()))
}

/// DELETE /api/memories/{id}
pub async fn delete_memory(
    State(state): SharedState,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_memory_id(&id)?;
    if state.kernel.delete_memory(&id).await? {
        Ok(Json(json!({ "deleted": true, "id": id })))
    } else {
        Err(ApiError::not_found("Memory not found").with_details(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// POST /api/search
pub async fn search(
    State(state): SharedState,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    let Json(request) = body?;
    Ok(Json(state.kernel.search(&request).await?))
}

/// Searches with the strategy pinned. Without an agent the request is
/// treated as cross-agent.
async fn forced_search(
    state: &AppState,
    body: Result<Json<SearchRequest>, JsonRejection>,
    strategy: SearchStrategy,
) -> ApiResult<Json<SearchResponse>> {
    let Json(mut request) = body?;
    request.strategy = Some(strategy);
    if request.agent_id.is_none() {
        request.cross_agent = Some(true);
    }
    Ok(Json(state.kernel.search(&request).await?))
}

/// POST /api/search/semantic
pub async fn search_semantic(
    State(state): SharedState,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    forced_search(&state, body, SearchStrategy::Semantic).await
}

/// POST /api/search/fulltext
pub async fn search_fulltext(
    State(state): SharedState,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    forced_search(&state, body, SearchStrategy::Fulltext).await
}

/// POST /api/search/graph
pub async fn search_graph(
    State(state): SharedState,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    forced_search(&state, body, SearchStrategy::Graph).await
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// POST /api/conversations/log
pub async fn log_conversation(
    State(state): SharedState,
    body: Result<Json<ConversationLogEntry>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(entry) = body?;
    if entry.agent_id.trim().is_empty() || entry.session_id.trim().is_empty() {
        return Err(ApiError::bad_request("agent_id and session_id are required"));
    }
    state.kernel.log_conversation(&entry)?;
    Ok((StatusCode::CREATED, Json(json!({ "logged": true }))))
}

#[derive(Debug, Deserialize)]
pub struct ConversationLogQuery {
    pub agent_id: String,
    pub session_id: String,
    pub limit: Option<usize>,
}

/// GET /api/conversations/log
pub async fn conversation_log(
    State(state): SharedState,
    query: Result<Query<ConversationLogQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let entries = state.kernel.conversation_log(
        &query.agent_id,
        &query.session_id,
        Some(query.limit.unwrap_or(DEFAULT_LOG_LIMIT)),
    )?;
    Ok(Json(json!({ "count": entries.len(), "entries": entries })))
}

/// POST /api/conversations/summarize
pub async fn summarize_conversation(
    State(state): SharedState,
    body: Result<Json<SummarizeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SummarizeResponse>)> {
    let Json(request) = body?;
    if !state.kernel.layer_plan().summarizer {
        return Err(ApiError::not_implemented("Summarization is not configured")
            .with_details("set an LLM api key and use the standard or full tier"));
    }
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    match state.kernel.summarize_conversation(request).await? {
        Some(response) => Ok((StatusCode::CREATED, Json(response))),
        None => Err(ApiError::internal("Summarization produced no output")),
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

fn require_graph(kernel: &MemoryKernel) -> ApiResult<()> {
    if kernel.layer_plan().graph {
        Ok(())
    } else {
        Err(ApiError::not_implemented("Graph layer not available")
            .with_details("entity routes require the full tier"))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEntitiesQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub agent_id: Option<String>,
    pub limit: Option<usize>,
}

async fn entity_listing(
    kernel: &MemoryKernel,
    entity_type: Option<&str>,
    query: &ListEntitiesQuery,
) -> ApiResult<Json<Value>> {
    require_graph(kernel)?;
    let entities = kernel
        .list_entities(
            entity_type,
            query.agent_id.as_deref(),
            query.limit.unwrap_or(DEFAULT_ENTITY_LIMIT),
        )
        .await?;
    Ok(Json(json!({ "count": entities.len(), "entities": entities })))
}

/// GET /api/entities
pub async fn list_entities(
    State(state): SharedState,
    query: Result<Query<ListEntitiesQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    entity_listing(&state.kernel, query.entity_type.as_deref(), &query).await
}

/// GET /api/entities/{type}
pub async fn list_entities_of_type(
    State(state): SharedState,
    Path(entity_type): Path<String>,
    query: Result<Query<ListEntitiesQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    entity_listing(&state.kernel, Some(&entity_type), &query).await
}

#[derive(Debug, Default, Deserialize)]
pub struct RelatedQuery {
    pub depth: Option<u32>,
}

async fn related(kernel: &MemoryKernel, entity_id: &str, depth: Option<u32>) -> ApiResult<Json<Value>> {
    require_graph(kernel)?;
    let related = kernel
        .related_entities(entity_id, depth.unwrap_or(DEFAULT_RELATED_DEPTH))
        .await?;
    Ok(Json(json!({
        "entity_id": entity_id,
        "count": related.len(),
        "related": related,
    })))
}

/// GET /api/entities/{type}/{id} and GET /api/entities/{id}/related.
///
/// Both shapes share one two-segment route; a literal `related` second
/// segment selects the traversal.
pub async fn entity_path(
    State(state): SharedState,
    Path((first, second)): Path<(String, String)>,
    query: Result<Query<RelatedQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    if second == "related" {
        return related(&state.kernel, &first, query.depth).await;
    }

    require_graph(&state.kernel)?;
    let detail = find_entity(&state.kernel, &first, &second)
        .await?
        .ok_or_else(|| ApiError::not_found("Entity not found").with_details(second.clone()))?;
    Ok(Json(serde_json::to_value(detail).map_err(|e| ApiError::internal(e.to_string()))?))
}

/// GET /api/entities/{type}/{id}/related
pub async fn typed_related(
    State(state): SharedState,
    Path((_entity_type, id)): Path<(String, String)>,
    query: Result<Query<RelatedQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    related(&state.kernel, &id, query.depth).await
}

/// Look up by node key first, then by `(type, name)` slug. A node whose
/// `entity_type` disagrees with the requested type is treated as absent.
async fn find_entity(
    kernel: &MemoryKernel,
    entity_type: &str,
    id: &str,
) -> ApiResult<Option<EntityDetail>> {
    let mut detail = kernel.get_entity(id).await?;
    if detail.is_none() {
        detail = kernel.get_entity(&entity_slug(entity_type, id)).await?;
    }
    Ok(detail.filter(|d| {
        d.entity
            .get("entity_type")
            .and_then(Value::as_str)
            .map_or(true, |t| t.eq_ignore_ascii_case(entity_type))
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub text: String,
}

/// POST /api/entities/extract
pub async fn extract_entities(
    State(state): SharedState,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> ApiResult<Json<ExtractionResult>> {
    let Json(request) = body?;
    if !state.kernel.layer_plan().extraction {
        return Err(ApiError::not_implemented("Entity extraction not available")
            .with_details("set an extraction api key and enable extraction"));
    }
    state
        .kernel
        .extract_entities(&request.text)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_implemented("Entity extraction not available"))
}

// ---------------------------------------------------------------------------
// Health and administration
// ---------------------------------------------------------------------------

/// GET /api/health
pub async fn health(State(state): SharedState) -> Json<HealthReport> {
    Json(state.kernel.health().await)
}

/// POST /api/sync/retry
pub async fn retry_sync(State(state): SharedState) -> ApiResult<Json<SyncRunStats>> {
    let stats = state.kernel.retry_sync_queue().await?;
    info!(
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Manual sync retry"
    );
    Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    pub limit: Option<usize>,
}

/// GET /api/sync/queue
pub async fn sync_queue(
    State(state): SharedState,
    query: Result<Query<QueueQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let items = state
        .kernel
        .sync_queue_items(query.limit.unwrap_or(DEFAULT_QUEUE_LIMIT))?;
    Ok(Json(json!({ "count": items.len(), "items": items })))
}

/// POST /api/admin/migrate-markdown
pub async fn migrate_markdown(
    State(state): SharedState,
    body: Result<Json<MigrateMarkdownRequest>, JsonRejection>,
) -> ApiResult<Json<MigrationReport>> {
    let Json(request) = body?;
    if request.markdown_paths.is_empty() {
        return Err(ApiError::bad_request("markdown_paths must not be empty"));
    }
    let report = state
        .kernel
        .migrate_markdown(&request.markdown_paths, &request.agent_id, request.dry_run)
        .await?;
    Ok(Json(report))
}
