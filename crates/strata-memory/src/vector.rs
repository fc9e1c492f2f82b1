//! Vector layer (L2): one Qdrant point per memory.
//!
//! Talks to Qdrant's REST API. The collection (and its payload indexes) is
//! created lazily on first use and memoized per instance. The layer is
//! optional; nothing in L1 depends on it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use strata_types::config::QdrantConfig;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{EntityType, ExtractedEntity, Memory, MemoryId, MemoryScope, MemorySource};
use strata_types::search::{ScoredMemory, SourceLayer};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Hits scoring below this cosine similarity are dropped server-side.
pub const SCORE_THRESHOLD: f64 = 0.3;

/// Payload fields indexed as keywords for server-side filtering.
pub const INDEXED_FIELDS: [&str; 7] = [
    "agent_id",
    "scope",
    "subject_id",
    "tags",
    "entity_types",
    "entity_names",
    "source",
];

/// Server-side filter for a vector search.
///
/// Each present value becomes one `must` predicate. No predicates means no
/// constraint at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilter {
    pub agent_id: Option<String>,
    pub scopes: Vec<MemoryScope>,
    pub subject_id: Option<String>,
}

impl VectorFilter {
    /// Cross-agent searches drop the owner predicate entirely.
    pub fn new(
        agent_id: Option<&str>,
        scopes: &[MemoryScope],
        subject_id: Option<&str>,
        cross_agent: bool,
    ) -> Self {
        Self {
            agent_id: if cross_agent {
                None
            } else {
                agent_id.map(String::from)
            },
            scopes: scopes.to_vec(),
            subject_id: subject_id.map(String::from),
        }
    }

    /// Qdrant filter JSON, or `None` when unconstrained.
    pub fn to_qdrant(&self) -> Option<Value> {
        let mut must = Vec::new();
        if let Some(ref agent_id) = self.agent_id {
            must.push(json!({"key": "agent_id", "match": {"value": agent_id}}));
        }
        if !self.scopes.is_empty() {
            let scopes: Vec<&str> = self.scopes.iter().map(|s| s.as_str()).collect();
            must.push(json!({"key": "scope", "match": {"any": scopes}}));
        }
        if let Some(ref subject_id) = self.subject_id {
            must.push(json!({"key": "subject_id", "match": {"value": subject_id}}));
        }
        if must.is_empty() {
            None
        } else {
            Some(json!({ "must": must }))
        }
    }
}

/// Semantic index keyed by memory id.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection and payload indexes if missing. Idempotent.
    async fn ensure_collection(&self, vector_size: usize) -> StrataResult<()>;

    /// Insert or replace the point for `memory`.
    async fn upsert(&self, memory: &Memory, vector: &[f32]) -> StrataResult<()>;

    /// Remove the point for `id`. Missing points are not an error.
    async fn delete(&self, id: &MemoryId) -> StrataResult<()>;

    /// Cosine-similarity search above [`SCORE_THRESHOLD`].
    async fn search(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>>;

    async fn health_check(&self) -> bool;

    /// Number of stored points.
    async fn point_count(&self) -> StrataResult<u64>;
}

/// Qdrant REST client.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<Zeroizing<String>>,
    default_dimensions: usize,
    ready: OnceCell<()>,
}

#[derive(Deserialize)]
struct QdrantEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionsList {
    #[serde(default)]
    collections: Vec<CollectionName>,
}

#[derive(Deserialize)]
struct CollectionName {
    name: String,
}

#[derive(Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<u64>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f64,
    #[serde(default)]
    payload: Option<serde_json::Map<String, Value>>,
}

impl QdrantStore {
    /// `default_dimensions` sizes the collection when a delete arrives before
    /// any upsert or search has initialized it.
    pub fn new(url: &str, config: &QdrantConfig, default_dimensions: usize) -> StrataResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StrataError::Vector(e.to_string()))?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone().map(Zeroizing::new),
            default_dimensions,
            ready: OnceCell::new(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key.as_str());
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> StrataResult<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| StrataError::Vector(format!("{what}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StrataError::Vector(format!(
                "{what} failed (status {}): {body}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }

    async fn collection_exists(&self) -> StrataResult<bool> {
        let resp = self
            .send(self.request(reqwest::Method::GET, "/collections"), "list collections")
            .await?;
        let body: QdrantEnvelope<CollectionsList> = resp
            .json()
            .await
            .map_err(|e| StrataError::Vector(e.to_string()))?;
        Ok(body.result.collections.iter().any(|c| c.name == self.collection))
    }

    async fn create_collection(&self, vector_size: usize) -> StrataResult<()> {
        let path = format!("/collections/{}", self.collection);
        let body = json!({
            "vectors": { "size": vector_size, "distance": "Cosine" },
            "optimizers_config": { "default_segment_number": 2 },
            "replication_factor": 1,
        });
        self.send(
            self.request(reqwest::Method::PUT, &path).json(&body),
            "create collection",
        )
        .await?;

        let index_path = format!("/collections/{}/index", self.collection);
        for field in INDEXED_FIELDS {
            let body = json!({ "field_name": field, "field_schema": "keyword" });
            self.send(
                self.request(reqwest::Method::PUT, &index_path).json(&body),
                "create payload index",
            )
            .await?;
        }
        info!(collection = %self.collection, vector_size, "Created vector collection");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, vector_size: usize) -> StrataResult<()> {
        self.ready
            .get_or_try_init(|| async {
                if !self.collection_exists().await? {
                    self.create_collection(vector_size).await?;
                }
                Ok::<(), StrataError>(())
            })
            .await?;
        Ok(())
    }

    async fn upsert(&self, memory: &Memory, vector: &[f32]) -> StrataResult<()> {
        self.ensure_collection(vector.len()).await?;
        let path = format!("/collections/{}/points?wait=true", self.collection);
        let body = json!({
            "points": [{
                "id": memory.id.to_string(),
                "vector": vector,
                "payload": memory_payload(memory),
            }]
        });
        self.send(self.request(reqwest::Method::PUT, &path).json(&body), "upsert point")
            .await?;
        debug!(id = %memory.id, "Upserted vector point");
        Ok(())
    }

    async fn delete(&self, id: &MemoryId) -> StrataResult<()> {
        self.ensure_collection(self.default_dimensions).await?;
        let path = format!("/collections/{}/points/delete?wait=true", self.collection);
        let body = json!({ "points": [id.to_string()] });
        self.send(self.request(reqwest::Method::POST, &path).json(&body), "delete point")
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        self.ensure_collection(vector.len()).await?;
        let path = format!("/collections/{}/points/search", self.collection);
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "score_threshold": SCORE_THRESHOLD,
        });
        if let Some(f) = filter.to_qdrant() {
            body["filter"] = f;
        }
        let resp = self
            .send(self.request(reqwest::Method::POST, &path).json(&body), "search")
            .await?;
        let parsed: QdrantEnvelope<Vec<ScoredPoint>> = resp
            .json()
            .await
            .map_err(|e| StrataError::Vector(e.to_string()))?;

        let mut hits = Vec::with_capacity(parsed.result.len());
        for point in parsed.result {
            let id = match &point.id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let payload = point.payload.unwrap_or_default();
            match payload_to_memory(&id, &payload) {
                Some(memory) => hits.push(ScoredMemory {
                    memory,
                    score: point.score,
                    source_layer: SourceLayer::Qdrant,
                    graph_context: None,
                }),
                None => warn!(point_id = %id, "Skipping vector hit with non-memory id"),
            }
        }
        Ok(hits)
    }

    async fn health_check(&self) -> bool {
        self.send(self.request(reqwest::Method::GET, "/collections"), "health")
            .await
            .is_ok()
    }

    async fn point_count(&self) -> StrataResult<u64> {
        let path = format!("/collections/{}", self.collection);
        let resp = self
            .send(self.request(reqwest::Method::GET, &path), "collection info")
            .await?;
        let info: QdrantEnvelope<CollectionInfo> = resp
            .json()
            .await
            .map_err(|e| StrataError::Vector(e.to_string()))?;
        Ok(info.result.points_count.unwrap_or(0))
    }
}

/// Point payload for a memory. Entities are flattened into parallel
/// name/type arrays so both can be keyword-indexed.
pub fn memory_payload(memory: &Memory) -> Value {
    let entity_types: Vec<&str> = memory.entities.iter().map(|e| e.entity_type.as_str()).collect();
    let entity_names: Vec<&str> = memory.entities.iter().map(|e| e.name.as_str()).collect();
    json!({
        "agent_id": memory.agent_id,
        "scope": memory.scope.as_str(),
        "subject_id": memory.subject_id,
        "content": memory.content,
        "tags": memory.tags,
        "entity_types": entity_types,
        "entity_names": entity_names,
        "source": memory.source.as_str(),
        "created_by": memory.created_by,
        "created_at": memory.created_at.to_rfc3339(),
        "updated_at": memory.updated_at.to_rfc3339(),
    })
}

/// Rebuild a memory from a point payload. `expires_at` and `embedding_hash`
/// are not stored in the payload and come back empty.
pub fn payload_to_memory(id: &str, payload: &serde_json::Map<String, Value>) -> Option<Memory> {
    let id: MemoryId = id.parse().ok()?;
    let str_field = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);
    let str_list = |key: &str| -> Vec<String> {
        payload
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };
    let ts = |key: &str| {
        str_field(key)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now)
    };

    let names = str_list("entity_names");
    let types = str_list("entity_types");
    let entities = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let entity_type = types
                .get(i)
                .map(|t| EntityType::coerce(t))
                .unwrap_or(EntityType::Concept);
            ExtractedEntity::new(name, entity_type)
        })
        .collect();

    Some(Memory {
        id,
        agent_id: str_field("agent_id").unwrap_or_default(),
        scope: str_field("scope")
            .and_then(|s| s.parse().ok())
            .unwrap_or(MemoryScope::Agent),
        subject_id: str_field("subject_id"),
        content: str_field("content").unwrap_or_default(),
        tags: str_list("tags"),
        entities,
        source: str_field("source")
            .and_then(|s| s.parse().ok())
            .unwrap_or(MemorySource::Explicit),
        created_by: str_field("created_by"),
        created_at: ts("created_at"),
        updated_at: ts("updated_at"),
        expires_at: None,
        embedding_hash: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> Memory {
        let now = Utc::now();
        Memory {
            id: MemoryId::new(),
            agent_id: "main".into(),
            scope: MemoryScope::User,
            subject_id: Some("u1".into()),
            content: "Alice uses Neovim".into(),
            tags: vec!["tools".into()],
            entities: vec![
                ExtractedEntity::new("Alice", EntityType::Person),
                ExtractedEntity::new("Neovim", EntityType::Tool),
            ],
            source: MemorySource::Explicit,
            created_by: Some("main".into()),
            created_at: now,
            updated_at: now,
            expires_at: None,
            embedding_hash: Some("abc".into()),
        }
    }

    #[test]
    fn test_filter_full() {
        let f = VectorFilter::new(
            Some("main"),
            &[MemoryScope::User, MemoryScope::Global],
            Some("u1"),
            false,
        );
        let v = f.to_qdrant().unwrap();
        let must = v["must"].as_array().unwrap();
        assert_eq!(must.len(), 3);
        assert_eq!(must[0]["key"], "agent_id");
        assert_eq!(must[0]["match"]["value"], "main");
        assert_eq!(must[1]["match"]["any"], json!(["user", "global"]));
        assert_eq!(must[2]["match"]["value"], "u1");
    }

    #[test]
    fn test_filter_cross_agent_omits_owner() {
        let f = VectorFilter::new(Some("main"), &[MemoryScope::Agent], None, true);
        let v = f.to_qdrant().unwrap();
        let must = v["must"].as_array().unwrap();
        assert_eq!(must.len(), 1);
        assert_eq!(must[0]["key"], "scope");
    }

    #[test]
    fn test_empty_filter_is_unconstrained() {
        let f = VectorFilter::new(None, &[], None, false);
        assert!(f.to_qdrant().is_none());
    }

    #[test]
    fn test_payload_roundtrip() {
        let m = sample();
        let payload = memory_payload(&m);
        assert_eq!(payload["entity_types"], json!(["Person", "Tool"]));
        assert_eq!(payload["entity_names"], json!(["Alice", "Neovim"]));

        let back = payload_to_memory(&m.id.to_string(), payload.as_object().unwrap()).unwrap();
        assert_eq!(back.id, m.id);
        assert_eq!(back.scope, MemoryScope::User);
        assert_eq!(back.entities, m.entities);
        assert_eq!(back.tags, m.tags);
        assert!(back.embedding_hash.is_none());
        assert!(back.expires_at.is_none());
    }

    #[test]
    fn test_payload_missing_types_default_to_concept() {
        let payload = json!({"entity_names": ["Rust", "Go"], "entity_types": ["Tool"]});
        let id = MemoryId::new().to_string();
        let m = payload_to_memory(&id, payload.as_object().unwrap()).unwrap();
        assert_eq!(m.entities[0].entity_type, EntityType::Tool);
        assert_eq!(m.entities[1].entity_type, EntityType::Concept);
        assert_eq!(m.scope, MemoryScope::Agent);
        assert_eq!(m.source, MemorySource::Explicit);
    }

    #[test]
    fn test_payload_rejects_foreign_ids() {
        let payload = serde_json::Map::new();
        assert!(payload_to_memory("42", &payload).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_errors_and_stays_uninitialized() {
        let config = QdrantConfig {
            timeout_secs: 2,
            ..Default::default()
        };
        let store = QdrantStore::new("http://127.0.0.1:1", &config, 8).unwrap();
        assert!(store.ensure_collection(8).await.is_err());
        assert!(store.ready.get().is_none());
        assert!(!store.health_check().await);
    }
}
