//! Integration tests for the write path, the sync queue and search fusion.
//!
//! A real in-memory `SqliteStore` is wired to in-process vector, graph,
//! embedding and extraction mocks. Each mock can be switched to fail so the
//! degraded paths (queued retries, purges, soft search failures) can be
//! driven deterministically. No external services are contacted.

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strata_memory::cypher::entity_slug;
use strata_memory::graph::{exact_score, relationship_endpoint_id};
use strata_memory::migration::run_migrations;
use strata_memory::{
    content_hash, GraphStore, Layers, SqliteStore, StorageOrchestrator, SyncQueueProcessor,
    VectorFilter, VectorStore,
};
use strata_types::collaborator::{Embedder, Extractor};
use strata_types::config::{RankingConfig, Tier};
use strata_types::error::{StrataError, StrataResult};
use strata_types::graph::{EntityDetail, GraphStats, RelatedEntity};
use strata_types::memory::{
    CreateMemoryRequest, EntityType, ExtractedEntity, ExtractedRelationship, ExtractionResult,
    Memory, MemoryId, MemoryScope, MemorySource, RelationshipType, UpdateMemoryRequest,
};
use strata_types::search::{
    GraphContext, RelatedEntityRef, ScoredMemory, SearchRequest, SearchStrategy, SourceLayer,
};
use strata_types::sync::{LayerHealth, LayerSyncStatus, SyncLayer, SyncOperation, SyncRunStats};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Mock vector layer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockVector {
    points: Mutex<HashMap<MemoryId, Memory>>,
    fail: AtomicBool,
    upserts: AtomicUsize,
}

impl MockVector {
    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> StrataResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(StrataError::Vector("mock vector layer down".into()))
        } else {
            Ok(())
        }
    }

    fn len(&self) -> usize {
        self.points.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorStore for MockVector {
    async fn ensure_collection(&self, _vector_size: usize) -> StrataResult<()> {
        self.check()
    }

    async fn upsert(&self, memory: &Memory, _vector: &[f32]) -> StrataResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.points.lock().unwrap().insert(memory.id, memory.clone());
        Ok(())
    }

    async fn delete(&self, id: &MemoryId) -> StrataResult<()> {
        self.check()?;
        self.points.lock().unwrap().remove(id);
        Ok(())
    }

    async fn search(
        &self,
        _vector: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        self.check()?;
        let points = self.points.lock().unwrap();
        let mut hits: Vec<ScoredMemory> = points
            .values()
            .filter(|m| filter.agent_id.as_ref().map_or(true, |a| &m.agent_id == a))
            .filter(|m| filter.scopes.is_empty() || filter.scopes.contains(&m.scope))
            .filter(|m| {
                filter
                    .subject_id
                    .as_ref()
                    .map_or(true, |s| m.subject_id.as_ref() == Some(s))
            })
            .map(|m| ScoredMemory {
                memory: m.clone(),
                score: 0.9,
                source_layer: SourceLayer::Qdrant,
                graph_context: None,
            })
            .collect();
        hits.sort_by_key(|h| h.memory.id);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn health_check(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }

    async fn point_count(&self) -> StrataResult<u64> {
        Ok(self.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Mock graph layer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockGraph {
    nodes: Mutex<HashMap<MemoryId, Memory>>,
    entities: Mutex<HashMap<String, ExtractedEntity>>,
    links: Mutex<HashSet<(MemoryId, String)>>,
    relationships: Mutex<Vec<ExtractedRelationship>>,
    fail: AtomicBool,
}

impl MockGraph {
    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> StrataResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(StrataError::Graph("mock graph layer down".into()))
        } else {
            Ok(())
        }
    }

    fn hits_for(&self, entity_ids: &[String], agent_id: Option<&str>) -> Vec<Memory> {
        let links = self.links.lock().unwrap();
        let nodes = self.nodes.lock().unwrap();
        let mut out: Vec<Memory> = links
            .iter()
            .filter(|(_, e)| entity_ids.contains(e))
            .filter_map(|(m, _)| nodes.get(m).cloned())
            .filter(|m| agent_id.map_or(true, |a| m.agent_id == a))
            .collect();
        out.sort_by_key(|m| m.id);
        out.dedup_by_key(|m| m.id);
        out
    }
}

#[async_trait]
impl GraphStore for MockGraph {
    async fn ensure_graph(&self) -> StrataResult<()> {
        self.check()
    }

    async fn upsert_memory_node(&self, memory: &Memory) -> StrataResult<()> {
        self.check()?;
        let mut node = memory.clone();
        node.content = node.content.chars().take(500).collect();
        node.tags.clear();
        self.nodes.lock().unwrap().insert(memory.id, node);
        Ok(())
    }

    async fn upsert_entity_node(
        &self,
        entity: &ExtractedEntity,
        _agent_id: &str,
    ) -> StrataResult<String> {
        self.check()?;
        let id = entity_slug(entity.entity_type.as_str(), &entity.name);
        self.entities.lock().unwrap().insert(id.clone(), entity.clone());
        Ok(id)
    }

    async fn create_relationship(
        &self,
        rel: &ExtractedRelationship,
        entities: &[ExtractedEntity],
        _agent_id: &str,
    ) -> StrataResult<()> {
        self.check()?;
        // Like the MATCH in AGE: an edge needs both endpoint nodes to exist.
        let from = relationship_endpoint_id(&rel.from_entity, entities);
        let to = relationship_endpoint_id(&rel.to_entity, entities);
        {
            let nodes = self.entities.lock().unwrap();
            if !nodes.contains_key(&from) || !nodes.contains_key(&to) {
                return Ok(());
            }
        }
        let mut rels = self.relationships.lock().unwrap();
        if !rels.contains(rel) {
            rels.push(rel.clone());
        }
        Ok(())
    }

    async fn link_memory_to_entity(
        &self,
        memory_id: &MemoryId,
        entity_id: &str,
    ) -> StrataResult<()> {
        self.check()?;
        self.links
            .lock()
            .unwrap()
            .insert((*memory_id, entity_id.to_string()));
        Ok(())
    }

    async fn delete_memory_node(&self, memory_id: &MemoryId) -> StrataResult<()> {
        self.check()?;
        self.links.lock().unwrap().retain(|(m, _)| m != memory_id);
        self.nodes.lock().unwrap().remove(memory_id);
        Ok(())
    }

    async fn get_entity(&self, entity_id: &str) -> StrataResult<Option<EntityDetail>> {
        self.check()?;
        Ok(self.entities.lock().unwrap().get(entity_id).map(|e| EntityDetail {
            entity: json!({"id": entity_id, "name": e.name}),
            relationships: vec![],
        }))
    }

    async fn related_entities(
        &self,
        _entity_id: &str,
        _depth: u32,
    ) -> StrataResult<Vec<RelatedEntity>> {
        self.check()?;
        Ok(vec![])
    }

    async fn search_by_entity(
        &self,
        name: &str,
        entity_type: Option<&str>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        self.check()?;
        let id = entity_slug(entity_type.unwrap_or("Concept"), name);
        let exact = self.hits_for(&[id], agent_id);
        if exact.is_empty() {
            return self.search_by_entity_name_fuzzy(name, agent_id, limit).await;
        }
        Ok(exact
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, memory)| ScoredMemory {
                memory,
                score: exact_score(i),
                source_layer: SourceLayer::Age,
                graph_context: None,
            })
            .collect())
    }

    async fn search_by_entity_name_fuzzy(
        &self,
        name: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        self.check()?;
        let needle = name.to_lowercase();
        let matching: Vec<(String, ExtractedEntity)> = self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.name.to_lowercase().contains(&needle))
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        let ids: Vec<String> = matching.iter().map(|(id, _)| id.clone()).collect();
        let context = GraphContext {
            related_entities: matching
                .iter()
                .map(|(_, e)| RelatedEntityRef {
                    entity_type: e.entity_type.as_str().to_string(),
                    name: e.name.clone(),
                    relationship: "MENTIONED_IN".into(),
                })
                .collect(),
        };
        Ok(self
            .hits_for(&ids, agent_id)
            .into_iter()
            .take(limit)
            .map(|memory| ScoredMemory {
                memory,
                score: 0.8,
                source_layer: SourceLayer::Age,
                graph_context: Some(context.clone()),
            })
            .collect())
    }

    async fn list_entities(
        &self,
        _entity_type: Option<&str>,
        _agent_id: Option<&str>,
        _limit: usize,
    ) -> StrataResult<Vec<Value>> {
        self.check()?;
        Ok(vec![])
    }

    async fn ensure_agent_node(&self, _agent_id: &str, _name: &str, _role: &str) -> StrataResult<()> {
        Ok(())
    }

    async fn stats(&self) -> StrataResult<GraphStats> {
        Ok(GraphStats {
            entity_count: self.entities.lock().unwrap().len() as u64,
            relationship_count: self.relationships.lock().unwrap().len() as u64,
        })
    }

    async fn health_check(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockEmbedder {
    unavailable: AtomicBool,
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if self.unavailable.load(Ordering::SeqCst) {
            None
        } else {
            Some(vec![1.0, text.len() as f32])
        }
    }

    fn dimensions(&self) -> usize {
        2
    }
}

/// Returns Alice (Person) and Atlas (Project) for any text, plus one
/// relationship whose raw label went through vocabulary coercion.
#[derive(Default)]
struct MockExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, _text: &str) -> ExtractionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExtractionResult {
            entities: vec![
                ExtractedEntity::new("Alice", EntityType::Person),
                ExtractedEntity::new("Atlas", EntityType::Project),
            ],
            relationships: vec![ExtractedRelationship {
                from_entity: "Alice".into(),
                to_entity: "Atlas".into(),
                relationship: RelationshipType::coerce("FOO_BAR"),
                properties: HashMap::new(),
            }],
        }
    }
}

/// Re-enqueues the same vector upsert while it is being embedded, the way a
/// concurrent update would.
struct ReenqueueEmbedder {
    sqlite: SqliteStore,
    memory_id: String,
}

#[async_trait]
impl Embedder for ReenqueueEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        self.sqlite
            .enqueue_sync(&self.memory_id, SyncLayer::Qdrant, SyncOperation::Upsert)
            .unwrap();
        Some(vec![1.0, text.len() as f32])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

/// Parks inside `embed` until released.
#[derive(Default)]
struct GatedEmbedder {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for GatedEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Some(vec![1.0, text.len() as f32])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    sqlite: SqliteStore,
    conn: Arc<Mutex<Connection>>,
    vector: Arc<MockVector>,
    graph: Arc<MockGraph>,
    embedder: Arc<MockEmbedder>,
    extractor: Arc<MockExtractor>,
    orch: StorageOrchestrator,
}

fn harness() -> Harness {
    let conn = Connection::open_in_memory().unwrap();
    run_migrations(&conn).unwrap();
    let conn = Arc::new(Mutex::new(conn));
    let sqlite = SqliteStore::new(Arc::clone(&conn));
    let vector = Arc::new(MockVector::default());
    let graph = Arc::new(MockGraph::default());
    let embedder = Arc::new(MockEmbedder::default());
    let extractor = Arc::new(MockExtractor::default());
    let orch = StorageOrchestrator::new(
        Tier::Full,
        sqlite.clone(),
        Layers {
            vector: Some(vector.clone() as Arc<dyn VectorStore>),
            graph: Some(graph.clone() as Arc<dyn GraphStore>),
            embedder: Some(embedder.clone() as Arc<dyn Embedder>),
            extractor: Some(extractor.clone() as Arc<dyn Extractor>),
        },
    );
    Harness {
        sqlite,
        conn,
        vector,
        graph,
        embedder,
        extractor,
        orch,
    }
}

const LONG_TEXT: &str = "Alice leads the Atlas project and prefers async reviews.";

async fn store(h: &Harness, agent: &str, scope: MemoryScope, content: &str) -> Memory {
    h.orch
        .create_memory(CreateMemoryRequest::new(agent, scope, content))
        .await
        .unwrap()
        .memory
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_propagates_to_all_layers() {
    let h = harness();
    let result = h
        .orch
        .create_memory(CreateMemoryRequest::new("main", MemoryScope::Agent, LONG_TEXT))
        .await
        .unwrap();

    assert_eq!(result.sync_status.sqlite, LayerSyncStatus::Ok);
    assert_eq!(result.sync_status.qdrant, LayerSyncStatus::Ok);
    assert_eq!(result.sync_status.age, LayerSyncStatus::Ok);
    assert_eq!(result.memory.entities.len(), 2);

    let stored = h.sqlite.get(&result.memory.id).unwrap().unwrap();
    assert_eq!(stored.embedding_hash, Some(content_hash(LONG_TEXT)));
    assert_eq!(stored.entities.len(), 2);

    assert_eq!(h.vector.len(), 1);
    assert!(h.graph.nodes.lock().unwrap().contains_key(&result.memory.id));
    assert_eq!(h.graph.links.lock().unwrap().len(), 2);
    assert!(h.sqlite.pending_sync_items(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_relationship_is_coerced_before_graph() {
    let h = harness();
    store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    let rels = h.graph.relationships.lock().unwrap();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].relationship, RelationshipType::RelatedTo);
}

#[tokio::test]
async fn test_relationship_endpoints_resolve_to_typed_entity_nodes() {
    let h = harness();
    store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;

    let entities = h.graph.entities.lock().unwrap();
    assert!(entities.contains_key("person-alice"));
    assert!(entities.contains_key("project-atlas"));
    assert!(!entities.contains_key("concept-alice"));
    drop(entities);

    let rels = h.graph.relationships.lock().unwrap();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].from_entity, "Alice");
    assert_eq!(rels[0].to_entity, "Atlas");
}

#[tokio::test]
async fn test_short_content_skips_extraction() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, "15 chars exactl").await;
    assert!(m.entities.is_empty());
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_extraction_opt_out_and_feedback_guard() {
    let h = harness();

    let mut opted_out = CreateMemoryRequest::new("main", MemoryScope::Agent, LONG_TEXT);
    opted_out.extract_entities = Some(false);
    let a = h.orch.create_memory(opted_out).await.unwrap();
    assert!(a.memory.entities.is_empty());

    let mut derived = CreateMemoryRequest::new("main", MemoryScope::Agent, LONG_TEXT);
    derived.source = Some(MemorySource::EntityExtraction);
    let b = h.orch.create_memory(derived).await.unwrap();
    assert!(b.memory.entities.is_empty());

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_primary_failure_leaves_no_partial_state() {
    let h = harness();
    h.conn
        .lock()
        .unwrap()
        .execute_batch("DROP TABLE memories;")
        .unwrap();

    let err = h
        .orch
        .create_memory(CreateMemoryRequest::new("main", MemoryScope::Agent, LONG_TEXT))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Storage(_)));
    assert!(err.is_fatal());

    assert_eq!(h.vector.upserts.load(Ordering::SeqCst), 0);
    assert!(h.graph.nodes.lock().unwrap().is_empty());
    assert!(h.sqlite.pending_sync_items(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_secondary_failures_queue_instead_of_failing() {
    let h = harness();
    h.vector.set_failing(true);
    h.graph.set_failing(true);

    let result = h
        .orch
        .create_memory(CreateMemoryRequest::new("main", MemoryScope::Agent, LONG_TEXT))
        .await
        .unwrap();
    assert_eq!(result.sync_status.sqlite, LayerSyncStatus::Ok);
    assert_eq!(result.sync_status.qdrant, LayerSyncStatus::Queued);
    assert_eq!(result.sync_status.age, LayerSyncStatus::Queued);

    let stored = h.sqlite.get(&result.memory.id).unwrap().unwrap();
    assert!(stored.embedding_hash.is_none());

    let items = h.sqlite.pending_sync_items(10).unwrap();
    let mut kinds: Vec<_> = items.iter().map(|i| (i.layer, i.operation)).collect();
    kinds.sort_by_key(|(l, _)| l.as_str());
    assert_eq!(
        kinds,
        vec![
            (SyncLayer::Age, SyncOperation::Upsert),
            (SyncLayer::Qdrant, SyncOperation::Upsert)
        ]
    );
}

#[tokio::test]
async fn test_unavailable_embedding_queues_vector_upsert() {
    let h = harness();
    h.embedder.unavailable.store(true, Ordering::SeqCst);
    let result = h
        .orch
        .create_memory(CreateMemoryRequest::new("main", MemoryScope::Agent, LONG_TEXT))
        .await
        .unwrap();
    assert_eq!(result.sync_status.qdrant, LayerSyncStatus::Queued);
    assert_eq!(result.sync_status.age, LayerSyncStatus::Ok);
    assert_eq!(h.vector.upserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_update_reextracts_only_on_content_change() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);

    let tags_only = UpdateMemoryRequest {
        tags: Some(vec!["team".into()]),
        ..Default::default()
    };
    let updated = h.orch.update_memory(&m.id, tags_only).await.unwrap().unwrap();
    assert_eq!(updated.memory.tags, vec!["team".to_string()]);
    assert_eq!(updated.memory.embedding_hash, Some(content_hash(LONG_TEXT)));
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);

    let same_content = UpdateMemoryRequest {
        content: Some(LONG_TEXT.into()),
        ..Default::default()
    };
    h.orch.update_memory(&m.id, same_content).await.unwrap().unwrap();
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);

    let new_text = "Alice moved from Atlas to the Orion initiative.";
    let changed = UpdateMemoryRequest {
        content: Some(new_text.into()),
        ..Default::default()
    };
    let updated = h.orch.update_memory(&m.id, changed).await.unwrap().unwrap();
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(updated.memory.embedding_hash, Some(content_hash(new_text)));
    assert!(updated.memory.updated_at >= updated.memory.created_at);
}

#[tokio::test]
async fn test_content_change_with_vector_down_clears_fingerprint() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    h.vector.set_failing(true);
    let changed = UpdateMemoryRequest {
        content: Some("Completely different content for the record.".into()),
        ..Default::default()
    };
    let updated = h.orch.update_memory(&m.id, changed).await.unwrap().unwrap();
    assert_eq!(updated.sync_status.qdrant, LayerSyncStatus::Queued);
    assert!(h.sqlite.get(&m.id).unwrap().unwrap().embedding_hash.is_none());
}

#[tokio::test]
async fn test_delete_queues_failed_layers() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    h.vector.set_failing(true);

    assert!(h.orch.delete_memory(&m.id).await.unwrap());
    assert!(h.sqlite.get(&m.id).unwrap().is_none());
    assert!(!h.graph.nodes.lock().unwrap().contains_key(&m.id));

    let items = h.sqlite.pending_sync_items(10).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].layer, SyncLayer::Qdrant);
    assert_eq!(items[0].operation, SyncOperation::Delete);

    assert!(!h.orch.delete_memory(&m.id).await.unwrap());
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_drain_recovers_after_layer_heals() {
    let h = harness();
    h.vector.set_failing(true);
    h.graph.set_failing(true);
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;

    let stats = h.orch.retry_sync_queue().await.unwrap();
    assert_eq!((stats.processed, stats.succeeded, stats.failed), (2, 0, 2));
    assert!(h
        .sqlite
        .pending_sync_items(10)
        .unwrap()
        .iter()
        .all(|i| i.attempts == 1 && i.last_error.is_some()));

    h.vector.set_failing(false);
    h.graph.set_failing(false);
    let stats = h.orch.retry_sync_queue().await.unwrap();
    assert_eq!((stats.processed, stats.succeeded, stats.failed), (2, 2, 0));
    assert!(h.sqlite.pending_sync_items(10).unwrap().is_empty());

    assert_eq!(h.vector.len(), 1);
    assert_eq!(
        h.sqlite.get(&m.id).unwrap().unwrap().embedding_hash,
        Some(content_hash(LONG_TEXT))
    );
    assert_eq!(h.graph.links.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_failure_is_purged_after_five_attempts() {
    let h = harness();
    h.vector.set_failing(true);
    store(&h, "main", MemoryScope::Agent, "fails forever in the vector layer").await;

    for attempt in 1..=4 {
        let stats = h.orch.retry_sync_queue().await.unwrap();
        assert_eq!(stats.failed, 1);
        let items = h.sqlite.pending_sync_items(10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempts, attempt);
    }

    let stats = h.orch.retry_sync_queue().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert!(h.sqlite.pending_sync_items(10).unwrap().is_empty());

    let stats = h.orch.retry_sync_queue().await.unwrap();
    assert_eq!(stats.processed, 0);
}

#[tokio::test]
async fn test_retry_for_deleted_memory_is_noop_success() {
    let h = harness();
    h.vector.set_failing(true);
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    assert!(h.sqlite.delete(&m.id).unwrap());

    h.vector.set_failing(false);
    let stats = h.orch.retry_sync_queue().await.unwrap();
    assert_eq!((stats.processed, stats.succeeded, stats.failed), (1, 1, 0));
    assert_eq!(h.vector.len(), 0);
    assert!(h.sqlite.pending_sync_items(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_reconciliation_is_idempotent() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    let id = m.id.to_string();

    for _ in 0..2 {
        h.sqlite.enqueue_sync(&id, SyncLayer::Age, SyncOperation::Upsert).unwrap();
        h.sqlite.enqueue_sync(&id, SyncLayer::Age, SyncOperation::Upsert).unwrap();
        h.sqlite.enqueue_sync(&id, SyncLayer::Qdrant, SyncOperation::Upsert).unwrap();
        let stats = h.orch.retry_sync_queue().await.unwrap();
        assert_eq!(stats.succeeded, 2);
    }

    assert_eq!(h.vector.len(), 1);
    assert_eq!(h.graph.nodes.lock().unwrap().len(), 1);
    assert_eq!(h.graph.entities.lock().unwrap().len(), 2);
    assert_eq!(h.graph.links.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_reenqueue_during_cycle_survives_to_next_cycle() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    let id = m.id.to_string();
    h.sqlite.enqueue_sync(&id, SyncLayer::Qdrant, SyncOperation::Upsert).unwrap();

    let embedder = Arc::new(ReenqueueEmbedder {
        sqlite: h.sqlite.clone(),
        memory_id: id.clone(),
    });
    let processor = SyncQueueProcessor::new(
        h.sqlite.clone(),
        Some(h.vector.clone() as Arc<dyn VectorStore>),
        None,
        Some(embedder as Arc<dyn Embedder>),
    );

    let stats = processor.run_once().await.unwrap();
    assert_eq!((stats.processed, stats.succeeded, stats.failed), (1, 1, 0));

    let pending = h.sqlite.pending_sync_items(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].memory_id, id);
    assert_eq!(pending[0].attempts, 0);
}

#[tokio::test]
async fn test_overlapping_cycle_returns_zero_counts() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    h.sqlite
        .enqueue_sync(&m.id.to_string(), SyncLayer::Qdrant, SyncOperation::Upsert)
        .unwrap();
    let upserts_before = h.vector.upserts.load(Ordering::SeqCst);

    let embedder = Arc::new(GatedEmbedder::default());
    let processor = Arc::new(SyncQueueProcessor::new(
        h.sqlite.clone(),
        Some(h.vector.clone() as Arc<dyn VectorStore>),
        None,
        Some(embedder.clone() as Arc<dyn Embedder>),
    ));

    let first = tokio::spawn({
        let processor = Arc::clone(&processor);
        async move { processor.run_once().await }
    });
    embedder.entered.notified().await;

    assert!(processor.is_running());
    assert_eq!(processor.run_once().await.unwrap(), SyncRunStats::default());
    assert_eq!(h.sqlite.pending_sync_items(10).unwrap().len(), 1);

    embedder.release.notify_one();
    let stats = first.await.unwrap().unwrap();
    assert_eq!((stats.processed, stats.succeeded, stats.failed), (1, 1, 0));
    assert!(!processor.is_running());

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.vector.upserts.load(Ordering::SeqCst), upserts_before + 1);
    assert!(h.sqlite.pending_sync_items(10).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scope_isolation_across_layers() {
    let h = harness();
    store(&h, "alpha", MemoryScope::Agent, LONG_TEXT).await;
    store(&h, "beta", MemoryScope::Agent, LONG_TEXT).await;
    let engine = h.orch.search_engine(RankingConfig::default());

    let mut request = SearchRequest::new("alpha", "Atlas");
    request.strategy = Some(SearchStrategy::All);
    let response = engine.search(&request).await.unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.memory.agent_id == "alpha"));

    request.cross_agent = Some(true);
    let response = engine.search(&request).await.unwrap();
    let agents: HashSet<_> = response.results.iter().map(|r| r.memory.agent_id.clone()).collect();
    assert_eq!(agents.len(), 2);
}

#[tokio::test]
async fn test_multi_layer_hit_gets_bonus_and_full_body() {
    let h = harness();
    let m = store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    let engine = h.orch.search_engine(RankingConfig::default());

    let mut request = SearchRequest::new("main", "Atlas");
    request.strategy = Some(SearchStrategy::All);
    let response = engine.search(&request).await.unwrap();

    assert_eq!(response.results.len(), 1);
    let hit = &response.results[0];
    assert_eq!(hit.memory.id, m.id);
    // three agreeing layers saturate the clamp
    assert_eq!(hit.score, 1.0);
    assert_eq!(hit.memory.content, LONG_TEXT);
    let stats = &response.layer_stats;
    assert_eq!(stats.sqlite.unwrap().count, 1);
    assert_eq!(stats.qdrant.unwrap().count, 1);
    assert!(stats.age.is_some());
}

#[tokio::test]
async fn test_failing_layer_contributes_nothing() {
    let h = harness();
    store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    h.vector.set_failing(true);
    h.graph.set_failing(true);
    let engine = h.orch.search_engine(RankingConfig::default());

    let mut request = SearchRequest::new("main", "Atlas");
    request.strategy = Some(SearchStrategy::All);
    let response = engine.search(&request).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].source_layer, SourceLayer::Sqlite);
    assert_eq!(response.layer_stats.qdrant.unwrap().count, 0);
    assert_eq!(response.layer_stats.age.unwrap().count, 0);
}

#[tokio::test]
async fn test_auto_strategy_and_graph_suppression() {
    let h = harness();
    store(&h, "main", MemoryScope::Agent, LONG_TEXT).await;
    let engine = h.orch.search_engine(RankingConfig::default());

    let request = SearchRequest::new("main", "What is Alice's email address?");
    let response = engine.search(&request).await.unwrap();
    assert_eq!(response.strategy_used, SearchStrategy::FulltextGraph);
    assert!(response.layer_stats.qdrant.is_none());

    let mut request = SearchRequest::new("main", "Atlas");
    request.include_graph = Some(false);
    let response = engine.search(&request).await.unwrap();
    assert_eq!(response.strategy_used, SearchStrategy::SemanticGraph);
    assert!(response.layer_stats.age.is_none());
    assert!(response.layer_stats.qdrant.is_some());
}

#[tokio::test]
async fn test_search_requires_agent_unless_cross_agent() {
    let h = harness();
    let engine = h.orch.search_engine(RankingConfig::default());
    let request = SearchRequest {
        query: "anything".into(),
        ..Default::default()
    };
    assert!(matches!(
        engine.search(&request).await,
        Err(StrataError::InvalidInput(_))
    ));
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_each_layer() {
    let h = harness();
    let report = h.orch.health_check().await;
    assert_eq!(report.sqlite, LayerHealth::Ok);
    assert_eq!(report.qdrant, LayerHealth::Ok);
    assert_eq!(report.age, LayerHealth::Ok);
    assert_eq!(report.tier, Tier::Full);

    h.graph.set_failing(true);
    let report = h.orch.health_check().await;
    assert_eq!(report.age, LayerHealth::Error);
    assert!(report.details.contains_key("age"));
    assert_eq!(report.sqlite, LayerHealth::Ok);
}
