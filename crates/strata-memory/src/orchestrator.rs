//! Storage orchestrator: the write path across all three layers.
//!
//! L1 is written synchronously and its failures propagate. L2 and L3 are
//! attempted afterwards, one after the other, and each failure becomes a
//! queued retry reported through [`SyncStatus`] instead of an error.

use crate::graph::GraphStore;
use crate::search::SearchEngine;
use crate::sqlite::SqliteStore;
use crate::sync_queue::SyncQueueProcessor;
use crate::vector::VectorStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use strata_types::collaborator::{Embedder, Extractor};
use strata_types::config::{RankingConfig, Tier};
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{
    CreateMemoryRequest, ExtractedRelationship, ExtractionResult, ListMemoriesQuery, Memory,
    MemoryId, MemoryPatch, MemorySource, UpdateMemoryRequest, EXTRACTION_MIN_CHARS,
    normalize_tags,
};
use strata_types::sync::{
    HealthReport, LayerHealth, LayerSyncStatus, MemoryWriteResult, SyncLayer, SyncOperation,
    SyncRunStats, SyncStatus,
};
use tracing::{debug, info, warn};

/// Vector size used when no embedder reports one.
pub const DEFAULT_VECTOR_SIZE: usize = 1536;

/// Hex chars kept from the content digest.
const CONTENT_HASH_LEN: usize = 16;

/// Content fingerprint: the first 16 hex chars of SHA-256.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(CONTENT_HASH_LEN);
    hex
}

/// Optional layers and collaborators. Anything left `None` is disabled.
#[derive(Default, Clone)]
pub struct Layers {
    pub vector: Option<Arc<dyn VectorStore>>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub extractor: Option<Arc<dyn Extractor>>,
}

/// Top-level write façade over L1, L2 and L3.
pub struct StorageOrchestrator {
    tier: Tier,
    sqlite: SqliteStore,
    layers: Layers,
    sync: Arc<SyncQueueProcessor>,
    started: Instant,
}

impl StorageOrchestrator {
    pub fn new(tier: Tier, sqlite: SqliteStore, layers: Layers) -> Self {
        let sync = Arc::new(SyncQueueProcessor::new(
            sqlite.clone(),
            layers.vector.clone(),
            layers.graph.clone(),
            layers.embedder.clone(),
        ));
        Self {
            tier,
            sqlite,
            layers,
            sync,
            started: Instant::now(),
        }
    }

    /// Items taken per sync queue cycle.
    pub fn with_sync_batch_size(mut self, batch_size: usize) -> Self {
        self.sync = Arc::new(
            SyncQueueProcessor::new(
                self.sqlite.clone(),
                self.layers.vector.clone(),
                self.layers.graph.clone(),
                self.layers.embedder.clone(),
            )
            .with_batch_size(batch_size),
        );
        self
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn sqlite(&self) -> &SqliteStore {
        &self.sqlite
    }

    pub fn vector(&self) -> Option<&Arc<dyn VectorStore>> {
        self.layers.vector.as_ref()
    }

    pub fn graph(&self) -> Option<&Arc<dyn GraphStore>> {
        self.layers.graph.as_ref()
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.layers.embedder.as_ref()
    }

    pub fn extractor(&self) -> Option<&Arc<dyn Extractor>> {
        self.layers.extractor.as_ref()
    }

    pub fn sync_processor(&self) -> Arc<SyncQueueProcessor> {
        Arc::clone(&self.sync)
    }

    /// A search engine over the same layers.
    pub fn search_engine(&self, ranking: RankingConfig) -> SearchEngine {
        SearchEngine::new(
            self.sqlite.clone(),
            self.layers.vector.clone(),
            self.layers.graph.clone(),
            self.layers.embedder.clone(),
            ranking,
        )
    }

    /// Prepare the secondary layers. Failures are logged; both layers also
    /// initialize lazily on first use.
    pub async fn init_layers(&self) {
        if let Some(ref vector) = self.layers.vector {
            let size = self
                .layers
                .embedder
                .as_ref()
                .map(|e| e.dimensions())
                .unwrap_or(DEFAULT_VECTOR_SIZE);
            match vector.ensure_collection(size).await {
                Ok(()) => info!(vector_size = size, "Vector layer ready"),
                Err(e) => warn!(error = %e, "Vector layer init failed, will retry on use"),
            }
        }
        if let Some(ref graph) = self.layers.graph {
            match graph.ensure_graph().await {
                Ok(()) => info!("Graph layer ready"),
                Err(e) => warn!(error = %e, "Graph layer init failed, will retry on use"),
            }
        }
    }

    // -- reads -------------------------------------------------------------

    pub fn get_memory(&self, id: &MemoryId) -> StrataResult<Option<Memory>> {
        self.sqlite.get(id)
    }

    pub fn list_memories(&self, query: &ListMemoriesQuery) -> StrataResult<Vec<Memory>> {
        self.sqlite.list(query)
    }

    // -- writes ------------------------------------------------------------

    /// Create a memory, then propagate it to the secondary layers.
    pub async fn create_memory(
        &self,
        request: CreateMemoryRequest,
    ) -> StrataResult<MemoryWriteResult> {
        if request.agent_id.trim().is_empty() {
            return Err(StrataError::InvalidInput("agent_id must not be empty".to_string()));
        }
        if request.content.trim().is_empty() {
            return Err(StrataError::InvalidInput("content must not be empty".to_string()));
        }

        let source = request.source.unwrap_or_default();
        let extraction = if self.should_extract(&request.content, request.extract_entities, source)
        {
            self.extract(&request.content).await
        } else {
            ExtractionResult::default()
        };

        let now = Utc::now();
        let mut memory = Memory {
            id: MemoryId::new(),
            agent_id: request.agent_id,
            scope: request.scope,
            subject_id: request.subject_id,
            content: request.content,
            tags: normalize_tags(request.tags),
            entities: extraction.entities,
            source,
            created_by: request.created_by,
            created_at: now,
            updated_at: now,
            expires_at: request.expires_at,
            embedding_hash: None,
        };

        self.sqlite.create(&memory)?;
        debug!(id = %memory.id, agent_id = %memory.agent_id, "Memory written to primary store");

        let qdrant = self.sync_vector(&mut memory).await;
        let age = self.sync_graph(&memory, &extraction.relationships).await;

        Ok(MemoryWriteResult {
            memory,
            sync_status: SyncStatus::new(qdrant, age),
        })
    }

    /// Patch a memory. Returns `None` for an unknown id.
    pub async fn update_memory(
        &self,
        id: &MemoryId,
        request: UpdateMemoryRequest,
    ) -> StrataResult<Option<MemoryWriteResult>> {
        let Some(existing) = self.sqlite.get(id)? else {
            return Ok(None);
        };

        let content_changed = request
            .content
            .as_ref()
            .is_some_and(|c| *c != existing.content);

        let mut patch = MemoryPatch {
            content: request.content,
            tags: request.tags,
            scope: request.scope,
            subject_id: request.subject_id,
            expires_at: request.expires_at,
            ..Default::default()
        };

        let mut relationships = Vec::new();
        if content_changed {
            // The stored fingerprint no longer describes the content; it is
            // recorded again once the vector layer accepts the new text.
            patch.embedding_hash = Some(None);
            let content = patch.content.as_deref().unwrap_or_default();
            if self.should_extract(content, request.extract_entities, existing.source) {
                let extraction = self.extract(content).await;
                patch.entities = Some(extraction.entities);
                relationships = extraction.relationships;
            }
        }

        let Some(mut updated) = self.sqlite.update(id, &patch)? else {
            return Ok(None);
        };

        let qdrant = self.sync_vector(&mut updated).await;
        let age = self.sync_graph(&updated, &relationships).await;

        Ok(Some(MemoryWriteResult {
            memory: updated,
            sync_status: SyncStatus::new(qdrant, age),
        }))
    }

    /// Delete from L1, then from each secondary layer. Returns `false` when
    /// nothing was deleted.
    pub async fn delete_memory(&self, id: &MemoryId) -> StrataResult<bool> {
        if !self.sqlite.delete(id)? {
            return Ok(false);
        }

        if let Some(ref vector) = self.layers.vector {
            if let Err(e) = vector.delete(id).await {
                warn!(memory_id = %id, error = %e, "Vector delete failed, queuing");
                self.queue(id, SyncLayer::Qdrant, SyncOperation::Delete);
            }
        }

        if let Some(ref graph) = self.layers.graph {
            if let Err(e) = graph.delete_memory_node(id).await {
                warn!(memory_id = %id, error = %e, "Graph delete failed, queuing");
                self.queue(id, SyncLayer::Age, SyncOperation::Delete);
            }
        }

        Ok(true)
    }

    /// Run one sync queue cycle.
    pub async fn retry_sync_queue(&self) -> StrataResult<SyncRunStats> {
        self.sync.run_once().await
    }

    /// Per-layer health, tier and uptime.
    pub async fn health_check(&self) -> HealthReport {
        let mut details = BTreeMap::new();

        let sqlite = if self.sqlite.health_check() {
            LayerHealth::Ok
        } else {
            details.insert("sqlite".to_string(), "primary store health check failed".to_string());
            LayerHealth::Error
        };

        let qdrant = match self.layers.vector {
            Some(ref vector) if vector.health_check().await => LayerHealth::Ok,
            Some(_) => {
                details.insert("qdrant".to_string(), "vector layer unreachable".to_string());
                LayerHealth::Error
            }
            None => LayerHealth::Disabled,
        };

        let age = match self.layers.graph {
            Some(ref graph) if graph.health_check().await => LayerHealth::Ok,
            Some(_) => {
                details.insert("age".to_string(), "graph layer unreachable".to_string());
                LayerHealth::Error
            }
            None => LayerHealth::Disabled,
        };

        HealthReport {
            sqlite,
            qdrant,
            age,
            tier: self.tier,
            uptime_secs: self.started.elapsed().as_secs(),
            details,
        }
    }

    // -- helpers -----------------------------------------------------------

    fn should_extract(
        &self,
        content: &str,
        requested: Option<bool>,
        source: MemorySource,
    ) -> bool {
        self.layers.extractor.is_some()
            && requested != Some(false)
            && content.chars().count() >= EXTRACTION_MIN_CHARS
            && source != MemorySource::EntityExtraction
    }

    async fn extract(&self, content: &str) -> ExtractionResult {
        match self.layers.extractor {
            Some(ref extractor) => extractor.extract(content).await,
            None => ExtractionResult::default(),
        }
    }

    /// Enqueue a retry. A queue write failure is logged; the caller has
    /// already committed to L1 and must not fail now.
    fn queue(&self, id: &MemoryId, layer: SyncLayer, operation: SyncOperation) {
        if let Err(e) = self.sqlite.enqueue_sync(&id.to_string(), layer, operation) {
            warn!(memory_id = %id, layer = %layer, op = %operation, error = %e, "Failed to queue sync item");
        }
    }

    async fn sync_vector(&self, memory: &mut Memory) -> LayerSyncStatus {
        let (Some(vector), Some(embedder)) = (&self.layers.vector, &self.layers.embedder) else {
            return LayerSyncStatus::Disabled;
        };

        let Some(embedding) = embedder.embed(&memory.content).await else {
            debug!(memory_id = %memory.id, "Embedding unavailable, queuing vector upsert");
            self.queue(&memory.id, SyncLayer::Qdrant, SyncOperation::Upsert);
            return LayerSyncStatus::Queued;
        };

        if let Err(e) = vector.upsert(memory, &embedding).await {
            warn!(memory_id = %memory.id, error = %e, "Vector upsert failed, queuing");
            self.queue(&memory.id, SyncLayer::Qdrant, SyncOperation::Upsert);
            return LayerSyncStatus::Queued;
        }

        let hash = content_hash(&memory.content);
        match self.sqlite.set_embedding_hash(&memory.id, &hash) {
            Ok(()) => memory.embedding_hash = Some(hash),
            Err(e) => warn!(memory_id = %memory.id, error = %e, "Failed to record embedding hash"),
        }
        LayerSyncStatus::Ok
    }

    async fn sync_graph(
        &self,
        memory: &Memory,
        relationships: &[ExtractedRelationship],
    ) -> LayerSyncStatus {
        let Some(ref graph) = self.layers.graph else {
            return LayerSyncStatus::Disabled;
        };

        let result: StrataResult<()> = async {
            graph.upsert_memory_node(memory).await?;
            for entity in &memory.entities {
                let entity_id = graph.upsert_entity_node(entity, &memory.agent_id).await?;
                graph.link_memory_to_entity(&memory.id, &entity_id).await?;
            }
            for rel in relationships {
                graph
                    .create_relationship(rel, &memory.entities, &memory.agent_id)
                    .await?;
            }
            Ok::<(), StrataError>(())
        }
        .await;

        match result {
            Ok(()) => LayerSyncStatus::Ok,
            Err(e) => {
                warn!(memory_id = %memory.id, error = %e, "Graph upsert failed, queuing");
                self.queue(&memory.id, SyncLayer::Age, SyncOperation::Upsert);
                LayerSyncStatus::Queued
            }
        }
    }
}
