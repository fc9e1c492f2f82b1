//! Sync queue processor: replays failed secondary-layer writes.
//!
//! Items live in the L1 `sync_queue` table so pending work survives restarts.
//! A cycle takes the oldest pending items, dispatches each to its layer, and
//! either removes it (success) or records the failure. Items that reach the
//! attempt ceiling are purged once the batch is done.

use crate::graph::GraphStore;
use crate::orchestrator::content_hash;
use crate::sqlite::SqliteStore;
use crate::vector::VectorStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_types::collaborator::Embedder;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::MemoryId;
use strata_types::sync::{SyncLayer, SyncOperation, SyncQueueItem, SyncRunStats};
use tracing::{debug, info, warn};

/// Items taken per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Drains the sync queue against whichever secondary layers are configured.
pub struct SyncQueueProcessor {
    sqlite: SqliteStore,
    vector: Option<Arc<dyn VectorStore>>,
    graph: Option<Arc<dyn GraphStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    batch_size: usize,
    running: AtomicBool,
}

/// Clears the in-flight flag when the cycle ends, including on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncQueueProcessor {
    pub fn new(
        sqlite: SqliteStore,
        vector: Option<Arc<dyn VectorStore>>,
        graph: Option<Arc<dyn GraphStore>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            sqlite,
            vector,
            graph,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Whether any secondary layer is configured. With none, there is
    /// nothing to reconcile and no loop should be started.
    pub fn has_secondary_layers(&self) -> bool {
        self.vector.is_some() || self.graph.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one drain cycle.
    ///
    /// A call that overlaps a cycle still in flight returns zero counts
    /// immediately. L1 failures abort the cycle; layer failures are recorded
    /// on the item.
    pub async fn run_once(&self) -> StrataResult<SyncRunStats> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync cycle already running, skipping");
            return Ok(SyncRunStats::default());
        }
        let _guard = RunGuard(&self.running);

        let items = self.sqlite.pending_sync_items(self.batch_size)?;
        let mut stats = SyncRunStats::default();

        for item in items {
            stats.processed += 1;
            match self.process_item(&item).await {
                Ok(()) => {
                    stats.succeeded += 1;
                    if self.sqlite.remove_sync_item(&item)? {
                        debug!(memory_id = %item.memory_id, layer = %item.layer, op = %item.operation, "Sync item replayed");
                    } else {
                        debug!(memory_id = %item.memory_id, layer = %item.layer, op = %item.operation, "Sync item re-enqueued during replay, kept");
                    }
                }
                Err(e) => {
                    let attempts = item.attempts + 1;
                    self.sqlite
                        .record_sync_failure(&item, attempts, &e.to_string())?;
                    stats.failed += 1;
                    warn!(
                        memory_id = %item.memory_id,
                        layer = %item.layer,
                        op = %item.operation,
                        attempts,
                        error = %e,
                        "Sync item failed"
                    );
                }
            }
        }

        let purged = self.sqlite.purge_exhausted_sync_items()?;
        if purged > 0 {
            info!(purged, "Purged exhausted sync items");
        }
        if stats.processed > 0 {
            info!(
                processed = stats.processed,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "Sync cycle complete"
            );
        }
        Ok(stats)
    }

    async fn process_item(&self, item: &SyncQueueItem) -> StrataResult<()> {
        let id: MemoryId = item.memory_id.parse().map_err(|e| {
            StrataError::InvalidInput(format!("bad memory id '{}': {e}", item.memory_id))
        })?;
        match (item.layer, item.operation) {
            (SyncLayer::Qdrant, SyncOperation::Upsert) => self.upsert_vector(&id).await,
            (SyncLayer::Qdrant, SyncOperation::Delete) => self.vector()?.delete(&id).await,
            (SyncLayer::Age, SyncOperation::Upsert) => self.upsert_graph(&id).await,
            (SyncLayer::Age, SyncOperation::Delete) => self.graph()?.delete_memory_node(&id).await,
        }
    }

    fn vector(&self) -> StrataResult<&Arc<dyn VectorStore>> {
        self.vector
            .as_ref()
            .ok_or_else(|| StrataError::Vector("vector layer not configured".to_string()))
    }

    fn graph(&self) -> StrataResult<&Arc<dyn GraphStore>> {
        self.graph
            .as_ref()
            .ok_or_else(|| StrataError::Graph("graph layer not configured".to_string()))
    }

    /// Re-embed the current L1 content and replace the point.
    async fn upsert_vector(&self, id: &MemoryId) -> StrataResult<()> {
        let vector_store = self.vector()?;
        let Some(memory) = self.sqlite.get(id)? else {
            debug!(memory_id = %id, "Memory gone from primary store, dropping vector upsert");
            return Ok(());
        };
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| StrataError::Embedding("no embedder configured".to_string()))?;
        let vector = embedder
            .embed(&memory.content)
            .await
            .ok_or_else(|| StrataError::Embedding("embedding unavailable".to_string()))?;
        vector_store.upsert(&memory, &vector).await?;
        if let Err(e) = self
            .sqlite
            .set_embedding_hash(id, &content_hash(&memory.content))
        {
            warn!(memory_id = %id, error = %e, "Failed to record embedding hash");
        }
        Ok(())
    }

    /// Re-upsert the memory node and the entities already stored on the record.
    async fn upsert_graph(&self, id: &MemoryId) -> StrataResult<()> {
        let graph = self.graph()?;
        let Some(memory) = self.sqlite.get(id)? else {
            debug!(memory_id = %id, "Memory gone from primary store, dropping graph upsert");
            return Ok(());
        };
        graph.upsert_memory_node(&memory).await?;
        for entity in &memory.entities {
            let entity_id = graph.upsert_entity_node(entity, &memory.agent_id).await?;
            graph.link_memory_to_entity(&memory.id, &entity_id).await?;
        }
        Ok(())
    }
}
