//! MemoryKernel: assembles the storage layers and collaborators from config
//! and owns the background sync loop.

use crate::background::spawn_sync_loop;
use crate::config::{expand_home, plan_layers, LayerPlan};
use crate::error::{KernelError, KernelResult};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_memory::markdown::{migrate_markdown, MigrationReport};
use strata_memory::{
    AgeGraph, GraphStore, Layers, QdrantStore, SearchEngine, SqliteStore, StorageOrchestrator,
    VectorStore,
};
use strata_runtime::{LlmExtractor, LlmSummarizer, OpenAiEmbedder};
use strata_types::collaborator::{Embedder, Extractor, Summarizer};
use strata_types::config::{KernelConfig, Tier};
use strata_types::conversation::{ConversationLogEntry, SummarizeRequest, SummarizeResponse};
use strata_types::error::{StrataError, StrataResult};
use strata_types::graph::{EntityDetail, GraphStats, RelatedEntity};
use strata_types::memory::{
    CreateMemoryRequest, ExtractionResult, ListMemoriesQuery, Memory, MemoryId, MemoryScope,
    MemorySource, UpdateMemoryRequest,
};
use strata_types::search::{SearchRequest, SearchResponse};
use strata_types::sync::{HealthReport, MemoryWriteResult, SyncQueueItem, SyncRunStats};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long `shutdown` waits for the sync loop to finish its cycle.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The memory kernel: one instance per process.
pub struct MemoryKernel {
    config: KernelConfig,
    plan: LayerPlan,
    orchestrator: StorageOrchestrator,
    search: SearchEngine,
    summarizer: Option<Arc<dyn Summarizer>>,
    age: Option<Arc<AgeGraph>>,
    shutdown_tx: watch::Sender<bool>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

/// Counts shown by `status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KernelStats {
    pub memory_count: u64,
    pub database_bytes: u64,
    pub pending_sync_items: u64,
    pub vector_points: Option<u64>,
    pub graph: Option<GraphStats>,
}

impl MemoryKernel {
    /// Build every configured layer and start the sync loop.
    ///
    /// Only the primary store is required. Secondary layers that fail to
    /// initialize are logged and retried lazily on first use.
    pub async fn boot(config: KernelConfig) -> KernelResult<Self> {
        let plan = plan_layers(&config)?;
        info!(
            tier = %plan.tier,
            vector = plan.vector,
            graph = plan.graph,
            embedding = plan.embedding,
            extraction = plan.extraction,
            "Booting memory kernel"
        );

        let sqlite_path = expand_home(&config.sqlite.path);
        if let Some(parent) = sqlite_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KernelError::BootFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let sqlite = SqliteStore::open(&sqlite_path)
            .map_err(|e| KernelError::BootFailed(format!("primary store: {e}")))?;

        let (layers, age) = build_layers(&config, &plan)?;
        let summarizer: Option<Arc<dyn Summarizer>> = if plan.summarizer {
            let s = LlmSummarizer::new(&config.extraction)
                .map_err(|e| KernelError::BootFailed(format!("summarizer: {e}")))?;
            Some(Arc::new(s))
        } else {
            None
        };

        let mut kernel = Self::assemble(config, plan, sqlite, layers, summarizer);
        kernel.age = age;
        kernel.orchestrator.init_layers().await;
        kernel.register_agents().await;
        kernel.start_sync_loop();
        Ok(kernel)
    }

    /// Assemble a kernel from prebuilt parts. Does not touch the network and
    /// does not start the sync loop.
    pub fn from_parts(
        config: KernelConfig,
        sqlite: SqliteStore,
        layers: Layers,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        let tier = config.resolved_tier();
        let plan = LayerPlan {
            tier,
            vector: layers.vector.is_some(),
            graph: layers.graph.is_some(),
            embedding: layers.embedder.is_some(),
            extraction: layers.extractor.is_some(),
            summarizer: summarizer.is_some(),
        };
        Self::assemble(config, plan, sqlite, layers, summarizer)
    }

    fn assemble(
        config: KernelConfig,
        plan: LayerPlan,
        sqlite: SqliteStore,
        layers: Layers,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        let orchestrator = StorageOrchestrator::new(plan.tier, sqlite, layers)
            .with_sync_batch_size(config.sync.batch_size);
        let search = orchestrator.search_engine(config.ranking);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            plan,
            orchestrator,
            search,
            summarizer,
            age: None,
            shutdown_tx,
            sync_task: Mutex::new(None),
        }
    }

    /// Start the periodic sync loop. A no-op without secondary layers or
    /// when the loop is already running.
    pub fn start_sync_loop(&self) {
        let processor = self.orchestrator.sync_processor();
        if !processor.has_secondary_layers() {
            info!("No secondary layers configured, sync loop not started");
            return;
        }
        let Ok(mut task) = self.sync_task.lock() else {
            warn!("Sync task lock poisoned, sync loop not started");
            return;
        };
        if task.is_some() {
            return;
        }
        let interval = Duration::from_secs(self.config.sync.interval_secs.max(1));
        *task = Some(spawn_sync_loop(
            processor,
            interval,
            self.shutdown_tx.subscribe(),
        ));
    }

    /// Stop the sync loop and wait briefly for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.sync_task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Sync loop did not stop in time");
            }
        }
        if let Some(ref age) = self.age {
            age.close().await;
        }
        info!("Memory kernel stopped");
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn tier(&self) -> Tier {
        self.plan.tier
    }

    pub fn layer_plan(&self) -> LayerPlan {
        self.plan
    }

    pub fn orchestrator(&self) -> &StorageOrchestrator {
        &self.orchestrator
    }

    pub fn is_sync_loop_running(&self) -> bool {
        self.sync_task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    // -- memories ----------------------------------------------------------

    pub async fn create_memory(&self, request: CreateMemoryRequest) -> StrataResult<MemoryWriteResult> {
        self.orchestrator.create_memory(request).await
    }

    pub fn get_memory(&self, id: &MemoryId) -> StrataResult<Option<Memory>> {
        self.orchestrator.get_memory(id)
    }

    pub async fn update_memory(
        &self,
        id: &MemoryId,
        request: UpdateMemoryRequest,
    ) -> StrataResult<Option<MemoryWriteResult>> {
        self.orchestrator.update_memory(id, request).await
    }

    pub async fn delete_memory(&self, id: &MemoryId) -> StrataResult<bool> {
        self.orchestrator.delete_memory(id).await
    }

    pub fn list_memories(&self, query: &ListMemoriesQuery) -> StrataResult<Vec<Memory>> {
        self.orchestrator.list_memories(query)
    }

    pub async fn search(&self, request: &SearchRequest) -> StrataResult<SearchResponse> {
        self.search.search(request).await
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    // -- conversations -----------------------------------------------------

    pub fn log_conversation(&self, entry: &ConversationLogEntry) -> StrataResult<()> {
        self.orchestrator.sqlite().append_conversation(entry)
    }

    pub fn conversation_log(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: Option<usize>,
    ) -> StrataResult<Vec<ConversationLogEntry>> {
        self.orchestrator
            .sqlite()
            .conversation_log(agent_id, session_id, limit)
    }

    /// Summarize a transcript and store it as a session memory about the user.
    ///
    /// Returns `None` when no summarizer is configured or it produced nothing.
    pub async fn summarize_conversation(
        &self,
        request: SummarizeRequest,
    ) -> StrataResult<Option<SummarizeResponse>> {
        let Some(ref summarizer) = self.summarizer else {
            return Ok(None);
        };
        let Some(summary) = summarizer.summarize(&request.messages).await else {
            return Ok(None);
        };

        let mut create = CreateMemoryRequest::new(
            request.agent_id.clone(),
            MemoryScope::Session,
            summary.clone(),
        );
        create.subject_id = request.user_id.clone();
        create.tags = vec![
            "conversation_summary".to_string(),
            request.channel.clone(),
            format!("session:{}", request.session_id),
        ];
        create.source = Some(MemorySource::ConversationSummary);
        create.created_by = Some(request.agent_id.clone());
        create.extract_entities = Some(true);

        let result = self.orchestrator.create_memory(create).await?;
        info!(
            agent_id = %request.agent_id,
            session_id = %request.session_id,
            memory_id = %result.memory.id,
            "Stored conversation summary"
        );
        Ok(Some(SummarizeResponse {
            memory_id: result.memory.id,
            summary,
            entities: result.memory.entities,
        }))
    }

    // -- entities ----------------------------------------------------------

    pub async fn get_entity(&self, entity_id: &str) -> StrataResult<Option<EntityDetail>> {
        match self.orchestrator.graph() {
            Some(graph) => graph.get_entity(entity_id).await,
            None => Ok(None),
        }
    }

    pub async fn list_entities(
        &self,
        entity_type: Option<&str>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<Value>> {
        match self.orchestrator.graph() {
            Some(graph) => graph.list_entities(entity_type, agent_id, limit).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn related_entities(
        &self,
        entity_id: &str,
        depth: u32,
    ) -> StrataResult<Vec<RelatedEntity>> {
        match self.orchestrator.graph() {
            Some(graph) => graph.related_entities(entity_id, depth).await,
            None => Ok(Vec::new()),
        }
    }

    /// Run the extractor over ad-hoc text without storing anything. `None`
    /// when extraction is not configured.
    pub async fn extract_entities(&self, text: &str) -> Option<ExtractionResult> {
        let extractor = self.orchestrator.extractor()?;
        Some(extractor.extract(text).await)
    }

    // -- admin -------------------------------------------------------------

    pub async fn health(&self) -> HealthReport {
        self.orchestrator.health_check().await
    }

    pub async fn retry_sync_queue(&self) -> StrataResult<SyncRunStats> {
        self.orchestrator.retry_sync_queue().await
    }

    pub fn sync_queue_items(&self, limit: usize) -> StrataResult<Vec<SyncQueueItem>> {
        self.orchestrator.sqlite().pending_sync_items(limit)
    }

    pub async fn migrate_markdown(
        &self,
        paths: &[PathBuf],
        agent_id: &str,
        dry_run: bool,
    ) -> StrataResult<MigrationReport> {
        if agent_id.trim().is_empty() {
            return Err(StrataError::InvalidInput("agent_id must not be empty".to_string()));
        }
        Ok(migrate_markdown(&self.orchestrator, paths, agent_id, dry_run).await)
    }

    /// Store statistics. Secondary-layer counts are `None` when the layer is
    /// disabled or could not be queried.
    pub async fn stats(&self) -> StrataResult<KernelStats> {
        let sqlite = self.orchestrator.sqlite();
        let vector_points = match self.orchestrator.vector() {
            Some(vector) => vector.point_count().await.ok(),
            None => None,
        };
        let graph = match self.orchestrator.graph() {
            Some(graph) => graph.stats().await.ok(),
            None => None,
        };
        Ok(KernelStats {
            memory_count: sqlite.memory_count()?,
            database_bytes: sqlite.database_size()?,
            pending_sync_items: sqlite.pending_sync_count()?,
            vector_points,
            graph,
        })
    }

    /// MERGE an `Agent` node for every configured agent.
    async fn register_agents(&self) {
        let Some(graph) = self.orchestrator.graph() else {
            return;
        };
        for agent in &self.config.agents {
            let name = agent.name.as_deref().unwrap_or(&agent.id);
            let role = agent.role.as_deref().unwrap_or("assistant");
            if let Err(e) = graph.ensure_agent_node(&agent.id, name, role).await {
                warn!(agent_id = %agent.id, error = %e, "Failed to register agent node");
            }
        }
    }
}

/// Construct the optional layers and collaborators the plan activates.
fn build_layers(
    config: &KernelConfig,
    plan: &LayerPlan,
) -> KernelResult<(Layers, Option<Arc<AgeGraph>>)> {
    let mut layers = Layers::default();
    let mut age = None;

    if plan.embedding {
        let embedder = OpenAiEmbedder::new(&config.embedding)
            .map_err(|e| KernelError::BootFailed(format!("embedder: {e}")))?;
        layers.embedder = Some(Arc::new(embedder) as Arc<dyn Embedder>);
    }
    if plan.extraction {
        let extractor = LlmExtractor::new(&config.extraction)
            .map_err(|e| KernelError::BootFailed(format!("extractor: {e}")))?;
        layers.extractor = Some(Arc::new(extractor) as Arc<dyn Extractor>);
    }
    if plan.vector {
        if let Some(ref url) = config.qdrant.url {
            let store = QdrantStore::new(url, &config.qdrant, config.embedding.dimensions)?;
            layers.vector = Some(Arc::new(store) as Arc<dyn VectorStore>);
        }
    }
    if plan.graph {
        let graph = Arc::new(AgeGraph::new(&config.age)?);
        layers.graph = Some(Arc::clone(&graph) as Arc<dyn GraphStore>);
        age = Some(graph);
    }
    Ok((layers, age))
}
