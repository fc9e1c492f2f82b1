//! Fan-out search across the configured layers.

use super::ranker::{merge_results, normalize_fts_score};
use super::strategy::{extract_entity_from_query, select_strategy};
use crate::graph::GraphStore;
use crate::sqlite::SqliteStore;
use crate::vector::{VectorFilter, VectorStore};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use strata_types::collaborator::Embedder;
use strata_types::config::RankingConfig;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::MemoryScope;
use strata_types::search::{
    LayerStat, LayerStats, ScoredMemory, SearchRequest, SearchResponse, SearchStrategy,
    SourceLayer,
};
use tracing::{debug, warn};

/// Runs one query against every layer its strategy names and fuses the hits.
#[derive(Clone)]
pub struct SearchEngine {
    sqlite: SqliteStore,
    vector: Option<Arc<dyn VectorStore>>,
    graph: Option<Arc<dyn GraphStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    ranking: RankingConfig,
}

/// Time a layer search and swallow its error into an empty result.
async fn timed<F>(layer: &'static str, fut: F) -> (Vec<ScoredMemory>, LayerStat)
where
    F: Future<Output = StrataResult<Vec<ScoredMemory>>>,
{
    let start = Instant::now();
    let hits = match fut.await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(layer, error = %e, "Layer search failed");
            Vec::new()
        }
    };
    let stat = LayerStat {
        count: hits.len(),
        ms: start.elapsed().as_millis() as u64,
    };
    debug!(layer, count = stat.count, ms = stat.ms, "Layer search finished");
    (hits, stat)
}

impl SearchEngine {
    pub fn new(
        sqlite: SqliteStore,
        vector: Option<Arc<dyn VectorStore>>,
        graph: Option<Arc<dyn GraphStore>>,
        embedder: Option<Arc<dyn Embedder>>,
        ranking: RankingConfig,
    ) -> Self {
        Self {
            sqlite,
            vector,
            graph,
            embedder,
            ranking,
        }
    }

    /// Resolve the strategy, query the layers concurrently and fuse.
    ///
    /// Layer failures are logged and count as zero hits. A layer that is not
    /// configured, or that the strategy does not name, is absent from
    /// `layer_stats`.
    pub async fn search(&self, request: &SearchRequest) -> StrataResult<SearchResponse> {
        if request.query.trim().is_empty() {
            return Err(StrataError::InvalidInput("query must not be empty".to_string()));
        }
        if request.agent_id.is_none() && !request.is_cross_agent() {
            return Err(StrataError::InvalidInput(
                "agent_id is required unless cross_agent is set".to_string(),
            ));
        }

        let strategy = select_strategy(&request.query, request.strategy);
        let limit = request.effective_limit();
        let scopes = request.effective_scopes();

        let run_fulltext = strategy.uses_fulltext();
        let run_semantic =
            strategy.uses_semantic() && self.vector.is_some() && self.embedder.is_some();
        let run_graph =
            strategy.uses_graph() && request.include_graph != Some(false) && self.graph.is_some();

        let fulltext = async {
            if run_fulltext {
                Some(timed("sqlite", self.fulltext_hits(request, &scopes, limit)).await)
            } else {
                None
            }
        };
        let semantic = async {
            if run_semantic {
                Some(timed("qdrant", self.semantic_hits(request, &scopes, limit)).await)
            } else {
                None
            }
        };
        let graph = async {
            if run_graph {
                Some(timed("age", self.graph_hits(request, &scopes, limit)).await)
            } else {
                None
            }
        };

        let (fulltext, semantic, graph) = tokio::join!(fulltext, semantic, graph);

        let mut layer_stats = LayerStats::default();
        let mut all_hits = Vec::new();
        if let Some((hits, stat)) = fulltext {
            layer_stats.sqlite = Some(stat);
            all_hits.extend(hits);
        }
        if let Some((hits, stat)) = semantic {
            layer_stats.qdrant = Some(stat);
            all_hits.extend(hits);
        }
        if let Some((hits, stat)) = graph {
            layer_stats.age = Some(stat);
            all_hits.extend(hits);
        }

        let results = merge_results(all_hits, limit, &self.ranking, Utc::now());
        debug!(strategy = %strategy, results = results.len(), "Search complete");

        Ok(SearchResponse {
            results,
            strategy_used: strategy,
            layer_stats,
        })
    }

    /// Search the vector layer only.
    pub async fn search_semantic(&self, request: &SearchRequest) -> StrataResult<SearchResponse> {
        self.search_forced(request, SearchStrategy::Semantic).await
    }

    /// Search the full-text index only.
    pub async fn search_fulltext(&self, request: &SearchRequest) -> StrataResult<SearchResponse> {
        self.search_forced(request, SearchStrategy::Fulltext).await
    }

    /// Search the graph layer only.
    pub async fn search_graph(&self, request: &SearchRequest) -> StrataResult<SearchResponse> {
        self.search_forced(request, SearchStrategy::Graph).await
    }

    async fn search_forced(
        &self,
        request: &SearchRequest,
        strategy: SearchStrategy,
    ) -> StrataResult<SearchResponse> {
        let mut request = request.clone();
        request.strategy = Some(strategy);
        self.search(&request).await
    }

    async fn fulltext_hits(
        &self,
        request: &SearchRequest,
        scopes: &[MemoryScope],
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        let hits = self.sqlite.search_fulltext(
            &request.query,
            request.agent_filter(),
            scopes,
            request.subject_id.as_deref(),
            limit,
        )?;
        Ok(hits
            .into_iter()
            .map(|hit| ScoredMemory {
                score: normalize_fts_score(hit.rank),
                memory: hit.memory,
                source_layer: SourceLayer::Sqlite,
                graph_context: None,
            })
            .collect())
    }

    async fn semantic_hits(
        &self,
        request: &SearchRequest,
        scopes: &[MemoryScope],
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        let (Some(vector), Some(embedder)) = (&self.vector, &self.embedder) else {
            return Ok(Vec::new());
        };
        let Some(query_vector) = embedder.embed(&request.query).await else {
            debug!("Query could not be embedded, skipping semantic search");
            return Ok(Vec::new());
        };
        let filter = VectorFilter::new(
            request.agent_id.as_deref(),
            scopes,
            request.subject_id.as_deref(),
            request.is_cross_agent(),
        );
        vector.search(&query_vector, &filter, limit).await
    }

    /// Graph hits are re-read from the primary store, which holds the full
    /// record. Hits whose memory no longer exists there are dropped, and hits
    /// outside the requested scopes or subject are filtered out.
    async fn graph_hits(
        &self,
        request: &SearchRequest,
        scopes: &[MemoryScope],
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        let Some(graph) = &self.graph else {
            return Ok(Vec::new());
        };
        let Some(entity) = extract_entity_from_query(&request.query) else {
            debug!("No entity found in query, skipping graph search");
            return Ok(Vec::new());
        };
        let hits = graph
            .search_by_entity(&entity, None, request.agent_filter(), limit)
            .await?;

        let mut out = Vec::with_capacity(hits.len());
        for mut hit in hits {
            match self.sqlite.get(&hit.memory.id) {
                Ok(Some(memory)) => hit.memory = memory,
                Ok(None) => {
                    debug!(memory_id = %hit.memory.id, "Graph hit has no primary record, dropping");
                    continue;
                }
                Err(e) => warn!(memory_id = %hit.memory.id, error = %e, "Could not load graph hit from primary store"),
            }
            if !scopes.contains(&hit.memory.scope) {
                continue;
            }
            if let Some(ref subject) = request.subject_id {
                if hit.memory.subject_id.as_deref() != Some(subject.as_str()) {
                    continue;
                }
            }
            out.push(hit);
        }
        Ok(out)
    }
}
