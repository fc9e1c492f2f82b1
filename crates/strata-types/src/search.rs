//! Search request/response shapes and strategy vocabulary.

use crate::memory::{Memory, MemoryScope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of results returned by a search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Which layers a search consults.
///
/// Composite names denote a set of layers, not an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchStrategy {
    /// Classify the query text and pick one of the composites.
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "semantic")]
    Semantic,
    #[serde(rename = "fulltext")]
    Fulltext,
    #[serde(rename = "graph")]
    Graph,
    #[serde(rename = "all")]
    All,
    #[serde(rename = "fulltext+graph")]
    FulltextGraph,
    #[serde(rename = "graph+semantic")]
    GraphSemantic,
    #[serde(rename = "semantic+graph")]
    SemanticGraph,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Semantic => "semantic",
            Self::Fulltext => "fulltext",
            Self::Graph => "graph",
            Self::All => "all",
            Self::FulltextGraph => "fulltext+graph",
            Self::GraphSemantic => "graph+semantic",
            Self::SemanticGraph => "semantic+graph",
        }
    }

    /// Whether the full-text index participates.
    pub fn uses_fulltext(&self) -> bool {
        matches!(self, Self::Fulltext | Self::FulltextGraph | Self::All)
    }

    /// Whether the vector layer participates.
    pub fn uses_semantic(&self) -> bool {
        matches!(
            self,
            Self::Semantic | Self::SemanticGraph | Self::GraphSemantic | Self::All
        )
    }

    /// Whether the graph layer participates.
    pub fn uses_graph(&self) -> bool {
        matches!(
            self,
            Self::Graph | Self::FulltextGraph | Self::GraphSemantic | Self::SemanticGraph | Self::All
        )
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "semantic" => Ok(Self::Semantic),
            "fulltext" => Ok(Self::Fulltext),
            "graph" => Ok(Self::Graph),
            "all" => Ok(Self::All),
            "fulltext+graph" => Ok(Self::FulltextGraph),
            "graph+semantic" => Ok(Self::GraphSemantic),
            "semantic+graph" => Ok(Self::SemanticGraph),
            other => Err(format!("unknown search strategy '{other}'")),
        }
    }
}

/// A search query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Requesting agent. Required unless `cross_agent` is set.
    #[serde(default)]
    pub agent_id: Option<String>,
    pub query: String,
    /// Defaults to `[user, agent, global]`.
    #[serde(default)]
    pub scopes: Option<Vec<MemoryScope>>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// `Some(false)` suppresses the graph layer.
    #[serde(default)]
    pub include_graph: Option<bool>,
    #[serde(default)]
    pub cross_agent: Option<bool>,
    #[serde(default)]
    pub strategy: Option<SearchStrategy>,
}

impl SearchRequest {
    pub fn new(agent_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn effective_scopes(&self) -> Vec<MemoryScope> {
        match &self.scopes {
            Some(scopes) if !scopes.is_empty() => scopes.clone(),
            _ => MemoryScope::SEARCH_DEFAULT.to_vec(),
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_SEARCH_LIMIT)
    }

    pub fn is_cross_agent(&self) -> bool {
        self.cross_agent.unwrap_or(false)
    }

    /// Agent filter to apply at each layer; `None` means unfiltered.
    pub fn agent_filter(&self) -> Option<&str> {
        if self.is_cross_agent() {
            None
        } else {
            self.agent_id.as_deref()
        }
    }
}

/// Layer a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLayer {
    Sqlite,
    Qdrant,
    Age,
}

/// A neighbouring entity seen while resolving a graph hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedEntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub relationship: String,
}

/// Graph annotations attached to a search hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    pub related_entities: Vec<RelatedEntityRef>,
}

impl GraphContext {
    /// Union another context into this one, skipping duplicates.
    pub fn merge(&mut self, other: &GraphContext) {
        for entity in &other.related_entities {
            if !self.related_entities.contains(entity) {
                self.related_entities.push(entity.clone());
            }
        }
    }
}

/// A memory with a relevance score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
    pub source_layer: SourceLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_context: Option<GraphContext>,
}

/// Hit count and latency for one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStat {
    pub count: usize,
    pub ms: u64,
}

/// Per-layer statistics; `None` means the layer was not queried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<LayerStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant: Option<LayerStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<LayerStat>,
}

/// Fused result of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ScoredMemory>,
    pub strategy_used: SearchStrategy,
    pub layer_stats: LayerStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_layer_sets() {
        assert!(SearchStrategy::FulltextGraph.uses_fulltext());
        assert!(SearchStrategy::FulltextGraph.uses_graph());
        assert!(!SearchStrategy::FulltextGraph.uses_semantic());

        assert!(SearchStrategy::GraphSemantic.uses_semantic());
        assert!(SearchStrategy::SemanticGraph.uses_graph());
        assert!(!SearchStrategy::SemanticGraph.uses_fulltext());

        let all = SearchStrategy::All;
        assert!(all.uses_fulltext() && all.uses_semantic() && all.uses_graph());
        assert!(!SearchStrategy::Auto.uses_fulltext());
    }

    #[test]
    fn test_strategy_serde_names() {
        let s: SearchStrategy = serde_json::from_str(r#""graph+semantic""#).unwrap();
        assert_eq!(s, SearchStrategy::GraphSemantic);
        assert_eq!(
            serde_json::to_string(&SearchStrategy::FulltextGraph).unwrap(),
            r#""fulltext+graph""#
        );
        assert_eq!("semantic+graph".parse::<SearchStrategy>().unwrap(), SearchStrategy::SemanticGraph);
    }

    #[test]
    fn test_request_defaults() {
        let req: SearchRequest =
            serde_json::from_str(r#"{"agent_id":"main","query":"rust"}"#).unwrap();
        assert_eq!(req.effective_limit(), DEFAULT_SEARCH_LIMIT);
        assert_eq!(req.effective_scopes(), MemoryScope::SEARCH_DEFAULT.to_vec());
        assert_eq!(req.agent_filter(), Some("main"));
    }

    #[test]
    fn test_cross_agent_drops_agent_filter() {
        let mut req = SearchRequest::new("main", "rust");
        req.cross_agent = Some(true);
        assert_eq!(req.agent_filter(), None);
    }

    #[test]
    fn test_graph_context_merge_dedupes() {
        let e = RelatedEntityRef {
            entity_type: "Person".into(),
            name: "Alice".into(),
            relationship: "MENTIONS".into(),
        };
        let mut a = GraphContext {
            related_entities: vec![e.clone()],
        };
        a.merge(&GraphContext {
            related_entities: vec![e],
        });
        assert_eq!(a.related_entities.len(), 1);
    }
}
