//! Kernel configuration schema and deployment tiers.
//!
//! Loading (file, includes, environment overrides) lives in `strata-kernel`.
//! This module only defines the shape and the defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment tier: which optional layers may be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Primary store only.
    #[default]
    Lite,
    /// Primary store plus vector layer, embeddings and extraction.
    Standard,
    /// Every layer, including the graph.
    Full,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lite => "lite",
            Self::Standard => "standard",
            Self::Full => "full",
        }
    }

    pub fn allows_vector(&self) -> bool {
        matches!(self, Self::Standard | Self::Full)
    }

    pub fn allows_graph(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Embeddings and extraction follow the vector layer.
    pub fn allows_llm(&self) -> bool {
        self.allows_vector()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lite" => Ok(Self::Lite),
            "standard" => Ok(Self::Standard),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown tier '{other}' (expected lite, standard or full)")),
        }
    }
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Explicit tier. Inferred from configured layers when absent.
    pub tier: Option<Tier>,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Bearer token required by the HTTP surface when set.
    pub auth_token: Option<String>,
    pub sqlite: SqliteConfig,
    pub qdrant: QdrantConfig,
    pub age: AgeConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub sync: SyncConfig,
    pub ranking: RankingConfig,
    /// Agents registered as graph nodes at boot.
    pub agents: Vec<AgentEntry>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tier: None,
            host: "127.0.0.1".to_string(),
            port: 7777,
            log_level: "info".to_string(),
            auth_token: None,
            sqlite: SqliteConfig::default(),
            qdrant: QdrantConfig::default(),
            age: AgeConfig::default(),
            embedding: EmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
            sync: SyncConfig::default(),
            ranking: RankingConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl KernelConfig {
    /// Explicit tier, else the richest tier the configured layers support.
    pub fn resolved_tier(&self) -> Tier {
        if let Some(tier) = self.tier {
            return tier;
        }
        match (self.qdrant.url.is_some(), self.age.host.is_some()) {
            (true, true) => Tier::Full,
            (true, false) => Tier::Standard,
            _ => Tier::Lite,
        }
    }

    /// Listen address for the HTTP surface.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Primary store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: strata_home().join("memory.sqlite"),
        }
    }
}

/// Vector layer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: Option<String>,
    pub collection: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection: "strata_memories".to_string(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

/// Graph layer settings (Apache AGE over PostgreSQL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub graph: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for AgeConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 5432,
            user: None,
            password: None,
            database: None,
            graph: "agent_memory".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

/// Embedding collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Extraction and summarization collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Background reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 50,
        }
    }
}

/// Score fusion constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Per-day multiplier applied to a hit's score.
    pub recency_decay: f64,
    /// Lowest value the recency multiplier can reach.
    pub recency_floor: f64,
    /// Added once per extra layer that returned the same memory.
    pub layer_bonus: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            recency_decay: 0.95,
            recency_floor: 0.5,
            layer_bonus: 0.1,
        }
    }
}

/// An agent known at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Default Strata home directory (`~/.strata`).
pub fn strata_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".strata")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.qdrant.collection, "strata_memories");
        assert_eq!(config.age.graph, "agent_memory");
        assert_eq!(config.age.max_connections, 5);
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.sync.interval_secs, 60);
        assert_eq!(config.ranking, RankingConfig::default());
        assert_eq!(config.listen_addr(), "127.0.0.1:7777");
    }

    #[test]
    fn test_tier_inference() {
        let mut config = KernelConfig::default();
        assert_eq!(config.resolved_tier(), Tier::Lite);

        config.qdrant.url = Some("http://localhost:6333".into());
        assert_eq!(config.resolved_tier(), Tier::Standard);

        config.age.host = Some("localhost".into());
        assert_eq!(config.resolved_tier(), Tier::Full);

        config.tier = Some(Tier::Lite);
        assert_eq!(config.resolved_tier(), Tier::Lite);
    }

    #[test]
    fn test_tier_capabilities() {
        assert!(!Tier::Lite.allows_vector());
        assert!(Tier::Standard.allows_vector());
        assert!(!Tier::Standard.allows_graph());
        assert!(Tier::Full.allows_graph());
        assert_eq!("FULL".parse::<Tier>().unwrap(), Tier::Full);
        assert!("max".parse::<Tier>().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: KernelConfig = toml::from_str(
            r#"
            port = 8080

            [qdrant]
            url = "http://qdrant:6333"

            [ranking]
            layer_bonus = 0.2
        "#,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.qdrant.collection, "strata_memories");
        assert_eq!(config.ranking.layer_bonus, 0.2);
        assert_eq!(config.ranking.recency_decay, 0.95);
    }
}
