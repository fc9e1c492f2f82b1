//! Graph layer (L3): Apache AGE over PostgreSQL.
//!
//! Holds `Memory`, `Entity` and `Agent` nodes, the fixed relationship
//! vocabulary between entities, and a `MENTIONS` edge from each memory to the
//! entities it names. Entity nodes are keyed by `slug(type:name)` so the same
//! mention from many memories collapses onto one node.
//!
//! AGE has no bound parameters for Cypher, so every interpolated value goes
//! through [`crate::cypher`].

use crate::cypher::{
    entity_slug, escape_literal, escape_pattern, parse_agtype, sanitize_graph_name,
    sanitize_label, slugify,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Executor, Row};
use std::time::Duration;
use strata_types::config::AgeConfig;
use strata_types::error::{StrataError, StrataResult};
use strata_types::graph::{EdgeDirection, EntityDetail, EntityEdge, GraphStats, RelatedEntity};
use strata_types::memory::{
    EntityType, ExtractedEntity, ExtractedRelationship, Memory, MemoryId, MemoryScope,
    MemorySource,
};
use strata_types::search::{GraphContext, RelatedEntityRef, ScoredMemory, SourceLayer};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Memory node content is cut to this many chars.
pub const NODE_CONTENT_CHARS: usize = 500;

/// Deepest traversal allowed by [`GraphStore::related_entities`].
pub const MAX_TRAVERSAL_DEPTH: u32 = 4;

/// Limit bounds for entity search and listing.
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 200;

/// Relationship label reported on graph search hits.
const MENTIONED_IN: &str = "MENTIONED_IN";

/// Entity/relationship graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the named graph if missing. Idempotent.
    async fn ensure_graph(&self) -> StrataResult<()>;

    async fn upsert_memory_node(&self, memory: &Memory) -> StrataResult<()>;

    /// Returns the entity's node id (its slug).
    async fn upsert_entity_node(
        &self,
        entity: &ExtractedEntity,
        agent_id: &str,
    ) -> StrataResult<String>;

    /// Best-effort: invalid labels and query failures are logged, not returned.
    ///
    /// `entities` is the extraction the relationship came from; endpoint
    /// types are resolved against it with [`relationship_endpoint_id`].
    async fn create_relationship(
        &self,
        rel: &ExtractedRelationship,
        entities: &[ExtractedEntity],
        agent_id: &str,
    ) -> StrataResult<()>;

    /// Best-effort: failures are logged, not returned.
    async fn link_memory_to_entity(&self, memory_id: &MemoryId, entity_id: &str)
        -> StrataResult<()>;

    /// Remove the node and every edge touching it. Zero edges is fine.
    async fn delete_memory_node(&self, memory_id: &MemoryId) -> StrataResult<()>;

    async fn get_entity(&self, entity_id: &str) -> StrataResult<Option<EntityDetail>>;

    /// Distinct entities within `depth` hops (clamped to [`MAX_TRAVERSAL_DEPTH`]).
    async fn related_entities(&self, entity_id: &str, depth: u32)
        -> StrataResult<Vec<RelatedEntity>>;

    /// Memories mentioning the exact entity, falling back to a fuzzy name match.
    async fn search_by_entity(
        &self,
        name: &str,
        entity_type: Option<&str>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>>;

    /// Memories mentioning any entity whose name contains `name`, ignoring case.
    async fn search_by_entity_name_fuzzy(
        &self,
        name: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>>;

    async fn list_entities(
        &self,
        entity_type: Option<&str>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<Value>>;

    /// Best-effort: failures are logged, not returned.
    async fn ensure_agent_node(&self, agent_id: &str, name: &str, role: &str) -> StrataResult<()>;

    async fn stats(&self) -> StrataResult<GraphStats>;

    async fn health_check(&self) -> bool;
}

/// AGE-backed graph store.
pub struct AgeGraph {
    pool: PgPool,
    graph: String,
    ready: OnceCell<()>,
}

impl AgeGraph {
    /// Build the pool without connecting. Each pooled connection loads AGE
    /// and sets its search path once, right after it is opened.
    pub fn new(config: &AgeConfig) -> StrataResult<Self> {
        let (Some(host), Some(user), Some(password), Some(database)) = (
            config.host.as_deref(),
            config.user.as_deref(),
            config.password.as_deref(),
            config.database.as_deref(),
        ) else {
            return Err(StrataError::Config(
                "graph layer requires host, user, password and database".to_string(),
            ));
        };

        let options = PgConnectOptions::new()
            .host(host)
            .port(config.port)
            .username(user)
            .password(password)
            .database(database);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(30))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("LOAD 'age'; SET search_path = ag_catalog, \"$user\", public;")
                        .await?;
                    Ok(())
                })
            })
            .connect_lazy_with(options);

        Ok(Self::from_pool(pool, &config.graph))
    }

    /// Wrap an existing pool whose connections already have AGE loaded.
    pub fn from_pool(pool: PgPool, graph: &str) -> Self {
        Self {
            pool,
            graph: sanitize_graph_name(graph),
            ready: OnceCell::new(),
        }
    }

    pub fn graph_name(&self) -> &str {
        &self.graph
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run a Cypher statement and return each row's columns parsed from agtype.
    async fn cypher(&self, query: &str, columns: &[&str]) -> StrataResult<Vec<Vec<Value>>> {
        self.ensure_graph().await?;
        let sql = wrap_cypher(&self.graph, query, columns);
        let rows = sqlx::raw_sql(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StrataError::Graph(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let text: Option<String> = row
                    .try_get(idx)
                    .map_err(|e| StrataError::Graph(e.to_string()))?;
                values.push(text.as_deref().map(parse_agtype).unwrap_or(Value::Null));
            }
            out.push(values);
        }
        Ok(out)
    }

    /// Run a Cypher statement for its side effects.
    async fn cypher_exec(&self, query: &str) -> StrataResult<()> {
        self.cypher(query, &["v"]).await.map(|_| ())
    }

    /// Single-column query.
    async fn cypher_values(&self, query: &str, column: &str) -> StrataResult<Vec<Value>> {
        let rows = self.cypher(query, &[column]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
            .collect())
    }

    async fn exact_entity_hits(
        &self,
        entity_id: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<Value>> {
        let agent_clause = agent_id
            .map(|a| format!("WHERE m.agent_id = '{}'", escape_literal(a)))
            .unwrap_or_default();
        let query = format!(
            "MATCH (m:Memory)-[:MENTIONS]->(e:Entity {{id: '{}'}})
             {agent_clause}
             RETURN properties(m) AS mem_props
             ORDER BY m.created_at DESC
             LIMIT {limit}",
            escape_literal(entity_id),
        );
        self.cypher_values(&query, "mem_props").await
    }
}

#[async_trait]
impl GraphStore for AgeGraph {
    async fn ensure_graph(&self) -> StrataResult<()> {
        self.ready
            .get_or_try_init(|| async {
                let exists = sqlx::query("SELECT 1 FROM ag_catalog.ag_graph WHERE name = $1::name")
                    .bind(&self.graph)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| StrataError::Graph(e.to_string()))?;
                if exists.is_none() {
                    sqlx::query("SELECT ag_catalog.create_graph($1::name)")
                        .bind(&self.graph)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| StrataError::Graph(e.to_string()))?;
                    info!(graph = %self.graph, "Created graph");
                }
                Ok::<(), StrataError>(())
            })
            .await?;
        Ok(())
    }

    async fn upsert_memory_node(&self, memory: &Memory) -> StrataResult<()> {
        let content: String = memory.content.chars().take(NODE_CONTENT_CHARS).collect();
        let query = format!(
            "MERGE (m:Memory {{id: '{id}'}})
             SET m.agent_id = '{agent}',
                 m.scope = '{scope}',
                 m.subject_id = '{subject}',
                 m.content = '{content}',
                 m.source = '{source}',
                 m.created_at = '{created}',
                 m.updated_at = '{updated}'
             RETURN m",
            id = escape_literal(&memory.id.to_string()),
            agent = escape_literal(&memory.agent_id),
            scope = memory.scope.as_str(),
            subject = escape_literal(memory.subject_id.as_deref().unwrap_or("")),
            content = escape_literal(&content),
            source = memory.source.as_str(),
            created = escape_literal(&memory.created_at.to_rfc3339()),
            updated = escape_literal(&Utc::now().to_rfc3339()),
        );
        self.cypher_exec(&query).await?;
        debug!(id = %memory.id, "Upserted memory node");
        Ok(())
    }

    async fn upsert_entity_node(
        &self,
        entity: &ExtractedEntity,
        agent_id: &str,
    ) -> StrataResult<String> {
        let entity_id = entity_slug(entity.entity_type.as_str(), &entity.name);
        let props = serde_json::to_string(&entity.properties)?;
        let query = format!(
            "MERGE (e:Entity {{id: '{id}'}})
             SET e.name = '{name}',
                 e.entity_type = '{etype}',
                 e.agent_id = '{agent}',
                 e.properties = '{props}',
                 e.updated_at = '{updated}'
             RETURN e",
            id = escape_literal(&entity_id),
            name = escape_literal(&entity.name),
            etype = entity.entity_type.as_str(),
            agent = escape_literal(agent_id),
            props = escape_literal(&props),
            updated = escape_literal(&Utc::now().to_rfc3339()),
        );
        self.cypher_exec(&query).await?;
        Ok(entity_id)
    }

    async fn create_relationship(
        &self,
        rel: &ExtractedRelationship,
        entities: &[ExtractedEntity],
        agent_id: &str,
    ) -> StrataResult<()> {
        let from_id = relationship_endpoint_id(&rel.from_entity, entities);
        let to_id = relationship_endpoint_id(&rel.to_entity, entities);
        let Some(label) = sanitize_label(rel.relationship.as_str()) else {
            warn!(relationship = %rel.relationship, "Invalid relationship type, skipping edge");
            return Ok(());
        };
        let context = rel.properties.get("context").map(String::as_str).unwrap_or("");
        let query = format!(
            "MATCH (a:Entity {{id: '{from}'}}), (b:Entity {{id: '{to}'}})
             MERGE (a)-[r:{label}]->(b)
             SET r.context = '{context}',
                 r.agent_id = '{agent}'
             RETURN r",
            from = escape_literal(&from_id),
            to = escape_literal(&to_id),
            context = escape_literal(context),
            agent = escape_literal(agent_id),
        );
        if let Err(e) = self.cypher_exec(&query).await {
            warn!(from = %from_id, to = %to_id, label = %label, error = %e, "Failed to create relationship");
        }
        Ok(())
    }

    async fn link_memory_to_entity(
        &self,
        memory_id: &MemoryId,
        entity_id: &str,
    ) -> StrataResult<()> {
        let query = format!(
            "MATCH (m:Memory {{id: '{mid}'}}), (e:Entity {{id: '{eid}'}})
             MERGE (m)-[r:MENTIONS]->(e)
             RETURN r",
            mid = escape_literal(&memory_id.to_string()),
            eid = escape_literal(entity_id),
        );
        if let Err(e) = self.cypher_exec(&query).await {
            warn!(memory_id = %memory_id, entity_id, error = %e, "Failed to link memory to entity");
        }
        Ok(())
    }

    async fn delete_memory_node(&self, memory_id: &MemoryId) -> StrataResult<()> {
        let id = escape_literal(&memory_id.to_string());
        let edges = format!("MATCH (m:Memory {{id: '{id}'}})-[r]-() DELETE r RETURN r");
        if let Err(e) = self.cypher_exec(&edges).await {
            debug!(memory_id = %memory_id, error = %e, "No edges removed for memory node");
        }
        let node = format!("MATCH (m:Memory {{id: '{id}'}}) DELETE m RETURN m");
        self.cypher_exec(&node).await.map_err(|e| {
            warn!(memory_id = %memory_id, error = %e, "Failed to delete memory node");
            e
        })
    }

    async fn get_entity(&self, entity_id: &str) -> StrataResult<Option<EntityDetail>> {
        let id = escape_literal(entity_id);
        let entity = self
            .cypher_values(
                &format!("MATCH (e:Entity {{id: '{id}'}}) RETURN properties(e) AS v"),
                "v",
            )
            .await?;
        let Some(entity) = entity.into_iter().next() else {
            return Ok(None);
        };

        let mut relationships = Vec::new();
        let directions = [
            (
                EdgeDirection::Outgoing,
                format!(
                    "MATCH (e:Entity {{id: '{id}'}})-[r]->(other)
                     RETURN type(r) AS rel_type, properties(other) AS other_props"
                ),
            ),
            (
                EdgeDirection::Incoming,
                format!(
                    "MATCH (e:Entity {{id: '{id}'}})<-[r]-(other)
                     RETURN type(r) AS rel_type, properties(other) AS other_props"
                ),
            ),
        ];
        for (direction, query) in directions {
            match self.cypher(&query, &["rel_type", "other_props"]).await {
                Ok(rows) => {
                    for mut row in rows {
                        if row.len() < 2 {
                            continue;
                        }
                        let target = row.swap_remove(1);
                        let rel_type = row[0].as_str().unwrap_or_default().to_string();
                        relationships.push(EntityEdge {
                            rel_type,
                            direction,
                            target,
                        });
                    }
                }
                Err(e) => debug!(entity_id, ?direction, error = %e, "Edge lookup failed"),
            }
        }

        Ok(Some(EntityDetail {
            entity,
            relationships,
        }))
    }

    async fn related_entities(
        &self,
        entity_id: &str,
        depth: u32,
    ) -> StrataResult<Vec<RelatedEntity>> {
        let depth = depth.clamp(1, MAX_TRAVERSAL_DEPTH);
        let id = escape_literal(entity_id);
        let query = format!(
            "MATCH (start:Entity {{id: '{id}'}})-[*1..{depth}]-(target:Entity)
             WHERE target.id <> '{id}'
             RETURN DISTINCT properties(target) AS target_props"
        );
        let values = self.cypher_values(&query, "target_props").await?;
        Ok(values
            .into_iter()
            .map(|entity| RelatedEntity {
                entity,
                relationship: "RELATED_TO".to_string(),
                distance: 1,
            })
            .collect())
    }

    async fn search_by_entity(
        &self,
        name: &str,
        entity_type: Option<&str>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let type_name = entity_type.unwrap_or(EntityType::Concept.as_str());
        let entity_id = entity_slug(type_name, name);

        let exact = match self.exact_entity_hits(&entity_id, agent_id, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!(entity_id = %entity_id, error = %e, "Exact entity lookup failed");
                Vec::new()
            }
        };
        if exact.is_empty() {
            return self.search_by_entity_name_fuzzy(name, agent_id, limit).await;
        }

        let context = GraphContext {
            related_entities: vec![RelatedEntityRef {
                entity_type: type_name.to_string(),
                name: name.to_string(),
                relationship: MENTIONED_IN.to_string(),
            }],
        };
        Ok(exact
            .iter()
            .filter_map(props_to_memory)
            .enumerate()
            .map(|(i, memory)| ScoredMemory {
                memory,
                score: exact_score(i),
                source_layer: SourceLayer::Age,
                graph_context: Some(context.clone()),
            })
            .collect())
    }

    async fn search_by_entity_name_fuzzy(
        &self,
        name: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<ScoredMemory>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let agent_clause = agent_id
            .map(|a| format!("AND m.agent_id = '{}'", escape_literal(a)))
            .unwrap_or_default();
        let query = format!(
            "MATCH (m:Memory)-[:MENTIONS]->(e:Entity)
             WHERE e.name =~ '(?i).*{pattern}.*'
             {agent_clause}
             RETURN properties(m) AS mem_props, e.name AS entity_name, e.entity_type AS entity_type
             ORDER BY m.created_at DESC
             LIMIT {limit}",
            pattern = escape_pattern(name),
        );
        let rows = self
            .cypher(&query, &["mem_props", "entity_name", "entity_type"])
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(memory) = row.first().and_then(props_to_memory) else {
                continue;
            };
            let entity_name = row
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string();
            let entity_type = row
                .get(2)
                .and_then(Value::as_str)
                .unwrap_or(EntityType::Concept.as_str())
                .to_string();
            hits.push(ScoredMemory {
                memory,
                score: fuzzy_score(hits.len()),
                source_layer: SourceLayer::Age,
                graph_context: Some(GraphContext {
                    related_entities: vec![RelatedEntityRef {
                        entity_type,
                        name: entity_name,
                        relationship: MENTIONED_IN.to_string(),
                    }],
                }),
            });
        }
        Ok(hits)
    }

    async fn list_entities(
        &self,
        entity_type: Option<&str>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<Value>> {
        let mut conditions = Vec::new();
        if let Some(t) = entity_type {
            conditions.push(format!("e.entity_type = '{}'", escape_literal(t)));
        }
        if let Some(a) = agent_id {
            conditions.push(format!("e.agent_id = '{}'", escape_literal(a)));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let query = format!(
            "MATCH (e:Entity)
             {where_clause}
             RETURN properties(e) AS props
             ORDER BY e.updated_at DESC
             LIMIT {limit}"
        );
        self.cypher_values(&query, "props").await
    }

    async fn ensure_agent_node(&self, agent_id: &str, name: &str, role: &str) -> StrataResult<()> {
        let query = format!(
            "MERGE (a:Agent {{id: '{id}'}})
             SET a.name = '{name}',
                 a.role = '{role}',
                 a.created_at = '{now}'
             RETURN a",
            id = escape_literal(agent_id),
            name = escape_literal(name),
            role = escape_literal(role),
            now = escape_literal(&Utc::now().to_rfc3339()),
        );
        if let Err(e) = self.cypher_exec(&query).await {
            warn!(agent_id, error = %e, "Failed to ensure agent node");
        }
        Ok(())
    }

    async fn stats(&self) -> StrataResult<GraphStats> {
        let entities = self
            .cypher_values("MATCH (e:Entity) RETURN count(e) AS cnt", "cnt")
            .await?;
        let rels = self
            .cypher_values("MATCH ()-[r]->() RETURN count(r) AS cnt", "cnt")
            .await?;
        let count = |v: &[Value]| v.first().and_then(Value::as_u64).unwrap_or(0);
        Ok(GraphStats {
            entity_count: count(&entities),
            relationship_count: count(&rels),
        })
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// `SELECT col::text, ... FROM cypher('<graph>', $$ query $$) AS (col agtype, ...)`.
pub fn wrap_cypher(graph: &str, query: &str, columns: &[&str]) -> String {
    let defs: Vec<String> = columns.iter().map(|c| format!("{c} agtype")).collect();
    let selects: Vec<String> = columns.iter().map(|c| format!("{c}::text AS {c}")).collect();
    format!(
        "SELECT {} FROM ag_catalog.cypher('{}', $${}$$) AS ({})",
        selects.join(", "),
        sanitize_graph_name(graph),
        query,
        defs.join(", ")
    )
}

/// Node id for a relationship endpoint. The type comes from the entity of the
/// same name (case-insensitive) in `entities`; names not found there are
/// treated as Concept.
pub fn relationship_endpoint_id(name: &str, entities: &[ExtractedEntity]) -> String {
    let entity_type = entities
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case(name))
        .map(|e| e.entity_type)
        .unwrap_or(EntityType::Concept);
    entity_slug(entity_type.as_str(), name)
}

/// Score for the i-th exact entity hit.
pub fn exact_score(index: usize) -> f64 {
    1.0 / (1.0 + 0.1 * index as f64)
}

/// Score for the i-th fuzzy entity hit.
pub fn fuzzy_score(index: usize) -> f64 {
    0.8 / (1.0 + 0.1 * index as f64)
}

/// Rebuild a partial memory from Memory node properties. Tags, entities,
/// `created_by`, `expires_at` and `embedding_hash` are not held on the node.
pub fn props_to_memory(props: &Value) -> Option<Memory> {
    let obj = props.as_object()?;
    let get = |k: &str| obj.get(k).and_then(Value::as_str);
    let id: MemoryId = get("id")?.parse().ok()?;
    let ts = |k: &str| {
        get(k)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    };
    Some(Memory {
        id,
        agent_id: get("agent_id").unwrap_or_default().to_string(),
        scope: get("scope")
            .and_then(|s| s.parse().ok())
            .unwrap_or(MemoryScope::Agent),
        subject_id: get("subject_id").filter(|s| !s.is_empty()).map(String::from),
        content: get("content").unwrap_or_default().to_string(),
        tags: Vec::new(),
        entities: Vec::new(),
        source: get("source")
            .and_then(|s| s.parse().ok())
            .unwrap_or(MemorySource::Explicit),
        created_by: None,
        created_at: ts("created_at"),
        updated_at: ts("updated_at"),
        expires_at: None,
        embedding_hash: None,
    })
}

/// Slug for a free-form entity name typed as Concept.
pub fn concept_slug(name: &str) -> String {
    slugify(&format!("{}:{name}", EntityType::Concept.as_str()))
}
