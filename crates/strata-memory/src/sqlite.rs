//! Primary store (L1): the authoritative copy of every memory.
//!
//! Owns the `memories` table with its FTS5 shadow index, the append-only
//! conversation log and the durable sync queue. Every error here is fatal to
//! the enclosing operation; there is no fallback.

use crate::migration::run_migrations;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use strata_types::conversation::ConversationLogEntry;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{
    ExtractedEntity, ListMemoriesQuery, Memory, MemoryId, MemoryPatch, MemoryScope, MemorySource,
    SortOrder,
};
use strata_types::sync::{SyncLayer, SyncOperation, SyncQueueItem, MAX_SYNC_ATTEMPTS};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Default page size for [`SqliteStore::list`].
const DEFAULT_LIST_LIMIT: usize = 50;

/// Default number of transcript rows returned.
const DEFAULT_LOG_LIMIT: usize = 100;

/// A full-text hit with its raw engine rank (more negative is better).
#[derive(Debug, Clone)]
pub struct FullTextHit {
    pub memory: Memory,
    pub rank: f64,
}

/// SQLite-backed primary store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bring the schema up to date.
    pub fn open(path: &Path) -> StrataResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Opened primary store");
        Ok(store)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> StrataResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    /// Wrap an existing connection that already has the schema applied.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn init(conn: Connection) -> StrataResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(storage_err)?;
        run_migrations(&conn).map_err(storage_err)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    fn lock(&self) -> StrataResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StrataError::Internal(e.to_string()))
    }

    // -- memories ---------------------------------------------------------

    /// Insert a new memory row.
    pub fn create(&self, memory: &Memory) -> StrataResult<()> {
        let conn = self.lock()?;
        let tags = serde_json::to_string(&memory.tags)?;
        let entities = serde_json::to_string(&memory.entities)?;
        conn.execute(
            "INSERT INTO memories (id, agent_id, scope, subject_id, content, tags, entities, source,
                                   created_by, created_at, updated_at, expires_at, embedding_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                memory.id.to_string(),
                memory.agent_id,
                memory.scope.as_str(),
                memory.subject_id,
                memory.content,
                tags,
                entities,
                memory.source.as_str(),
                memory.created_by,
                format_ts(&memory.created_at),
                format_ts(&memory.updated_at),
                memory.expires_at.as_ref().map(format_ts),
                memory.embedding_hash,
            ],
        )
        .map_err(storage_err)?;
        debug!(id = %memory.id, agent = %memory.agent_id, "Stored memory in primary store");
        Ok(())
    }

    /// Fetch one memory.
    pub fn get(&self, id: &MemoryId) -> StrataResult<Option<Memory>> {
        let conn = self.lock()?;
        get_locked(&conn, id)
    }

    /// Apply a partial patch. Returns `None` when the id is unknown.
    /// `updated_at` is bumped even for an empty patch.
    pub fn update(&self, id: &MemoryId, patch: &MemoryPatch) -> StrataResult<Option<Memory>> {
        let conn = self.lock()?;
        let Some(mut memory) = get_locked(&conn, id)? else {
            return Ok(None);
        };
        patch.apply_to(&mut memory);
        memory.updated_at = Utc::now().max(memory.updated_at);

        let tags = serde_json::to_string(&memory.tags)?;
        let entities = serde_json::to_string(&memory.entities)?;
        conn.execute(
            "UPDATE memories SET
                content = ?1, tags = ?2, entities = ?3, scope = ?4, subject_id = ?5,
                expires_at = ?6, embedding_hash = ?7, updated_at = ?8
             WHERE id = ?9",
            rusqlite::params![
                memory.content,
                tags,
                entities,
                memory.scope.as_str(),
                memory.subject_id,
                memory.expires_at.as_ref().map(format_ts),
                memory.embedding_hash,
                format_ts(&memory.updated_at),
                id.to_string(),
            ],
        )
        .map_err(storage_err)?;
        Ok(Some(memory))
    }

    /// Record the content fingerprint the vector layer now holds.
    /// Does not touch `updated_at`.
    pub fn set_embedding_hash(&self, id: &MemoryId, hash: &str) -> StrataResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE memories SET embedding_hash = ?1 WHERE id = ?2",
            rusqlite::params![hash, id.to_string()],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Hard delete. Returns whether a row was removed.
    pub fn delete(&self, id: &MemoryId) -> StrataResult<bool> {
        let conn = self.lock()?;
        let changes = conn
            .execute(
                "DELETE FROM memories WHERE id = ?1",
                rusqlite::params![id.to_string()],
            )
            .map_err(storage_err)?;
        Ok(changes > 0)
    }

    /// List memories by agent/scope/subject/source with an any-overlap tag filter.
    pub fn list(&self, query: &ListMemoriesQuery) -> StrataResult<Vec<Memory>> {
        let conn = self.lock()?;

        let mut sql = String::from("SELECT * FROM memories WHERE 1 = 1");
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref agent_id) = query.agent_id {
            params.push(Box::new(agent_id.clone()));
            sql.push_str(&format!(" AND agent_id = ?{}", params.len()));
        }
        if let Some(scope) = query.scope {
            params.push(Box::new(scope.as_str()));
            sql.push_str(&format!(" AND scope = ?{}", params.len()));
        }
        if let Some(ref subject_id) = query.subject_id {
            params.push(Box::new(subject_id.clone()));
            sql.push_str(&format!(" AND subject_id = ?{}", params.len()));
        }
        if let Some(source) = query.source {
            params.push(Box::new(source.as_str()));
            sql.push_str(&format!(" AND source = ?{}", params.len()));
        }

        if let Some(ref tags) = query.tags {
            let wanted: Vec<String> = tags
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !wanted.is_empty() {
                let mut placeholders = Vec::with_capacity(wanted.len());
                for tag in wanted {
                    params.push(Box::new(tag));
                    placeholders.push(format!("?{}", params.len()));
                }
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM json_each(memories.tags) \
                     WHERE lower(json_each.value) IN ({}))",
                    placeholders.join(", ")
                ));
            }
        }

        let order = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIST_LIMIT);
        let offset = query.offset.unwrap_or(0);
        sql.push_str(&format!(
            " ORDER BY created_at {order} LIMIT {limit} OFFSET {offset}"
        ));

        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_memory)
            .map_err(storage_err)?;

        let mut memories = Vec::new();
        for row in rows {
            memories.push(row.map_err(storage_err)?);
        }

        Ok(memories)
    }

    /// Keyword search over content and tags.
    ///
    /// Each whitespace token becomes a quoted phrase and the phrases are
    /// OR'd together. Filters apply before ranking. An empty query yields
    /// no hits.
    pub fn search_fulltext(
        &self,
        query: &str,
        agent_id: Option<&str>,
        scopes: &[MemoryScope],
        subject_id: Option<&str>,
        limit: usize,
    ) -> StrataResult<Vec<FullTextHit>> {
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.lock()?;
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(fts_query)];
        let mut sql = String::from(
            "SELECT m.*, rank
             FROM memories_fts fts
             JOIN memories m ON m.rowid = fts.rowid
             WHERE memories_fts MATCH ?1",
        );

        if let Some(agent_id) = agent_id {
            params.push(Box::new(agent_id.to_string()));
            sql.push_str(&format!(" AND m.agent_id = ?{}", params.len()));
        }
        if !scopes.is_empty() {
            let mut placeholders = Vec::with_capacity(scopes.len());
            for scope in scopes {
                params.push(Box::new(scope.as_str()));
                placeholders.push(format!("?{}", params.len()));
            }
            sql.push_str(&format!(" AND m.scope IN ({})", placeholders.join(", ")));
        }
        if let Some(subject_id) = subject_id {
            params.push(Box::new(subject_id.to_string()));
            sql.push_str(&format!(" AND m.subject_id = ?{}", params.len()));
        }
        sql.push_str(&format!(" ORDER BY rank LIMIT {}", limit.max(1)));

        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(FullTextHit {
                    memory: row_to_memory(row)?,
                    rank: row.get("rank")?,
                })
            })
            .map_err(storage_err)?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row.map_err(storage_err)?);
        }
        Ok(hits)
    }

    // -- conversation log -------------------------------------------------

    /// Append one transcript row.
    pub fn append_conversation(&self, entry: &ConversationLogEntry) -> StrataResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversation_log (agent_id, session_id, user_id, channel, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.agent_id,
                entry.session_id,
                entry.user_id,
                entry.channel,
                entry.role.as_str(),
                entry.content,
                format_ts(&entry.timestamp),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Transcript for one session, oldest first.
    pub fn conversation_log(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: Option<usize>,
    ) -> StrataResult<Vec<ConversationLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT agent_id, session_id, user_id, channel, role, content, timestamp
                 FROM conversation_log
                 WHERE agent_id = ?1 AND session_id = ?2
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?3",
            )
            .map_err(storage_err)?;
        let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT) as i64;
        let rows = stmt
            .query_map(rusqlite::params![agent_id, session_id, limit], |row| {
                let role: String = row.get(4)?;
                let ts: String = row.get(6)?;
                Ok(ConversationLogEntry {
                    agent_id: row.get(0)?,
                    session_id: row.get(1)?,
                    user_id: row.get(2)?,
                    channel: row.get(3)?,
                    role: role.parse().map_err(|e: String| conversion_err(4, e))?,
                    content: row.get(5)?,
                    timestamp: parse_ts(&ts),
                })
            })
            .map_err(storage_err)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(storage_err)?);
        }
        Ok(entries)
    }

    // -- sync queue -------------------------------------------------------

    /// Queue a secondary-layer operation. Re-queuing an existing
    /// (memory, layer, operation) resets its attempts and refreshes its age.
    pub fn enqueue_sync(
        &self,
        memory_id: &str,
        layer: SyncLayer,
        operation: SyncOperation,
    ) -> StrataResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_queue (memory_id, layer, operation, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(memory_id, layer, operation) DO UPDATE SET
                attempts = 0,
                last_error = NULL,
                created_at = excluded.created_at",
            rusqlite::params![
                memory_id,
                layer.as_str(),
                operation.as_str(),
                format_ts(&Utc::now()),
            ],
        )
        .map_err(storage_err)?;
        debug!(memory_id, layer = %layer, op = %operation, "Queued sync item");
        Ok(())
    }

    /// Pending items (below the attempt ceiling), oldest first.
    pub fn pending_sync_items(&self, limit: usize) -> StrataResult<Vec<SyncQueueItem>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, memory_id, layer, operation, attempts, last_error, created_at
                 FROM sync_queue
                 WHERE attempts < ?1
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?2",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![MAX_SYNC_ATTEMPTS, limit as i64],
                |row| {
                    let layer: String = row.get(2)?;
                    let operation: String = row.get(3)?;
                    let created: String = row.get(6)?;
                    Ok(SyncQueueItem {
                        id: row.get(0)?,
                        memory_id: row.get(1)?,
                        layer: layer.parse().map_err(|e: String| conversion_err(2, e))?,
                        operation: operation
                            .parse()
                            .map_err(|e: String| conversion_err(3, e))?,
                        attempts: row.get(4)?,
                        last_error: row.get(5)?,
                        created_at: parse_ts(&created),
                    })
                },
            )
            .map_err(storage_err)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(storage_err)?);
        }
        Ok(items)
    }

    pub fn pending_sync_count(&self) -> StrataResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE attempts < ?1",
                [MAX_SYNC_ATTEMPTS],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    /// Store the outcome of a failed attempt.
    ///
    /// Only applies to the generation that was dequeued: if the item was
    /// re-enqueued meanwhile its reset stands. Returns whether a row changed.
    pub fn record_sync_failure(
        &self,
        item: &SyncQueueItem,
        attempts: u32,
        last_error: &str,
    ) -> StrataResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE sync_queue SET attempts = ?1, last_error = ?2
                 WHERE id = ?3 AND created_at = ?4",
                rusqlite::params![attempts, last_error, item.id, format_ts(&item.created_at)],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Drop a completed item, unless it was re-enqueued after being dequeued.
    /// Returns whether a row was removed.
    pub fn remove_sync_item(&self, item: &SyncQueueItem) -> StrataResult<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM sync_queue WHERE id = ?1 AND created_at = ?2",
                rusqlite::params![item.id, format_ts(&item.created_at)],
            )
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    /// Delete every item that reached the attempt ceiling. Returns how many.
    pub fn purge_exhausted_sync_items(&self) -> StrataResult<usize> {
        let conn = self.lock()?;
        let purged = conn
            .execute(
                "DELETE FROM sync_queue WHERE attempts >= ?1",
                [MAX_SYNC_ATTEMPTS],
            )
            .map_err(storage_err)?;
        Ok(purged)
    }

    // -- stats ------------------------------------------------------------

    pub fn memory_count(&self) -> StrataResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    /// On-disk size in bytes (0 if the pragma is unavailable).
    pub fn database_size(&self) -> StrataResult<u64> {
        let conn = self.lock()?;
        let size: i64 = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        Ok(size.max(0) as u64)
    }

    pub fn health_check(&self) -> bool {
        match self.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => false,
        }
    }
}

/// Build the FTS5 MATCH expression: every whitespace token, stripped of
/// double quotes, becomes a quoted phrase; phrases are OR'd.
pub fn build_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
pub(crate) fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn storage_err(e: rusqlite::Error) -> StrataError {
    StrataError::Storage(e.to_string())
}

fn conversion_err(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn get_locked(conn: &Connection, id: &MemoryId) -> StrataResult<Option<Memory>> {
    let result = conn.query_row(
        "SELECT * FROM memories WHERE id = ?1",
        rusqlite::params![id.to_string()],
        row_to_memory,
    );
    match result {
        Ok(memory) => Ok(Some(memory)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(storage_err(e)),
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let id: String = row.get("id")?;
    let scope: String = row.get("scope")?;
    let tags: String = row.get("tags")?;
    let entities: String = row.get("entities")?;
    let source: String = row.get("source")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;

    Ok(Memory {
        id: id.parse().map_err(|e: uuid::Error| conversion_err(0, e))?,
        agent_id: row.get("agent_id")?,
        scope: scope
            .parse::<MemoryScope>()
            .map_err(|e| conversion_err(2, e))?,
        subject_id: row.get("subject_id")?,
        content: row.get("content")?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        entities: serde_json::from_str::<Vec<ExtractedEntity>>(&entities).unwrap_or_default(),
        source: source.parse().unwrap_or(MemorySource::Explicit),
        created_by: row.get("created_by")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        expires_at: expires_at.as_deref().map(parse_ts),
        embedding_hash: row.get("embedding_hash")?,
    })
}
