//! SQLite schema creation and migration.
//!
//! Creates the memory table, its full-text shadow index, the conversation log
//! and the sync queue on first boot.

use rusqlite::Connection;

/// Current schema version.
const SCHEMA_VERSION: u32 = 3;

/// Run all migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version < 3 {
        migrate_v3(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Get the current schema version from the database.
fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

/// Check if a table (or virtual table) exists.
fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .is_ok()
}

/// Version 1: memories table, full-text index and sync triggers.
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memories (
            id             TEXT PRIMARY KEY,
            agent_id       TEXT NOT NULL,
            scope          TEXT NOT NULL CHECK (scope IN ('user', 'agent', 'global', 'project', 'session')),
            subject_id     TEXT,
            content        TEXT NOT NULL,
            tags           TEXT NOT NULL DEFAULT '[]',
            entities       TEXT NOT NULL DEFAULT '[]',
            source         TEXT NOT NULL DEFAULT 'explicit',
            created_by     TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            expires_at     TEXT,
            embedding_hash TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_mem_agent       ON memories(agent_id);
        CREATE INDEX IF NOT EXISTS idx_mem_scope       ON memories(scope);
        CREATE INDEX IF NOT EXISTS idx_mem_subject     ON memories(subject_id);
        CREATE INDEX IF NOT EXISTS idx_mem_agent_scope ON memories(agent_id, scope);
        CREATE INDEX IF NOT EXISTS idx_mem_created     ON memories(created_at);
        CREATE INDEX IF NOT EXISTS idx_mem_source      ON memories(source);

        -- Migration tracking
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT
        );
        ",
    )?;

    // FTS5 has no IF NOT EXISTS for the triggers that keep it in step
    if !table_exists(conn, "memories_fts") {
        conn.execute_batch(
            "
            CREATE VIRTUAL TABLE memories_fts USING fts5(
                content,
                tags,
                content = memories,
                content_rowid = rowid
            );

            CREATE TRIGGER mem_fts_insert AFTER INSERT ON memories BEGIN
                INSERT INTO memories_fts(rowid, content, tags)
                VALUES (new.rowid, new.content, new.tags);
            END;

            CREATE TRIGGER mem_fts_delete AFTER DELETE ON memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, content, tags)
                VALUES ('delete', old.rowid, old.content, old.tags);
            END;

            CREATE TRIGGER mem_fts_update AFTER UPDATE ON memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, content, tags)
                VALUES ('delete', old.rowid, old.content, old.tags);
                INSERT INTO memories_fts(rowid, content, tags)
                VALUES (new.rowid, new.content, new.tags);
            END;
            ",
        )?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO migrations (version, applied_at, description) VALUES (1, datetime('now'), 'Memories and full-text index')",
        [],
    )?;
    Ok(())
}

/// Version 2: append-only conversation transcript.
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversation_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id   TEXT NOT NULL,
            session_id TEXT NOT NULL,
            user_id    TEXT NOT NULL,
            channel    TEXT NOT NULL,
            role       TEXT NOT NULL,
            content    TEXT NOT NULL,
            timestamp  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_convlog_agent   ON conversation_log(agent_id);
        CREATE INDEX IF NOT EXISTS idx_convlog_session ON conversation_log(session_id);
        CREATE INDEX IF NOT EXISTS idx_convlog_ts      ON conversation_log(timestamp);

        INSERT OR IGNORE INTO migrations (version, applied_at, description)
        VALUES (2, datetime('now'), 'Conversation log');
        ",
    )?;
    Ok(())
}

/// Version 3: durable retry queue for the secondary layers.
fn migrate_v3(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_queue (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id  TEXT NOT NULL,
            layer      TEXT NOT NULL CHECK (layer IN ('qdrant', 'age')),
            operation  TEXT NOT NULL CHECK (operation IN ('upsert', 'delete')),
            attempts   INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(memory_id, layer, operation)
        );
        CREATE INDEX IF NOT EXISTS idx_sync_pending ON sync_queue(attempts, created_at);

        INSERT OR IGNORE INTO migrations (version, applied_at, description)
        VALUES (3, datetime('now'), 'Sync queue');
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"memories".to_string()));
        assert!(tables.contains(&"memories_fts".to_string()));
        assert!(tables.contains(&"conversation_log".to_string()));
        assert!(tables.contains(&"sync_queue".to_string()));
        assert!(tables.contains(&"migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_scope_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO memories (id, agent_id, scope, content, created_at, updated_at)
             VALUES ('x', 'a', 'team', 'c', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_sync_queue_layer_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO sync_queue (memory_id, layer, operation, created_at)
             VALUES ('m', 'redis', 'upsert', '2026-01-01')",
            [],
        );
        assert!(err.is_err());
    }
}
