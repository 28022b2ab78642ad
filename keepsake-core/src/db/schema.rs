//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Extraction cache
    -- ============================================

    -- One row per (fingerprint, calling_context) pair. Payload is the
    -- validated extraction result as JSON; rows are inserted once and
    -- never updated.
    CREATE TABLE IF NOT EXISTS cache_entries (
        fingerprint     TEXT NOT NULL,
        calling_context TEXT NOT NULL,
        payload         TEXT NOT NULL,
        created_at      DATETIME NOT NULL,

        PRIMARY KEY (fingerprint, calling_context)
    );

    -- ============================================
    -- Normalized graph
    -- ============================================

    -- Provenance columns reference cache_entries by value only: clearing
    -- the cache must leave curated exchanges untouched, so there is no
    -- foreign key in that direction.
    CREATE TABLE IF NOT EXISTS exchanges (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint     TEXT NOT NULL,
        calling_context TEXT NOT NULL,
        exchange_index  INTEGER NOT NULL,
        source_file     TEXT NOT NULL,

        UNIQUE (fingerprint, calling_context, exchange_index)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        exchange_id INTEGER NOT NULL REFERENCES exchanges(id) ON DELETE CASCADE,
        position    INTEGER NOT NULL,
        date        TEXT,
        time        TEXT,
        person      TEXT,
        quote       TEXT
    );

    -- ============================================
    -- Indexes
    -- ============================================

    CREATE INDEX IF NOT EXISTS idx_messages_exchange ON messages(exchange_id);
    CREATE INDEX IF NOT EXISTS idx_messages_exchange_position ON messages(exchange_id, position);
    CREATE INDEX IF NOT EXISTS idx_exchanges_provenance ON exchanges(fingerprint, calling_context);
    CREATE INDEX IF NOT EXISTS idx_exchanges_source ON exchanges(source_file);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
