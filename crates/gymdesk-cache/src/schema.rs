use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::CacheError;

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Prepare a freshly opened connection: pragmas plus migrations.
pub(crate) fn init_database(conn: &Connection) -> Result<(), CacheError> {
    // Namespace deletion cascades to entries
    conn.pragma_update(None, "foreign_keys", true)?;

    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i32>(0).map(|count| count > 0),
        )
        .unwrap_or(false);

    let version: i32 = if table_exists {
        conn.query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0)
    } else {
        0
    };

    if version < SCHEMA_VERSION {
        migrate_database(conn, version)?;
    }

    Ok(())
}

fn migrate_database(conn: &Connection, from_version: i32) -> Result<(), CacheError> {
    if from_version < 1 {
        create_schema_v1(conn)?;
    }
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_namespaces (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_entries (
            namespace TEXT NOT NULL REFERENCES cache_namespaces(name) ON DELETE CASCADE,
            cache_key TEXT NOT NULL,
            url TEXT NOT NULL,
            method TEXT NOT NULL,
            status INTEGER NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            stored_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, cache_key)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_stored ON cache_entries(namespace, stored_at);
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![1, Utc::now().timestamp()],
    )?;

    Ok(())
}
