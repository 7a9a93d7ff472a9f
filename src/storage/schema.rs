//! Database schema for snapshot exports

use rusqlite::Connection;

/// SQL schema for the export database
pub const SCHEMA_SQL: &str = r#"
-- One row per exported run
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    config_hash TEXT NOT NULL
);

-- Tag index, position preserves registration order
CREATE TABLE IF NOT EXISTS tags (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    tag TEXT NOT NULL,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (run_id, tag, position)
);

CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name);

-- Asset source URL to owning record
CREATE TABLE IF NOT EXISTS asset_refs (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    url TEXT NOT NULL,
    owner TEXT NOT NULL,
    PRIMARY KEY (run_id, url)
);

-- Stored asset files
CREATE TABLE IF NOT EXISTS local_assets (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    owner TEXT NOT NULL,
    path TEXT NOT NULL,
    PRIMARY KEY (run_id, owner)
);
"#;

/// Creates the export tables if they do not exist yet
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
