use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS records (
    entity_id BLOB PRIMARY KEY CHECK (length(entity_id) = 16),
    entity_type TEXT NOT NULL,
    bundle TEXT NOT NULL,
    default_langcode TEXT NOT NULL,
    changed_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_records_bundle ON records (entity_type, bundle);

CREATE TABLE IF NOT EXISTS record_translations (
    entity_id BLOB NOT NULL REFERENCES records (entity_id) ON DELETE CASCADE,
    langcode TEXT NOT NULL,
    PRIMARY KEY (entity_id, langcode)
);

CREATE TABLE IF NOT EXISTS record_fields (
    entity_id BLOB NOT NULL REFERENCES records (entity_id) ON DELETE CASCADE,
    langcode TEXT NOT NULL,
    field_name TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (entity_id, langcode, field_name)
);

CREATE TABLE IF NOT EXISTS reference_fields (
    entity_type TEXT NOT NULL,
    bundle TEXT NOT NULL,
    field_name TEXT NOT NULL,
    target_type TEXT NOT NULL,
    field_type TEXT NOT NULL,
    cardinality INTEGER NOT NULL,
    settings TEXT NOT NULL,
    PRIMARY KEY (entity_type, bundle, field_name)
);

CREATE TABLE IF NOT EXISTS reference_items (
    host_id BLOB NOT NULL REFERENCES records (entity_id) ON DELETE CASCADE,
    langcode TEXT NOT NULL,
    field_name TEXT NOT NULL,
    delta INTEGER NOT NULL CHECK (delta >= 0),
    target_id BLOB NOT NULL CHECK (length(target_id) = 16),
    override_map TEXT,
    PRIMARY KEY (host_id, langcode, field_name, delta)
);
CREATE INDEX IF NOT EXISTS idx_reference_items_target ON reference_items (target_id);
";
