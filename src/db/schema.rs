/// Schema for the cache, selection and preference tables.
pub const SCHEMA: &str = r#"
-- Materialized list items, ordered per scope by idx
CREATE TABLE IF NOT EXISTS items (
    scope_key TEXT NOT NULL,
    id INTEGER NOT NULL,
    idx INTEGER NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (scope_key, id)
);

CREATE INDEX IF NOT EXISTS idx_items_order ON items(scope_key, idx);

-- Page boundary bookkeeping, one row per cached item
CREATE TABLE IF NOT EXISTS remote_keys (
    scope_key TEXT NOT NULL,
    id INTEGER NOT NULL,
    prev_offset INTEGER,
    next_offset INTEGER,
    PRIMARY KEY (scope_key, id)
);

-- Ids requested for a cached page that the remote did not return
CREATE TABLE IF NOT EXISTS skipped_ids (
    scope_key TEXT NOT NULL,
    id INTEGER NOT NULL,
    PRIMARY KEY (scope_key, id)
);

-- Per-scope refresh metadata
CREATE TABLE IF NOT EXISTS sync_state (
    scope_key TEXT PRIMARY KEY,
    sort_tag TEXT NOT NULL,
    refreshed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- User selections (favorites)
CREATE TABLE IF NOT EXISTS selections (
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    date_added TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id)
);

-- Key-value preferences
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
