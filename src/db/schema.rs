/// Persistent TTL cache and outbox tables.
pub const SCHEMA: &str = r#"
-- Catalog pages; expires_at is unix millis
CREATE TABLE IF NOT EXISTS catalog_pages (
    key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_catalog_pages_expires ON catalog_pages(expires_at);

-- Pending writes awaiting delivery; timestamps are unix millis
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    last_attempt INTEGER,
    delivered_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(delivered_at, created_at);
"#;
