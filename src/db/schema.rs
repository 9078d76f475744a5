/// Schema for cache partitions and the pending sync queue.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named, versioned cache partitions
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by canonical request hash
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    accessed INTEGER NOT NULL,
    PRIMARY KEY (partition, key_hash),
    FOREIGN KEY (partition) REFERENCES partitions(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_lru ON entries(partition, accessed);

-- Writes queued while offline, replayed by background sync
CREATE TABLE IF NOT EXISTS pending_ops (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
