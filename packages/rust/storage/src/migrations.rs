//! SQL migration definitions for the Harvestline database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements; the version is recorded in
//! `schema_migrations` once the batch succeeds.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: lookups, collection_targets, harvested_records, collection_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Lookup tables (name <-> surrogate id)
CREATE TABLE IF NOT EXISTS collector_names (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_types (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_statuses (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Core status vocabulary
INSERT OR IGNORE INTO collection_statuses (name, created_at, updated_at) VALUES
    ('not_collected', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    ('in_progress',   strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    ('collected',     strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    ('failed',        strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    ('needs_retry',   strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    ('skipped',       strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));

-- One row per logical work item
CREATE TABLE IF NOT EXISTS collection_targets (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    collector_id  INTEGER NOT NULL REFERENCES collector_names(id),
    type_id       INTEGER NOT NULL REFERENCES collection_types(id),
    language_code TEXT NOT NULL,
    name          TEXT NOT NULL,
    status_id     INTEGER NOT NULL REFERENCES collection_statuses(id),
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE(collector_id, type_id, language_code, name)
);

CREATE INDEX IF NOT EXISTS idx_targets_collector_status ON collection_targets(collector_id, status_id);
CREATE INDEX IF NOT EXISTS idx_targets_type_status ON collection_targets(type_id, status_id);

-- Harvested payloads written by the batch writer
CREATE TABLE IF NOT EXISTS harvested_records (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id     INTEGER NOT NULL REFERENCES collection_targets(id) ON DELETE CASCADE,
    language_code TEXT NOT NULL,
    payload_json  TEXT NOT NULL,
    content_hash  TEXT NOT NULL,
    collected_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_target ON harvested_records(target_id);

-- Run history
CREATE TABLE IF NOT EXISTS collection_runs (
    id             TEXT PRIMARY KEY,
    collector_name TEXT NOT NULL,
    status_name    TEXT NOT NULL,
    started_at     TEXT NOT NULL,
    finished_at    TEXT,
    stats_json     TEXT
);
"#,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_ascend() {
        let versions: Vec<u32> = all_migrations().iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert_eq!(versions.first(), Some(&1));
    }
}
