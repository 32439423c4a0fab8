//! libSQL storage layer (local, embedded).
//!
//! The [`Storage`] struct wraps a libSQL database holding the lookup tables,
//! collection targets, harvested records and run history.
//!
//! **Access rules:**
//! - The collection process: read-write (sole writer) via [`Storage::open`]
//! - Reporting tools: read-only via [`Storage::open_readonly`]
//!
//! Every driver failure surfaces as [`HarvestError::Storage`].

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use harvestline_shared::{
    CollectionRun, CollectionTarget, DistinctBy, HarvestError, LookupEntry, LookupKind, NewTarget,
    Result, TargetCriteria, TargetId,
};
use libsql::params::Params;
use libsql::{Connection, Database, Value, params};
use uuid::Uuid;

const TARGET_COLUMNS: &str =
    "id, collector_id, type_id, language_code, name, status_id, created_at, updated_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvestError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO schema_migrations (version) VALUES (?1)",
                        params![i64::from(migration.version)],
                    )
                    .await
                    .map_err(db_err)?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<i64>(0).map(|v| v as u32).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup operations
    // -----------------------------------------------------------------------

    /// Find a lookup row by name.
    pub async fn find_lookup(&self, kind: LookupKind, name: &str) -> Result<Option<LookupEntry>> {
        let sql = format!(
            "SELECT id, name, created_at, updated_at FROM {} WHERE name = ?1",
            kind.table()
        );
        let mut rows = self.conn.query(&sql, params![name]).await.map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_lookup(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert a lookup row unless the name already exists.
    ///
    /// Returns the row id and whether this call created it.
    pub async fn insert_lookup(&self, kind: LookupKind, name: &str) -> Result<(i64, bool)> {
        self.check_writable()?;
        let now = now_timestamp();
        let sql = format!(
            "INSERT INTO {} (name, created_at, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO NOTHING",
            kind.table()
        );
        let inserted = self
            .conn
            .execute(&sql, params![name, now.as_str(), now.as_str()])
            .await
            .map_err(db_err)?;

        let entry = self.find_lookup(kind, name).await?.ok_or_else(|| {
            HarvestError::Storage(format!("{kind} '{name}' missing after insert"))
        })?;
        Ok((entry.id, inserted > 0))
    }

    /// List every row of a lookup table, ordered by name.
    pub async fn list_lookup(&self, kind: LookupKind) -> Result<Vec<LookupEntry>> {
        let sql = format!(
            "SELECT id, name, created_at, updated_at FROM {} ORDER BY name",
            kind.table()
        );
        let mut rows = self.conn.query(&sql, params![]).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_lookup(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Target operations
    // -----------------------------------------------------------------------

    /// Register a target if its (collector, type, language, name) key is new.
    ///
    /// Returns the target id and whether this call created it.
    pub async fn ensure_target(&self, target: &NewTarget) -> Result<(TargetId, bool)> {
        self.check_writable()?;
        let now = now_timestamp();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO collection_targets
                   (collector_id, type_id, language_code, name, status_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(collector_id, type_id, language_code, name) DO NOTHING",
                params![
                    target.collector_id,
                    target.type_id,
                    target.language_code.as_str(),
                    target.name.as_str(),
                    target.status_id,
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        let mut rows = self
            .conn
            .query(
                "SELECT id FROM collection_targets
                 WHERE collector_id = ?1 AND type_id = ?2 AND language_code = ?3 AND name = ?4",
                params![
                    target.collector_id,
                    target.type_id,
                    target.language_code.as_str(),
                    target.name.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok((row.get::<i64>(0).map_err(db_err)?, inserted > 0)),
            None => Err(HarvestError::Storage(format!(
                "target '{}' ({}) missing after insert",
                target.name, target.language_code
            ))),
        }
    }

    /// Insert many targets in one all-or-nothing transaction.
    ///
    /// Keys that already exist are skipped. Returns the number of rows created.
    pub async fn insert_targets(&self, targets: &[NewTarget]) -> Result<usize> {
        self.check_writable()?;
        if targets.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        // Dropping an uncommitted transaction rolls it back.
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let mut created = 0usize;

        for target in targets {
            let affected = tx
                .execute(
                    "INSERT INTO collection_targets
                       (collector_id, type_id, language_code, name, status_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(collector_id, type_id, language_code, name) DO NOTHING",
                    params![
                        target.collector_id,
                        target.type_id,
                        target.language_code.as_str(),
                        target.name.as_str(),
                        target.status_id,
                        now.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
            created += affected as usize;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(created)
    }

    /// Get a target by id.
    pub async fn get_target(&self, id: TargetId) -> Result<Option<CollectionTarget>> {
        let sql = format!("SELECT {TARGET_COLUMNS} FROM collection_targets WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_target(&row)?)),
            None => Ok(None),
        }
    }

    /// List every target, oldest first.
    pub async fn list_targets(&self) -> Result<Vec<CollectionTarget>> {
        self.query_targets(&TargetCriteria::default()).await
    }

    /// Run the single parametrized target query.
    pub async fn query_targets(&self, criteria: &TargetCriteria) -> Result<Vec<CollectionTarget>> {
        let (sql, values) = build_target_query(criteria);
        let mut rows = self
            .conn
            .query(&sql, Params::Positional(values))
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_target(&row)?);
        }
        Ok(results)
    }

    /// Overwrite a target's status. Returns `false` when no row has that id.
    pub async fn update_target_status(&self, id: TargetId, status_id: i64) -> Result<bool> {
        self.check_writable()?;
        let now = now_timestamp();
        let affected = self
            .conn
            .execute(
                "UPDATE collection_targets SET status_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![status_id, now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    /// Set a target's status only if its current status is one of `expected`.
    ///
    /// Returns `false` when zero rows matched (missing or already moved on).
    pub async fn update_target_status_if(
        &self,
        id: TargetId,
        status_id: i64,
        expected: &[i64],
    ) -> Result<bool> {
        self.check_writable()?;
        if expected.is_empty() {
            return Ok(false);
        }

        let placeholders: Vec<String> = (0..expected.len()).map(|i| format!("?{}", i + 4)).collect();
        let sql = format!(
            "UPDATE collection_targets SET status_id = ?1, updated_at = ?2
             WHERE id = ?3 AND status_id IN ({})",
            placeholders.join(", ")
        );

        let mut values = vec![
            Value::Integer(status_id),
            Value::Text(now_timestamp()),
            Value::Integer(id),
        ];
        values.extend(expected.iter().map(|s| Value::Integer(*s)));

        let affected = self
            .conn
            .execute(&sql, Params::Positional(values))
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    /// Delete a target and its harvested records (administrative).
    pub async fn delete_target(&self, id: TargetId) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute("DELETE FROM collection_targets WHERE id = ?1", params![id])
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Harvested record operations
    // -----------------------------------------------------------------------

    /// Store one harvested payload. Returns the record id.
    pub async fn insert_harvested_record(
        &self,
        target_id: TargetId,
        language_code: &str,
        payload_json: &str,
        content_hash: &str,
    ) -> Result<i64> {
        self.check_writable()?;
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO harvested_records (target_id, language_code, payload_json, content_hash, collected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![target_id, language_code, payload_json, content_hash, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Number of records stored for a target.
    pub async fn count_records_for_target(&self, target_id: TargetId) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM harvested_records WHERE target_id = ?1",
                params![target_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Collection run operations
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns the generated run id.
    pub async fn insert_collection_run(
        &self,
        collector_name: &str,
        status_name: &str,
    ) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO collection_runs (id, collector_name, status_name, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), collector_name, status_name, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Mark a run finished and attach its stats.
    pub async fn finish_collection_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = now_timestamp();
        self.conn
            .execute(
                "UPDATE collection_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a run by id.
    pub async fn get_collection_run(&self, run_id: &str) -> Result<Option<CollectionRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, collector_name, status_name, started_at, finished_at, stats_json
                 FROM collection_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// List runs, newest first.
    pub async fn list_collection_runs(&self, limit: u32) -> Result<Vec<CollectionRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, collector_name, status_name, started_at, finished_at, stats_json
                 FROM collection_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

/// Build the SQL and positional values for a [`TargetCriteria`].
///
/// Distinct queries keep the earliest-created row (ties broken by id) per
/// group; everything else is ordered by language code, then creation time.
fn build_target_query(criteria: &TargetCriteria) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let mut push = |column: &str, value: Value| {
        values.push(value);
        clauses.push(format!("{column} = ?{}", values.len()));
    };

    if let Some(id) = criteria.collector_id {
        push("collector_id", Value::Integer(id));
    }
    if let Some(id) = criteria.type_id {
        push("type_id", Value::Integer(id));
    }
    if let Some(code) = &criteria.language_code {
        push("language_code", Value::Text(code.clone()));
    }
    if let Some(id) = criteria.status_id {
        push("status_id", Value::Integer(id));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let sql = match criteria.distinct_by {
        None => format!(
            "SELECT {TARGET_COLUMNS} FROM collection_targets{where_sql}
             ORDER BY language_code, created_at, id"
        ),
        Some(distinct) => {
            let group = match distinct {
                DistinctBy::Type => "type_id",
                DistinctBy::Language => "language_code",
            };
            format!(
                "SELECT {TARGET_COLUMNS} FROM (
                   SELECT {TARGET_COLUMNS},
                          ROW_NUMBER() OVER (PARTITION BY {group} ORDER BY created_at, id) AS rn
                   FROM collection_targets{where_sql}
                 ) WHERE rn = 1
                 ORDER BY {group}, created_at, id"
            )
        }
    };

    (sql, values)
}

/// Fixed-width UTC timestamp; textual order equals chronological order.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HarvestError::Storage(format!("invalid date '{s}': {e}")))
}

fn db_err(e: libsql::Error) -> HarvestError {
    HarvestError::Storage(e.to_string())
}

fn row_to_lookup(row: &libsql::Row) -> Result<LookupEntry> {
    Ok(LookupEntry {
        id: row.get::<i64>(0).map_err(db_err)?,
        name: row.get::<String>(1).map_err(db_err)?,
        created_at: parse_timestamp(&row.get::<String>(2).map_err(db_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(3).map_err(db_err)?)?,
    })
}

/// Read a nullable TEXT column. NULL maps to `None`; any other type is an error.
fn optional_text(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx).map_err(db_err)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(HarvestError::Storage(format!(
            "column {idx}: expected TEXT or NULL, got {other:?}"
        ))),
    }
}

fn row_to_run(row: &libsql::Row) -> Result<CollectionRun> {
    let finished_at = match optional_text(row, 4)? {
        Some(s) => Some(parse_timestamp(&s)?),
        None => None,
    };
    let stats = match optional_text(row, 5)? {
        Some(s) => Some(serde_json::from_str(&s)?),
        None => None,
    };

    Ok(CollectionRun {
        id: row.get::<String>(0).map_err(db_err)?,
        collector_name: row.get::<String>(1).map_err(db_err)?,
        status_name: row.get::<String>(2).map_err(db_err)?,
        started_at: parse_timestamp(&row.get::<String>(3).map_err(db_err)?)?,
        finished_at,
        stats,
    })
}

/// Convert a database row to a [`CollectionTarget`].
fn row_to_target(row: &libsql::Row) -> Result<CollectionTarget> {
    Ok(CollectionTarget {
        id: row.get::<i64>(0).map_err(db_err)?,
        collector_id: row.get::<i64>(1).map_err(db_err)?,
        type_id: row.get::<i64>(2).map_err(db_err)?,
        language_code: row.get::<String>(3).map_err(db_err)?,
        name: row.get::<String>(4).map_err(db_err)?,
        status_id: row.get::<i64>(5).map_err(db_err)?,
        created_at: parse_timestamp(&row.get::<String>(6).map_err(db_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(7).map_err(db_err)?)?,
    })
}
